//! In-memory transport for driving a socket from tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use url::Url;

use super::connection::{Link, LinkEvents, Transport, TransportError};

#[derive(Default)]
struct Script {
    links: Vec<LinkProbe>,
    /// `open {path}` / `close {path}` in the order the socket asked for them.
    journal: Vec<String>,
    refuse: Option<TransportError>,
}

/// Records every link a socket opens and lets the test play the server.
#[derive(Clone, Default)]
pub(crate) struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

/// Test-side view of one opened link.
#[derive(Clone)]
pub(crate) struct LinkProbe {
    pub url: Url,
    pub events: LinkEvents,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl LinkProbe {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Whether the socket severed this link.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn open(&self) {
        self.events.opened();
    }

    pub fn frame(&self, text: &str) {
        self.events.frame(text);
    }

    pub fn error(&self, detail: &str) {
        self.events.error(detail);
    }

    /// Close from the server side.
    pub fn close_remote(&self) {
        self.events.closed();
    }
}

struct ScriptedLink {
    probe: LinkProbe,
    script: Arc<Mutex<Script>>,
}

impl Link for ScriptedLink {
    fn send_text(&self, text: String) -> Result<(), TransportError> {
        if self.probe.is_closed() {
            return Err(TransportError::Closed);
        }
        self.probe.sent.lock().push(text);
        Ok(())
    }

    fn close(&self) {
        if !self.probe.closed.swap(true, Ordering::SeqCst) {
            self.script
                .lock()
                .journal
                .push(format!("close {}", self.probe.url.path()));
        }
    }
}

impl ScriptedTransport {
    /// Make every following `open` fail with `error`.
    pub fn refuse_with(&self, error: TransportError) {
        self.script.lock().refuse = Some(error);
    }

    pub fn link(&self, index: usize) -> LinkProbe {
        self.script.lock().links[index].clone()
    }

    pub fn link_count(&self) -> usize {
        self.script.lock().links.len()
    }

    pub fn journal(&self) -> Vec<String> {
        self.script.lock().journal.clone()
    }
}

impl Transport for ScriptedTransport {
    fn open(&self, url: &Url, events: LinkEvents) -> Result<Box<dyn Link>, TransportError> {
        let mut script = self.script.lock();
        if let Some(error) = script.refuse.clone() {
            return Err(error);
        }
        let probe = LinkProbe {
            url: url.clone(),
            events,
            sent: Arc::default(),
            closed: Arc::default(),
        };
        script.journal.push(format!("open {}", url.path()));
        script.links.push(probe.clone());
        Ok(Box::new(ScriptedLink {
            probe,
            script: Arc::clone(&self.script),
        }))
    }
}
