//! Browser WebSocket transport using `web_sys::WebSocket`.

use futures_channel::mpsc::unbounded;
use futures_util::StreamExt;
use url::Url;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::spawn_local;
use web_sys::{js_sys, CloseEvent, ErrorEvent, Event, MessageEvent, WebSocket};

use super::{error_detail, ChannelLink, Link, LinkEvents, Outgoing, Transport, TransportError};

/// Opens links with the browser's WebSocket API.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserTransport;

impl Transport for BrowserTransport {
    fn open(&self, url: &Url, events: LinkEvents) -> Result<Box<dyn Link>, TransportError> {
        let ws = WebSocket::new(url.as_str())
            .map_err(|e| TransportError::Open(format!("Failed to create WebSocket: {:?}", e)))?;

        let on_open = events.clone();
        let onopen_callback = Closure::wrap(Box::new(move |_: Event| {
            on_open.opened();
        }) as Box<dyn FnMut(Event)>);
        ws.set_onopen(Some(onopen_callback.as_ref().unchecked_ref()));
        onopen_callback.forget();

        let on_message = events.clone();
        let onmessage_callback = Closure::wrap(Box::new(move |e: MessageEvent| {
            if let Ok(text) = e.data().dyn_into::<js_sys::JsString>() {
                let text: String = text.into();
                on_message.frame(text);
            }
        }) as Box<dyn FnMut(MessageEvent)>);
        ws.set_onmessage(Some(onmessage_callback.as_ref().unchecked_ref()));
        onmessage_callback.forget();

        let on_error = events.clone();
        // Browsers fire a plain `Event` here; only some carry a message
        let onerror_callback = Closure::wrap(Box::new(move |e: Event| {
            let message = e.dyn_ref::<ErrorEvent>().map(ErrorEvent::message);
            on_error.error(error_detail(message.as_deref()));
        }) as Box<dyn FnMut(Event)>);
        ws.set_onerror(Some(onerror_callback.as_ref().unchecked_ref()));
        onerror_callback.forget();

        let on_close = events.clone();
        let onclose_callback = Closure::wrap(Box::new(move |e: CloseEvent| {
            crate::log_debug!("WebSocket {} onclose: code {}", on_close.id(), e.code());
            on_close.closed();
        }) as Box<dyn FnMut(CloseEvent)>);
        ws.set_onclose(Some(onclose_callback.as_ref().unchecked_ref()));
        onclose_callback.forget();

        // Send task owns the socket; the link only holds the queue
        let (sender, mut receiver) = unbounded();
        let connection = events.id();
        spawn_local(async move {
            while let Some(out) = receiver.next().await {
                match out {
                    Outgoing::Text(text) => {
                        if ws.ready_state() != WebSocket::OPEN {
                            crate::log_warn!("WebSocket {} not open, dropping frame", connection);
                            continue;
                        }
                        if let Err(e) = ws.send_with_str(&text) {
                            crate::log_error!("Send failed on {}: {:?}", connection, e);
                        }
                    }
                    Outgoing::Close => break,
                }
            }
            let _ = ws.close();
        });

        Ok(Box::new(ChannelLink::new(sender)))
    }
}
