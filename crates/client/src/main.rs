//! eventhub-chat - join a chat channel from the terminal.
//!
//! Inbound events are printed as they arrive. Each stdin line is sent as a
//! chat message, except for `/typing`, `/read <id>` and `/image <url>`.

#[cfg(not(target_arch = "wasm32"))]
mod cli {
    use std::sync::Arc;

    use anyhow::{Context, Result};
    use clap::Parser;
    use eventhub_client::{
        logging, ApiClient, ChannelType, ChatSocket, ClientConfig, EventKind, LifecycleEvent,
        LifecycleKind, NotificationSocket, ReconnectPolicy, Reconnector, StaticToken, TokenSource,
    };
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[derive(Debug, Parser)]
    #[command(name = "eventhub-chat", about = "Relay stdin to a real-time chat channel")]
    struct Args {
        /// Channel identifier
        channel: String,

        /// Channel type: personal or group
        #[arg(long = "type", default_value = "personal")]
        channel_type: ChannelType,

        /// Socket token. Fetched from the API when omitted.
        #[arg(long)]
        token: Option<String>,

        /// Bearer token for API requests
        #[arg(long, env = "EVENTHUB_BEARER")]
        bearer: Option<String>,

        /// Do not reconnect after the server drops the connection
        #[arg(long)]
        no_reconnect: bool,

        /// Also follow this user's notification stream
        #[arg(long)]
        notify_user: Option<String>,
    }

    #[derive(Debug, PartialEq)]
    enum Command<'a> {
        Typing,
        Read(&'a str),
        Image(&'a str),
        Message(&'a str),
    }

    fn parse_command(line: &str) -> Option<Command<'_>> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        Some(match line.split_once(' ') {
            _ if line == "/typing" => Command::Typing,
            Some(("/read", id)) => Command::Read(id.trim()),
            Some(("/image", image)) => Command::Image(image.trim()),
            _ => Command::Message(line),
        })
    }

    pub async fn run() -> Result<()> {
        logging::init("eventhub_client=info");
        let args = Args::parse();

        let config = ClientConfig::from_env().context("invalid endpoint configuration")?;
        let mut api = ApiClient::from_config(&config);
        if let Some(bearer) = &args.bearer {
            api = api.with_bearer(bearer.clone());
        }

        let tokens: Arc<dyn TokenSource> = match args.token {
            Some(token) => Arc::new(StaticToken(token)),
            None => Arc::new(api),
        };
        let token = tokens.token().await.context("fetching socket token")?;

        let notifications = args.notify_user.as_deref().map(|user_id| {
            let stream = NotificationSocket::for_platform(config.clone(), Arc::clone(&tokens));
            stream.on(|value| println!("[notification] {}", value));
            stream.connect(user_id, &token);
            stream
        });

        let socket = ChatSocket::for_platform(config);
        for kind in EventKind::ALL {
            socket.on(kind, move |envelope| println!("[{}] {}", kind, envelope.payload));
        }
        socket.on_lifecycle(LifecycleKind::Opened, |event| {
            eprintln!("connected to {}", event.channel());
        });
        socket.on_lifecycle(LifecycleKind::Closed, |event| {
            if let LifecycleEvent::Closed { channel, reason } = event {
                eprintln!("connection to {} closed ({:?})", channel, reason);
            }
        });

        let _reconnector = (!args.no_reconnect)
            .then(|| Reconnector::attach(&socket, ReconnectPolicy::default(), tokens));

        socket.connect(&args.channel, &token, args.channel_type);

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            match parse_command(&line) {
                Some(Command::Typing) => socket.send_typing(),
                Some(Command::Read(id)) => socket.mark_read(id),
                Some(Command::Image(image)) => socket.send_image(image),
                Some(Command::Message(text)) => socket.send_message(text),
                None => {}
            }
        }

        socket.disconnect();
        if let Some(stream) = notifications {
            stream.disconnect();
        }
        Ok(())
    }

}

#[cfg(not(target_arch = "wasm32"))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run().await
}

#[cfg(target_arch = "wasm32")]
fn main() {}
