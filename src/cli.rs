use chat_session::{ChatEvent, SessionObserver};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "chatsession")]
#[command(about = "Chat client with session keep-alive and history replay")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CHAT_SESSION_GIT_SHA"), ")"))]
pub struct Cli {
    /// Run the demo chat server instead of a client
    #[arg(long)]
    pub serve: bool,

    /// Port for the chat service (overrides the port of server.address)
    #[arg(long)]
    pub port: Option<u16>,

    /// Port for push subscribers (server mode)
    #[arg(long)]
    pub subscriber_port: Option<u16>,

    /// Chat service address, host:port (overrides server.address)
    #[arg(long)]
    pub address: Option<String>,

    #[arg(short, long)]
    pub user: Option<String>,

    #[arg(short, long)]
    pub password: Option<String>,

    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Only show events that arrive after attaching
    #[arg(long)]
    pub no_replay: bool,

    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,
}

/// Replaces the port of a `host:port` address.
pub fn with_port(address: &str, port: u16) -> String {
    match address.rsplit_once(':') {
        Some((host, _)) => format!("{}:{}", host, port),
        None => format!("{}:{}", address, port),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Why the console stopped receiving events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    Error(String),
    Inactivity,
}

/// Prints session callbacks to stdout and reports the end of the session.
pub struct ConsoleObserver {
    format: OutputFormat,
    ended: mpsc::UnboundedSender<SessionEnd>,
}

impl ConsoleObserver {
    pub fn new(format: OutputFormat, ended: mpsc::UnboundedSender<SessionEnd>) -> Self {
        Self { format, ended }
    }

    fn render_roster(&self, roster: &[String]) -> String {
        match self.format {
            OutputFormat::Text => format!("* present: {}", roster.join(", ")),
            OutputFormat::Json => json!({ "kind": "roster", "names": roster }).to_string(),
        }
    }

    fn render_event(&self, event: &ChatEvent) -> String {
        match self.format {
            OutputFormat::Text => event.to_string(),
            OutputFormat::Json => serde_json::to_string(event).unwrap_or_default(),
        }
    }

    fn render_end(&self, end: &SessionEnd) -> String {
        match (self.format, end) {
            (OutputFormat::Text, SessionEnd::Error(message)) => {
                format!("* session lost: {}", message)
            }
            (OutputFormat::Text, SessionEnd::Inactivity) => {
                "* session closed after inactivity".to_string()
            }
            (OutputFormat::Json, SessionEnd::Error(message)) => {
                json!({ "kind": "error", "message": message }).to_string()
            }
            (OutputFormat::Json, SessionEnd::Inactivity) => {
                json!({ "kind": "inactivity" }).to_string()
            }
        }
    }

    fn end(&self, end: SessionEnd) {
        println!("{}", self.render_end(&end));
        let _ = self.ended.send(end);
    }
}

impl SessionObserver for ConsoleObserver {
    fn on_init(&self, roster: &[String]) {
        println!("{}", self.render_roster(roster));
    }

    fn on_event(&self, event: &ChatEvent) {
        println!("{}", self.render_event(event));
    }

    fn on_error(&self, message: &str) {
        self.end(SessionEnd::Error(message.to_string()));
    }

    fn on_inactivity(&self) {
        self.end(SessionEnd::Inactivity);
    }
}
