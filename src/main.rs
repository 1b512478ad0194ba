mod cli;

use anyhow::{Context, Result};
use chat_session::config::ChatConfig;
use chat_session::retry::{establish_with_retry, RetryPolicy};
use chat_session::rpc_remote::RpcAuthenticator;
use chat_session::server::start_chat_server;
use chat_session::session_log::session_log;
use chat_session::{Credentials, SerialExecutor, SessionManager};
use clap::Parser;
use cli::{with_port, Cli, ConsoleObserver, OutputFormat};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

/// Time given to the background logout before the process exits.
const RELEASE_GRACE: Duration = Duration::from_millis(300);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ChatConfig::load_or_default(cli.config.as_deref())?;

    if let Some(address) = &cli.address {
        config.server.address = address.clone();
    }
    if let Some(port) = cli.port {
        config.server.address = with_port(&config.server.address, port);
    }
    if let Some(port) = cli.subscriber_port {
        config.server.subscriber_port = port;
    }

    if cli.serve {
        run_server(config).await
    } else {
        run_client(cli, config).await
    }
}

async fn run_server(config: ChatConfig) -> Result<()> {
    if config.server.accounts.is_empty() {
        eprintln!("Warning: no accounts configured, every login will be rejected");
    }

    let handle = start_chat_server(&config.server).await?;
    eprintln!(
        "Chat server on {} (subscribers on port {}), Ctrl-C to stop",
        handle.address, handle.subscriber_port
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    session_log("main", "Shutting down chat server");
    handle.shutdown();
    Ok(())
}

async fn run_client(cli: Cli, config: ChatConfig) -> Result<()> {
    let user = cli.user.context("--user is required in client mode")?;
    let password = cli
        .password
        .context("--password is required in client mode")?;
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let authenticator = Arc::new(RpcAuthenticator::new(config.server.address.clone()));
    let manager = SessionManager::new(
        config.session.clone(),
        authenticator,
        Arc::new(SerialExecutor::spawn()),
    );

    let info = establish_with_retry(
        &manager,
        &Credentials::new(user, password),
        RetryPolicy::from(&config.retry),
    )
    .await
    .with_context(|| format!("Could not connect to {}", config.server.address))?;
    eprintln!(
        "Connected to {} (keep-alive every {:?}); type /quit to leave",
        info.hostname, info.refresh_interval
    );

    let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();
    manager.attach_observer(Arc::new(ConsoleObserver::new(format, ended_tx)), !cli.no_replay)?;

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("Failed to read stdin")? {
                    Some(line) if line.trim() == "/quit" => {
                        manager.logout();
                        break;
                    }
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => {
                        if !manager.send(line) {
                            break;
                        }
                    }
                    None => {
                        manager.logout();
                        break;
                    }
                }
            }
            _ = ended_rx.recv() => break,
        }
    }

    tokio::time::sleep(RELEASE_GRACE).await;
    Ok(())
}
