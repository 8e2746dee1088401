//! skylink-relay - rendezvous relay for drone, controller and viewers
//!
//! Usage: `skylink-relay [config-path]` (defaults to `relay.toml`).
//!
//! The relay reads operator commands from stdin; type `help` for the list.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use skylink::relay::{Command, Console, Outcome, RelayConfig, RelayEvent, RelayServer, console};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const DEFAULT_CONFIG: &str = "relay.toml";

/// Pause between stopping and rebinding on restart.
const RESTART_PAUSE: Duration = Duration::from_millis(200);

fn config_path() -> PathBuf {
    env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG))
}

async fn start(config: &RelayConfig) -> Option<RelayServer> {
    match RelayServer::bind(config.clone()).await {
        Ok((server, events)) => {
            tokio::spawn(log_events(events));
            Some(server)
        }
        Err(e) => {
            log::error!("relay initialization failed: {}", e);
            None
        }
    }
}

async fn log_events(mut events: mpsc::Receiver<RelayEvent>) {
    while let Some(event) = events.recv().await {
        log::debug!("{:?}", event);
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("skylink-relay v{} starting", env!("CARGO_PKG_VERSION"));
    log::info!("{}", console::HELP);

    let path = config_path();
    let config = match RelayConfig::load_or_create(&path) {
        Ok(config) => config,
        Err(e) => {
            log::warn!("config {} unusable ({}), using defaults", path.display(), e);
            RelayConfig::default()
        }
    };
    let mut console = Console::new(path, config);
    let mut server = start(console.config()).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command: Command = match line.parse() {
            Ok(command) => command,
            Err(e) => {
                log::warn!("{}", e);
                continue;
            }
        };

        let value = match command.prompt() {
            Some(prompt) => {
                log::info!("{}", prompt);
                lines.next_line().await?
            }
            None => None,
        };

        match console.execute(command, value.as_deref()) {
            Ok(Outcome::Help) => log::info!("{}", console::HELP),
            Ok(Outcome::Exit) => {
                log::info!("exiting");
                break;
            }
            Ok(Outcome::Restart) => {
                log::info!("restarting");
                if let Some(running) = server.take() {
                    running.shutdown();
                }
                tokio::time::sleep(RESTART_PAUSE).await;
                server = start(console.config()).await;
            }
            Ok(Outcome::Updated {
                message,
                restart_required,
            }) => {
                log::info!("{}", message);
                if let Some(running) = &server {
                    running.apply_keys(console.config());
                }
                if restart_required {
                    log::info!("a restart is required to apply the change");
                }
            }
            Err(e) => log::warn!("{}", e),
        }
    }

    if let Some(running) = server.take() {
        running.shutdown();
    }
    Ok(())
}
