//! Operator console commands.
//!
//! Commands are typed by name or number. The ones that change a setting read
//! their value from the following line; accepted changes are written back
//! to the configuration file straight away.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use super::config::RelayConfig;
use super::error::ConfigError;

/// Command list shown by `help`.
pub const HELP: &str = "\
Command list:
0. help
1. exit
2. restart
3. setPort
4. setKey
5. setViewerKey
6. setMaxViewers";

/// Console failure.
#[derive(Debug, Error)]
pub enum ConsoleError {
    /// Nothing matches the typed command.
    #[error("command \"{0}\" not found")]
    UnknownCommand(String),

    /// The value line is not a number.
    #[error("wrong input: \"{0}\" is not a number")]
    InvalidNumber(String),

    /// A value-taking command got no value line.
    #[error("{0:?} needs a value")]
    MissingValue(Command),

    /// The new value was rejected or could not be saved.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Console command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Print the command list.
    Help,
    /// Stop the relay and exit.
    Exit,
    /// Rebind with the current configuration.
    Restart,
    /// Change the UDP port (takes effect on restart).
    SetPort,
    /// Change the drone and controller key.
    SetKey,
    /// Change the viewer key.
    SetViewerKey,
    /// Change the number of viewer slots (takes effect on restart).
    SetMaxViewers,
}

impl FromStr for Command {
    type Err = ConsoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let command = s.trim().to_lowercase();
        match command.as_str() {
            "" | "help" | "0" => Ok(Command::Help),
            "exit" | "1" => Ok(Command::Exit),
            "restart" | "2" => Ok(Command::Restart),
            "setport" | "3" => Ok(Command::SetPort),
            "setkey" | "4" => Ok(Command::SetKey),
            "setviewerkey" | "5" => Ok(Command::SetViewerKey),
            "setmaxviewers" | "6" => Ok(Command::SetMaxViewers),
            _ => Err(ConsoleError::UnknownCommand(command)),
        }
    }
}

impl Command {
    /// Whether the command reads a value from the next line.
    pub fn takes_value(self) -> bool {
        matches!(
            self,
            Command::SetPort | Command::SetKey | Command::SetViewerKey | Command::SetMaxViewers
        )
    }

    /// Prompt shown before reading the value.
    pub fn prompt(self) -> Option<&'static str> {
        match self {
            Command::SetPort => Some("Enter the new port:"),
            Command::SetKey => Some("Enter the new key:"),
            Command::SetViewerKey => Some("Enter the new viewer key:"),
            Command::SetMaxViewers => Some("Enter the new max viewers count:"),
            _ => None,
        }
    }
}

/// What the caller should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Print [`HELP`].
    Help,
    /// Stop the relay and exit.
    Exit,
    /// Stop the relay and bind it again.
    Restart,
    /// A setting changed and was saved.
    Updated {
        /// Message for the operator.
        message: String,
        /// Whether the running relay must restart to apply it. Key changes
        /// reach a running relay through
        /// [`RelayServer::apply_keys`](crate::relay::RelayServer::apply_keys).
        restart_required: bool,
    },
}

/// Applies commands to a configuration backed by a file.
#[derive(Debug)]
pub struct Console {
    path: PathBuf,
    config: RelayConfig,
}

fn parse_number<T: FromStr>(value: &str) -> Result<T, ConsoleError> {
    let value = value.trim();
    value
        .parse()
        .map_err(|_| ConsoleError::InvalidNumber(value.to_string()))
}

impl Console {
    /// Console editing `config`, saved to `path`.
    pub fn new(path: impl Into<PathBuf>, config: RelayConfig) -> Self {
        Self {
            path: path.into(),
            config,
        }
    }

    /// Current configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Configuration file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `command`; `value` is the line read after a value-taking command.
    pub fn execute(
        &mut self,
        command: Command,
        value: Option<&str>,
    ) -> Result<Outcome, ConsoleError> {
        let outcome = match command {
            Command::Help => return Ok(Outcome::Help),
            Command::Exit => return Ok(Outcome::Exit),
            Command::Restart => return Ok(Outcome::Restart),
            Command::SetPort => {
                let port = parse_number(value.ok_or(ConsoleError::MissingValue(command))?)?;
                self.config.set_port(port)?;
                Outcome::Updated {
                    message: format!("port has been set to {}", port),
                    restart_required: true,
                }
            }
            Command::SetKey => {
                let key = value.ok_or(ConsoleError::MissingValue(command))?;
                self.config.set_key(key.trim_end_matches(['\r', '\n']))?;
                Outcome::Updated {
                    message: "key has been updated".to_string(),
                    restart_required: false,
                }
            }
            Command::SetViewerKey => {
                let key = value.ok_or(ConsoleError::MissingValue(command))?;
                self.config
                    .set_viewer_key(key.trim_end_matches(['\r', '\n']))?;
                Outcome::Updated {
                    message: "viewer key has been updated".to_string(),
                    restart_required: false,
                }
            }
            Command::SetMaxViewers => {
                let viewers = parse_number(value.ok_or(ConsoleError::MissingValue(command))?)?;
                self.config.set_viewers(viewers)?;
                Outcome::Updated {
                    message: format!("viewers count has been set to {}", viewers),
                    restart_required: true,
                }
            }
        };
        self.config.save(&self.path)?;
        Ok(outcome)
    }
}
