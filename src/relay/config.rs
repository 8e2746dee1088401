//! Relay configuration file.
//!
//! Stored as TOML next to the executable. A missing file is created with
//! defaults on first start.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use crate::core::constants::{
    DEFAULT_KEY, DEFAULT_PORT, DEFAULT_VIEWERS, MAX_KEY_CHARS, MAX_VIEWERS, MIN_PORT,
};

/// Relay settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Key expected from drones and controllers.
    pub key: String,
    /// Key expected from viewers.
    pub viewer_key: String,
    /// Viewer slots, besides the drone and controller slots.
    pub viewers: usize,
    /// UDP port; 0 binds an ephemeral port.
    pub port: u16,
    /// Listen address.
    pub listen: IpAddr,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_KEY.to_string(),
            viewer_key: DEFAULT_KEY.to_string(),
            viewers: DEFAULT_VIEWERS,
            port: DEFAULT_PORT,
            listen: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

fn check_key(key: &str) -> Result<(), ConfigError> {
    let chars = key.chars().count();
    if chars > MAX_KEY_CHARS {
        return Err(ConfigError::KeyTooLong { chars });
    }
    Ok(())
}

fn check_viewers(viewers: usize) -> Result<(), ConfigError> {
    if viewers > MAX_VIEWERS {
        return Err(ConfigError::ViewersOutOfRange(viewers));
    }
    Ok(())
}

impl RelayConfig {
    /// Check every field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_key(&self.key)?;
        check_key(&self.viewer_key)?;
        check_viewers(self.viewers)?;
        if self.port != 0 && self.port < MIN_PORT {
            return Err(ConfigError::PortOutOfRange(self.port));
        }
        Ok(())
    }

    /// Drone slot, controller slot and the viewer slots.
    pub fn slot_count(&self) -> usize {
        self.viewers + 2
    }

    /// Address the relay binds.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen, self.port)
    }

    /// Read and validate a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: RelayConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, or write the defaults there when it does not exist.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            let config = Self::load(path)?;
            log::info!("config loaded from {}", path.display());
            return Ok(config);
        }
        let config = Self::default();
        config.save(path)?;
        log::info!("new config created at {}, using the default key", path.display());
        Ok(config)
    }

    /// Write as TOML.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Set the drone and controller key.
    pub fn set_key(&mut self, key: impl Into<String>) -> Result<(), ConfigError> {
        let key = key.into();
        check_key(&key)?;
        self.key = key;
        Ok(())
    }

    /// Set the viewer key.
    pub fn set_viewer_key(&mut self, key: impl Into<String>) -> Result<(), ConfigError> {
        let key = key.into();
        check_key(&key)?;
        self.viewer_key = key;
        Ok(())
    }

    /// Set the number of viewer slots.
    pub fn set_viewers(&mut self, viewers: usize) -> Result<(), ConfigError> {
        check_viewers(viewers)?;
        self.viewers = viewers;
        Ok(())
    }

    /// Set the UDP port; must be at least 1024.
    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port < MIN_PORT {
            return Err(ConfigError::PortOutOfRange(port));
        }
        self.port = port;
        Ok(())
    }
}
