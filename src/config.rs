//! Server configuration parsed from environment variables.

use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_STATIC_DIR: &str = "client";
pub const DEFAULT_ROOM: &str = "default";
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}={value:?}: {reason}")]
    Invalid { var: &'static str, value: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    /// Directory served as static files at `/`.
    pub static_dir: PathBuf,
    /// Room joined when a JOIN omits `room`.
    pub default_room: String,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            static_dir: PathBuf::from(DEFAULT_STATIC_DIR),
            default_room: DEFAULT_ROOM.to_owned(),
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}

impl ServerConfig {
    /// Build config from the process environment.
    ///
    /// Optional:
    /// - `BIND_ADDR`: default `0.0.0.0`
    /// - `PORT`: default 8080
    /// - `STATIC_DIR`: default `client`
    /// - `DEFAULT_ROOM`: default `default`
    /// - `OUTBOUND_QUEUE`: default 256, at least 1
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for any value that fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for any value that fails to parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let bind_addr = parse_var("BIND_ADDR", lookup("BIND_ADDR"), defaults.bind_addr)?;
        let port = parse_var("PORT", lookup("PORT"), defaults.port)?;
        let static_dir = lookup("STATIC_DIR").map_or(defaults.static_dir, PathBuf::from);
        let default_room = lookup("DEFAULT_ROOM")
            .filter(|room| !room.trim().is_empty())
            .unwrap_or(defaults.default_room);

        let outbound_queue = parse_var("OUTBOUND_QUEUE", lookup("OUTBOUND_QUEUE"), defaults.outbound_queue)?;
        if outbound_queue == 0 {
            return Err(ConfigError::Invalid {
                var: "OUTBOUND_QUEUE",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self { bind_addr, port, static_dir, default_room, outbound_queue })
    }

    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

fn parse_var<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = raw else {
        return Ok(default);
    };
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::Invalid { var, value: raw.clone(), reason: e.to_string() })
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
