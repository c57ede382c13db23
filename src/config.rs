use std::{env, net::SocketAddr, time::Duration};

use thiserror::Error;

use crate::mcp::{EngineOptions, ServerInfo};

const DEFAULT_SERVER_NAME: &str = "EoF MCP Server";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: String,
    pub bind_port: u16,
    pub server_name: String,
    pub server_title: String,
    pub server_version: String,
    pub instructions: Option<String>,
    pub log_filter: String,
    pub session_idle_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("invalid bind address or port")]
    InvalidSocket,
    #[error("MCP_SERVER_NAME must not be empty")]
    EmptyServerName,
    #[error("MCP_SESSION_IDLE_SECS must be a positive number of seconds")]
    InvalidIdleTimeout,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup, `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let bind_addr = read("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string());
        let bind_port = read("BIND_PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(6605);
        let idle_secs = read("MCP_SESSION_IDLE_SECS")
            .map(|value| match value.parse::<u64>() {
                Ok(secs) if secs > 0 => Ok(secs),
                _ => Err(ConfigError::InvalidIdleTimeout),
            })
            .transpose()?;

        let server_name = match lookup("MCP_SERVER_NAME") {
            Some(name) if name.trim().is_empty() => return Err(ConfigError::EmptyServerName),
            Some(name) => name.trim().to_string(),
            None => DEFAULT_SERVER_NAME.to_string(),
        };
        let server_title = read("MCP_SERVER_TITLE").unwrap_or_else(|| server_name.clone());
        let server_version =
            read("MCP_SERVER_VERSION").unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

        let config = Self {
            bind_addr,
            bind_port,
            server_name,
            server_title,
            server_version,
            instructions: read("MCP_SERVER_INSTRUCTIONS"),
            log_filter: read("MCP_LOG").unwrap_or_else(|| "info".to_string()),
            session_idle_timeout: idle_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| EngineOptions::default().session_idle_timeout),
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            session_idle_timeout: self.session_idle_timeout,
            ..EngineOptions::default()
        }
    }

    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            name: self.server_name.clone(),
            title: self.server_title.clone(),
            version: self.server_version.clone(),
            instructions: self.instructions.clone(),
        }
    }
}
