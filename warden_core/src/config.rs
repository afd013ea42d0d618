//! Server connection configuration.
//!
//! Servers are described in a YAML file keyed by a user-chosen name:
//!
//! ```yaml
//! primary:
//!   host: sql1.example.com
//!   username: warden
//!   password: hunter2
//!   default_database: master
//! ```
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use tracing::debug;
use yaml_peg::serde as yaml;

const DEFAULT_PORT: u16 = 1433;
const DEFAULT_DATABASE: &str = "master";
const CONFIG_DIR: &str = ".warden";
const CONFIG_FILE: &str = "servers.yaml";

/// How to reach one server.
#[derive(Clone, Deserialize, Serialize, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database used for server-scoped operations and as the pool cache's
    /// pre-established connection.
    #[serde(default = "default_database")]
    pub default_database: String,
    /// SQL authentication user.
    pub username: String,
    /// SQL authentication password.
    pub password: String,
    /// Require an encrypted connection.
    #[serde(default = "default_true")]
    pub encrypt: bool,
    /// Accept the server certificate without validation.
    #[serde(default)]
    pub trust_cert: bool,
    /// Upper bound of connections per database pool.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
    /// Seconds to wait for a pooled connection.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Reported to the server as the client application name.
    #[serde(default = "default_application_name")]
    pub application_name: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_database() -> String {
    DEFAULT_DATABASE.to_owned()
}

fn default_true() -> bool {
    true
}

fn default_pool_max_size() -> u32 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_application_name() -> String {
    "warden".to_owned()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            default_database: default_database(),
            username: String::new(),
            password: String::new(),
            encrypt: default_true(),
            trust_cert: false,
            pool_max_size: default_pool_max_size(),
            connect_timeout_secs: default_connect_timeout_secs(),
            application_name: default_application_name(),
        }
    }
}

impl ServerConfig {
    /// Basic constructor with defaults for everything but the endpoint and
    /// credentials.
    pub fn new(host: &str, port: u16, username: &str, password: &str) -> Self {
        Self {
            host: host.to_owned(),
            port,
            username: username.to_owned(),
            password: password.to_owned(),
            ..Default::default()
        }
    }

    /// Perform simple field validation to catch bad input.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty()
            || self.username.is_empty()
            || self.password.is_empty()
        {
            bail!(
                "server config for {:?} is missing host, username or password",
                self.host
            );
        }
        if self.pool_max_size == 0 {
            bail!("pool_max_size must be at least 1");
        }
        if self.default_database.trim().is_empty() {
            bail!("default_database must not be empty");
        }
        Ok(())
    }

    /// `host:port`, the first component of every identifier.
    pub fn server_id(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The default location of the server file, `~/.warden/servers.yaml`.
pub fn default_path() -> Option<PathBuf> {
    home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Read every named server from `path`.
pub fn read_from_file<P: AsRef<Path>>(path: P) -> Result<HashMap<String, ServerConfig>> {
    debug!("Trying to read server config from {:?}", path.as_ref());
    let raw = fs::read_to_string(&path).context("Reading server config file")?;
    parse(&raw)
}

/// Parse a YAML document of named servers and validate each of them.
pub fn parse(raw: &str) -> Result<HashMap<String, ServerConfig>> {
    let mut docs = yaml::from_str::<HashMap<String, ServerConfig>>(raw)
        .context("Deserializing server config")?;
    let servers = docs
        .pop()
        .ok_or_else(|| anyhow!["server config file is empty"])?;
    for (name, server) in &servers {
        server
            .validate()
            .with_context(|| format!("validating server {name}"))?;
    }
    Ok(servers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_optional_fields() -> Result<()> {
        let servers = parse(
            "primary:\n  host: sql1.example.com\n  username: warden\n  password: hunter2\n",
        )?;
        let primary = &servers["primary"];
        assert_eq!(primary.port, 1433);
        assert_eq!(primary.default_database, "master");
        assert!(primary.encrypt);
        assert!(!primary.trust_cert);
        assert_eq!(primary.pool_max_size, 10);
        assert_eq!(primary.server_id(), "sql1.example.com:1433");
        Ok(())
    }

    #[test]
    fn missing_credentials_fail_validation() {
        let err = parse("primary:\n  host: sql1\n  username: warden\n  password: \"\"\n");
        assert!(err.is_err());
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let mut cfg = ServerConfig::new("sql1", 1433, "warden", "pw");
        assert!(cfg.validate().is_ok());
        cfg.pool_max_size = 0;
        assert!(cfg.validate().is_err());
    }
}
