//! Tool-server configuration.
//!
//! The debugger core keeps no persisted state of its own. What's configurable
//! here is the *server's* own ambient settings — bind address, default
//! timeouts, default source directories — loaded from an optional TOML file
//! with CLI flags taking precedence.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the JSON-RPC HTTP server listens on.
    pub bind: SocketAddr,
    /// Default timeout for `run`'s wait on the initial-breakpoint latch.
    #[serde(with = "duration_secs")]
    pub run_timeout: Duration,
    /// Directories searched, in order, to resolve `filename:line` breakpoint
    /// locations and `get_source` requests when the path given isn't absolute.
    pub source_dirs: Vec<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:4711".parse().expect("valid default addr"),
            run_timeout: Duration::from_secs(5),
            source_dirs: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load from a TOML file, falling back to defaults for any field the file
    /// omits. A missing file is not an error — it just means "use defaults".
    pub fn load(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
