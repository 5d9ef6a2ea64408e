//! Server-list configuration.
//!
//! Descriptors arrive from a JSON document maintained outside this crate.
//! Loading validates the list just enough to keep the registry coherent:
//! identities must be unique, since the registry tracks one connection per
//! identity key.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{LensError, LensResult};
use crate::types::ServerDescriptor;

/// The configured set of servers this process may inspect
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServersConfig {
    /// Servers in configuration order
    #[serde(default)]
    pub servers: Vec<ServerDescriptor>,
}

impl ServersConfig {
    /// Parse a configuration document from a JSON string
    pub fn from_json(raw: &str) -> LensResult<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|err| LensError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration document from a file
    pub fn from_path(path: impl AsRef<Path>) -> LensResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Look up a descriptor by identity key
    pub fn find(&self, identity: &str) -> Option<&ServerDescriptor> {
        self.servers.iter().find(|server| server.identity() == identity)
    }

    fn validate(&self) -> LensResult<()> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.identity()) {
                return Err(LensError::Config(format!(
                    "duplicate server identity: {}",
                    server.identity()
                )));
            }
        }
        Ok(())
    }
}
