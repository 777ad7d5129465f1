use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// One SMTP account. `username` is the key everything else looks it up by.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerCredential {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// IMAP host for fetching; the SMTP host is reused when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imap_host: Option<String>,
}

impl ServerCredential {
    pub fn imap_host(&self) -> &str {
        self.imap_host.as_deref().unwrap_or(&self.host)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(rename = "smtp_servers", default)]
    pub servers: Vec<ServerCredential>,
    #[serde(default)]
    pub contacts: BTreeMap<String, String>,
    /// Keys we don't know about, kept so a save doesn't drop them.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Config {
    pub fn find_server(&self, username: &str) -> Option<&ServerCredential> {
        self.servers.iter().find(|s| s.username == username)
    }

    pub fn add_server(&mut self, server: ServerCredential) {
        self.servers.push(server);
    }

    /// Removes every server with this username, keeping the rest in order.
    /// Returns how many were removed.
    pub fn delete_server(&mut self, username: &str) -> usize {
        let before = self.servers.len();
        self.servers.retain(|s| s.username != username);
        before - self.servers.len()
    }

    pub fn add_contact(&mut self, name: impl Into<String>, email: impl Into<String>) {
        self.contacts.insert(name.into(), email.into());
    }

    pub fn delete_contact(&mut self, name: &str) -> bool {
        self.contacts.remove(name).is_some()
    }
}

/// The JSON file holding servers and contacts.
///
/// Every call reads or rewrites the whole file. There is no locking, so two
/// writers racing on load-then-save lose one update (last write wins).
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` means "no configuration yet": the file is missing or unreadable.
    pub fn load(&self) -> Option<Config> {
        if !self.path.exists() {
            return None;
        }
        let s = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("could not read {}: {e}", self.path.display());
                return None;
            }
        };
        match serde_json::from_str(&s) {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                log::warn!("ignoring unparsable {}: {e}", self.path.display());
                None
            }
        }
    }

    pub fn load_or_default(&self) -> Config {
        self.load().unwrap_or_default()
    }

    /// Starting point for a mutation: empty when the file is missing, an error
    /// when it exists but cannot be read back, so a save never clobbers it.
    pub fn load_for_update(&self) -> Result<Config> {
        if !self.path.exists() {
            return Ok(Config::default());
        }
        let s = fs::read_to_string(&self.path)?;
        serde_json::from_str(&s)
            .with_context(|| format!("{} is not a valid configuration", self.path.display()))
    }

    pub fn save(&self, config: &Config) -> Result<()> {
        let s = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, s)?;
        log::info!("saved configuration to {}", self.path.display());
        Ok(())
    }
}
