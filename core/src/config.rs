//! Configuration Store
//!
//! Loads the TOML configuration for Nudge. Every field has a default, so an
//! empty or missing file is a valid configuration.
//!
//! ```toml
//! [registry]
//! key = "notify-registry"
//! backend = "file"
//! data_dir = "/var/lib/nudge"
//! max_commit_attempts = 5
//!
//! [commands]
//! register_keywords = ["reg", "register", "anmelden"]
//!
//! [delivery]
//! wait_timeout_secs = 30
//!
//! [server]
//! host = "127.0.0.1"
//! port = 3978
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::registry::{RegistrySlot, DEFAULT_REGISTRY_KEY};
use crate::store::{FileStore, MemoryStore, RegistryStore};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub commands: CommandConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Which [`RegistryStore`] backs the registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    #[default]
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Storage key of the registry blob
    #[serde(default = "default_registry_key")]
    pub key: String,
    #[serde(default)]
    pub backend: StoreBackend,
    /// Directory for the file backend (defaults to the platform data dir)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_max_commit_attempts")]
    pub max_commit_attempts: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            key: default_registry_key(),
            backend: StoreBackend::default(),
            data_dir: None,
            max_commit_attempts: default_max_commit_attempts(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Keywords accepted in place of `reg`
    #[serde(default = "default_register_keywords")]
    pub register_keywords: Vec<String>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            register_keywords: default_register_keywords(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// How long a requesting turn waits for a proactive delivery to commit.
    /// `None` waits indefinitely.
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: Option<u64>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            wait_timeout_secs: default_wait_timeout_secs(),
        }
    }
}

impl DeliveryConfig {
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_registry_key() -> String {
    DEFAULT_REGISTRY_KEY.to_string()
}

fn default_max_commit_attempts() -> u32 {
    5
}

fn default_register_keywords() -> Vec<String> {
    vec!["reg".to_string(), "register".to_string(), "anmelden".to_string()]
}

fn default_wait_timeout_secs() -> Option<u64> {
    Some(30)
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3978
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Load an explicit path, or the default location if it exists, or defaults.
    ///
    /// An explicitly given path must exist.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// `~/.config/nudge/config.toml` on Linux
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("nudge").join("config.toml"))
    }

    /// Open the configured registry store backend
    pub fn open_store(&self) -> anyhow::Result<Arc<dyn RegistryStore>> {
        let store: Arc<dyn RegistryStore> = match self.registry.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::File => match &self.registry.data_dir {
                Some(dir) => Arc::new(FileStore::new_in(dir)),
                None => Arc::new(FileStore::new()?),
            },
        };
        Ok(store)
    }

    /// Registry slot over `store` using the configured key and commit policy
    pub fn registry_slot(&self, store: Arc<dyn RegistryStore>) -> RegistrySlot {
        RegistrySlot::new(store, self.registry.key.as_str())
            .with_max_commit_attempts(self.registry.max_commit_attempts)
    }
}
