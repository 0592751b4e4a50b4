//! Configuration for embedders: storage mode and log filtering, read with
//! the `config` crate from an optional file plus `BEDROCK_*` environment
//! overrides.

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;
use crate::persist::PersistenceMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    File,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub storage: StorageKind,
    pub database_path: String,
    pub log_filter: String,
}

impl Settings {
    /// Load from `bedrock.{json,toml,yaml}` next to the process, if present.
    pub fn load() -> Result<Settings> {
        Settings::from_file("bedrock")
    }
    pub fn from_file(name: &str) -> Result<Settings> {
        let settings = Config::builder()
            .set_default("storage", "memory")?
            .set_default("database_path", "bedrock.db")?
            .set_default("log_filter", "info")?
            .add_source(File::with_name(name).required(false))
            .add_source(Environment::with_prefix("BEDROCK"))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
    pub fn persistence_mode(&self) -> PersistenceMode {
        match self.storage {
            StorageKind::Memory => PersistenceMode::InMemory,
            StorageKind::File => PersistenceMode::File(self.database_path.clone()),
        }
    }
}
