use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{Map, Value};

/// Per-importer default option sets, backing the "Set/Load/Clear Default" preset actions.
pub trait DefaultsStore {
    fn get_default(&self, importer_id: &str) -> Option<Map<String, Value>>;
    fn set_default(&mut self, importer_id: &str, values: Map<String, Value>) -> Result<()>;
    fn clear_default(&mut self, importer_id: &str) -> Result<()>;
}

/// Defaults kept in one JSON document (importer id -> option map), persisted on every
/// mutation. An unreadable document degrades to an empty table with a logged warning.
pub struct FsDefaultsStore {
    path: PathBuf,
    entries: HashMap<String, Map<String, Value>>,
}

impl FsDefaultsStore {
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            match fs::read_to_string(&path) {
                Ok(data) => match serde_json::from_str(&data) {
                    Ok(entries) => entries,
                    Err(err) => {
                        eprintln!("[import] failed to parse importer defaults: {err}");
                        HashMap::new()
                    }
                },
                Err(err) => {
                    eprintln!("[import] failed to read importer defaults: {err}");
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };
        Self { path, entries }
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        fs::write(&self.path, format!("{json}\n"))
            .with_context(|| format!("Failed to write importer defaults {}", self.path.display()))
    }
}

impl DefaultsStore for FsDefaultsStore {
    fn get_default(&self, importer_id: &str) -> Option<Map<String, Value>> {
        self.entries.get(importer_id).cloned()
    }

    fn set_default(&mut self, importer_id: &str, values: Map<String, Value>) -> Result<()> {
        self.entries.insert(importer_id.to_string(), values);
        self.persist()
    }

    fn clear_default(&mut self, importer_id: &str) -> Result<()> {
        if self.entries.remove(importer_id).is_some() {
            self.persist()?;
        }
        Ok(())
    }
}

/// In-memory store for tests and for hosts that persist editor settings themselves.
#[derive(Default)]
pub struct MemoryDefaultsStore {
    entries: HashMap<String, Map<String, Value>>,
}

impl MemoryDefaultsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DefaultsStore for MemoryDefaultsStore {
    fn get_default(&self, importer_id: &str) -> Option<Map<String, Value>> {
        self.entries.get(importer_id).cloned()
    }

    fn set_default(&mut self, importer_id: &str, values: Map<String, Value>) -> Result<()> {
        self.entries.insert(importer_id.to_string(), values);
        Ok(())
    }

    fn clear_default(&mut self, importer_id: &str) -> Result<()> {
        self.entries.remove(importer_id);
        Ok(())
    }
}
