use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Importer id recorded when a file is kept as-is instead of imported.
pub const KEEP_IMPORTER: &str = "keep";

/// Derived storage key for the sidecar document of an asset path.
pub fn sidecar_key(path: &str) -> String {
    format!("{path}.import")
}

/// Parsed import sidecar for one asset path.
///
/// Sections the kernel does not model (e.g. dependency remaps written by the
/// import pipeline) are carried through `extra` so partial updates never drop them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportConfigRecord {
    pub remap: RemapSection,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemapSection {
    pub importer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_file: Option<String>,
}

impl ImportConfigRecord {
    pub fn new(importer: impl Into<String>) -> Self {
        Self {
            remap: RemapSection { importer: importer.into(), group_file: None },
            params: Map::new(),
            extra: Map::new(),
        }
    }

    /// Record written for "keep file, no import": everything else is discarded.
    pub fn keep() -> Self {
        Self::new(KEEP_IMPORTER)
    }

    pub fn importer_id(&self) -> &str {
        &self.remap.importer
    }
}

/// Persisted storage for sidecar documents, addressed by `sidecar_key`.
pub trait ConfigStore: Send + Sync {
    fn load(&self, key: &str) -> Result<ImportConfigRecord>;
    fn save(&self, key: &str, record: &ImportConfigRecord) -> Result<()>;
}

/// Filesystem store keeping sidecars as JSON next to their assets, under a root directory.
pub struct FsConfigStore {
    root: PathBuf,
}

impl FsConfigStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl ConfigStore for FsConfigStore {
    fn load(&self, key: &str) -> Result<ImportConfigRecord> {
        let path = self.resolve(key);
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read import config {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse import config {}", path.display()))
    }

    fn save(&self, key: &str, record: &ImportConfigRecord) -> Result<()> {
        let path = self.resolve(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(record)?;
        fs::write(&path, format!("{json}\n"))
            .with_context(|| format!("Failed to write import config {}", path.display()))
    }
}
