use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

/// One importer-exposed configurable option. Descriptors are supplied by the active
/// importer and stay fixed for the duration of an edit session.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionDescriptor {
    pub name: String,
    pub default_value: Value,
}

impl OptionDescriptor {
    pub fn new(name: impl Into<String>, default_value: Value) -> Self {
        Self { name: name.into(), default_value }
    }
}

/// Pluggable converter from a raw asset file into an engine-usable resource.
///
/// Only the configuration surface matters here; the actual conversion runs in the
/// external reimport pipeline.
pub trait Importer: Send + Sync {
    fn importer_id(&self) -> &str;

    fn visible_name(&self) -> &str {
        self.importer_id()
    }

    /// File extensions (without dot) this importer accepts.
    fn recognized_extensions(&self) -> &[&str];

    /// Option descriptors for the given preset. Preset 0 must always exist, even when
    /// `preset_count` is 0 (the implicit "Default" preset).
    fn options(&self, preset: usize) -> Vec<OptionDescriptor>;

    fn preset_count(&self) -> usize {
        0
    }

    fn preset_name(&self, _preset: usize) -> String {
        "Default".to_string()
    }

    /// Name of the option holding a group file (e.g. an atlas several assets import
    /// into), if this importer supports group imports.
    fn option_group_file(&self) -> Option<&str> {
        None
    }

    /// Visibility predicate for one option given the current value set.
    fn option_visible(&self, _name: &str, _values: &HashMap<String, Value>) -> bool {
        true
    }
}

#[derive(Default)]
pub struct ImporterRegistry {
    importers: Vec<Arc<dyn Importer>>,
}

impl ImporterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, importer: Arc<dyn Importer>) {
        self.importers.push(importer);
    }

    pub fn get_by_id(&self, id: &str) -> Option<Arc<dyn Importer>> {
        self.importers.iter().find(|imp| imp.importer_id() == id).cloned()
    }

    /// Importers accepting `ext`, sorted by visible name so the host menu is stable.
    pub fn for_extension(&self, ext: &str) -> Vec<Arc<dyn Importer>> {
        let mut matches: Vec<Arc<dyn Importer>> = self
            .importers
            .iter()
            .filter(|imp| imp.recognized_extensions().iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.visible_name().cmp(b.visible_name()));
        matches
    }
}
