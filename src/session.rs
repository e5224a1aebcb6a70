use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use serde_json::{Map, Value};

use crate::cache::ConfigCache;
use crate::config::{sidecar_key, ImportConfigRecord, KEEP_IMPORTER};
use crate::defaults::DefaultsStore;
use crate::importer::{Importer, ImporterRegistry, OptionDescriptor};
use crate::summarizer::{BatchSummarizer, ScanEvent, ScanResult};

/// Transitive dependency lookup supplied by the host editor; used only to grade a
/// reimport conflict as high risk.
pub trait DependencyIndex {
    fn has_dependents(&self, path: &str) -> bool;
}

/// External import pipeline. Reimport is fire-and-forget from this crate's view.
pub trait ReimportPipeline {
    fn reimport(&self, paths: &[String]);
    fn notify_changed(&self);
}

#[derive(Debug)]
pub struct WriteBackResult {
    /// Paths whose sidecar was persisted; the subset to request reimport on.
    pub updated: Vec<String>,
    pub errors: Vec<(String, anyhow::Error)>,
}

pub enum ReimportDecision {
    Applied(WriteBackResult),
    /// At least one path is persisted with a different importer; the host must ask
    /// the user before the write-back runs. `high_risk` means a mismatched path has
    /// dependents that may stop loading.
    NeedsConfirmation { high_risk: bool },
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Progress(String),
    BatchReady { file_count: usize },
    BatchFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConflictState {
    Idle,
    PendingConfirmation { high_risk: bool },
}

#[derive(Default)]
struct EditState {
    importer: Option<Arc<dyn Importer>>,
    descriptors: Vec<OptionDescriptor>,
    values: HashMap<String, Value>,
    checked: HashSet<String>,
    multi_edit: bool,
    paths: Vec<String>,
}

/// One import-dock edit session: the currently edited option set, the selected
/// importer, and the checked/unchecked overlay that decides what a multi-file
/// write-back touches.
pub struct ImportSession {
    cache: Arc<ConfigCache>,
    registry: Arc<ImporterRegistry>,
    state: EditState,
    scan: Option<BatchSummarizer>,
    // Paths of a scan still in flight. They join the edit set only once the scan
    // completes, so a write-back requested mid-scan has nothing to write.
    pending_paths: Vec<String>,
    conflict: ConflictState,
}

impl ImportSession {
    pub fn new(cache: Arc<ConfigCache>, registry: Arc<ImporterRegistry>) -> Self {
        Self {
            cache,
            registry,
            state: EditState::default(),
            scan: None,
            pending_paths: Vec::new(),
            conflict: ConflictState::Idle,
        }
    }

    /// Cancels any running scan, waits for the worker to stop, and resets the
    /// session to its empty/disabled state.
    pub fn clear(&mut self) {
        if let Some(mut scan) = self.scan.take() {
            scan.request_cancel();
            scan.join();
        }
        self.state = EditState::default();
        self.pending_paths.clear();
        self.conflict = ConflictState::Idle;
    }

    /// Panel-hidden boundary: the session and the config cache are both discarded.
    pub fn hide(&mut self) {
        self.clear();
        self.cache.clear();
    }

    /// External file-removal notification; drops stale cache entries.
    pub fn files_removed(&self, paths: &[String]) {
        for path in paths {
            self.cache.invalidate(path);
        }
    }

    /// Edit a single path. A missing sidecar is an error and leaves the session
    /// cleared. An unregistered importer id still loads (with no options), so the
    /// host can offer re-targeting to a known importer.
    pub fn load_single(&mut self, path: &str) -> Result<()> {
        self.clear();
        let Some(record) = self.cache.get(path) else {
            bail!("no import config for '{path}'");
        };
        let importer = self.registry.get_by_id(record.importer_id());
        if importer.is_none() && record.importer_id() != KEEP_IMPORTER {
            eprintln!(
                "[import] importer '{}' for '{path}' is not registered",
                record.importer_id()
            );
        }
        self.state.paths = vec![path.to_string()];
        self.state.multi_edit = false;
        self.state.importer = importer;
        self.populate_from_record(Some(&record));
        Ok(())
    }

    /// Edit a batch of paths. Scanning happens on a background worker; the host
    /// pumps `drain_scan_events` until `BatchReady` or `BatchFailed` arrives.
    pub fn load_batch(&mut self, paths: Vec<String>) -> Result<()> {
        self.clear();
        if paths.is_empty() {
            bail!("batch edit requires at least one path");
        }
        self.pending_paths = paths.clone();
        match BatchSummarizer::start(paths, self.cache.clone(), self.registry.clone()) {
            Some(scan) => {
                self.scan = Some(scan);
                Ok(())
            }
            None => {
                self.pending_paths.clear();
                bail!("failed to start batch scan")
            }
        }
    }

    /// Owning-thread pump for the scan worker. Applies completion or failure to the
    /// session and surfaces the events the host UI cares about.
    pub fn drain_scan_events(&mut self) -> Vec<SessionEvent> {
        let events = match &self.scan {
            Some(scan) => scan.drain(),
            None => return Vec::new(),
        };
        let mut out = Vec::new();
        for event in events {
            match event {
                ScanEvent::Progress(text) => out.push(SessionEvent::Progress(text)),
                ScanEvent::Failed => {
                    self.clear();
                    out.push(SessionEvent::BatchFailed);
                }
                ScanEvent::Completed(result) => {
                    self.finish_batch(result);
                    out.push(SessionEvent::BatchReady { file_count: self.state.paths.len() });
                }
            }
        }
        out
    }

    pub fn scan_in_progress(&self) -> bool {
        self.scan.as_ref().map(|scan| !scan.is_finished()).unwrap_or(false)
    }

    pub fn progress_text(&self) -> Option<String> {
        self.scan.as_ref().map(|scan| scan.progress_text())
    }

    fn finish_batch(&mut self, result: ScanResult) {
        if let Some(mut scan) = self.scan.take() {
            scan.join();
        }
        let paths = std::mem::take(&mut self.pending_paths);
        self.state = EditState::default();
        self.state.multi_edit = paths.len() > 1;
        self.state.paths = paths;
        self.state.importer = Some(result.importer.clone());
        self.state.descriptors = result.importer.options(0);
        for descriptor in &self.state.descriptors {
            let value = result
                .majority
                .get(&descriptor.name)
                .cloned()
                .unwrap_or_else(|| descriptor.default_value.clone());
            self.state.values.insert(descriptor.name.clone(), value);
            // Default posture mirrors single-edit: every field applies to all files
            // until the user unchecks it.
            if self.state.multi_edit {
                self.state.checked.insert(descriptor.name.clone());
            }
        }
    }

    fn populate_from_record(&mut self, record: Option<&ImportConfigRecord>) {
        self.state.descriptors =
            self.state.importer.as_ref().map(|imp| imp.options(0)).unwrap_or_default();
        self.state.values.clear();
        self.state.checked.clear();
        for descriptor in &self.state.descriptors {
            let stored = record.and_then(|r| r.params.get(&descriptor.name)).cloned();
            self.state
                .values
                .insert(descriptor.name.clone(), stored.unwrap_or_else(|| descriptor.default_value.clone()));
        }
    }

    pub fn importer(&self) -> Option<&Arc<dyn Importer>> {
        self.state.importer.as_ref()
    }

    /// Importer id the session would persist; `"keep"` in keep-file mode.
    pub fn active_importer_id(&self) -> &str {
        self.state.importer.as_ref().map(|imp| imp.importer_id()).unwrap_or(KEEP_IMPORTER)
    }

    pub fn paths(&self) -> &[String] {
        &self.state.paths
    }

    pub fn multi_edit(&self) -> bool {
        self.state.multi_edit
    }

    pub fn descriptors(&self) -> &[OptionDescriptor] {
        &self.state.descriptors
    }

    /// Descriptors currently visible given the importer's visibility predicate.
    pub fn visible_options(&self) -> Vec<&OptionDescriptor> {
        let Some(importer) = &self.state.importer else {
            return Vec::new();
        };
        self.state
            .descriptors
            .iter()
            .filter(|descriptor| importer.option_visible(&descriptor.name, &self.state.values))
            .collect()
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.state.values.get(name)
    }

    pub fn is_checked(&self, name: &str) -> bool {
        self.state.checked.contains(name)
    }

    /// Sets an option value; returns false for names outside the current option set.
    /// Editing a field in multi-edit mode checks it.
    pub fn set_value(&mut self, name: &str, value: Value) -> bool {
        if !self.state.values.contains_key(name) {
            return false;
        }
        self.state.values.insert(name.to_string(), value);
        if self.state.multi_edit {
            self.state.checked.insert(name.to_string());
        }
        true
    }

    /// Toggles the apply-to-all flag for one field. Meaningful only in multi-edit.
    pub fn set_checked(&mut self, name: &str, checked: bool) {
        if !self.state.multi_edit || !self.state.values.contains_key(name) {
            return;
        }
        if checked {
            self.state.checked.insert(name.to_string());
        } else {
            self.state.checked.remove(name);
        }
    }

    /// Switches the batch importer. `None` selects keep-file mode. An unknown id
    /// aborts the operation and leaves the session untouched.
    pub fn set_importer(&mut self, id: Option<&str>) -> Result<()> {
        match id {
            None => {
                self.state.importer = None;
                self.state.descriptors.clear();
                self.state.values.clear();
                self.state.checked.clear();
                Ok(())
            }
            Some(id) => {
                let importer =
                    self.registry.get_by_id(id).ok_or_else(|| anyhow!("importer '{id}' is not registered"))?;
                self.state.importer = Some(importer);
                let record = self.state.paths.first().and_then(|path| self.cache.get(path));
                self.populate_from_record(record.as_ref());
                Ok(())
            }
        }
    }

    /// Replaces all values with the preset's defaults. Presets always apply to all
    /// files, so in multi-edit every replaced name ends up checked.
    pub fn apply_preset(&mut self, preset: usize) -> Result<()> {
        let importer =
            self.state.importer.clone().ok_or_else(|| anyhow!("no importer selected"))?;
        let descriptors = importer.options(preset);
        self.state.checked.clear();
        self.state.values.clear();
        for descriptor in &descriptors {
            self.state.values.insert(descriptor.name.clone(), descriptor.default_value.clone());
            if self.state.multi_edit {
                self.state.checked.insert(descriptor.name.clone());
            }
        }
        self.state.descriptors = descriptors;
        Ok(())
    }

    pub fn save_as_default(&self, store: &mut dyn DefaultsStore) -> Result<()> {
        let importer =
            self.state.importer.as_ref().ok_or_else(|| anyhow!("no importer selected"))?;
        let mut defaults = Map::new();
        for descriptor in &self.state.descriptors {
            if let Some(value) = self.state.values.get(&descriptor.name) {
                defaults.insert(descriptor.name.clone(), value.clone());
            }
        }
        store.set_default(importer.importer_id(), defaults)
    }

    /// Loads the stored default option set; behaves like a preset, so every loaded
    /// name ends up checked in multi-edit.
    pub fn load_default(&mut self, store: &dyn DefaultsStore) -> Result<()> {
        let importer =
            self.state.importer.as_ref().ok_or_else(|| anyhow!("no importer selected"))?;
        let defaults = store
            .get_default(importer.importer_id())
            .ok_or_else(|| anyhow!("no default stored for '{}'", importer.importer_id()))?;
        if self.state.multi_edit {
            self.state.checked.clear();
        }
        for (name, value) in defaults {
            self.state.values.insert(name.clone(), value);
            if self.state.multi_edit {
                self.state.checked.insert(name);
            }
        }
        Ok(())
    }

    pub fn clear_default(&self, store: &mut dyn DefaultsStore) -> Result<()> {
        let importer =
            self.state.importer.as_ref().ok_or_else(|| anyhow!("no importer selected"))?;
        store.clear_default(importer.importer_id())
    }

    /// Interactive entry point for write-back: checks every path's persisted
    /// importer against the session's and demands confirmation when any differ,
    /// because changing an importer can invalidate already-loaded resources.
    pub fn request_write_back(&mut self, deps: &dyn DependencyIndex) -> ReimportDecision {
        let target = self.active_importer_id().to_string();
        let mut mismatch = false;
        let mut high_risk = false;
        for path in &self.state.paths {
            let Some(record) = self.cache.get(path) else {
                continue;
            };
            if record.importer_id() != target {
                mismatch = true;
                if deps.has_dependents(path) {
                    high_risk = true;
                }
            }
        }
        if mismatch {
            self.conflict = ConflictState::PendingConfirmation { high_risk };
            ReimportDecision::NeedsConfirmation { high_risk }
        } else {
            self.conflict = ConflictState::Idle;
            ReimportDecision::Applied(self.write_back())
        }
    }

    /// Proceeds with a write-back previously flagged as a conflict.
    pub fn confirm_write_back(&mut self) -> Result<WriteBackResult> {
        match self.conflict {
            ConflictState::PendingConfirmation { .. } => {
                self.conflict = ConflictState::Idle;
                Ok(self.write_back())
            }
            ConflictState::Idle => Err(anyhow!("no write-back awaiting confirmation")),
        }
    }

    pub fn cancel_pending(&mut self) {
        self.conflict = ConflictState::Idle;
    }

    pub fn pending_confirmation(&self) -> Option<bool> {
        match self.conflict {
            ConflictState::PendingConfirmation { high_risk } => Some(high_risk),
            ConflictState::Idle => None,
        }
    }

    /// Persists the edit set. Each path is written independently; failures are
    /// collected and do not block the remaining paths.
    pub fn write_back(&self) -> WriteBackResult {
        let mut result = WriteBackResult { updated: Vec::new(), errors: Vec::new() };
        for path in &self.state.paths {
            match self.write_one(path) {
                Ok(()) => result.updated.push(path.clone()),
                Err(err) => {
                    eprintln!("[import] failed to update '{path}': {err:?}");
                    result.errors.push((path.clone(), err));
                }
            }
        }
        result
    }

    fn write_one(&self, path: &str) -> Result<()> {
        let record = match &self.state.importer {
            None => ImportConfigRecord::keep(),
            Some(importer) => {
                let mut record =
                    self.cache.get(path).ok_or_else(|| anyhow!("no import config for '{path}'"))?;
                let same_importer = record.importer_id() == importer.importer_id();
                if self.state.multi_edit && same_importer {
                    // Update only what the user explicitly checked; other fields and
                    // unknown sidecar sections keep their persisted values.
                    for descriptor in &self.state.descriptors {
                        if !self.state.checked.contains(&descriptor.name) {
                            continue;
                        }
                        if let Some(value) = self.state.values.get(&descriptor.name) {
                            record.params.insert(descriptor.name.clone(), value.clone());
                        }
                    }
                } else {
                    record.remap.importer = importer.importer_id().to_string();
                    record.params = Map::new();
                    for descriptor in &self.state.descriptors {
                        if let Some(value) = self.state.values.get(&descriptor.name) {
                            record.params.insert(descriptor.name.clone(), value.clone());
                        }
                    }
                }
                record.remap.group_file = match importer.option_group_file() {
                    Some(option) => {
                        let value = self
                            .state
                            .values
                            .get(option)
                            .ok_or_else(|| anyhow!("group file option '{option}' has no value"))?;
                        let group_file = value.as_str().ok_or_else(|| {
                            anyhow!("group file option '{option}' is not a path string: {value}")
                        })?;
                        Some(group_file.to_string())
                    }
                    None => None,
                };
                record
            }
        };
        self.cache.store().save(&sidecar_key(path), &record)?;
        self.cache.put(path, record);
        Ok(())
    }

    /// Hands the successful subset of a write-back to the external pipeline.
    pub fn reimport_updated(&self, pipeline: &dyn ReimportPipeline, result: &WriteBackResult) {
        if result.updated.is_empty() {
            return;
        }
        pipeline.reimport(&result.updated);
        pipeline.notify_changed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use serde_json::json;

    struct EmptyStore;

    impl ConfigStore for EmptyStore {
        fn load(&self, key: &str) -> Result<ImportConfigRecord> {
            Err(anyhow!("no record for '{key}'"))
        }

        fn save(&self, _key: &str, _record: &ImportConfigRecord) -> Result<()> {
            Ok(())
        }
    }

    fn empty_session() -> ImportSession {
        let cache = Arc::new(ConfigCache::new(Arc::new(EmptyStore)));
        ImportSession::new(cache, Arc::new(ImporterRegistry::new()))
    }

    #[test]
    fn set_value_rejects_unknown_names() {
        let mut session = empty_session();
        assert!(!session.set_value("quality", json!(1)));
    }

    #[test]
    fn load_single_fails_without_sidecar() {
        let mut session = empty_session();
        assert!(session.load_single("a.png").is_err());
        assert!(session.paths().is_empty());
        assert_eq!(session.active_importer_id(), KEEP_IMPORTER);
    }

    #[test]
    fn confirm_without_pending_conflict_is_an_error() {
        let mut session = empty_session();
        assert!(session.confirm_write_back().is_err());
    }

    #[test]
    fn load_batch_rejects_empty_path_list() {
        let mut session = empty_session();
        assert!(session.load_batch(Vec::new()).is_err());
    }
}
