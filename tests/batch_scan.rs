use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use serde_json::{json, Value};

use import_dock::summarizer::{BatchSummarizer, ScanEvent};
use import_dock::{
    sidecar_key, ConfigCache, ConfigStore, DependencyIndex, ImportConfigRecord, ImportSession,
    Importer, ImporterRegistry, OptionDescriptor, ReimportDecision, SessionEvent,
};

struct TextureImporter;

impl Importer for TextureImporter {
    fn importer_id(&self) -> &str {
        "texture"
    }

    fn recognized_extensions(&self) -> &[&str] {
        &["png"]
    }

    fn options(&self, _preset: usize) -> Vec<OptionDescriptor> {
        vec![
            OptionDescriptor::new("quality", json!(3)),
            OptionDescriptor::new("filter", json!("linear")),
        ]
    }
}

struct MapStore {
    records: HashMap<String, ImportConfigRecord>,
}

impl MapStore {
    fn new(entries: &[(&str, ImportConfigRecord)]) -> Self {
        let mut records = HashMap::new();
        for (path, record) in entries {
            records.insert(sidecar_key(path), record.clone());
        }
        Self { records }
    }
}

impl ConfigStore for MapStore {
    fn load(&self, key: &str) -> Result<ImportConfigRecord> {
        self.records.get(key).cloned().ok_or_else(|| anyhow!("no record for '{key}'"))
    }

    fn save(&self, _key: &str, _record: &ImportConfigRecord) -> Result<()> {
        Ok(())
    }
}

/// Store that parks the worker inside one load call until the test releases it,
/// making the window while a scan is in flight deterministic.
struct GateStore {
    inner: MapStore,
    gate_key: String,
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
    saved: Mutex<Vec<String>>,
}

impl GateStore {
    fn new(inner: MapStore, gate_path: &str) -> (Arc<Self>, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = channel();
        let (release_tx, release_rx) = channel();
        let store = Arc::new(Self {
            inner,
            gate_key: sidecar_key(gate_path),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
            saved: Mutex::new(Vec::new()),
        });
        (store, entered_rx, release_tx)
    }
}

impl ConfigStore for GateStore {
    fn load(&self, key: &str) -> Result<ImportConfigRecord> {
        if key == self.gate_key {
            let _ = self.entered.lock().unwrap().send(());
            let _ = self.release.lock().unwrap().recv_timeout(Duration::from_secs(5));
        }
        self.inner.load(key)
    }

    fn save(&self, key: &str, _record: &ImportConfigRecord) -> Result<()> {
        self.saved.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

fn texture_record(quality: Value) -> ImportConfigRecord {
    let mut record = ImportConfigRecord::new("texture");
    record.params.insert("quality".to_string(), quality);
    record
}

fn registry() -> Arc<ImporterRegistry> {
    let mut registry = ImporterRegistry::new();
    registry.register(Arc::new(TextureImporter));
    Arc::new(registry)
}

fn pump_until_done(session: &mut ImportSession) -> Vec<SessionEvent> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut seen = Vec::new();
    loop {
        seen.extend(session.drain_scan_events());
        let done = seen
            .iter()
            .any(|e| matches!(e, SessionEvent::BatchReady { .. } | SessionEvent::BatchFailed));
        if done {
            return seen;
        }
        assert!(Instant::now() < deadline, "batch scan did not finish in time");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn batch_populates_majority_values_and_prechecks_everything() {
    let store = MapStore::new(&[
        ("a.png", texture_record(json!(2))),
        ("b.png", texture_record(json!(5))),
        ("c.png", texture_record(json!(2))),
    ]);
    let cache = Arc::new(ConfigCache::new(Arc::new(store)));
    let mut session = ImportSession::new(cache, registry());

    session
        .load_batch(vec!["a.png".to_string(), "b.png".to_string(), "c.png".to_string()])
        .expect("start");
    let events = pump_until_done(&mut session);
    assert!(events.iter().any(|e| matches!(e, SessionEvent::BatchReady { file_count: 3 })));
    assert!(events.iter().any(|e| matches!(e, SessionEvent::Progress(_))));

    assert!(session.multi_edit());
    assert_eq!(session.active_importer_id(), "texture");
    // Every descriptor gets a value: the majority where one was tallied, the
    // default otherwise.
    assert_eq!(session.value("quality"), Some(&json!(2)));
    assert_eq!(session.value("filter"), Some(&json!("linear")));
    assert!(session.is_checked("quality"));
    assert!(session.is_checked("filter"));
}

#[test]
fn missing_first_path_clears_the_session() {
    let store = MapStore::new(&[("b.png", texture_record(json!(5)))]);
    let cache = Arc::new(ConfigCache::new(Arc::new(store)));
    let mut session = ImportSession::new(cache, registry());

    session.load_batch(vec!["missing.png".to_string(), "b.png".to_string()]).expect("start");
    let events = pump_until_done(&mut session);
    assert!(events.iter().any(|e| matches!(e, SessionEvent::BatchFailed)));
    assert!(session.paths().is_empty());
    assert!(session.importer().is_none());
    assert!(!session.scan_in_progress());
}

#[test]
fn single_path_batch_does_not_enable_multi_edit() {
    let store = MapStore::new(&[("a.png", texture_record(json!(7)))]);
    let cache = Arc::new(ConfigCache::new(Arc::new(store)));
    let mut session = ImportSession::new(cache, registry());

    session.load_batch(vec!["a.png".to_string()]).expect("start");
    pump_until_done(&mut session);
    assert!(!session.multi_edit());
    assert_eq!(session.value("quality"), Some(&json!(7)));
    assert!(!session.is_checked("quality"));
}

struct NoDeps;

impl DependencyIndex for NoDeps {
    fn has_dependents(&self, _path: &str) -> bool {
        false
    }
}

#[test]
fn write_back_during_a_running_scan_touches_nothing() {
    let inner = MapStore::new(&[
        ("a.png", texture_record(json!(2))),
        ("b.png", texture_record(json!(5))),
        ("c.png", texture_record(json!(2))),
    ]);
    let (store, entered_rx, release_tx) = GateStore::new(inner, "b.png");
    let cache = Arc::new(ConfigCache::new(store.clone()));
    let mut session = ImportSession::new(cache, registry());

    session
        .load_batch(vec!["a.png".to_string(), "b.png".to_string(), "c.png".to_string()])
        .expect("start");
    entered_rx.recv_timeout(Duration::from_secs(5)).expect("worker reached gate");

    // The scan has not completed, so no paths are bound to the edit set yet and a
    // write-back must not fall into the keep-file branch for the whole batch.
    assert!(session.scan_in_progress());
    assert!(session.paths().is_empty());
    match session.request_write_back(&NoDeps) {
        ReimportDecision::Applied(result) => {
            assert!(result.updated.is_empty());
            assert!(result.errors.is_empty());
        }
        ReimportDecision::NeedsConfirmation { .. } => panic!("nothing to confirm mid-scan"),
    }
    assert!(store.saved.lock().unwrap().is_empty(), "no sidecar may be persisted mid-scan");

    release_tx.send(()).expect("release worker");
    pump_until_done(&mut session);
    assert_eq!(session.value("quality"), Some(&json!(2)));

    // Once the scan completes the same request persists the whole batch normally.
    match session.request_write_back(&NoDeps) {
        ReimportDecision::Applied(result) => {
            assert_eq!(
                result.updated,
                vec!["a.png".to_string(), "b.png".to_string(), "c.png".to_string()]
            );
            assert!(result.errors.is_empty());
        }
        ReimportDecision::NeedsConfirmation { .. } => panic!("importer unchanged"),
    }
    assert_eq!(store.saved.lock().unwrap().len(), 3);
}

#[test]
fn cancelled_scan_emits_no_completion() {
    let paths: Vec<String> =
        ["a.png", "b.png", "c.png", "d.png", "e.png"].iter().map(|p| p.to_string()).collect();
    let inner = MapStore::new(&[
        ("a.png", texture_record(json!(1))),
        ("b.png", texture_record(json!(1))),
        ("c.png", texture_record(json!(1))),
        ("d.png", texture_record(json!(1))),
        ("e.png", texture_record(json!(1))),
    ]);
    let (store, entered_rx, release_tx) = GateStore::new(inner, "b.png");
    let cache = Arc::new(ConfigCache::new(store));

    let mut summarizer =
        BatchSummarizer::start(paths, cache, registry()).expect("worker spawned");

    // The worker is parked loading the second sidecar; cancel lands before its next
    // per-path check point.
    entered_rx.recv_timeout(Duration::from_secs(5)).expect("worker reached gate");
    summarizer.request_cancel();
    release_tx.send(()).expect("release worker");
    summarizer.join();

    let events = summarizer.drain();
    assert!(!events.iter().any(|e| matches!(e, ScanEvent::Completed(_))));
    assert!(!events.iter().any(|e| matches!(e, ScanEvent::Failed)));
    let progress = events.iter().filter(|e| matches!(e, ScanEvent::Progress(_))).count();
    assert!(progress <= 2, "scan should stop at the cancel check point");
}

#[test]
fn scan_after_a_cancelled_run_starts_clean() {
    let store = MapStore::new(&[
        ("a.png", texture_record(json!(1))),
        ("b.png", texture_record(json!(1))),
        ("x.png", texture_record(json!(6))),
        ("y.png", texture_record(json!(6))),
    ]);
    let cache = Arc::new(ConfigCache::new(Arc::new(store)));
    let registry = registry();

    let summarizer = BatchSummarizer::start(
        vec!["a.png".to_string(), "b.png".to_string()],
        cache.clone(),
        registry.clone(),
    )
    .expect("worker spawned");
    summarizer.request_cancel();
    drop(summarizer);

    // A fresh batch over different files carries no counts over from the first run.
    let mut session = ImportSession::new(cache, registry);
    session.load_batch(vec!["x.png".to_string(), "y.png".to_string()]).expect("start");
    pump_until_done(&mut session);
    assert_eq!(session.value("quality"), Some(&json!(6)));
}
