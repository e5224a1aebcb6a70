use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use serde_json::Value;

use crate::cache::ConfigCache;
use crate::importer::{Importer, ImporterRegistry};

/// Per-option tally of stored values across a batch of sidecars. Buckets keep scan
/// order (path index, then key discovery order within a path) so the majority
/// tie-break is deterministic. One table lives per scan and is never reused.
#[derive(Default)]
pub struct FrequencyTable {
    counts: HashMap<String, Vec<(Value, u32)>>,
}

impl FrequencyTable {
    pub fn tally(&mut self, name: &str, value: &Value) {
        let buckets = self.counts.entry(name.to_string()).or_default();
        if let Some(bucket) = buckets.iter_mut().find(|(existing, _)| existing == value) {
            bucket.1 += 1;
        } else {
            buckets.push((value.clone(), 1));
        }
    }

    /// Winning value per option: strictly greatest count, ties keep the
    /// first-encountered bucket.
    pub fn majority_values(&self) -> HashMap<String, Value> {
        let mut majority = HashMap::new();
        for (name, buckets) in &self.counts {
            let mut best: Option<(&Value, u32)> = None;
            for (value, count) in buckets {
                match best {
                    Some((_, top)) if *count <= top => {}
                    _ => best = Some((value, *count)),
                }
            }
            if let Some((value, _)) = best {
                majority.insert(name.clone(), value.clone());
            }
        }
        majority
    }
}

pub enum ScanEvent {
    Progress(String),
    /// Terminal: the first path had no loadable record or an unregistered importer,
    /// so there is no importer to anchor the batch on.
    Failed,
    Completed(ScanResult),
}

pub struct ScanResult {
    pub importer: Arc<dyn Importer>,
    pub majority: HashMap<String, Value>,
}

#[derive(Default)]
struct ScanShared {
    cancel: bool,
    progress: String,
    complete: bool,
}

/// Cancellable background scan over an ordered path list.
///
/// Exactly one worker thread per scan. The worker and the owning thread only share
/// the small mutex-guarded scalar block above; results cross the boundary as events
/// on an mpsc channel drained by the owning thread, so nothing outside the worker
/// ever touches the frequency table.
pub struct BatchSummarizer {
    shared: Arc<Mutex<ScanShared>>,
    events: Receiver<ScanEvent>,
    handle: Option<JoinHandle<()>>,
}

impl BatchSummarizer {
    pub fn start(
        paths: Vec<String>,
        cache: Arc<ConfigCache>,
        registry: Arc<ImporterRegistry>,
    ) -> Option<Self> {
        let shared = Arc::new(Mutex::new(ScanShared::default()));
        let (tx, rx) = channel();
        let worker_shared = shared.clone();
        let builder = thread::Builder::new().name("import-scan".to_string());
        match builder.spawn(move || run_scan(&paths, &cache, &registry, &worker_shared, &tx)) {
            Ok(handle) => Some(Self { shared, events: rx, handle: Some(handle) }),
            Err(err) => {
                eprintln!("[import] failed to spawn scan worker: {err:?}");
                None
            }
        }
    }

    pub fn drain(&self) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Cooperative cancel; the worker stops at its next per-path check point and
    /// emits no completion event for this run.
    pub fn request_cancel(&self) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.cancel = true;
        }
    }

    /// Blocks until the worker has fully stopped. Dependent state (the cache, the
    /// session) is only safe to reset after this returns.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }

    pub fn progress_text(&self) -> String {
        self.shared.lock().map(|shared| shared.progress.clone()).unwrap_or_default()
    }
}

impl Drop for BatchSummarizer {
    fn drop(&mut self) {
        self.request_cancel();
        self.join();
    }
}

fn run_scan(
    paths: &[String],
    cache: &ConfigCache,
    registry: &ImporterRegistry,
    shared: &Mutex<ScanShared>,
    tx: &Sender<ScanEvent>,
) {
    let mut frequency = FrequencyTable::default();
    let mut importer: Option<Arc<dyn Importer>> = None;
    let total = paths.len();

    for (index, path) in paths.iter().enumerate() {
        match shared.lock() {
            Ok(guard) if !guard.cancel => {}
            _ => return,
        }

        match cache.get(path) {
            Some(record) => {
                if index == 0 {
                    match registry.get_by_id(record.importer_id()) {
                        Some(found) => importer = Some(found),
                        None => {
                            eprintln!(
                                "[import] batch scan aborted: importer '{}' for '{path}' is not registered",
                                record.importer_id()
                            );
                            let _ = tx.send(ScanEvent::Failed);
                            return;
                        }
                    }
                }
                for (name, value) in &record.params {
                    frequency.tally(name, value);
                }
            }
            None if index == 0 => {
                eprintln!("[import] batch scan aborted: no import config for '{path}'");
                let _ = tx.send(ScanEvent::Failed);
                return;
            }
            None => {
                eprintln!("[import] skipping '{path}': no import config");
            }
        }

        let text = format!("Processing {} / {}", index + 1, total);
        if let Ok(mut guard) = shared.lock() {
            guard.progress = text.clone();
        }
        let _ = tx.send(ScanEvent::Progress(text));
    }

    let Some(importer) = importer else {
        let _ = tx.send(ScanEvent::Failed);
        return;
    };
    let majority = frequency.majority_values();
    if let Ok(mut guard) = shared.lock() {
        guard.complete = true;
    }
    let _ = tx.send(ScanEvent::Completed(ScanResult { importer, majority }));
}
