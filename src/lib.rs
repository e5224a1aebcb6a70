pub mod cache;
pub mod config;
pub mod defaults;
pub mod importer;
pub mod removal_watch;
pub mod session;
pub mod summarizer;

pub use cache::ConfigCache;
pub use config::{sidecar_key, ConfigStore, FsConfigStore, ImportConfigRecord, KEEP_IMPORTER};
pub use defaults::{DefaultsStore, FsDefaultsStore, MemoryDefaultsStore};
pub use importer::{Importer, ImporterRegistry, OptionDescriptor};
pub use session::{
    DependencyIndex, ImportSession, ReimportDecision, ReimportPipeline, SessionEvent, WriteBackResult,
};
