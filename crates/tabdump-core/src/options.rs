//! Per-run options and the typed options registry.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

/// The invariant context of one export run. Populated by the front-end
/// before the orchestrator starts; read-only afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct DumpOptions {
    /// Reader provider key, or `auto` to sniff the connection string.
    pub provider: String,
    pub connection: String,
    pub query: String,
    pub output: PathBuf,
    pub connect_timeout: Duration,
    /// Per-fetch cap; `None` disables it.
    pub query_timeout: Option<Duration>,
    /// Rows per reader fetch and per writer append (Parquet row group).
    pub batch_size: usize,
    /// Stop after this many rows; `None` exports everything.
    pub limit: Option<u64>,
    pub dry_run: bool,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            provider: "auto".to_owned(),
            connection: String::new(),
            query: String::new(),
            output: PathBuf::new(),
            connect_timeout: Duration::from_secs(10),
            query_timeout: None,
            batch_size: 50_000,
            limit: None,
            dry_run: false,
        }
    }
}

/// Binds each component's options struct to a single instance for the run,
/// keyed by type identity. Shared read-only by every descriptor constructor;
/// unknown third-party options types participate without core changes.
#[derive(Default)]
pub struct OptionsRegistry {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl OptionsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `value` as the run's instance of `T`, replacing any previous
    /// binding of the same type.
    pub fn bind<T: Any + Send + Sync>(&mut self, value: T) {
        self.entries.insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|v| Arc::clone(v).downcast::<T>().ok())
    }

    /// The bound instance, or a fresh default when the front-end never
    /// bound one.
    pub fn get_or_default<T: Any + Send + Sync + Default>(&self) -> Arc<T> {
        self.get::<T>().unwrap_or_default()
    }
}
