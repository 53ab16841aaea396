//! Dialect registry: protocol name to connector factory.
//!
//! Built-in dialects register once at process startup via [`init`]; the
//! resulting global registry is read-only afterwards. Out-of-tree dialects
//! implement [`DialectFactory`] and register on an explicit
//! [`DialectRegistry`] instance, which is also how tests get isolation
//! without mutating the global.

use crate::dialects::{self, Connector};
use crate::strategy::LoadStrategy;
use crate::uri::{ConnectionConfig, RESERVED_KEYS};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use sync_core::{Result, SyncError};
use tracing::warn;

/// Static metadata describing one dialect.
///
/// Everything the framework needs to validate a URI before any I/O:
/// required and optional keys (with defaults), the advertised load
/// strategies, and whether the dialect can read back what it wrote.
#[derive(Debug, Clone, Copy)]
pub struct DialectDescriptor {
    /// Protocol name as written in URIs.
    pub protocol: &'static str,

    /// One-line description for error messages and docs.
    pub summary: &'static str,

    /// Keys that must be present after parsing.
    pub required_keys: &'static [&'static str],

    /// Optional keys with an optional default value.
    pub optional_keys: &'static [(&'static str, Option<&'static str>)],

    /// Load strategies this dialect supports, natively or emulated.
    pub load_strategies: &'static [LoadStrategy],

    /// Whether `Syncer::load` works against this dialect.
    pub supports_load: bool,

    /// Default row-chunking size for writes.
    pub default_batch_size: usize,
}

impl DialectDescriptor {
    /// Whether the dialect advertises the given strategy.
    pub fn supports_strategy(&self, strategy: LoadStrategy) -> bool {
        self.load_strategies.contains(&strategy)
    }

    /// Whether a configuration key is meaningful for this dialect.
    pub fn knows_key(&self, key: &str) -> bool {
        RESERVED_KEYS.contains(&key)
            || self.required_keys.contains(&key)
            || self.optional_keys.iter().any(|(k, _)| *k == key)
    }
}

/// Factory for one dialect: descriptor plus the opening path.
///
/// `open` performs connectivity and credential validation eagerly, so a
/// syncer that constructs successfully is ready to write.
#[async_trait]
pub trait DialectFactory: Send + Sync + std::fmt::Debug {
    /// The dialect's static metadata.
    fn descriptor(&self) -> &'static DialectDescriptor;

    /// Open a connector for a validated configuration.
    async fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn Connector>>;
}

/// Mapping from protocol name to dialect factory.
pub struct DialectRegistry {
    dialects: BTreeMap<String, Arc<dyn DialectFactory>>,
}

impl DialectRegistry {
    /// An empty registry, for tests and out-of-tree dialect sets.
    pub fn empty() -> Self {
        Self {
            dialects: BTreeMap::new(),
        }
    }

    /// A registry with every built-in dialect registered.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(dialects::csv::CsvDialect));
        registry.register(Arc::new(dialects::excel::ExcelDialect));
        registry.register(Arc::new(dialects::sqlite::SqliteDialect));
        registry.register(Arc::new(dialects::postgres::PostgresDialect));
        registry.register(Arc::new(dialects::mysql::MysqlDialect));
        registry.register(Arc::new(dialects::mock::MockDialect));
        registry
    }

    /// Register a dialect under its descriptor's protocol name.
    ///
    /// Registering a protocol twice replaces the earlier factory with a
    /// warning; last registration wins.
    pub fn register(&mut self, factory: Arc<dyn DialectFactory>) {
        let protocol = factory.descriptor().protocol;
        if self
            .dialects
            .insert(protocol.to_string(), factory)
            .is_some()
        {
            warn!(protocol, "replacing an already-registered dialect");
        }
    }

    /// Resolve a protocol name to its factory.
    pub fn resolve(&self, protocol: &str) -> Result<Arc<dyn DialectFactory>> {
        self.dialects
            .get(protocol)
            .cloned()
            .ok_or_else(|| SyncError::UnknownDialect {
                protocol: protocol.to_string(),
                known: self.protocols(),
            })
    }

    /// Registered protocol names, sorted.
    pub fn protocols(&self) -> Vec<String> {
        self.dialects.keys().cloned().collect()
    }
}

impl Default for DialectRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

static GLOBAL: OnceLock<DialectRegistry> = OnceLock::new();

/// Initialize (or fetch) the process-wide registry of built-in dialects.
///
/// Safe to call more than once; only the first call builds the registry.
pub fn init() -> &'static DialectRegistry {
    GLOBAL.get_or_init(DialectRegistry::builtin)
}
