//! Declarative connection-string parsing.
//!
//! Every syncer is configured by a URI of the form
//! `protocol://key1=value1&key2=value2&...`. Values (and keys) may contain
//! `&` or `=` only percent-encoded; the parser decodes standard URL
//! percent-encoding. Parsing is pure: no I/O happens until a dialect opens
//! its backend handle.
//!
//! Two keys are reserved across all dialects:
//!
//! - `load_strategy` - one of `APPEND`, `TRUNCATE`, `UPSERT` (default `APPEND`)
//! - `batch_size` - overrides the dialect's default write chunking

use crate::registry::DialectDescriptor;
use crate::strategy::LoadStrategy;
use std::collections::BTreeMap;
use sync_core::{Result, SyncError};
use tracing::warn;

/// Keys understood by the framework itself rather than any dialect.
pub const RESERVED_KEYS: &[&str] = &["load_strategy", "batch_size"];

/// Parsed, percent-decoded configuration for one syncer.
///
/// The mapping is string-to-string after parsing; dialects build their own
/// typed config structs from it and fail fast on anything missing.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    protocol: String,
    load_strategy: LoadStrategy,
    batch_size: Option<usize>,
    params: BTreeMap<String, String>,
}

impl ConnectionConfig {
    /// Parse a declarative URI.
    ///
    /// Fails with [`SyncError::Configuration`] when the protocol is missing,
    /// a key has no value, the strategy is not one of the known three, or
    /// the string does not match the grammar at all.
    pub fn parse(uri: &str) -> Result<Self> {
        let (protocol, rest) = uri.split_once("://").ok_or_else(|| {
            SyncError::Configuration(format!(
                "'{uri}' is not a valid syncer URI, expected protocol://key=value&..."
            ))
        })?;
        if protocol.is_empty() {
            return Err(SyncError::Configuration(format!(
                "'{uri}' has an empty protocol"
            )));
        }
        if protocol.contains(['=', '&', '/']) {
            return Err(SyncError::Configuration(format!(
                "'{protocol}' is not a valid protocol name"
            )));
        }

        let mut params = BTreeMap::new();
        if !rest.is_empty() {
            for pair in rest.split('&') {
                let (key, value) = pair.split_once('=').ok_or_else(|| {
                    SyncError::Configuration(format!(
                        "'{pair}' is not a key=value pair in '{uri}'"
                    ))
                })?;
                if key.is_empty() {
                    return Err(SyncError::Configuration(format!(
                        "empty key in pair '{pair}'"
                    )));
                }
                let key = percent_decode(key)?;
                let value = percent_decode(value)?;
                if params.insert(key.clone(), value).is_some() {
                    warn!(key = %key, "duplicate key in syncer URI, keeping the last value");
                }
            }
        }

        let load_strategy = match params.remove("load_strategy") {
            Some(raw) => raw.parse::<LoadStrategy>()?,
            None => LoadStrategy::default(),
        };
        let batch_size = match params.remove("batch_size") {
            Some(raw) => {
                let parsed: usize = raw.parse().map_err(|_| {
                    SyncError::Configuration(format!("batch_size '{raw}' is not a number"))
                })?;
                if parsed == 0 {
                    return Err(SyncError::Configuration(
                        "batch_size must be greater than zero".to_string(),
                    ));
                }
                Some(parsed)
            }
            None => None,
        };

        Ok(Self {
            protocol: protocol.to_string(),
            load_strategy,
            batch_size,
            params,
        })
    }

    /// The protocol the URI named.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// The load strategy for the syncer's whole lifetime.
    pub fn load_strategy(&self) -> LoadStrategy {
        self.load_strategy
    }

    /// Caller's batch-size override, if any.
    pub fn batch_size(&self) -> Option<usize> {
        self.batch_size
    }

    /// Get a dialect-specific key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|s| s.as_str())
    }

    /// Get a dialect-specific key or a fallback.
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Get a required key, failing with a message that names it.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| {
            SyncError::Configuration(format!(
                "dialect '{}' requires the key '{key}'",
                self.protocol
            ))
        })
    }

    /// Validate this config against a dialect descriptor and fold in the
    /// descriptor's defaults.
    ///
    /// Checks that every required key is present and that the dialect
    /// advertises the requested load strategy; unrecognized keys are ignored
    /// with a warning, not fatal.
    pub(crate) fn validate_for(&mut self, descriptor: &DialectDescriptor) -> Result<()> {
        for key in descriptor.required_keys {
            if !self.params.contains_key(*key) {
                return Err(SyncError::Configuration(format!(
                    "dialect '{}' requires the key '{key}'",
                    descriptor.protocol
                )));
            }
        }
        if !descriptor.supports_strategy(self.load_strategy) {
            return Err(SyncError::Configuration(format!(
                "dialect '{}' does not support load strategy {}, supported: {}",
                descriptor.protocol,
                self.load_strategy,
                descriptor
                    .load_strategies
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        for key in self.params.keys() {
            if !descriptor.knows_key(key) {
                warn!(
                    dialect = descriptor.protocol,
                    key = %key,
                    "ignoring unrecognized configuration key"
                );
            }
        }
        for (key, default) in descriptor.optional_keys {
            if let Some(default) = default {
                self.params
                    .entry((*key).to_string())
                    .or_insert_with(|| (*default).to_string());
            }
        }
        Ok(())
    }
}

fn percent_decode(raw: &str) -> Result<String> {
    urlencoding::decode(raw)
        .map(|cow| cow.into_owned())
        .map_err(|e| SyncError::Configuration(format!("'{raw}' is not valid percent-encoding: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_protocol_and_params() {
        let config =
            ConnectionConfig::parse("csv://directory=/tmp/out&load_strategy=APPEND").unwrap();
        assert_eq!(config.protocol(), "csv");
        assert_eq!(config.get("directory"), Some("/tmp/out"));
        assert_eq!(config.load_strategy(), LoadStrategy::Append);
    }

    #[test]
    fn missing_scheme_separator_fails() {
        assert!(ConnectionConfig::parse("csv:directory=/tmp").is_err());
        assert!(ConnectionConfig::parse("just a string").is_err());
    }

    #[test]
    fn empty_protocol_fails() {
        assert!(ConnectionConfig::parse("://directory=/tmp").is_err());
    }

    #[test]
    fn key_without_value_fails() {
        assert!(ConnectionConfig::parse("csv://directory").is_err());
        assert!(ConnectionConfig::parse("csv://directory=/tmp&header").is_err());
    }

    #[test]
    fn unknown_load_strategy_fails() {
        let err = ConnectionConfig::parse("csv://directory=/tmp&load_strategy=MERGE").unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[test]
    fn load_strategy_defaults_to_append() {
        let config = ConnectionConfig::parse("mock://").unwrap();
        assert_eq!(config.load_strategy(), LoadStrategy::Append);
    }

    #[test]
    fn values_are_percent_decoded() {
        let config =
            ConnectionConfig::parse("sqlite://database=%2Ftmp%2Fa%26b.db&secret=p%3Dss").unwrap();
        assert_eq!(config.get("database"), Some("/tmp/a&b.db"));
        assert_eq!(config.get("secret"), Some("p=ss"));
    }

    #[test]
    fn case_insensitive_strategy_values() {
        let config = ConnectionConfig::parse("mock://load_strategy=truncate").unwrap();
        assert_eq!(config.load_strategy(), LoadStrategy::Truncate);
    }

    #[test]
    fn batch_size_must_be_positive() {
        assert!(ConnectionConfig::parse("mock://batch_size=0").is_err());
        assert!(ConnectionConfig::parse("mock://batch_size=abc").is_err());
        let config = ConnectionConfig::parse("mock://batch_size=500").unwrap();
        assert_eq!(config.batch_size(), Some(500));
    }
}
