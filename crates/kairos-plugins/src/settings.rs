//! Settings - Schema defaults merged with per-instance overrides
//!
//! Resolution order for one plugin:
//! 1. Defaults from the plugin's declared schema (non-null `default` only)
//! 2. Instance overrides stored under `pid@version`, or under bare `pid`
//! 3. Required-key check over the merged map
//!
//! Resolved maps are `BTreeMap`s, so iteration and serialization are always
//! key-sorted. The fingerprint hashes a canonical JSON form of the map and is
//! what lets two instances with the same effective settings share a bundle.

use crate::contract::SettingSpec;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;

/// A fully resolved settings map
pub type ResolvedSettings = BTreeMap<String, serde_json::Value>;

/// Placeholder written over sensitive values for display
pub const MASKED_VALUE: &str = "***MASKED***";

/// Per-instance plugin overrides, keyed by `pid@version` or `pid`.
///
/// Each entry is either a flat object (`{"k": v}`) or the list form
/// (`{"settings": [{"key": "k", "value": v}]}`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginOverrides {
    entries: BTreeMap<String, serde_json::Value>,
}

impl PluginOverrides {
    /// Create an empty override set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing map of entries
    #[must_use]
    pub fn from_map(entries: BTreeMap<String, serde_json::Value>) -> Self {
        Self { entries }
    }

    /// Add (or replace) the entry for a lookup key
    #[must_use]
    pub fn with_entry(mut self, key: impl Into<String>, entry: serde_json::Value) -> Self {
        self.entries.insert(key.into(), entry);
        self
    }

    /// Whether no entries are present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw entries
    #[must_use]
    pub fn entries(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.entries
    }

    /// Flattened overrides for one plugin. Missing entries yield an empty map.
    pub fn overrides_for(&self, pid: &str, version: &str) -> Result<ResolvedSettings> {
        let versioned = format!("{}@{}", pid, version);
        let (lookup_key, entry) = match self.entries.get(&versioned) {
            Some(entry) => (versioned.as_str(), entry),
            None => match self.entries.get(pid) {
                Some(entry) => (pid, entry),
                None => return Ok(ResolvedSettings::new()),
            },
        };

        flatten_entry(lookup_key, entry)
    }
}

fn flatten_entry(lookup_key: &str, entry: &serde_json::Value) -> Result<ResolvedSettings> {
    let invalid = |message: String| Error::InvalidOverrides {
        plugin: lookup_key.to_string(),
        message,
    };

    let object = match entry {
        serde_json::Value::Null => return Ok(ResolvedSettings::new()),
        serde_json::Value::Object(object) => object,
        other => return Err(invalid(format!("expected an object, got {}", other))),
    };

    let Some(list) = object.get("settings") else {
        return Ok(object
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect());
    };

    let items = list
        .as_array()
        .ok_or_else(|| invalid("'settings' must be a list".to_string()))?;

    let mut flattened = ResolvedSettings::new();
    for item in items {
        // Entries without a key are ignored
        let Some(key) = item.get("key").and_then(|k| k.as_str()) else {
            continue;
        };
        let value = item.get("value").cloned().unwrap_or(serde_json::Value::Null);
        flattened.insert(key.to_string(), value);
    }
    Ok(flattened)
}

/// Resolves settings for the plugins of one instance
#[derive(Debug, Clone, Default)]
pub struct SettingsResolver {
    overrides: PluginOverrides,
}

impl SettingsResolver {
    /// Create a resolver over an instance's overrides
    #[must_use]
    pub fn new(overrides: PluginOverrides) -> Self {
        Self { overrides }
    }

    /// Instance overrides
    #[must_use]
    pub fn overrides(&self) -> &PluginOverrides {
        &self.overrides
    }

    /// Resolve settings for one plugin
    pub fn resolve(
        &self,
        pid: &str,
        version: &str,
        schema: &[SettingSpec],
    ) -> Result<ResolvedSettings> {
        resolve_settings(pid, version, schema, &self.overrides)
    }
}

/// Merge schema defaults with overrides and check required keys
pub fn resolve_settings(
    pid: &str,
    version: &str,
    schema: &[SettingSpec],
    overrides: &PluginOverrides,
) -> Result<ResolvedSettings> {
    let mut resolved: ResolvedSettings = schema
        .iter()
        .filter(|s| !s.key.is_empty())
        .filter_map(|s| match &s.default {
            Some(v) if !v.is_null() => Some((s.key.clone(), v.clone())),
            _ => None,
        })
        .collect();

    let plugin_overrides = overrides.overrides_for(pid, version)?;
    let override_count = plugin_overrides.len();
    resolved.extend(plugin_overrides);

    let missing: Vec<String> = schema
        .iter()
        .filter(|s| s.required)
        .filter(|s| resolved.get(&s.key).map_or(true, |v| v.is_null()))
        .map(|s| s.key.clone())
        .collect();

    if !missing.is_empty() {
        return Err(Error::MissingSettings {
            plugin: pid.to_string(),
            keys: missing,
        });
    }

    debug!(
        plugin = %pid,
        version = %version,
        keys = resolved.len(),
        overrides = override_count,
        "Resolved plugin settings"
    );
    Ok(resolved)
}

/// Stable fingerprint of a resolved settings map (16 hex chars of SHA-256)
#[must_use]
pub fn settings_fingerprint(settings: &ResolvedSettings) -> String {
    let canonical = canonicalize(&serde_json::Value::Object(
        settings
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    ));

    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

/// Rebuild a value with every nested object's keys inserted in sorted order
fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(object) => {
            let sorted: BTreeMap<&String, &serde_json::Value> = object.iter().collect();
            serde_json::Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

/// Keys flagged sensitive in a schema
#[must_use]
pub fn sensitive_keys(schema: &[SettingSpec]) -> Vec<String> {
    schema
        .iter()
        .filter(|s| s.sensitive && !s.key.is_empty())
        .map(|s| s.key.clone())
        .collect()
}

/// Copy of `settings` with sensitive values replaced by [`MASKED_VALUE`].
///
/// Display only; never feed the result back into a build.
#[must_use]
pub fn mask_sensitive_settings(
    settings: &ResolvedSettings,
    schema: &[SettingSpec],
) -> ResolvedSettings {
    let mut masked = settings.clone();
    for key in sensitive_keys(schema) {
        if let Some(value) = masked.get_mut(&key) {
            *value = serde_json::Value::String(MASKED_VALUE.to_string());
        }
    }
    masked
}
