//! Validator - Structural and dependency checks for plugin contracts
//!
//! A contract must pass validation before any agent is instantiated from it.
//! All problems are collected and reported together.

use crate::contract::{PluginContract, PluginMetadata};
use crate::error::{Error, Result};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Plugin contract validator
#[derive(Debug, Clone, Copy, Default)]
pub struct ContractValidator;

impl ContractValidator {
    /// Create a validator
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Validate a contract, running its dependency check if it has one
    pub fn validate(&self, contract: &PluginContract) -> Result<()> {
        let mut errors = Self::structural_errors(contract.metadata());

        if let Some(check) = contract.plugin().dependency_check() {
            errors.extend(
                check
                    .validate_dependencies()
                    .into_iter()
                    .map(|e| format!("dependency: {}", e)),
            );
        }

        if errors.is_empty() {
            debug!(plugin = %contract.label(), "Plugin contract validated");
            return Ok(());
        }

        warn!(plugin = %contract.label(), errors = errors.len(), "Plugin contract rejected");
        Err(Error::Validation {
            plugin: contract.pid().to_string(),
            errors,
        })
    }

    fn structural_errors(metadata: &PluginMetadata) -> Vec<String> {
        let mut errors = Vec::new();

        if !is_valid_pid(&metadata.pid) {
            errors.push(format!(
                "pid '{}' must be a reverse-domain identifier (e.g. io.example.search)",
                metadata.pid
            ));
        }
        if metadata.name.trim().is_empty() {
            errors.push("name is empty".to_string());
        }
        if metadata.version.trim().is_empty() {
            errors.push("version is empty".to_string());
        } else if metadata.version.contains(char::is_whitespace) || metadata.version.contains('@')
        {
            errors.push(format!("version '{}' is malformed", metadata.version));
        }

        let mut seen = HashSet::new();
        for setting in &metadata.settings_schema {
            if setting.key.trim().is_empty() {
                errors.push("settings schema contains an empty key".to_string());
            } else if !seen.insert(setting.key.as_str()) {
                errors.push(format!("duplicate setting key '{}'", setting.key));
            }
        }

        errors
    }
}

fn is_valid_pid(pid: &str) -> bool {
    let segments: Vec<&str> = pid.split('.').collect();
    segments.len() >= 2
        && segments.iter().all(|s| {
            !s.is_empty()
                && s
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        })
}

#[cfg(test)]
mod tests;
