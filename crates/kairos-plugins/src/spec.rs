//! Plugin spec strings (`pid` or `pid@version`)

use crate::error::{Error, Result};

/// A parsed active-plugin entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PluginSpec {
    /// Plugin identifier
    pub pid: String,
    /// Pinned version, if any
    pub version: Option<String>,
}

impl PluginSpec {
    /// Parse `pid` or `pid@version`. The split happens on the last `@`.
    pub fn parse(spec: &str) -> Result<Self> {
        let (pid, version) = match spec.rsplit_once('@') {
            Some((pid, version)) => {
                let version = version.trim();
                if version.is_empty() {
                    return Err(Error::InvalidSpec(format!("empty version in '{}'", spec)));
                }
                (pid.trim(), Some(version.to_string()))
            }
            None => (spec.trim(), None),
        };

        if pid.is_empty() {
            return Err(Error::InvalidSpec(format!("empty plugin id in '{}'", spec)));
        }

        Ok(Self {
            pid: pid.to_string(),
            version,
        })
    }
}

impl std::fmt::Display for PluginSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.pid, version),
            None => write!(f, "{}", self.pid),
        }
    }
}
