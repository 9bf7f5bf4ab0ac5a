//! Key/value properties file.
//!
//! The deployment file that names the listening port. Format is the classic
//! `.properties` layout:
//!
//! ```text
//! # comment
//! SERVER_PORT=8080
//! NAME: value
//! ```
//!
//! Only read at startup. The parsed map is immutable afterwards and is owned
//! by whoever loaded it; nothing here is global.

use crate::config::ConfigError;
use std::collections::HashMap;
use std::path::Path;

/// Key holding the TCP port to listen on.
pub const SERVER_PORT: &str = "SERVER_PORT";

/// Parsed properties file.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    entries: HashMap<String, String>,
}

impl Properties {
    /// Read and parse a properties file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        Ok(Self::parse(&contents))
    }

    /// Parse properties from a string. Malformed lines (no separator) are skipped.
    pub fn parse(contents: &str) -> Self {
        let entries = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
            .filter_map(|line| {
                let sep = line.find(|c| c == '=' || c == ':')?;
                let key = line[..sep].trim();
                if key.is_empty() {
                    return None;
                }
                Some((key.to_string(), line[sep + 1..].trim().to_string()))
            })
            .collect();

        Self { entries }
    }

    /// Look up a property by key.
    pub fn get_property(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Resolve the listening port.
    pub fn port(&self) -> Result<u16, ConfigError> {
        let raw = self
            .get_property(SERVER_PORT)
            .ok_or_else(|| ConfigError::MissingProperty(SERVER_PORT.to_string()))?;

        raw.parse().map_err(|_| ConfigError::InvalidProperty {
            key: SERVER_PORT.to_string(),
            value: raw.to_string(),
        })
    }
}
