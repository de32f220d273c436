//! Line-oriented configuration with dotted keys.
//!
//! `[section]` headers prefix the keys that follow, `=` and `:` both
//! separate key from value, `#` and `//` start comments, and values may
//! be single- or double-quoted. Typed accessors never fail: a missing
//! key or unparsable value falls back to the supplied default.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

/// Config loading errors. Parse problems are not errors — malformed
/// lines are skipped and typed accessors fall back to defaults.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Owned key -> string map with typed accessors.
#[derive(Debug, Clone, Default)]
pub struct Config {
    values: HashMap<String, String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and parse a config file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::parse(&contents))
    }

    /// Parse config text. Lines that are not a section header or a
    /// key/value pair are ignored.
    pub fn parse(contents: &str) -> Self {
        let mut values = HashMap::new();
        let mut section = String::new();

        for raw in contents.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                section = line[1..line.len() - 1].trim().to_string();
                continue;
            }

            let delim = line.find('=').or_else(|| line.find(':'));
            let Some(delim) = delim else { continue };

            let key = line[..delim].trim();
            let mut value = line[delim + 1..].trim();

            // Trailing comments end the value.
            if let Some(pos) = value.find('#').or_else(|| value.find("//")) {
                value = value[..pos].trim_end();
            }
            let value = strip_quotes(value);

            if key.is_empty() {
                continue;
            }
            let full_key = if section.is_empty() {
                key.to_string()
            } else {
                format!("{section}.{key}")
            };
            values.insert(full_key, value.to_string());
        }

        Self { values }
    }

    pub fn get_str(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.values
            .get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.values
            .get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Booleans accept true/false, 1/0, yes/no, on/off, case-insensitive.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.values.get(key) {
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" => false,
                _ => default,
            },
            None => default,
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn strip_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}
