//! Legacy system configuration.
//!
//! The older voice stack keeps its settings in `mycroft.conf` files (JSON
//! with `//` line comments). The tiers are deep merged, later files taking
//! precedence, into one read-only mapping that derived resolvers use to
//! fill keys the Neon documents lack.

use super::merge::deep_merge_all;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct SystemConfig {
    content: Mapping,
    sources: Vec<PathBuf>,
}

impl SystemConfig {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_mapping(content: Mapping) -> Self {
        Self {
            content,
            sources: Vec::new(),
        }
    }

    /// Merge every readable file in `files`, lowest priority first.
    pub fn load(files: &[PathBuf]) -> Self {
        let mut tiers = Vec::new();
        let mut sources = Vec::new();
        for file in files {
            if let Some(content) = load_file(file) {
                tiers.push(content);
                sources.push(file.clone());
            }
        }
        Self {
            content: deep_merge_all(tiers),
            sources,
        }
    }

    pub fn content(&self) -> &Mapping {
        &self.content
    }

    /// Files that contributed to this configuration.
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Mapping at a top-level key.
    pub fn section(&self, key: &str) -> Option<&Mapping> {
        self.content.get(key).and_then(Value::as_mapping)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.content.get(key)
    }
}

fn load_file(path: &Path) -> Option<Mapping> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            debug!(path = %path.display(), "System config not loaded: {}", e);
            return None;
        }
    };
    match parse_commented(&text) {
        Some(content) => Some(content),
        None => {
            warn!(path = %path.display(), "Ignoring unparsable system config");
            None
        }
    }
}

/// Parse JSON with `//` line comments, falling back to YAML.
fn parse_commented(text: &str) -> Option<Mapping> {
    let stripped: String = text
        .lines()
        .filter(|line| !line.trim_start().starts_with("//"))
        .collect::<Vec<_>>()
        .join("\n");

    let value = match serde_json::from_str::<serde_json::Value>(&stripped) {
        Ok(json) => serde_yaml::to_value(json).ok()?,
        Err(_) => serde_yaml::from_str::<Value>(&stripped).ok()?,
    };
    match value {
        Value::Mapping(map) => Some(map),
        _ => None,
    }
}
