//! Default schema documents bundled with the crate.
//!
//! The YAML files under `config/` are embedded at build time. They are
//! both the initial content of a fresh document and the reference that
//! live documents are reconciled against. They are never mutated.

use crate::error::{ConfigError, Result};
use serde_yaml::{Mapping, Value};

pub const LOCAL_CONF: &str = include_str!("../../config/ngi_local_conf.yml");
pub const USER_INFO: &str = include_str!("../../config/ngi_user_info.yml");
pub const AUTH_VARS: &str = include_str!("../../config/ngi_auth_vars.yml");

/// A stored configuration document with a bundled default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefaultDocument {
    /// System and device settings
    Local,
    /// Per-user profile and preferences
    User,
    /// Credentials for external services
    Auth,
}

impl DefaultDocument {
    pub const ALL: [DefaultDocument; 3] = [Self::Local, Self::User, Self::Auth];

    /// File stem of the document on disk.
    pub fn name(self) -> &'static str {
        match self {
            Self::Local => "ngi_local_conf",
            Self::User => "ngi_user_info",
            Self::Auth => "ngi_auth_vars",
        }
    }

    /// Raw YAML source of the bundled default.
    pub fn source(self) -> &'static str {
        match self {
            Self::Local => LOCAL_CONF,
            Self::User => USER_INFO,
            Self::Auth => AUTH_VARS,
        }
    }

    /// Parsed bundled default.
    pub fn schema(self) -> Result<Mapping> {
        match serde_yaml::from_str::<Value>(self.source())? {
            Value::Mapping(map) => Ok(map),
            _ => Err(ConfigError::NotAMapping {
                what: "bundled default",
            }),
        }
    }

    /// Keys the bundled default defines under `section`.
    pub fn section_keys(self, section: &str) -> Vec<String> {
        let Ok(schema) = self.schema() else {
            return Vec::new();
        };
        match schema.get(section) {
            Some(Value::Mapping(map)) => map
                .keys()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl std::fmt::Display for DefaultDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
