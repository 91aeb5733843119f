//! CLI command definitions for neon-config
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// A named configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigName {
    /// ngi_local_conf.yml
    Local,
    /// ngi_user_info.yml
    User,
    /// ngi_auth_vars.yml
    Auth,
    Language,
    Speech,
    Bus,
    Gui,
    Audio,
    Api,
    Skills,
}

impl ConfigName {
    /// Whether the name refers to a stored, writable document.
    pub fn is_stored(self) -> bool {
        matches!(self, ConfigName::Local | ConfigName::User | ConfigName::Auth)
    }
}

/// Neon configuration inspection and editing
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration directory (overrides NEON_CONFIG_PATH)
    #[arg(short, long, global = true)]
    pub config_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print a configuration as YAML
    Show {
        #[arg(value_enum)]
        name: ConfigName,
    },

    /// Print one top-level key of a configuration
    Get {
        #[arg(value_enum)]
        name: ConfigName,
        key: String,
    },

    /// Set a top-level key in a stored configuration
    Set {
        #[arg(value_enum)]
        name: ConfigName,
        key: String,
        /// Value, parsed as YAML (`true`, `3`, `{a: 1}`, ...)
        value: String,
    },

    /// Write a stored configuration as JSON next to its YAML file
    Export {
        #[arg(value_enum)]
        name: ConfigName,
    },

    /// Watch the configuration directory and report reloads
    Watch,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_set() {
        let cli = Cli::parse_from(["neon-config", "--config-dir", "/tmp/neon", "set", "user", "units", "{time: 24}"]);
        assert_eq!(cli.config_dir, Some(PathBuf::from("/tmp/neon")));
        match cli.command {
            Command::Set { name, key, value } => {
                assert_eq!(name, ConfigName::User);
                assert_eq!(key, "units");
                assert_eq!(value, "{time: 24}");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_stored_names() {
        assert!(ConfigName::Auth.is_stored());
        assert!(!ConfigName::Speech.is_stored());
    }
}
