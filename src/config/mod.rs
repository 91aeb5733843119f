//! Layered YAML configuration.
//!
//! Configuration lives in a handful of YAML documents in one directory:
//! 1. **Local** - `ngi_local_conf.yml`, system and device settings
//! 2. **User** - `ngi_user_info.yml`, per-user profile and preferences
//! 3. **Auth** - `ngi_auth_vars.yml`, credentials for external services
//!
//! Each document is a [`ConfigDocument`] shared through a
//! [`ConfigRegistry`]. Writes are guarded by a per-file lock and skipped
//! when the file changed on disk since it was loaded. [`ConfigResolver`]
//! seeds documents from the bundled defaults, migrates legacy layouts and
//! reconciles keys. Derived configs (speech, bus, gui, ...) are plain
//! mappings assembled from sections of the local document and the legacy
//! system configuration.
//!
//! ## Environment Variables
//! - `NEON_CONFIG_PATH` - Configuration directory
//! - `GITHUB_TOKEN` - Fills `github.token` in the auth document
//! - `MYCROFT_SYSTEM_CONFIG` - System-wide legacy configuration file
//! - `MYCROFT_USER_CONFIG` - Per-user legacy configuration file

pub mod defaults;
pub mod lock;
pub mod merge;
pub mod paths;
pub mod registry;
pub mod resolvers;
pub mod stamp;
pub mod store;
pub mod system;
pub mod watcher;

pub use defaults::DefaultDocument;
pub use lock::{LockTable, lock_path_for};
pub use merge::{deep_merge, deep_merge_all, delete_keys_recursive, make_equal_by_keys, update_keys};
pub use paths::ConfigPaths;
pub use registry::ConfigRegistry;
pub use resolvers::{ConfigResolver, DerivedConfig};
pub use stamp::{DiskStat, FileStamp, StatSource};
pub use store::ConfigDocument;
pub use system::SystemConfig;
