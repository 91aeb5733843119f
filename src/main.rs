//! Neon configuration tool
//!
//! Inspects and edits the Neon configuration documents from the command
//! line, and can watch them for changes made by other processes.

use anyhow::{Result, bail};
use clap::Parser;
use neon_config::cli::{Cli, Command, ConfigName};
use neon_config::config::watcher::{WatcherConfig, start_config_watcher};
use neon_config::config::{
    ConfigDocument, ConfigPaths, ConfigRegistry, ConfigResolver, DerivedConfig, SystemConfig,
};
use neon_config::logging::{LogTarget, init_logging};
use serde_yaml::{Mapping, Value};
use std::sync::Arc;
use tracing::{debug, info};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let target: LogTarget = cli.log.parse()?;
    init_logging(&target, cli.verbose)?;

    let mut paths = ConfigPaths::discover();
    if let Some(dir) = cli.config_dir {
        paths.override_dir = Some(dir);
    }
    let system = SystemConfig::load(&paths.system_config_files);
    debug!("Loaded system config from {:?}", system.sources());

    let registry = Arc::new(ConfigRegistry::new());
    let resolver = ConfigResolver::new(Arc::clone(&registry), paths, system).with_github_token(
        std::env::var("GITHUB_TOKEN")
            .ok()
            .filter(|t| !t.is_empty()),
    );

    match cli.command {
        Command::Show { name } => {
            print!("{}", serde_yaml::to_string(&resolve(&resolver, name))?);
        }
        Command::Get { name, key } => {
            let content = resolve(&resolver, name);
            let Some(value) = content.get(key.as_str()) else {
                bail!("{:?} has no key '{}'", name, key);
            };
            print!("{}", serde_yaml::to_string(value)?);
        }
        Command::Set { name, key, value } => {
            let doc = stored(&resolver, name)?;
            let value: Value = serde_yaml::from_str(&value)?;
            doc.set(&key, value);
            if !doc.commit() {
                bail!("{} was not written; see log for details", doc.path().display());
            }
            info!(name = doc.name(), key = %key, "Updated configuration");
        }
        Command::Export { name } => {
            let doc = stored(&resolver, name)?;
            println!("{}", doc.export_to_json()?.display());
        }
        Command::Watch => run_watch(&resolver, registry)?,
    }

    Ok(())
}

fn resolve(resolver: &ConfigResolver, name: ConfigName) -> Mapping {
    match name {
        ConfigName::Local => resolver.local_config().content(),
        ConfigName::User => resolver.user_config().content(),
        ConfigName::Auth => resolver.auth_config().content(),
        ConfigName::Language => resolver.derived(DerivedConfig::Language),
        ConfigName::Speech => resolver.derived(DerivedConfig::Speech),
        ConfigName::Bus => resolver.derived(DerivedConfig::Bus),
        ConfigName::Gui => resolver.derived(DerivedConfig::Gui),
        ConfigName::Audio => resolver.derived(DerivedConfig::Audio),
        ConfigName::Api => resolver.derived(DerivedConfig::Api),
        ConfigName::Skills => resolver.derived(DerivedConfig::Skills),
    }
}

fn stored(resolver: &ConfigResolver, name: ConfigName) -> Result<Arc<ConfigDocument>> {
    let doc = match name {
        ConfigName::Local => resolver.local_config(),
        ConfigName::User => resolver.user_config(),
        ConfigName::Auth => resolver.auth_config(),
        derived => bail!("{:?} is derived from other configs and is read-only", derived),
    };
    if doc.is_detached() {
        bail!("no writable location for {}", doc.name());
    }
    Ok(doc)
}

fn run_watch(resolver: &ConfigResolver, registry: Arc<ConfigRegistry>) -> Result<()> {
    let local = resolver.local_config();
    resolver.user_config();
    resolver.auth_config();

    let handle = start_config_watcher(registry, local.directory(), WatcherConfig::default())?;
    info!("Watching {}; press Ctrl-C to stop", local.directory().display());
    for event in handle.events.iter() {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}
