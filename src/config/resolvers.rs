//! Named configuration resolvers.
//!
//! Each resolver opens (or creates) one stored document, adopts a read-only
//! mirror if one exists, seeds it from the bundled default when empty,
//! runs one-time migrations and reconciles its keys against the bundled
//! schema. Derived resolvers assemble a plain mapping out of sections of
//! the local document, filling gaps from the legacy system configuration.
//!
//! Resolvers never fail on environmental problems. They log, fall back to
//! the next candidate directory and, as a last resort, hand out an
//! in-memory document.

use super::defaults::DefaultDocument;
use super::merge::update_keys;
use super::paths::{ConfigPaths, is_writable_dir};
use super::registry::ConfigRegistry;
use super::store::{ConfigDocument, document_path};
use super::system::SystemConfig;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Top-level user sections that belong in the local document.
pub const LEGACY_USER_SECTIONS: [&str; 8] = [
    "interface", "listener", "skills", "session", "tts", "stt", "logs", "device",
];

/// Keys that moved from `stt` to `language` in the local document.
pub const LEGACY_LANGUAGE_KEYS: [&str; 2] = ["detection_module", "translation_module"];

/// Depth used when reconciling stored documents against their schema.
pub const RECONCILE_DEPTH: usize = 1;

/// A configuration assembled from sections of the local document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DerivedConfig {
    Language,
    Speech,
    Bus,
    Gui,
    Audio,
    Api,
    Skills,
}

impl DerivedConfig {
    pub const ALL: [DerivedConfig; 7] = [
        Self::Language,
        Self::Speech,
        Self::Bus,
        Self::Gui,
        Self::Audio,
        Self::Api,
        Self::Skills,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Language => "language",
            Self::Speech => "speech",
            Self::Bus => "bus",
            Self::Gui => "gui",
            Self::Audio => "audio",
            Self::Api => "api",
            Self::Skills => "skills",
        }
    }

    /// `(local section, legacy system section)` pairs this config is built from.
    fn sections(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Language => &[("language", "language")],
            Self::Speech => &[
                ("listener", "listener"),
                ("hotwords", "hotwords"),
                ("stt", "stt"),
                ("tts", "tts"),
            ],
            Self::Bus => &[("websocket", "websocket")],
            Self::Gui => &[("gui", "gui")],
            Self::Audio => &[("audioService", "Audio")],
            Self::Api => &[("api", "server")],
            Self::Skills => &[("skills", "skills")],
        }
    }
}

/// Resolves the named configuration documents.
pub struct ConfigResolver {
    registry: Arc<ConfigRegistry>,
    paths: ConfigPaths,
    system: SystemConfig,
    github_token: Option<String>,
}

impl ConfigResolver {
    pub fn new(registry: Arc<ConfigRegistry>, paths: ConfigPaths, system: SystemConfig) -> Self {
        Self {
            registry,
            paths,
            system,
            github_token: None,
        }
    }

    /// Resolver using discovered paths, the legacy system configuration on
    /// disk and `GITHUB_TOKEN` from the environment.
    pub fn discover(registry: Arc<ConfigRegistry>) -> Self {
        let paths = ConfigPaths::discover();
        let system = SystemConfig::load(&paths.system_config_files);
        Self::new(registry, paths, system)
            .with_github_token(std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()))
    }

    /// Token used to fill `github.token` in the auth document.
    pub fn with_github_token(mut self, token: Option<String>) -> Self {
        self.github_token = token;
        self
    }

    pub fn registry(&self) -> &Arc<ConfigRegistry> {
        &self.registry
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn system(&self) -> &SystemConfig {
        &self.system
    }

    // ------------------------------------------------------------------
    // Stored documents
    // ------------------------------------------------------------------

    /// System and device settings.
    pub fn local_config(&self) -> Arc<ConfigDocument> {
        self.local_config_in(None)
    }

    /// Local settings, looking in `dir` first.
    pub fn local_config_in(&self, dir: Option<&Path>) -> Arc<ConfigDocument> {
        let doc = self.resolve_document(DefaultDocument::Local, dir);
        migrate_language_keys(&doc);
        reconcile(&doc, DefaultDocument::Local, &Mapping::new());
        doc
    }

    /// Per-user profile and preferences.
    pub fn user_config(&self) -> Arc<ConfigDocument> {
        self.user_config_in(None)
    }

    /// User settings, looking in `dir` first. Legacy sections found in the
    /// user document are moved into the local document in the same place.
    pub fn user_config_in(&self, dir: Option<&Path>) -> Arc<ConfigDocument> {
        let user = self.resolve_document(DefaultDocument::User, dir);
        let mut retained = Mapping::new();
        if LEGACY_USER_SECTIONS.iter().any(|key| user.has_key(key)) {
            let local = self.local_config_in(dir);
            if !migrate_user_sections(&user, &local) {
                // Keep the sections until a later pass gets them into local.
                retained = legacy_sections(&user.content());
            }
        }
        reconcile(&user, DefaultDocument::User, &retained);
        user
    }

    /// Credentials for external services.
    ///
    /// Only missing keys are filled in; credentials for services the bundled
    /// default does not know about are kept.
    pub fn auth_config(&self) -> Arc<ConfigDocument> {
        self.auth_config_in(None)
    }

    pub fn auth_config_in(&self, dir: Option<&Path>) -> Arc<ConfigDocument> {
        let doc = self.resolve_document(DefaultDocument::Auth, dir);
        match DefaultDocument::Auth.schema() {
            Ok(schema) => {
                doc.update_keys(&schema);
            }
            Err(e) => error!("Bundled auth default unusable: {}", e),
        }
        if let Some(ref token) = self.github_token {
            fill_github_token(&doc, token);
        }
        doc
    }

    // ------------------------------------------------------------------
    // Derived configs
    // ------------------------------------------------------------------

    pub fn language_config(&self) -> Mapping {
        self.derived(DerivedConfig::Language)
    }

    pub fn speech_config(&self) -> Mapping {
        self.derived(DerivedConfig::Speech)
    }

    pub fn bus_config(&self) -> Mapping {
        self.derived(DerivedConfig::Bus)
    }

    pub fn gui_config(&self) -> Mapping {
        self.derived(DerivedConfig::Gui)
    }

    pub fn audio_config(&self) -> Mapping {
        self.derived(DerivedConfig::Audio)
    }

    pub fn api_config(&self) -> Mapping {
        self.derived(DerivedConfig::Api)
    }

    pub fn skills_config(&self) -> Mapping {
        self.derived(DerivedConfig::Skills)
    }

    /// Build a derived config from the local document and the system config.
    ///
    /// Single-section configs are returned flat; multi-section ones are
    /// keyed by local section name.
    pub fn derived(&self, which: DerivedConfig) -> Mapping {
        let local = self.local_config().content();
        let sections = which.sections();

        let mut result = Mapping::new();
        for &(local_key, system_key) in sections {
            let mut section = match local.get(local_key) {
                Some(Value::Mapping(map)) => map.clone(),
                _ => Mapping::new(),
            };
            if let Some(system_section) = self.system.section(system_key) {
                update_keys(&mut section, system_section);
            }
            if which == DerivedConfig::Language {
                fill_core_lang(&mut section, &self.system);
            }

            let missing: Vec<String> = DefaultDocument::Local
                .section_keys(local_key)
                .into_iter()
                .filter(|key| !section.contains_key(key.as_str()))
                .collect();
            if !missing.is_empty() {
                warn!(
                    config = which.name(),
                    section = local_key,
                    "Keys missing after merging system config: {:?}",
                    missing
                );
            }

            if sections.len() == 1 {
                return section;
            }
            result.insert(Value::from(local_key), Value::Mapping(section));
        }
        result
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn resolve_document(&self, which: DefaultDocument, dir: Option<&Path>) -> Arc<ConfigDocument> {
        let name = which.name();
        let requested: PathBuf = match dir {
            Some(dir) => dir.to_path_buf(),
            None => self.paths.config_dir(),
        };
        let doc = self.open_with_fallback(name, &requested);

        if !doc.is_detached() && doc.directory() != requested {
            self.import_read_only(&doc, &requested);
        }

        if doc.is_empty() {
            match which.schema() {
                Ok(schema) => {
                    info!(name = %name, "Populating from bundled default");
                    doc.populate(&schema, false);
                }
                Err(e) => error!(name = %name, "Bundled default unusable: {}", e),
            }
        }
        doc
    }

    fn open_with_fallback(&self, name: &str, requested: &Path) -> Arc<ConfigDocument> {
        for dir in self.paths.fallback_chain(requested) {
            if !is_writable_dir(&dir) {
                warn!(name = %name, dir = %dir.display(), "Directory not writable, trying next location");
                continue;
            }
            match self.registry.open(name, &dir, false) {
                Ok(doc) => return doc,
                Err(e) if e.is_environmental() => warn!(
                    name = %name,
                    dir = %dir.display(),
                    "Cannot open configuration here, trying next location: {}", e
                ),
                Err(e) => {
                    error!(name = %name, dir = %dir.display(), "Failed to open configuration: {}", e);
                    break;
                }
            }
        }
        error!(name = %name, "No usable configuration directory; using in-memory document");
        self.registry.detached(name)
    }

    /// Copy a mirror from a directory we could not write into `doc` once.
    fn import_read_only(&self, doc: &ConfigDocument, requested: &Path) {
        let mirror = document_path(doc.name(), requested);
        if !mirror.is_file() || !doc.is_empty() {
            return;
        }
        match doc.import_file(&mirror) {
            Ok(()) => info!(
                name = doc.name(),
                from = %mirror.display(),
                to = %doc.path().display(),
                "Imported read-only configuration"
            ),
            Err(e) => warn!(name = doc.name(), "Failed to import read-only configuration: {}", e),
        }
    }
}

/// Reconcile `doc` against the bundled default plus the `retained` sections.
fn reconcile(doc: &ConfigDocument, which: DefaultDocument, retained: &Mapping) {
    let mut schema = match which.schema() {
        Ok(schema) => schema,
        Err(e) => {
            error!(name = which.name(), "Bundled default unusable: {}", e);
            return;
        }
    };
    for (key, value) in retained {
        schema.insert(key.clone(), value.clone());
    }
    match doc.make_equal_by_keys(&schema, true, RECONCILE_DEPTH) {
        Ok(true) => debug!(name = which.name(), "Reconciled keys with bundled default"),
        Ok(false) => {}
        Err(e) => error!(name = which.name(), "Key reconciliation failed: {}", e),
    }
}

/// Move `stt.detection_module`/`stt.translation_module` under `language`.
fn migrate_language_keys(doc: &ConfigDocument) {
    let Some(mut stt) = doc.get_section("stt") else {
        return;
    };
    let moved: Vec<(Value, Value)> = LEGACY_LANGUAGE_KEYS
        .iter()
        .filter_map(|key| stt.get(*key).map(|v| (Value::from(*key), v.clone())))
        .collect();
    if moved.is_empty() {
        return;
    }

    info!(name = doc.name(), "Moving language modules out of stt");
    let mut language = doc.get_section("language").unwrap_or_default();
    for (key, value) in moved {
        stt.retain(|k, _| *k != key);
        if !language.contains_key(&key) {
            language.insert(key, value);
        }
    }
    doc.set("stt", stt);
    doc.set("language", language);
    if !doc.commit() {
        debug!(name = doc.name(), "Language migration not written; another writer may have done it");
    }
}

/// Top-level sections of `content` that belong in the local document.
fn legacy_sections(content: &Mapping) -> Mapping {
    LEGACY_USER_SECTIONS
        .iter()
        .filter_map(|key| content.get(*key).map(|v| (Value::from(*key), v.clone())))
        .collect()
}

/// Whether every key of `expected` is in `content` with the same value,
/// comparing nested mappings key by key.
fn contains_all(content: &Mapping, expected: &Mapping) -> bool {
    expected.iter().all(|(key, value)| match (content.get(key), value) {
        (Some(Value::Mapping(have)), Value::Mapping(want)) => contains_all(have, want),
        (Some(have), want) => have == want,
        (None, _) => false,
    })
}

/// Move legacy top-level sections from the user document into local.
///
/// The sections are removed from the user document only once the local
/// document holds them on disk. Returns whether that happened. Another
/// process may be running the same migration; a section that has already
/// vanished is taken as that process having won.
fn migrate_user_sections(user: &ConfigDocument, local: &ConfigDocument) -> bool {
    let moved = legacy_sections(&user.content());
    if moved.is_empty() {
        return true;
    }

    let keys: Vec<&str> = moved.keys().filter_map(Value::as_str).collect();
    info!(
        from = user.name(),
        to = local.name(),
        "Migrating legacy sections: {:?}",
        keys
    );

    local.merge_with(&moved);
    let landed =
        local.commit() || (!local.is_pending() && contains_all(&local.content(), &moved));
    if !landed {
        warn!(
            from = user.name(),
            to = local.name(),
            "Legacy sections not written to local; keeping them for the next pass"
        );
        return false;
    }

    for key in &keys {
        if user.remove(key).is_none() {
            debug!(name = user.name(), key, "Section already migrated");
        }
    }
    if !user.commit() {
        debug!(name = user.name(), "Migration removal skipped; already migrated elsewhere");
    }
    true
}

fn fill_core_lang(section: &mut Mapping, system: &SystemConfig) {
    if section.contains_key("core_lang") {
        return;
    }
    if let Some(Value::String(lang)) = system.get("lang") {
        section.insert(Value::from("core_lang"), Value::from(lang.as_str()));
    }
}

fn fill_github_token(doc: &ConfigDocument, token: &str) {
    let mut github = doc.get_section("github").unwrap_or_default();
    let has_token = github
        .get("token")
        .and_then(Value::as_str)
        .is_some_and(|t| !t.is_empty());
    if has_token {
        return;
    }
    github.insert(Value::from("token"), Value::from(token));
    doc.set("github", github);
    if doc.commit() {
        info!(name = doc.name(), "Filled github token from environment");
    }
}
