//! Key reconciliation for YAML mappings.
//!
//! All functions work in place on `serde_yaml::Mapping`, which keeps
//! insertion order. Sequences are never merged element-wise; a sequence in
//! the source replaces the target's value entirely.

use crate::error::{ConfigError, Result};
use serde_yaml::{Mapping, Value};
use tracing::warn;

/// Sections whose sub-keys depend on installed plugins. Below these keys
/// reconciliation only fills missing keys and never prunes.
pub const PLUGIN_SECTIONS: [&str; 4] = ["tts", "stt", "hotwords", "language"];

/// Deep merge `source` into `target`, with `source` taking precedence.
///
/// - Nested mappings present on both sides are merged recursively
/// - Every other value in `source` replaces the value in `target`
///
/// # Example
/// ```
/// use neon_config::config::deep_merge;
///
/// let mut target: serde_yaml::Mapping =
///     serde_yaml::from_str("server: {port: 8080, host: localhost}\nfeatures: [a, b]").unwrap();
/// let source: serde_yaml::Mapping =
///     serde_yaml::from_str("server: {port: 9000}\nfeatures: [c]").unwrap();
/// deep_merge(&mut target, &source);
/// // Result: { server: { port: 9000, host: localhost }, features: [c] }
/// ```
pub fn deep_merge<'a>(target: &'a mut Mapping, source: &Mapping) -> &'a mut Mapping {
    for (key, source_value) in source {
        match (target.get_mut(key), source_value) {
            (Some(Value::Mapping(target_map)), Value::Mapping(source_map)) => {
                deep_merge(target_map, source_map);
            }
            _ => {
                target.insert(key.clone(), source_value.clone());
            }
        }
    }
    target
}

/// `deep_merge` for untyped values. Fails if either side is not a mapping.
pub fn deep_merge_values(target: &mut Value, source: &Value) -> Result<()> {
    let source = source
        .as_mapping()
        .ok_or(ConfigError::NotAMapping { what: "merge source" })?;
    let target = target
        .as_mapping_mut()
        .ok_or(ConfigError::NotAMapping { what: "merge target" })?;
    deep_merge(target, source);
    Ok(())
}

/// Merge multiple mappings in order, with later mappings taking precedence.
///
/// Equivalent to folding `deep_merge` over the list.
pub fn deep_merge_all(mappings: impl IntoIterator<Item = Mapping>) -> Mapping {
    mappings.into_iter().fold(Mapping::new(), |mut acc, next| {
        deep_merge(&mut acc, &next);
        acc
    })
}

/// Remove every occurrence of each key in `keys` at every nesting level.
///
/// Mappings nested inside sequences are visited too. Missing keys are ignored.
pub fn delete_keys_recursive<'a>(target: &'a mut Mapping, keys: &[&str]) -> &'a mut Mapping {
    target.retain(|key, _| !key.as_str().is_some_and(|k| keys.contains(&k)));
    for (_, value) in target.iter_mut() {
        delete_in_value(value, keys);
    }
    target
}

fn delete_in_value(value: &mut Value, keys: &[&str]) {
    match value {
        Value::Mapping(map) => {
            delete_keys_recursive(map, keys);
        }
        Value::Sequence(items) => {
            for item in items {
                delete_in_value(item, keys);
            }
        }
        _ => {}
    }
}

/// Make `target` have exactly the keys of `reference`.
///
/// Phase 1 prunes keys of `target` that `reference` does not know, and
/// recurses into nested mappings while `current_depth < max_depth`. Below
/// a [`PLUGIN_SECTIONS`] key the recursion switches to [`update_keys`].
/// Phase 2 copies in every key `reference` has and `target` lacks.
///
/// Fails with [`ConfigError::EmptyReference`] if `reference` is empty.
pub fn make_equal_by_keys(
    target: &mut Mapping,
    reference: &Mapping,
    max_depth: usize,
    current_depth: usize,
) -> Result<()> {
    if reference.is_empty() {
        return Err(ConfigError::EmptyReference);
    }

    target.retain(|key, _| {
        let known = reference.contains_key(key);
        if !known {
            warn!(key = %display_key(key), "Removing key not present in reference");
        }
        known
    });

    if current_depth < max_depth {
        for (key, value) in target.iter_mut() {
            let (Value::Mapping(target_map), Some(Value::Mapping(reference_map))) =
                (value, reference.get(key))
            else {
                continue;
            };
            if key.as_str().is_some_and(|k| PLUGIN_SECTIONS.contains(&k)) {
                update_keys(target_map, reference_map);
            } else if !reference_map.is_empty() {
                make_equal_by_keys(target_map, reference_map, max_depth, current_depth + 1)?;
            }
        }
    }

    fill_missing(target, reference);
    Ok(())
}

/// Add every key of `reference` missing from `target`, recursing into
/// mappings present on both sides. Never removes keys.
pub fn update_keys<'a>(target: &'a mut Mapping, reference: &Mapping) -> &'a mut Mapping {
    for (key, reference_value) in reference {
        match (target.get_mut(key), reference_value) {
            (Some(Value::Mapping(target_map)), Value::Mapping(reference_map)) => {
                update_keys(target_map, reference_map);
            }
            (Some(_), _) => {}
            (None, _) => {
                target.insert(key.clone(), reference_value.clone());
            }
        }
    }
    target
}

fn fill_missing(target: &mut Mapping, reference: &Mapping) {
    for (key, value) in reference {
        if !target.contains_key(key) {
            target.insert(key.clone(), value.clone());
        }
    }
}

fn display_key(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(src: &str) -> Mapping {
        serde_yaml::from_str(src).unwrap()
    }

    fn keys(map: &Mapping) -> Vec<&str> {
        map.keys().filter_map(Value::as_str).collect()
    }

    #[test]
    fn test_merge_simple_mappings() {
        let mut target = yaml("{a: 1, b: 2}");
        deep_merge(&mut target, &yaml("{b: 3, c: 4}"));
        assert_eq!(target, yaml("{a: 1, b: 3, c: 4}"));
    }

    #[test]
    fn test_merge_nested_mappings() {
        let mut target = yaml(
            r#"
server: {host: localhost, port: 8080}
debug: true
"#,
        );
        deep_merge(&mut target, &yaml("server: {port: 9000}"));
        assert_eq!(
            target,
            yaml(
                r#"
server: {host: localhost, port: 9000}
debug: true
"#
            )
        );
    }

    #[test]
    fn test_sequences_replaced_not_merged() {
        let mut target = yaml("items: [1, 2, 3]");
        deep_merge(&mut target, &yaml("items: [4, 5]"));
        assert_eq!(target, yaml("items: [4, 5]"));
    }

    #[test]
    fn test_source_replaces_mapping_with_scalar() {
        let mut target = yaml("value: {nested: true}");
        deep_merge(&mut target, &yaml("value: 42"));
        assert_eq!(target, yaml("value: 42"));
    }

    #[test]
    fn test_merge_values_rejects_non_mappings() {
        let mut target = Value::from(5);
        let err = deep_merge_values(&mut target, &Value::Mapping(yaml("{a: 1}"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotAMapping { what: "merge target" }));

        let mut target = Value::Mapping(yaml("{a: 1}"));
        let err = deep_merge_values(&mut target, &Value::from("text")).unwrap_err();
        assert!(matches!(err, ConfigError::NotAMapping { what: "merge source" }));
    }

    #[test]
    fn test_merge_all() {
        let merged = deep_merge_all(vec![yaml("{a: 1}"), yaml("{b: 2}"), yaml("{a: 3, c: 4}")]);
        assert_eq!(merged, yaml("{a: 3, b: 2, c: 4}"));
    }

    #[test]
    fn test_merge_key_set_is_union() {
        let mut target = yaml("{x: {p: 1}, y: 2}");
        let source = yaml("{x: {q: 2}, z: 3}");
        deep_merge(&mut target, &source);
        assert_eq!(keys(&target), vec!["x", "y", "z"]);
        assert_eq!(target, yaml("{x: {p: 1, q: 2}, y: 2, z: 3}"));
    }

    #[test]
    fn test_delete_keys_at_every_depth() {
        let mut target = yaml(
            r#"
secret: 1
user:
  name: neon
  secret: 2
  devices:
    - {id: a, secret: 3}
"#,
        );
        delete_keys_recursive(&mut target, &["secret", "missing"]);
        assert_eq!(
            target,
            yaml(
                r#"
user:
  name: neon
  devices:
    - {id: a}
"#
            )
        );

        let once = target.clone();
        delete_keys_recursive(&mut target, &["secret", "missing"]);
        assert_eq!(target, once);
    }

    #[test]
    fn test_make_equal_prunes_nested_at_depth_one() {
        let mut target = yaml("section 1: {key1: val1, key2: val2}");
        let reference = yaml("section 1: {key1: default}");
        make_equal_by_keys(&mut target, &reference, 1, 0).unwrap();
        assert_eq!(target, yaml("section 1: {key1: val1}"));
    }

    #[test]
    fn test_make_equal_depth_zero_leaves_nested_values() {
        let mut target = yaml(
            r#"
keep: {extra: 1, other: 2}
drop: 5
"#,
        );
        let reference = yaml(
            r#"
keep: {extra: 0}
added: {x: 1}
"#,
        );
        make_equal_by_keys(&mut target, &reference, 0, 0).unwrap();
        assert_eq!(keys(&target), vec!["keep", "added"]);
        assert_eq!(target["keep"], Value::Mapping(yaml("{extra: 1, other: 2}")));
        assert_eq!(target["added"], Value::Mapping(yaml("{x: 1}")));
    }

    #[test]
    fn test_make_equal_respects_depth_limit() {
        let mut target = yaml("a: {b: {c: 1, stray: 2}, stray: 3}");
        let reference = yaml("a: {b: {c: 0}}");
        make_equal_by_keys(&mut target, &reference, 1, 0).unwrap();
        // Depth 1 prunes under `a` but not under `a.b`.
        assert_eq!(target, yaml("a: {b: {c: 1, stray: 2}}"));
    }

    #[test]
    fn test_make_equal_plugin_sections_fill_only() {
        let mut target = yaml(
            r#"
tts:
  module: coqui
  coqui: {voice: en}
stt:
  module: deepspeech
hotwords:
  hey_neon: {module: precise}
language:
  core_lang: en-us
  detection_module: fastlang
"#,
        );
        let reference = yaml(
            r#"
tts: {module: mozilla_remote, fallback_module: null}
stt: {module: google, fallback_module: null}
hotwords: {hey_mycroft: {module: pocketsphinx}}
language: {core_lang: en-us, boost: false}
"#,
        );
        make_equal_by_keys(&mut target, &reference, 1, 0).unwrap();

        assert_eq!(target["tts"]["coqui"]["voice"], Value::from("en"));
        assert_eq!(target["tts"]["module"], Value::from("coqui"));
        assert!(target["tts"].as_mapping().unwrap().contains_key("fallback_module"));
        assert!(target["hotwords"].as_mapping().unwrap().contains_key("hey_neon"));
        assert!(target["hotwords"].as_mapping().unwrap().contains_key("hey_mycroft"));
        assert_eq!(target["language"]["detection_module"], Value::from("fastlang"));
        assert_eq!(target["language"]["boost"], Value::from(false));
    }

    #[test]
    fn test_make_equal_rejects_empty_reference() {
        let mut target = yaml("{a: 1}");
        let err = make_equal_by_keys(&mut target, &Mapping::new(), 1, 0).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyReference));
        assert_eq!(target, yaml("{a: 1}"));
    }

    #[test]
    fn test_make_equal_is_idempotent() {
        let mut target = yaml("{a: {x: 1, y: 2}, b: 3, c: [1]}");
        let reference = yaml("{a: {x: 0, z: 0}, c: [], d: none}");
        make_equal_by_keys(&mut target, &reference, 1, 0).unwrap();
        let first = target.clone();
        make_equal_by_keys(&mut target, &reference, 1, 0).unwrap();
        assert_eq!(target, first);
        assert_eq!(first, yaml("{a: {x: 1, z: 0}, c: [1], d: none}"));
    }

    #[test]
    fn test_update_keys_fills_only() {
        let mut target = yaml("{a: 1}");
        update_keys(&mut target, &yaml("{a: 2, b: 3}"));
        assert_eq!(target, yaml("{a: 1, b: 3}"));
    }

    #[test]
    fn test_update_keys_recurses_without_pruning() {
        let mut target = yaml("{s: {custom: 1}, extra: true}");
        update_keys(&mut target, &yaml("{s: {custom: 0, new: 2}}"));
        assert_eq!(target, yaml("{s: {custom: 1, new: 2}, extra: true}"));
    }
}
