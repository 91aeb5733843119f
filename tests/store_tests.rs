//! Integration tests for configuration documents on disk.
//!
//! Each test uses its own temporary directory and registry.

use neon_config::config::{
    ConfigRegistry, deep_merge, delete_keys_recursive, make_equal_by_keys, update_keys,
};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn yaml(src: &str) -> Mapping {
    serde_yaml::from_str(src).unwrap()
}

#[test]
fn test_open_fresh_directory_creates_empty_file() {
    let temp = TempDir::new().unwrap();
    let registry = ConfigRegistry::new();
    let doc = registry.open("ngi_local_conf", temp.path(), false).unwrap();

    let path = temp.path().join("ngi_local_conf.yml");
    assert_eq!(doc.path(), path);
    assert!(path.is_file());
    assert!(doc.content().is_empty());
}

#[test]
fn test_round_trip_through_fresh_instance() {
    let temp = TempDir::new().unwrap();
    let registry = ConfigRegistry::new();
    let doc = registry.open("conf", temp.path(), false).unwrap();
    doc.set("speech", yaml("stt_language: en-us\nalt_languages: [en, uk]"));
    doc.set("count", 3);
    assert!(doc.write_changes());

    let fresh = ConfigRegistry::new().open("conf", temp.path(), false).unwrap();
    assert_eq!(fresh.content(), doc.content());
}

#[test]
fn test_losing_writer_does_not_overwrite() {
    let temp = TempDir::new().unwrap();
    let registry = ConfigRegistry::new();
    let a = registry.open("conf", temp.path(), false).unwrap();
    let b = registry.open("conf", temp.path(), true).unwrap();

    a.set("winner", "first writer");
    assert!(a.write_changes());
    let written = fs::read_to_string(a.path()).unwrap();

    b.set("loser", 1);
    assert!(!b.write_changes());
    assert_eq!(fs::read_to_string(b.path()).unwrap(), written);
    assert!(b.is_pending());
}

#[test]
fn test_commit_replays_lost_edits() {
    let temp = TempDir::new().unwrap();
    let registry = ConfigRegistry::new();
    let a = registry.open("conf", temp.path(), false).unwrap();
    let b = registry.open("conf", temp.path(), true).unwrap();

    a.set("winner", "first writer");
    assert!(a.write_changes());

    b.set("second", 2);
    assert!(b.commit());

    let merged = ConfigRegistry::new().open("conf", temp.path(), false).unwrap();
    assert_eq!(merged.get("winner"), Some(Value::from("first writer")));
    assert_eq!(merged.get("second"), Some(Value::from(2)));
}

#[test]
fn test_sibling_instance_sees_write_after_reload() {
    let temp = TempDir::new().unwrap();
    let registry = ConfigRegistry::new();
    let cached = registry.open("conf", temp.path(), false).unwrap();
    let fresh = registry.open("conf", temp.path(), true).unwrap();

    fresh.set("from_fresh", true);
    assert!(fresh.write_changes());
    cached.reload();
    assert_eq!(cached.get("from_fresh"), Some(Value::from(true)));
}

#[test]
fn test_second_write_leaves_file_untouched() {
    let temp = TempDir::new().unwrap();
    let registry = ConfigRegistry::new();
    let doc = registry.open("conf", temp.path(), false).unwrap();
    doc.set("key", "value");
    assert!(doc.write_changes());
    let modified = fs::metadata(doc.path()).unwrap().modified().unwrap();

    assert!(!doc.write_changes());
    assert_eq!(fs::metadata(doc.path()).unwrap().modified().unwrap(), modified);
}

#[test]
fn test_make_equal_by_keys_scenario() {
    let mut target = yaml(r#""section 1": {key1: val1, key2: val2}"#);
    let reference = yaml(r#""section 1": {key1: default}"#);
    make_equal_by_keys(&mut target, &reference, 1, 0).unwrap();
    assert_eq!(target, yaml(r#""section 1": {key1: val1}"#));
}

#[test]
fn test_update_keys_scenario() {
    let mut target = yaml("a: 1");
    update_keys(&mut target, &yaml("{a: 2, b: 3}"));
    assert_eq!(target, yaml("{a: 1, b: 3}"));
}

#[test]
fn test_make_equal_by_keys_empty_reference_is_error() {
    let temp = TempDir::new().unwrap();
    let registry = ConfigRegistry::new();
    let doc = registry.open("conf", temp.path(), false).unwrap();
    doc.set("keep", 1);
    assert!(doc.make_equal_by_keys(&Mapping::new(), true, 1).is_err());
    assert_eq!(doc.get("keep"), Some(Value::from(1)));
}

#[test]
fn test_merge_and_delete_properties() {
    let mut a = yaml("{x: {y: 1, z: [1, 2]}, keep: true}");
    let b = yaml("{x: {z: [3], w: 4}, new: 5}");
    deep_merge(&mut a, &b);
    assert_eq!(a, yaml("{x: {y: 1, z: [3], w: 4}, keep: true, new: 5}"));

    delete_keys_recursive(&mut a, &["y", "new"]);
    let once = a.clone();
    delete_keys_recursive(&mut a, &["y", "new"]);
    assert_eq!(a, once);
    assert_eq!(a, yaml("{x: {z: [3], w: 4}, keep: true}"));
}

#[test]
fn test_concurrent_commits_keep_every_key() {
    let temp = TempDir::new().unwrap();
    let registry = Arc::new(ConfigRegistry::new());
    registry.open("conf", temp.path(), false).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let registry = Arc::clone(&registry);
            let dir = temp.path().to_path_buf();
            thread::spawn(move || {
                let doc = registry.open("conf", &dir, true).unwrap();
                doc.set(&format!("writer_{i}"), i);
                doc.commit()
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap());
    }

    let doc = ConfigRegistry::new().open("conf", temp.path(), false).unwrap();
    let content = doc.content();
    assert_eq!(content.len(), 4);
    for i in 0..4 {
        assert_eq!(content[format!("writer_{i}").as_str()], Value::from(i));
    }
}

#[test]
fn test_export_to_json_sibling() {
    let temp = TempDir::new().unwrap();
    let registry = ConfigRegistry::new();
    let doc = registry.open("conf", temp.path(), false).unwrap();
    doc.set("websocket", yaml("{host: 0.0.0.0, port: 8181}"));
    assert!(doc.write_changes());

    let path = doc.export_to_json().unwrap();
    assert_eq!(path, temp.path().join("conf.json"));
    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(json["websocket"]["port"], 8181);
}
