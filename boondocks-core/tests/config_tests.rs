//! Config file loading: error messages, precedence of defaults, atomic save.

use assert_fs::prelude::*;
use boondocks_core::{config, CacheKeyPolicy, CoreError, DaemonConfig, LogFormat};
use predicates::prelude::predicate;

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".boondocks/config.yaml")
        .write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, CoreError::ConfigParse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"), "must contain file path, got: {err}");
}

#[test]
fn wrong_type_value_returns_parse_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".boondocks/config.yaml")
        .write_str("batch_size: lots\n")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, CoreError::ConfigParse { .. }), "got: {err}");
}

#[test]
fn unknown_policy_is_rejected() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".boondocks/config.yaml")
        .write_str("cache_key_policy: sometimes\n")
        .expect("write");

    assert!(config::load_at(home.path()).is_err());
}

#[test]
fn empty_file_means_defaults() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".boondocks/config.yaml").write_str("\n").expect("write");

    assert_eq!(config::load_at(home.path()).unwrap(), DaemonConfig::default());
}

// ---------------------------------------------------------------------------
// 2. Full file + atomic save
// ---------------------------------------------------------------------------

#[test]
fn full_file_is_honoured() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".boondocks/config.yaml")
        .write_str(
            "endpoint: unix:///run/boondocks.sock\n\
             batch_size: 7\n\
             cache_key_policy: ignore-checksum\n\
             logging:\n  level: debug\n  format: json\n",
        )
        .expect("write");

    let loaded = config::load_at(home.path()).expect("load");
    assert_eq!(loaded.endpoint, "unix:///run/boondocks.sock");
    assert_eq!(loaded.batch_size, 7);
    assert_eq!(loaded.cache_key_policy, CacheKeyPolicy::IgnoreChecksum);
    assert_eq!(loaded.logging.level, "debug");
    assert_eq!(loaded.logging.format, LogFormat::Json);
}

#[test]
fn save_writes_under_dot_boondocks_without_tmp() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::save_at(home.path(), &DaemonConfig::default()).expect("save");

    home.child(".boondocks/config.yaml").assert(predicate::path::exists());
    home.child(".boondocks/config.yaml.tmp").assert(predicate::path::missing());
    home.child(".boondocks/config.yaml")
        .assert(predicate::str::contains("0.0.0.0:5001"));
}

#[test]
fn save_refuses_invalid_config() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let bad = DaemonConfig {
        batch_size: 0,
        ..DaemonConfig::default()
    };
    assert!(config::save_at(home.path(), &bad).is_err());
    home.child(".boondocks/config.yaml").assert(predicate::path::missing());
}
