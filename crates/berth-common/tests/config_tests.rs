//! ---
//! berth_section: "01-core-functionality"
//! berth_subsection: "module"
//! berth_type: "source"
//! berth_scope: "code"
//! berth_description: "Shared primitives and utilities for the reconciler runtime."
//! berth_version: "v0.0.0-prealpha"
//! berth_owner: "tbd"
//! ---
use std::str::FromStr;
use std::time::Duration;

use berth_common::config::AppConfig;
use berth_common::LogFormat;
use tempfile::tempdir;

#[test]
fn parses_full_configuration() {
    let config = AppConfig::from_str(
        r#"
        [runtime]
        docker_host = "tcp://10.0.0.5:2375"
        api_version = "v1.41"
        request_timeout = 5

        [reconcile]
        stop_grace_period = 3
        rollback_failed_start = false
        migration_suffix_len = 16

        [logging]
        format = "structured-json"
        stdout_only = true
        "#,
    )
    .expect("config parses");

    assert_eq!(config.runtime.docker_host, "tcp://10.0.0.5:2375");
    assert_eq!(config.runtime.api_version, "v1.41");
    assert_eq!(config.runtime.request_timeout, Duration::from_secs(5));
    assert_eq!(config.reconcile.stop_grace_period, Duration::from_secs(3));
    assert!(!config.reconcile.rollback_failed_start);
    assert_eq!(config.reconcile.migration_suffix_len, 16);
    assert_eq!(config.logging.format, LogFormat::StructuredJson);
    assert!(config.logging.stdout_only);
}

#[test]
fn empty_document_uses_defaults() {
    let config = AppConfig::from_str("").expect("defaults validate");
    assert_eq!(config.reconcile.stop_grace_period, Duration::from_secs(10));
    assert!(config.reconcile.rollback_failed_start);
    assert_eq!(config.reconcile.migration_suffix_len, 12);
    assert_eq!(config.runtime.api_version, "v1.43");
}

#[test]
fn rejects_out_of_range_suffix() {
    let err = AppConfig::from_str(
        r#"
        [reconcile]
        migration_suffix_len = 4
        "#,
    )
    .expect_err("suffix too short");
    assert!(err.to_string().contains("migration_suffix_len"));
}

#[test]
fn rejects_empty_docker_host() {
    let err = AppConfig::from_str(
        r#"
        [runtime]
        docker_host = "  "
        "#,
    )
    .expect_err("blank host");
    assert!(err.to_string().contains("docker_host"));
}

#[test]
fn load_prefers_first_existing_candidate() {
    let dir = tempdir().expect("tempdir");
    let missing = dir.path().join("missing.toml");
    let present = dir.path().join("berth.toml");
    std::fs::write(
        &present,
        "[reconcile]\nstop_grace_period = 7\n",
    )
    .expect("write config");

    let loaded = AppConfig::load_with_source(&[missing, present.clone()]).expect("load");
    assert_eq!(loaded.source.as_deref(), Some(present.as_path()));
    assert_eq!(
        loaded.config.reconcile.stop_grace_period,
        Duration::from_secs(7)
    );
}

#[test]
fn load_without_candidates_falls_back_to_defaults() {
    let dir = tempdir().expect("tempdir");
    let loaded =
        AppConfig::load_with_source(&[dir.path().join("absent.toml")]).expect("defaults");
    assert!(loaded.source.is_none());
    assert!(loaded.config.reconcile.rollback_failed_start);
}
