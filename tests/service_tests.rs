// SPDX-License-Identifier: PMPL-1.0-or-later

//! Record lifecycle through `AssimilationService` without external tools

mod common;

use apk_assimilator::config::InstrumentConfig;
use apk_assimilator::types::{AppStatus, Platform};
use apk_assimilator::{AssimilateError, AssimilationService};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn disabled() -> InstrumentConfig {
    InstrumentConfig {
        enabled: false,
        ..InstrumentConfig::default()
    }
}

fn open(dir: &Path) -> AssimilationService {
    AssimilationService::open(common::service_config(dir, disabled())).expect("service should open")
}

fn upload(service: &AssimilationService, user: &str, bytes: &[u8]) -> apk_assimilator::types::Assimilation {
    let metadata = service.analyze(bytes, Platform::Apk).unwrap();
    service.assimilate(metadata, user, bytes).unwrap()
}

#[test]
fn reupload_updates_the_same_record() {
    let dir = TempDir::new().unwrap();
    let service = open(dir.path());

    let first = upload(&service, "alice", &common::apk("com.test.app", "1.0.0", &[]));
    assert!(!first.is_update);
    assert!(!first.instrumentation_started);
    assert!(first.app.id.starts_with("assimilated_alice_"));

    let second = upload(&service, "alice", &common::apk("com.test.app", "1.1.0", &[]));
    assert!(second.is_update);
    assert_eq!(second.app.id, first.app.id);
    assert_eq!(second.app.update_history.len(), 1);
    assert_eq!(second.app.update_history[0].previous_version.as_deref(), Some("1.0.0"));
    assert_eq!(second.app.update_history[0].new_version.as_deref(), Some("1.1.0"));
    assert_eq!(service.list_apps("alice").len(), 1);
}

#[test]
fn each_generation_keeps_its_original_and_staging_is_emptied() {
    let dir = TempDir::new().unwrap();
    let service = open(dir.path());
    let v1 = common::apk("com.test.app", "1.0.0", &[]);
    let v2 = common::apk("com.test.app", "1.1.0", &[]);

    let first = upload(&service, "alice", &v1);
    let second = upload(&service, "alice", &v2);
    let first_path = first.app.original_binary_path.unwrap();
    let second_path = second.app.original_binary_path.unwrap();
    assert!(first_path.ends_with("g0/original.apk"));
    assert!(second_path.ends_with("g1/original.apk"));
    assert_eq!(fs::read(&first_path).unwrap(), v1);
    assert_eq!(fs::read(&second_path).unwrap(), v2);

    let staging = service.config().binaries_dir().join(".staging");
    assert_eq!(fs::read_dir(staging).unwrap().count(), 0);
}

#[test]
fn same_package_for_another_user_is_a_new_record() {
    let dir = TempDir::new().unwrap();
    let service = open(dir.path());
    let bytes = common::apk("com.test.app", "1.0.0", &[]);

    let alice = upload(&service, "alice", &bytes);
    let bob = upload(&service, "bob", &bytes);
    assert_ne!(alice.app.id, bob.app.id);
    assert!(!bob.is_update);
}

#[test]
fn disabled_instrumentation_leaves_record_pending() {
    let dir = TempDir::new().unwrap();
    let service = open(dir.path());
    let result = upload(&service, "alice", &common::apk("com.test.app", "1.0.0", &[]));

    let app = service.get_status(&result.app.id).unwrap();
    assert_eq!(app.status, AppStatus::Pending);
    assert_eq!(app.instrumentation_progress, 0);
    assert!(!app.chaos_instrumented);
    assert!(app.instrumentation_log.contains("instrumentation disabled"));
    assert!(app.original_binary_path.as_ref().unwrap().is_file());
}

#[test]
fn ios_upload_is_stored_but_never_instrumented() {
    let dir = TempDir::new().unwrap();
    let instrument = InstrumentConfig::default();
    let service = AssimilationService::open(common::service_config(dir.path(), instrument)).unwrap();

    let bytes = common::ipa("com.example.demo", "1.0");
    let metadata = service.analyze_declared(&bytes, "ios").unwrap();
    let result = service.assimilate(metadata, "carol", &bytes).unwrap();
    assert!(!result.instrumentation_started);

    let binary = service.get_binary(&result.app.id, "carol").unwrap().unwrap();
    assert_eq!(binary.binary_type, Platform::Ios);
    assert!(!binary.instrumented);
}

#[test]
fn unknown_declared_type_is_rejected() {
    let dir = TempDir::new().unwrap();
    let service = open(dir.path());
    let err = service.analyze_declared(b"PK", "exe").unwrap_err();
    assert!(matches!(err, AssimilateError::UnsupportedPlatform(_)));
}

#[test]
fn mismatched_package_bytes_are_rejected() {
    let dir = TempDir::new().unwrap();
    let service = open(dir.path());
    let bytes = common::apk("com.test.app", "1.0.0", &[]);
    let metadata = service.analyze(&bytes, Platform::Apk).unwrap();
    let other = common::apk("com.test.app", "9.9.9", &[]);
    let err = service.assimilate(metadata, "alice", &other).unwrap_err();
    assert!(matches!(err, AssimilateError::InvalidInput(_)));
    assert!(service.list_apps("alice").is_empty());
}

#[test]
fn binaries_are_owner_scoped_and_verified() {
    let dir = TempDir::new().unwrap();
    let service = open(dir.path());
    let bytes = common::apk("com.test.app", "1.0.0", &[]);
    let id = upload(&service, "alice", &bytes).app.id;

    let err = service.get_binary(&id, "mallory").unwrap_err();
    assert!(matches!(err, AssimilateError::AccessDenied { .. }));
    assert!(service.get_binary("assimilated_nobody", "alice").unwrap().is_none());

    assert_eq!(service.read_verified(&id, "alice").unwrap(), bytes);

    let binary = service.get_binary(&id, "alice").unwrap().unwrap();
    fs::write(&binary.path, b"tampered").unwrap();
    let err = service.read_verified(&id, "alice").unwrap_err();
    assert!(matches!(err, AssimilateError::IntegrityMismatch { .. }));
}

#[test]
fn rename_delete_and_launch_require_ownership() {
    let dir = TempDir::new().unwrap();
    let service = open(dir.path());
    let id = upload(&service, "alice", &common::apk("com.test.app", "1.0.0", &[])).app.id;

    assert!(service.rename_app(&id, "bob", "Stolen").is_err());
    assert!(service.rename_app(&id, "alice", "   ").is_err());
    let summary = service.rename_app(&id, "alice", "  My App ").unwrap();
    assert_eq!(summary.name, "My App");

    let launch = service.launch_info(&id, "alice").unwrap();
    assert_eq!(launch.name, "My App");
    assert_eq!(launch.binary.binary_type, Platform::Apk);

    assert!(matches!(
        service.delete_app(&id, "bob").unwrap_err(),
        AssimilateError::AccessDenied { .. }
    ));
    let stored = launch.binary.path.clone();
    service.delete_app(&id, "alice").unwrap();
    assert!(service.get_status(&id).is_none());
    assert!(!stored.exists());
    assert!(matches!(
        service.delete_app(&id, "alice").unwrap_err(),
        AssimilateError::NotFound(_)
    ));
}

#[test]
fn suggestions_apply_once_and_revert() {
    let dir = TempDir::new().unwrap();
    let service = open(dir.path());
    let bytes = common::apk("com.test.app", "1.0.0", &["WRITE_EXTERNAL_STORAGE"]);
    let id = upload(&service, "alice", &bytes).app.id;

    let suggestions = service.suggestions(&id, "alice").unwrap();
    assert!(!suggestions.is_empty());
    let first = suggestions[0].id.clone();

    let applied = service.apply_suggestion(&id, "alice", &first).unwrap();
    let again = service.apply_suggestion(&id, "alice", &first).unwrap();
    assert_eq!(applied, again);
    assert_eq!(service.get_status(&id).unwrap().applied_suggestions.len(), 1);

    service.revert_suggestion(&id, "alice", &first).unwrap();
    assert!(service.get_status(&id).unwrap().applied_suggestions.is_empty());
    assert!(matches!(
        service.revert_suggestion(&id, "alice", &first).unwrap_err(),
        AssimilateError::NotFound(_)
    ));
    assert!(service.apply_suggestion(&id, "alice", "no-such-suggestion").is_err());
}

#[test]
fn records_survive_a_restart() {
    let dir = TempDir::new().unwrap();
    let id = {
        let service = open(dir.path());
        let id = upload(&service, "alice", &common::apk("com.test.app", "1.0.0", &[])).app.id;
        service.rename_app(&id, "alice", "Persisted").unwrap();
        assert!(service.persistence_health().is_healthy());
        id
    };

    let service = open(dir.path());
    let app = service.get_status(&id).expect("record reloaded from snapshot");
    assert_eq!(app.display_name(), "Persisted");
    assert_eq!(service.list_apps("alice").len(), 1);
}

#[test]
fn database_mirror_rebuilds_a_lost_snapshot() {
    let dir = TempDir::new().unwrap();
    let config = common::service_config(dir.path(), disabled());
    let snapshot = config.snapshot_path();
    let id = {
        let service = AssimilationService::open(config.clone()).unwrap();
        upload(&service, "alice", &common::apk("com.test.app", "1.0.0", &[])).app.id
    };

    fs::remove_file(&snapshot).unwrap();
    let service = AssimilationService::open(config).unwrap();
    assert!(service.get_status(&id).is_some());
}
