//! Persistence-safety tests for the bead store public API.

use std::fs;

use ralph::bead::BeadStatus;
use ralph::io::store::{BeadNotFoundError, BeadPatch, BeadStore, MalformedBeadError, MetaPatch};
use ralph::test_support::bead;

#[test]
fn not_found_and_malformed_are_distinguishable() {
    let temp = tempfile::tempdir().expect("tempdir");
    let beads_dir = temp.path().join("beads");
    let store = BeadStore::new(&beads_dir);

    let err = store.load("bd-absent").unwrap_err();
    assert!(err.downcast_ref::<BeadNotFoundError>().is_some());
    assert!(err.downcast_ref::<MalformedBeadError>().is_none());

    fs::create_dir_all(&beads_dir).expect("mkdir");
    fs::write(beads_dir.join("bd-broken.json"), "{}").expect("write");
    let err = store.load("bd-broken").unwrap_err();
    assert!(err.downcast_ref::<MalformedBeadError>().is_some());
    assert!(err.downcast_ref::<BeadNotFoundError>().is_none());
}

#[test]
fn repeated_meta_patches_leave_definition_untouched() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = BeadStore::new(temp.path().join("beads"));
    let original = bead("bd-1");
    store.save(&original).expect("save");

    let patch = BeadPatch {
        status: Some(BeadStatus::InProgress),
        meta: MetaPatch {
            attempt_count: Some(4),
            last_failure_summary: Some("check: exit code mismatch".to_string()),
            ..MetaPatch::default()
        },
    };

    store.update("bd-1", &patch).expect("first update");
    let after_second = store.update("bd-1", &patch).expect("second update");

    assert_eq!(after_second.intent, original.intent);
    assert_eq!(after_second.dod, original.dod);
    assert_eq!(after_second.constraints, original.constraints);
    assert_eq!(after_second.ralph_meta.attempt_count, 4);

    // Backup-then-write-then-cleanup leaves no backup behind on success.
    assert!(!store.bead_path("bd-1").with_extension("json.bak").exists());
}

#[test]
fn patch_preserves_unrelated_meta_fields() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = BeadStore::new(temp.path().join("beads"));
    store.save(&bead("bd-2")).expect("save");

    store
        .update(
            "bd-2",
            &BeadPatch {
                status: None,
                meta: MetaPatch {
                    backoff_seconds: Some(120),
                    ..MetaPatch::default()
                },
            },
        )
        .expect("set backoff");
    let updated = store
        .update(
            "bd-2",
            &BeadPatch {
                status: None,
                meta: MetaPatch {
                    attempt_count: Some(1),
                    ..MetaPatch::default()
                },
            },
        )
        .expect("set attempts");

    assert_eq!(updated.ralph_meta.backoff_seconds, Some(120));
    assert_eq!(updated.ralph_meta.attempt_count, 1);
}
