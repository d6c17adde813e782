//! Bead persistence: schema-validated load, backup-protected save, and
//! partial merge updates.
//!
//! `save` follows a backup-then-write-then-cleanup sequence so a crash or
//! write failure can never leave a truncated record: the previous content is
//! copied aside first and restored if the write fails, and the backup is
//! removed only after the write succeeds.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::debug;

use crate::bead::{Bead, BeadStatus};
use crate::core::types::SuiteResult;

const BEAD_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/bead/v1.schema.json"
));

/// No bead with the requested id exists in the store.
#[derive(Debug)]
pub struct BeadNotFoundError {
    pub id: String,
}

impl fmt::Display for BeadNotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bead '{}' not found", self.id)
    }
}

impl std::error::Error for BeadNotFoundError {}

/// The persisted bead exists but cannot be used.
#[derive(Debug)]
pub struct MalformedBeadError {
    pub id: String,
    pub detail: String,
}

impl fmt::Display for MalformedBeadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bead '{}' is malformed: {}", self.id, self.detail)
    }
}

impl std::error::Error for MalformedBeadError {}

/// Partial update applied through [`BeadStore::update`].
///
/// Only the fields present are touched; `intent`, `dod`, and `constraints`
/// are never modified by a patch.
#[derive(Debug, Clone, Default)]
pub struct BeadPatch {
    pub status: Option<BeadStatus>,
    pub meta: MetaPatch,
}

/// Merge patch for the `ralph_meta` substructure.
#[derive(Debug, Clone, Default)]
pub struct MetaPatch {
    pub attempt_count: Option<u32>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub backoff_seconds: Option<u64>,
    pub last_failure_summary: Option<String>,
    pub verifier_results: Option<SuiteResult>,
}

impl BeadPatch {
    fn apply(&self, bead: &mut Bead) {
        if let Some(status) = self.status {
            bead.status = status;
        }
        let meta = &mut bead.ralph_meta;
        if let Some(attempt_count) = self.meta.attempt_count {
            meta.attempt_count = attempt_count;
        }
        if let Some(last_attempt) = self.meta.last_attempt {
            meta.last_attempt = Some(last_attempt);
        }
        if let Some(backoff_seconds) = self.meta.backoff_seconds {
            meta.backoff_seconds = Some(backoff_seconds);
        }
        if let Some(summary) = &self.meta.last_failure_summary {
            meta.last_failure_summary = Some(summary.clone());
        }
        if let Some(results) = &self.meta.verifier_results {
            meta.verifier_results = Some(results.clone());
        }
    }
}

/// File-backed store: one JSON document per bead under `beads_dir`.
///
/// At-most-one active controller per bead is the caller's responsibility;
/// the store does not lock.
pub struct BeadStore {
    beads_dir: PathBuf,
}

impl BeadStore {
    pub fn new(beads_dir: impl Into<PathBuf>) -> Self {
        Self {
            beads_dir: beads_dir.into(),
        }
    }

    pub fn bead_path(&self, id: &str) -> PathBuf {
        self.beads_dir.join(format!("{id}.json"))
    }

    fn backup_path(&self, id: &str) -> PathBuf {
        self.beads_dir.join(format!("{id}.json.bak"))
    }

    /// Load and validate a bead.
    ///
    /// Fails with a downcastable [`BeadNotFoundError`] when no document
    /// exists, and with [`MalformedBeadError`] when the document cannot be
    /// parsed, violates the schema, or fails semantic validation.
    pub fn load(&self, id: &str) -> Result<Bead> {
        let path = self.bead_path(id);
        debug!(path = %path.display(), "loading bead");
        if !path.exists() {
            return Err(anyhow::Error::new(BeadNotFoundError { id: id.to_string() }));
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read bead {}", path.display()))?;
        let value: Value = serde_json::from_str(&contents)
            .map_err(|err| malformed(id, format!("invalid JSON: {err}")))?;
        validate_schema(&value).map_err(|err| malformed(id, err))?;
        let bead: Bead = serde_json::from_value(value)
            .map_err(|err| malformed(id, format!("deserialize: {err}")))?;
        let errors = bead.validate();
        if !errors.is_empty() {
            return Err(malformed(id, errors.join("; ")));
        }
        Ok(bead)
    }

    /// Persist a bead with backup-then-write-then-cleanup.
    pub fn save(&self, bead: &Bead) -> Result<()> {
        self.save_with(bead, |path, contents| {
            fs::write(path, contents).with_context(|| format!("write bead {}", path.display()))
        })
    }

    /// Load, apply `patch`, and save. Returns the patched bead.
    pub fn update(&self, id: &str, patch: &BeadPatch) -> Result<Bead> {
        let mut bead = self.load(id)?;
        patch.apply(&mut bead);
        self.save(&bead)?;
        Ok(bead)
    }

    // Write seam: tests inject a failing writer to exercise backup restore.
    fn save_with<W>(&self, bead: &Bead, write_fn: W) -> Result<()>
    where
        W: FnOnce(&Path, &str) -> Result<()>,
    {
        fs::create_dir_all(&self.beads_dir)
            .with_context(|| format!("create beads dir {}", self.beads_dir.display()))?;

        let path = self.bead_path(&bead.id);
        let backup = self.backup_path(&bead.id);
        let had_previous = path.exists();
        if had_previous {
            fs::copy(&path, &backup)
                .with_context(|| format!("back up bead {}", path.display()))?;
        }

        let mut buf = serde_json::to_string_pretty(bead)?;
        buf.push('\n');

        match write_fn(&path, &buf) {
            Ok(()) => {
                if had_previous {
                    fs::remove_file(&backup)
                        .with_context(|| format!("remove backup {}", backup.display()))?;
                }
                debug!(path = %path.display(), "bead saved");
                Ok(())
            }
            Err(err) => {
                if had_previous {
                    fs::copy(&backup, &path)
                        .with_context(|| format!("restore bead from {}", backup.display()))?;
                    let _ = fs::remove_file(&backup);
                }
                Err(err)
            }
        }
    }
}

fn malformed(id: &str, detail: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(MalformedBeadError {
        id: id.to_string(),
        detail: detail.into(),
    })
}

fn validate_schema(bead: &Value) -> std::result::Result<(), String> {
    let schema_value: Value =
        serde_json::from_str(BEAD_SCHEMA).expect("bundled bead schema is valid JSON");
    let compiled = validator_for(&schema_value).expect("bundled bead schema compiles");
    let messages: Vec<String> = compiled
        .iter_errors(bead)
        .map(|err| err.to_string())
        .collect();
    if messages.is_empty() {
        return Ok(());
    }
    Err(format!("schema validation failed: {}", messages.join("; ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::bead;
    use anyhow::anyhow;

    fn store() -> (tempfile::TempDir, BeadStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = BeadStore::new(temp.path().join("beads"));
        (temp, store)
    }

    #[test]
    fn load_missing_is_not_found() {
        let (_temp, store) = store();
        let err = store.load("bd-missing").unwrap_err();
        assert!(err.downcast_ref::<BeadNotFoundError>().is_some());
    }

    #[test]
    fn load_rejects_invalid_json_as_malformed() {
        let (_temp, store) = store();
        fs::create_dir_all(&store.beads_dir).expect("mkdir");
        fs::write(store.bead_path("bd-1"), "{ not json").expect("write");

        let err = store.load("bd-1").unwrap_err();
        let malformed = err.downcast_ref::<MalformedBeadError>().expect("malformed");
        assert!(malformed.detail.contains("invalid JSON"));
    }

    #[test]
    fn load_rejects_schema_violations_as_malformed() {
        let (_temp, store) = store();
        fs::create_dir_all(&store.beads_dir).expect("mkdir");
        // Missing required `intent`, and an empty verifier list.
        fs::write(
            store.bead_path("bd-1"),
            r#"{"id": "bd-1", "dod": {"verifiers": []}}"#,
        )
        .expect("write");

        let err = store.load("bd-1").unwrap_err();
        let malformed = err.downcast_ref::<MalformedBeadError>().expect("malformed");
        assert!(malformed.detail.contains("schema validation failed"));
    }

    #[test]
    fn save_then_load_round_trips() {
        let (_temp, store) = store();
        let bead = bead("bd-1");
        store.save(&bead).expect("save");

        let loaded = store.load("bd-1").expect("load");
        assert_eq!(loaded, bead);
        assert!(!store.backup_path("bd-1").exists());
    }

    #[test]
    fn save_over_existing_removes_backup_on_success() {
        let (_temp, store) = store();
        let mut bead = bead("bd-1");
        store.save(&bead).expect("first save");

        bead.status = BeadStatus::InProgress;
        store.save(&bead).expect("second save");

        assert!(!store.backup_path("bd-1").exists());
        assert_eq!(store.load("bd-1").expect("load").status, BeadStatus::InProgress);
    }

    #[test]
    fn failed_write_restores_previous_content() {
        let (_temp, store) = store();
        let mut bead = bead("bd-1");
        store.save(&bead).expect("first save");

        bead.status = BeadStatus::Completed;
        let err = store
            .save_with(&bead, |path, _contents| {
                // Simulate a crash mid-write: truncate, then fail.
                fs::write(path, "garbage").expect("truncate");
                Err(anyhow!("disk full"))
            })
            .unwrap_err();
        assert!(err.to_string().contains("disk full"));

        let loaded = store.load("bd-1").expect("load after failed write");
        assert_eq!(loaded.status, BeadStatus::Pending);
        assert!(!store.backup_path("bd-1").exists());
    }

    #[test]
    fn update_merges_meta_without_touching_intent_or_verifiers() {
        let (_temp, store) = store();
        let bead = bead("bd-1");
        store.save(&bead).expect("save");

        let patch = BeadPatch {
            status: Some(BeadStatus::InProgress),
            meta: MetaPatch {
                attempt_count: Some(2),
                backoff_seconds: Some(60),
                ..MetaPatch::default()
            },
        };
        store.update("bd-1", &patch).expect("update");
        // Idempotent: a second identical update changes nothing further.
        let updated = store.update("bd-1", &patch).expect("update again");

        assert_eq!(updated.intent, bead.intent);
        assert_eq!(updated.dod, bead.dod);
        assert_eq!(updated.ralph_meta.attempt_count, 2);
        assert_eq!(updated.ralph_meta.backoff_seconds, Some(60));
        assert_eq!(updated.status, BeadStatus::InProgress);
        assert!(!store.backup_path("bd-1").exists());
    }
}
