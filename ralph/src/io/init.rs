//! Initialization helpers for `.ralph/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::bead::{Bead, DefinitionOfDone, Expectation, OnFailure, Verifier};
use crate::io::config::{RalphConfig, write_config};
use crate::io::store::BeadStore;

/// All canonical paths within `.ralph/` for a project root.
#[derive(Debug, Clone)]
pub struct RalphPaths {
    pub root: PathBuf,
    pub ralph_dir: PathBuf,
    pub beads_dir: PathBuf,
    pub evidence_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub config_path: PathBuf,
}

impl RalphPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let ralph_dir = root.join(".ralph");
        Self {
            root: root.clone(),
            beads_dir: ralph_dir.join("beads"),
            evidence_dir: ralph_dir.join("evidence"),
            logs_dir: ralph_dir.join("logs"),
            config_path: ralph_dir.join("config.toml"),
            ralph_dir,
        }
    }

    pub fn evidence_path(&self, bead_id: &str) -> PathBuf {
        self.evidence_dir.join(format!("{bead_id}.json"))
    }
}

/// Options for [`init_workspace`].
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing ralph-owned files.
    pub force: bool,
}

/// Create `.ralph/` scaffolding: config, bead/evidence/log directories, and a
/// sample bead to edit.
pub fn init_workspace(root: &Path, options: &InitOptions) -> Result<()> {
    let paths = RalphPaths::new(root);

    for dir in [&paths.ralph_dir, &paths.beads_dir, &paths.evidence_dir, &paths.logs_dir] {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }

    if options.force || !paths.config_path.exists() {
        write_config(&paths.config_path, &RalphConfig::default())?;
        info!(path = %paths.config_path.display(), "wrote default config");
    }

    let store = BeadStore::new(&paths.beads_dir);
    let sample = sample_bead();
    if options.force || !store.bead_path(&sample.id).exists() {
        store.save(&sample)?;
        info!(id = %sample.id, "wrote sample bead");
    }

    Ok(())
}

fn sample_bead() -> Bead {
    Bead {
        id: "bd-001".to_string(),
        title: Some("Sample work item".to_string()),
        intent: "Describe the change you want the agent to make, then adjust the verifiers \
                 below to define done."
            .to_string(),
        dod: DefinitionOfDone {
            verifiers: vec![Verifier {
                name: "build".to_string(),
                command: "cargo build".to_string(),
                expect: Expectation::default(),
                timeout_seconds: 300,
                on_failure: OnFailure::Stop,
            }],
        },
        constraints: Default::default(),
        status: Default::default(),
        ralph_meta: Default::default(),
    }
}
