//! Terminal evidence records for audit.
//!
//! On both success and failure the loop writes a durable record of the
//! outcome: iteration count, timestamp, and the last suite's verifier
//! results. The core only defines the format; nothing reads it back.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::types::VerifierResult;

#[derive(Debug, Clone, Serialize)]
pub struct EvidenceRecord {
    pub work_item_id: String,
    pub iterations: u32,
    pub timestamp: DateTime<Utc>,
    pub results: Vec<VerifierResult>,
}

/// Write an evidence record as pretty JSON with a trailing newline.
pub fn write_evidence(path: &Path, record: &EvidenceRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create evidence dir {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(record)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write evidence {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_record_with_results() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("evidence").join("bd-1.json");

        let record = EvidenceRecord {
            work_item_id: "bd-1".to_string(),
            iterations: 3,
            timestamp: Utc::now(),
            results: vec![VerifierResult::passed(
                "build",
                String::new(),
                String::new(),
            )],
        };
        write_evidence(&path, &record).expect("write");

        let contents = fs::read_to_string(&path).expect("read");
        let value: serde_json::Value = serde_json::from_str(&contents).expect("parse");
        assert_eq!(value["work_item_id"], "bd-1");
        assert_eq!(value["iterations"], 3);
        assert_eq!(value["results"][0]["name"], "build");
    }
}
