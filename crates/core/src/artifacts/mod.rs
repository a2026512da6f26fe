//! Per-run artifact store and on-disk record persistence.
//!
//! Artifacts are named values discovered during a run (identifiers, URLs,
//! paths). Once captured, a value is immutable for the run unless the
//! stage that owns the key captures it again — later stages can read but
//! never silently overwrite.
//!
//! At the end of a successful run the store is persisted as a single JSON
//! record so the packaging step can read the identifiers without
//! re-running earlier stages. Records are written atomically (temp file +
//! rename), so a record on disk always holds the artifacts of exactly one
//! run.

use chrono::Utc;
use pv_protocol::ArtifactRecord;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// Errors for record persistence and read-back.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Failed to write artifact record at {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read artifact record at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse artifact record at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
struct Captured {
    value: String,
    owner: String,
}

/// In-memory artifact map for one run.
///
/// Lives inside the per-run context; never process-wide, so concurrent
/// runs cannot cross-talk.
#[derive(Debug, Default)]
pub struct ArtifactStore {
    values: BTreeMap<String, Captured>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture `key` = `value`, attributed to the stage `owner`.
    ///
    /// First write wins. A recapture from the owning stage overwrites
    /// (that stage re-ran); a conflicting write from any other stage is
    /// dropped with a warning. Returns whether the value was stored.
    pub fn capture(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        owner: &str,
    ) -> bool {
        let key = key.into();
        let value = value.into();

        match self.values.get(&key) {
            None => {
                self.values.insert(
                    key,
                    Captured {
                        value,
                        owner: owner.to_string(),
                    },
                );
                true
            }
            Some(existing) if existing.owner == owner => {
                self.values.insert(
                    key,
                    Captured {
                        value,
                        owner: owner.to_string(),
                    },
                );
                true
            }
            Some(existing) => {
                if existing.value != value {
                    warn!(
                        %key,
                        owner = %existing.owner,
                        attempted_by = owner,
                        "ignoring conflicting artifact overwrite"
                    );
                }
                false
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|c| c.value.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Plain key/value view, e.g. for the completion frame.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|(k, c)| (k.clone(), c.value.clone()))
            .collect()
    }

    /// Persist the store as an [`ArtifactRecord`] for `target_name`.
    ///
    /// The record is written whole to a temp file in the same directory
    /// and renamed into place.
    pub fn persist(
        &self,
        path: &Path,
        target_name: &str,
        run_id: Uuid,
    ) -> Result<(), ArtifactError> {
        let record = ArtifactRecord {
            target_name: target_name.to_string(),
            run_id,
            completed_at: Utc::now(),
            artifacts: self.snapshot(),
        };

        let json = serde_json::to_vec_pretty(&record).map_err(|source| ArtifactError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let write_err = |source| ArtifactError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json).map_err(write_err)?;
        std::fs::rename(&tmp, path).map_err(write_err)?;
        Ok(())
    }
}

/// Where the record for `target_name` lives under `state_dir`.
pub fn record_path(state_dir: &Path, target_name: &str) -> PathBuf {
    state_dir.join(format!("{target_name}.artifacts.json"))
}

/// Read back a persisted artifact record.
pub fn load_record(path: &Path) -> Result<ArtifactRecord, ArtifactError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ArtifactError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ArtifactError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
