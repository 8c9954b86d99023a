use crate::grid::LabelScheme;
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

const CHECKPOINT_SCHEMA: &str = "replay_checkpoint_v1";

/// Persisted resume offset for a run grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub schema_version: String,
    pub offset: usize,
    pub total: usize,
    pub label_scheme: LabelScheme,
    pub updated_at: String,
}

impl Checkpoint {
    pub fn new(offset: usize, total: usize, label_scheme: LabelScheme) -> Self {
        Self {
            schema_version: CHECKPOINT_SCHEMA.to_string(),
            offset,
            total,
            label_scheme,
            updated_at: Utc::now().to_rfc3339(),
        }
    }

    /// `Ok(None)` when no checkpoint has been written yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(path)
            .with_context(|| format!("checkpoint_unreadable: {}", path.display()))?;
        let checkpoint: Checkpoint = serde_json::from_str(&data)
            .with_context(|| format!("checkpoint_invalid: {}", path.display()))?;
        if checkpoint.schema_version != CHECKPOINT_SCHEMA {
            return Err(anyhow!(
                "checkpoint_invalid: {} has schema_version {}, expected {}",
                path.display(),
                checkpoint.schema_version,
                CHECKPOINT_SCHEMA
            ));
        }
        Ok(Some(checkpoint))
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        atomic_write_bytes(path, &bytes)
            .with_context(|| format!("checkpoint_write_failed: {}", path.display()))
    }

    /// Rejects a checkpoint recorded against a different grid.
    pub fn ensure_matches(&self, total: usize, label_scheme: &LabelScheme) -> Result<()> {
        if self.total != total || &self.label_scheme != label_scheme {
            return Err(anyhow!(
                "checkpoint_stale: recorded for {} pairs ({}), current grid has {} pairs ({})",
                self.total,
                self.label_scheme.as_str(),
                total,
                label_scheme.as_str()
            ));
        }
        if self.offset > total {
            return Err(anyhow!(
                "checkpoint_invalid: offset {} exceeds grid size {}",
                self.offset,
                total
            ));
        }
        Ok(())
    }
}

fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        crate::ensure_dir(parent)?;
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("checkpoint");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let written = fs::File::create(&tmp).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    });
    if let Err(err) = written {
        // The temp file may not exist if creation itself failed.
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_checkpoint_loads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loaded = Checkpoint::load(&dir.path().join("progress.json")).expect("load");
        assert!(loaded.is_none());
    }

    #[test]
    fn store_then_load_preserves_offset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("progress.json");
        let scheme = LabelScheme::from_prefix("w10");
        Checkpoint::new(69, 100, scheme.clone())
            .store(&path)
            .expect("store");
        let loaded = Checkpoint::load(&path).expect("load").expect("present");
        assert_eq!(loaded.offset, 69);
        assert_eq!(loaded.total, 100);
        loaded.ensure_matches(100, &scheme).expect("same grid");
        let leftovers: Vec<_> = fs::read_dir(path.parent().expect("parent"))
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind");
    }

    #[test]
    fn failed_store_removes_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        // A non-empty directory at the target path makes the final rename fail.
        let path = dir.path().join("progress.json");
        fs::create_dir(&path).expect("mkdir");
        fs::write(path.join("keep"), "x").expect("write");

        let err = Checkpoint::new(3, 100, LabelScheme::Plain)
            .store(&path)
            .expect_err("rename onto directory");
        assert!(err.to_string().contains("checkpoint_write_failed"));
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind");
        assert!(path.join("keep").exists());
    }

    #[test]
    fn checkpoint_for_other_grid_is_stale() {
        let cp = Checkpoint::new(10, 100, LabelScheme::from_prefix("w10"));
        let err = cp
            .ensure_matches(200, &LabelScheme::Plain)
            .expect_err("stale checkpoint");
        assert!(err.to_string().contains("checkpoint_stale"));
    }

    #[test]
    fn garbage_checkpoint_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("progress.json");
        fs::write(&path, "offset = 12\n").expect("write");
        let err = Checkpoint::load(&path).expect_err("invalid json");
        assert!(err.to_string().contains("checkpoint_invalid"));
    }
}
