use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::fastcast::Snapshot;

/// Writes snapshots to `<root>/<sid>/<mid>.json`.
#[derive(Debug, Clone)]
pub struct SnapshotRecorder {
    root: PathBuf,
}

impl SnapshotRecorder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist one snapshot, overwriting an earlier one with the same `mid`.
    pub async fn record(&self, snapshot: &Snapshot) -> Result<PathBuf> {
        if !is_plain_component(&snapshot.sid) {
            bail!("refusing to record under session id {:?}", snapshot.sid);
        }
        let dir = self.root.join(&snapshot.sid);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let path = dir.join(format!("{}.json", snapshot.mid));
        let contents = serde_json::to_string_pretty(&snapshot.document)?;
        tokio::fs::write(&path, contents)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!("recorded snapshot {}", path.display());
        Ok(path)
    }
}

/// A single path segment that cannot climb out of its parent.
fn is_plain_component(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && !name.contains("..")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn snapshot(mid: u64, document: Value) -> Snapshot {
        Snapshot {
            sid: "S1".into(),
            mid,
            document,
        }
    }

    #[tokio::test]
    async fn writes_pretty_json_under_sid() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = SnapshotRecorder::new(dir.path().join("live-data"));

        let path = recorder
            .record(&snapshot(7, json!({"gp": {"clock": "1:00"}})))
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("live-data").join("S1").join("7.json"));
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains('\n'));
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, json!({"gp": {"clock": "1:00"}}));
    }

    #[tokio::test]
    async fn same_mid_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = SnapshotRecorder::new(dir.path());

        recorder.record(&snapshot(1, json!({"v": 1}))).await.unwrap();
        let path = recorder.record(&snapshot(1, json!({"v": 2}))).await.unwrap();

        let back: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(back, json!({"v": 2}));
    }

    #[tokio::test]
    async fn session_id_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("live-data");
        let recorder = SnapshotRecorder::new(&root);

        for sid in ["../x", "/tmp/x", "a\\b", "..", ""] {
            let snapshot = Snapshot {
                sid: sid.into(),
                mid: 1,
                document: json!({}),
            };
            assert!(recorder.record(&snapshot).await.is_err(), "sid {sid:?}");
        }
        assert!(!dir.path().join("x").exists());
        assert!(!root.exists());
    }
}
