use serde_json::Value;

use super::patch::{PatchOp, apply_operations};

/// Patched view of one live event at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub sid: String,
    /// Message id of the heartbeat that delivered the base document.
    pub mid: u64,
    pub document: Value,
}

/// Combine-latest join of session id, heartbeat document and operation batch.
///
/// Nothing is emitted until all three inputs have a value; after that every
/// new input emits one snapshot. The latest batch is applied to the latest
/// document in place, so consecutive batches against the same heartbeat
/// accumulate.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    sid: Option<String>,
    document: Option<(u64, Value)>,
    operations: Option<Vec<PatchOp>>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_session(&mut self, sid: String) -> Option<Snapshot> {
        self.sid = Some(sid);
        self.emit()
    }

    pub fn on_document(&mut self, mid: u64, document: Value) -> Option<Snapshot> {
        self.document = Some((mid, document));
        self.emit()
    }

    pub fn on_operations(&mut self, ops: Vec<PatchOp>) -> Option<Snapshot> {
        self.operations = Some(ops);
        self.emit()
    }

    fn emit(&mut self) -> Option<Snapshot> {
        let sid = self.sid.as_ref()?;
        let ops = self.operations.as_ref()?;
        let (mid, document) = self.document.as_mut()?;

        apply_operations(document, ops);
        Some(Snapshot {
            sid: sid.clone(),
            mid: *mid,
            document: document.clone(),
        })
    }
}
