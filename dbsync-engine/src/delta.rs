use serde::Serialize;
use serde_json::Value as JsonValue;

/// Change kind attached to every notified row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    Inserted,
    Modified,
    Deleted,
}

impl DeltaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeltaKind::Inserted => "INSERTED",
            DeltaKind::Modified => "MODIFIED",
            DeltaKind::Deleted => "DELETED",
        }
    }
}

/// Accumulated result of one diff pass: the three named row arrays.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct DeltaSet {
    pub inserted: Vec<JsonValue>,
    pub modified: Vec<JsonValue>,
    pub deleted: Vec<JsonValue>,
}

impl DeltaSet {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    pub fn push(&mut self, kind: DeltaKind, row: JsonValue) {
        match kind {
            DeltaKind::Inserted => self.inserted.push(row),
            DeltaKind::Modified => self.modified.push(row),
            DeltaKind::Deleted => self.deleted.push(row),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::json!({
            "inserted": self.inserted,
            "modified": self.modified,
            "deleted": self.deleted,
        })
    }
}

/// Where a diff pass delivers its rows: a streaming per-row callback, or an
/// accumulator filled in for callers that want one aggregate result.
pub enum ResultSink<'a> {
    Callback(&'a mut dyn FnMut(DeltaKind, &JsonValue)),
    Accumulate(&'a mut DeltaSet),
}

impl ResultSink<'_> {
    pub(crate) fn emit(&mut self, kind: DeltaKind, row: JsonValue) {
        match self {
            ResultSink::Callback(callback) => callback(kind, &row),
            ResultSink::Accumulate(delta) => delta.push(kind, row),
        }
    }
}
