//! Ordered heterogeneous mutation batches submitted as one engine call.

use crate::types::{DocKey, Document, VersionStamp, WriteCondition};
use serde::{Deserialize, Serialize};

/// One action inside a bulk request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "action")]
pub enum BulkAction {
    Index {
        doc: Document,
        condition: WriteCondition,
    },
    Delete {
        key: DocKey,
        condition: WriteCondition,
    },
}

impl BulkAction {
    pub fn key(&self) -> &DocKey {
        match self {
            BulkAction::Index { doc, .. } => &doc.key,
            BulkAction::Delete { key, .. } => key,
        }
    }
}

/// Per-action result, returned in submission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "outcome", content = "detail")]
pub enum BulkOutcome {
    /// The action was applied and stamped with this version.
    Applied(VersionStamp),
    /// A version-conditioned action lost to a newer stamp already stored.
    /// Not an error: the newer write is the one that must survive.
    Skipped,
    Failed(String),
}

impl BulkOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, BulkOutcome::Applied(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, BulkOutcome::Failed(_))
    }
}

/// Builder for an ordered batch of independent mutations.
///
/// A batch is atomic only at the transport level (one round trip); each
/// action succeeds or fails on its own and the caller decides what partial
/// failure means. The snapshot copier submits its pages through this type
/// and tolerates partial failure — the next pass heals via the
/// version-conditioned overwrite rule.
#[derive(Debug, Clone, Default)]
pub struct BulkOperationBatch {
    actions: Vec<BulkAction>,
}

impl BulkOperationBatch {
    pub fn new() -> Self {
        BulkOperationBatch {
            actions: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        BulkOperationBatch {
            actions: Vec::with_capacity(capacity),
        }
    }

    /// Queue an internally-versioned index action.
    pub fn index(&mut self, doc: Document) -> &mut Self {
        self.actions.push(BulkAction::Index {
            doc,
            condition: WriteCondition::Internal,
        });
        self
    }

    /// Queue an index action that only applies if the document's own stamp
    /// beats whatever the receiving index stores.
    pub fn index_if_newer(&mut self, doc: Document) -> &mut Self {
        let condition = WriteCondition::IfNewer(doc.version);
        self.actions.push(BulkAction::Index { doc, condition });
        self
    }

    /// Queue an internally-versioned delete.
    pub fn delete(&mut self, key: DocKey) -> &mut Self {
        self.actions.push(BulkAction::Delete {
            key,
            condition: WriteCondition::Internal,
        });
        self
    }

    /// Queue a version-conditioned delete (a stamped tombstone replay).
    pub fn delete_if_newer(&mut self, key: DocKey, version: VersionStamp) -> &mut Self {
        self.actions.push(BulkAction::Delete {
            key,
            condition: WriteCondition::IfNewer(version),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> &[BulkAction] {
        &self.actions
    }

    pub fn into_actions(self) -> Vec<BulkAction> {
        self.actions
    }
}
