use serde::{Deserialize, Serialize};

/// Logical index name — the stable alias application code always uses,
/// e.g. `"products"`.
pub type LogicalName = String;
/// Concrete index name — a physical, generation-suffixed index like
/// `"products_20260825143000123"`.
pub type ConcreteName = String;

/// Identifies a document within a concrete index.
///
/// Documents are addressed by a `(doc_type, id)` pair, unique per index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocKey {
    pub doc_type: String,
    pub id: String,
}

impl DocKey {
    pub fn new(doc_type: impl Into<String>, id: impl Into<String>) -> Self {
        DocKey {
            doc_type: doc_type.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for DocKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.doc_type, self.id)
    }
}

/// Opaque, monotonically comparable version stamp.
///
/// Assigned by the engine on internally-versioned writes; carried explicitly
/// when a write is replayed or copied so that the receiving index can apply
/// the "highest version wins" rule. A stamp of zero means "never written".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VersionStamp(pub u64);

impl VersionStamp {
    pub const ZERO: VersionStamp = VersionStamp(0);

    pub fn next(self) -> VersionStamp {
        VersionStamp(self.0 + 1)
    }
}

impl std::fmt::Display for VersionStamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored record: key, version stamp, and an opaque JSON payload.
///
/// The payload is produced and consumed by the caller's mapping layer — the
/// core never inspects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub key: DocKey,
    pub version: VersionStamp,
    pub payload: serde_json::Value,
}

impl Document {
    /// Build an unversioned document; the engine stamps a version on write.
    pub fn new(
        doc_type: impl Into<String>,
        id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Document {
            key: DocKey::new(doc_type, id),
            version: VersionStamp::ZERO,
            payload,
        }
    }

    pub fn with_version(mut self, version: VersionStamp) -> Self {
        self.version = version;
        self
    }
}

/// Structural definition (mapping) a concrete index is created with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub mapping: serde_json::Value,
}

impl IndexDefinition {
    pub fn new(mapping: serde_json::Value) -> Self {
        IndexDefinition { mapping }
    }
}

/// Precondition attached to a document write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteCondition {
    /// The engine assigns the next version stamp unconditionally.
    Internal,
    /// Apply only if the given stamp is strictly greater than what the index
    /// currently stores for the key (or the key is absent). A write that
    /// loses the comparison is skipped, not an error.
    IfNewer(VersionStamp),
}

/// A single document mutation addressed through a logical name.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Insert(Document),
    Update(Document),
    Delete(DocKey),
}

impl WriteOp {
    pub fn key(&self) -> &DocKey {
        match self {
            WriteOp::Insert(doc) | WriteOp::Update(doc) => &doc.key,
            WriteOp::Delete(key) => key,
        }
    }
}

/// Migration state machine states.
///
/// Owned exclusively by the coordinator task driving a migration; other
/// components observe it only through [`MigrationInfo`] snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemapState {
    Idle,
    Copying,
    Cutover,
    Done,
    Failed(String),
}

impl RemapState {
    /// True once the migration can no longer make progress or be abandoned.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RemapState::Done | RemapState::Failed(_))
    }
}

/// Snapshot of one migration's progress, keyed by handle id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationInfo {
    pub id: String,
    pub logical: LogicalName,
    pub source: ConcreteName,
    pub target: ConcreteName,
    pub state: RemapState,
    pub docs_copied: usize,
    pub created_at: std::time::SystemTime,
}

impl MigrationInfo {
    pub fn new(id: String, logical: String, source: String, target: String) -> Self {
        MigrationInfo {
            id,
            logical,
            source,
            target,
            state: RemapState::Idle,
            docs_copied: 0,
            created_at: std::time::SystemTime::now(),
        }
    }
}
