//! Boundary to the remote search engine.
//!
//! Everything the migration core needs from an engine is captured by
//! [`SearchTransport`]: index lifecycle, conditioned per-document writes,
//! an atomic multi-action alias update, an ordered bulk endpoint, and a
//! cursor-paginated full scan. Two implementations ship: [`InMemoryEngine`]
//! (in-process, used throughout the test suite) and [`HttpTransport`]
//! (reqwest client for a remote engine).

use crate::bulk::{BulkAction, BulkOutcome};
use crate::error::Result;
use crate::types::{ConcreteName, DocKey, Document, IndexDefinition, VersionStamp, WriteCondition};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod http;
pub mod memory;

pub use http::HttpTransport;
pub use memory::InMemoryEngine;

/// One alias-table mutation. A list of these is applied by
/// [`SearchTransport::update_aliases`] as a single indivisible unit — a
/// reader observes either none of the actions or all of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum AliasAction {
    Add { alias: String, index: String },
    Remove { alias: String, index: String },
}

/// Result of a single conditioned document write.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PutResponse {
    /// Stamp now stored for the key: the newly assigned one if the write
    /// applied, the surviving (higher) one if it did not.
    pub version: VersionStamp,
    /// False when an `IfNewer` condition lost the comparison.
    pub applied: bool,
}

/// One page of a full-index scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanPage {
    pub docs: Vec<Document>,
    /// Pass back to `scan` for the next page; `None` once exhausted.
    pub cursor: Option<String>,
}

/// Contract the migration core depends on.
///
/// Implementations must make `update_aliases` atomic and must honor
/// [`WriteCondition::IfNewer`] as "apply only if strictly newer" — those two
/// guarantees carry all of the consistency reasoning; nothing else here is
/// subtle.
#[async_trait]
pub trait SearchTransport: Send + Sync + 'static {
    /// Create a named index with the given structural definition.
    async fn create_index(&self, name: &str, definition: &IndexDefinition) -> Result<()>;

    async fn delete_index(&self, name: &str) -> Result<()>;

    async fn index_exists(&self, name: &str) -> Result<bool>;

    /// Names of concrete indices starting with `prefix`.
    async fn list_indices(&self, prefix: &str) -> Result<Vec<ConcreteName>>;

    /// Fetch a live document; `None` if absent or deleted.
    async fn get(&self, index: &str, key: &DocKey) -> Result<Option<Document>>;

    async fn put(
        &self,
        index: &str,
        doc: &Document,
        condition: WriteCondition,
    ) -> Result<PutResponse>;

    /// Delete leaves a version-stamped tombstone so that later conditioned
    /// writes with stale stamps cannot resurrect the document.
    async fn delete(
        &self,
        index: &str,
        key: &DocKey,
        condition: WriteCondition,
    ) -> Result<PutResponse>;

    /// Count of live documents.
    async fn count(&self, index: &str) -> Result<usize>;

    /// Submit an ordered action list as one call; outcomes come back in
    /// submission order, one per action.
    async fn bulk(&self, index: &str, actions: &[BulkAction]) -> Result<Vec<BulkOutcome>>;

    /// Paginated read of all live documents. Ordering is stable per index so
    /// a cursor handed back by one page resumes where it left off.
    async fn scan(&self, index: &str, cursor: Option<&str>, limit: usize) -> Result<ScanPage>;

    async fn resolve_alias(&self, alias: &str) -> Result<Option<ConcreteName>>;

    /// Apply all alias actions atomically. Removing a binding the alias does
    /// not currently hold fails the whole call (`AliasNotFound` when the
    /// alias is unbound, `AliasSwapConflict` when it is bound elsewhere);
    /// adding a binding to a missing index fails with `IndexMissing`, and
    /// adding one for an alias already bound to a different index fails with
    /// `AliasSwapConflict` unless an earlier action in the same list removed
    /// the old binding.
    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()>;
}
