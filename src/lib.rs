//! Griddle: search-index persistence with zero-downtime migrations.
//!
//! Application code addresses indices by stable logical name. Behind each
//! name sits a generation-suffixed concrete index reached through an alias,
//! which is what lets [`SearchStore::migrate`] rebuild an index with a new
//! definition while reads and writes keep flowing: a dual-write guard
//! mirrors live mutations to the replacement, a snapshot copier streams the
//! existing documents across under version-stamp protection, and a single
//! compare-and-swap alias move makes the replacement live.
//!
//! The engine itself is abstracted behind [`SearchTransport`]:
//! [`HttpTransport`] speaks to a real engine over REST, [`InMemoryEngine`]
//! backs tests and embedded use.
//!
//! ```no_run
//! use griddle::{Document, IndexDefinition, InMemoryEngine, SearchStore};
//! use serde_json::json;
//!
//! # async fn demo() -> griddle::Result<()> {
//! let store = SearchStore::new(InMemoryEngine::new());
//! store.create_index("products", &IndexDefinition::default()).await?;
//! store
//!     .insert("products", Document::new("item", "42", json!({ "name": "griddle" })))
//!     .await?;
//!
//! // Rebuild with a new mapping; callers never notice.
//! let handle = store.migrate("products", IndexDefinition::new(json!({ "v": 2 })))?;
//! let info = store.migration_status(&handle)?;
//! # Ok(())
//! # }
//! ```

pub mod bulk;
pub mod config;
pub mod error;
pub mod migrate;
pub mod store;
pub mod transport;
pub mod types;

pub use bulk::{BulkAction, BulkOperationBatch, BulkOutcome};
pub use config::GriddleConfig;
pub use error::{GriddleError, Result};
pub use migrate::{
    AliasResolver, CopyReport, DualWriteRegistration, MigrationHandle, RemapCoordinator,
    SnapshotCopier, WriteGuard,
};
pub use store::SearchStore;
pub use transport::{
    AliasAction, HttpTransport, InMemoryEngine, PutResponse, ScanPage, SearchTransport,
};
pub use types::{
    ConcreteName, DocKey, Document, IndexDefinition, LogicalName, MigrationInfo, RemapState,
    VersionStamp, WriteCondition, WriteOp,
};
