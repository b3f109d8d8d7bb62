//! Bulk snapshot copy from a source index into a migration target.

use crate::bulk::{BulkOperationBatch, BulkOutcome};
use crate::config::GriddleConfig;
use crate::error::{GriddleError, Result};
use crate::transport::{ScanPage, SearchTransport};
use std::sync::Arc;

/// Progress counters for one copy pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyReport {
    /// Documents written to the target.
    pub docs_copied: usize,
    /// Documents skipped because the target already held a newer stamp
    /// (a live dual-write got there first).
    pub skipped: usize,
    /// Per-item failures inside otherwise-successful bulk requests. Healed
    /// by the next pass, never fatal on their own.
    pub failed: usize,
    pub pages: usize,
}

/// Copies the full live document set of one index into another in bounded
/// batches, under the same "only if newer" rule the write guard replays
/// with, so copy and live dual-write never lose to each other.
pub struct SnapshotCopier<T> {
    transport: Arc<T>,
    config: GriddleConfig,
}

impl<T: SearchTransport> SnapshotCopier<T> {
    pub fn new(transport: Arc<T>, config: GriddleConfig) -> Self {
        SnapshotCopier { transport, config }
    }

    /// Run one full pass. Re-running over an unchanged pair is idempotent.
    pub async fn copy(&self, source: &str, target: &str) -> Result<CopyReport> {
        self.copy_with_observer(source, target, |_| true).await
    }

    /// Run one pass, calling `observe` after every page with the running
    /// report. Returning `false` stops the pass early (used for abandon);
    /// the report accumulated so far comes back as `Ok`.
    pub async fn copy_with_observer<F>(
        &self,
        source: &str,
        target: &str,
        mut observe: F,
    ) -> Result<CopyReport>
    where
        F: FnMut(&CopyReport) -> bool + Send,
    {
        let mut report = CopyReport::default();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.fetch_page(source, cursor.as_deref()).await?;
            if !page.docs.is_empty() {
                let mut batch = BulkOperationBatch::with_capacity(page.docs.len());
                for doc in &page.docs {
                    batch.index_if_newer(doc.clone());
                }
                let outcomes = self.push_page(target, &batch).await?;
                for outcome in &outcomes {
                    match outcome {
                        BulkOutcome::Applied(_) => report.docs_copied += 1,
                        BulkOutcome::Skipped => report.skipped += 1,
                        BulkOutcome::Failed(reason) => {
                            tracing::warn!(
                                "[COPY {} -> {}] item failed (next pass heals): {}",
                                source,
                                target,
                                reason
                            );
                            report.failed += 1;
                        }
                    }
                }
                report.pages += 1;
            }
            if !observe(&report) {
                tracing::info!(
                    "[COPY {} -> {}] stopped after {} docs",
                    source,
                    target,
                    report.docs_copied
                );
                return Ok(report);
            }
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        tracing::info!(
            "[COPY {} -> {}] complete: {} copied, {} skipped, {} failed, {} pages",
            source,
            target,
            report.docs_copied,
            report.skipped,
            report.failed,
            report.pages
        );
        Ok(report)
    }

    async fn fetch_page(&self, source: &str, cursor: Option<&str>) -> Result<ScanPage> {
        let mut attempt = 0;
        loop {
            match self
                .transport
                .scan(source, cursor, self.config.copy_batch_size)
                .await
            {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() && attempt + 1 < self.config.copy_max_retries => {
                    tracing::warn!(
                        "[COPY {}] scan attempt {} failed: {}",
                        source,
                        attempt + 1,
                        e
                    );
                    tokio::time::sleep(self.config.backoff_delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    return Err(GriddleError::CopyPassFailure {
                        attempts: attempt + 1,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn push_page(&self, target: &str, batch: &BulkOperationBatch) -> Result<Vec<BulkOutcome>> {
        let mut attempt = 0;
        loop {
            match self.transport.bulk(target, batch.actions()).await {
                Ok(outcomes) => return Ok(outcomes),
                Err(e) if e.is_retryable() && attempt + 1 < self.config.copy_max_retries => {
                    tracing::warn!(
                        "[COPY -> {}] bulk attempt {} failed: {}",
                        target,
                        attempt + 1,
                        e
                    );
                    tokio::time::sleep(self.config.backoff_delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    return Err(GriddleError::CopyPassFailure {
                        attempts: attempt + 1,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::BulkAction;
    use crate::transport::{AliasAction, InMemoryEngine, PutResponse, SearchTransport};
    use crate::types::{
        ConcreteName, DocKey, Document, IndexDefinition, VersionStamp, WriteCondition,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn small_config() -> GriddleConfig {
        GriddleConfig {
            copy_batch_size: 10,
            retry_backoff_ms: 1,
            ..Default::default()
        }
    }

    async fn seeded_pair(n: usize) -> Arc<InMemoryEngine> {
        let engine = InMemoryEngine::new();
        engine
            .create_index("src", &IndexDefinition::default())
            .await
            .unwrap();
        engine
            .create_index("dst", &IndexDefinition::default())
            .await
            .unwrap();
        for i in 0..n {
            let doc = Document::new("article", format!("{i:04}"), json!({ "n": i }));
            engine.put("src", &doc, WriteCondition::Internal).await.unwrap();
        }
        engine
    }

    #[tokio::test]
    async fn copies_everything_in_pages() {
        let engine = seeded_pair(35).await;
        let copier = SnapshotCopier::new(Arc::clone(&engine), small_config());
        let report = copier.copy("src", "dst").await.unwrap();
        assert_eq!(report.docs_copied, 35);
        assert_eq!(report.pages, 4);
        assert_eq!(engine.count("dst").await.unwrap(), 35);
    }

    #[tokio::test]
    async fn recopy_is_idempotent() {
        let engine = seeded_pair(20).await;
        let copier = SnapshotCopier::new(Arc::clone(&engine), small_config());
        copier.copy("src", "dst").await.unwrap();

        let second = copier.copy("src", "dst").await.unwrap();
        assert_eq!(second.docs_copied, 0, "nothing newer to write");
        assert_eq!(second.skipped, 20);
        assert_eq!(engine.count("dst").await.unwrap(), 20);
    }

    #[tokio::test]
    async fn copy_never_clobbers_newer_target_write() {
        let engine = seeded_pair(5).await;
        // A live dual-write already put a newer revision on the target.
        let newer = Document::new("article", "0002", json!({ "n": 999 }))
            .with_version(VersionStamp(1_000));
        engine
            .put("dst", &newer, WriteCondition::IfNewer(newer.version))
            .await
            .unwrap();

        let copier = SnapshotCopier::new(Arc::clone(&engine), small_config());
        copier.copy("src", "dst").await.unwrap();

        let survivor = engine
            .get("dst", &DocKey::new("article", "0002"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(survivor.payload["n"], 999);
    }

    #[tokio::test]
    async fn observer_false_stops_pass_early() {
        let engine = seeded_pair(35).await;
        let copier = SnapshotCopier::new(Arc::clone(&engine), small_config());
        let report = copier
            .copy_with_observer("src", "dst", |r| r.docs_copied < 20)
            .await
            .unwrap();
        assert!(report.docs_copied < 35);
        assert!(engine.count("dst").await.unwrap() < 35);
    }

    /// Delegating transport that fails the first `fail_times` bulk calls.
    struct FlakyBulk {
        inner: Arc<InMemoryEngine>,
        remaining: AtomicU32,
    }

    #[async_trait]
    impl SearchTransport for FlakyBulk {
        async fn create_index(&self, name: &str, definition: &IndexDefinition) -> Result<()> {
            self.inner.create_index(name, definition).await
        }
        async fn delete_index(&self, name: &str) -> Result<()> {
            self.inner.delete_index(name).await
        }
        async fn index_exists(&self, name: &str) -> Result<bool> {
            self.inner.index_exists(name).await
        }
        async fn list_indices(&self, prefix: &str) -> Result<Vec<ConcreteName>> {
            self.inner.list_indices(prefix).await
        }
        async fn get(&self, index: &str, key: &DocKey) -> Result<Option<Document>> {
            self.inner.get(index, key).await
        }
        async fn put(
            &self,
            index: &str,
            doc: &Document,
            condition: WriteCondition,
        ) -> Result<PutResponse> {
            self.inner.put(index, doc, condition).await
        }
        async fn delete(
            &self,
            index: &str,
            key: &DocKey,
            condition: WriteCondition,
        ) -> Result<PutResponse> {
            self.inner.delete(index, key, condition).await
        }
        async fn count(&self, index: &str) -> Result<usize> {
            self.inner.count(index).await
        }
        async fn bulk(&self, index: &str, actions: &[BulkAction]) -> Result<Vec<BulkOutcome>> {
            if self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(GriddleError::Transport("bulk rejected".into()));
            }
            self.inner.bulk(index, actions).await
        }
        async fn scan(
            &self,
            index: &str,
            cursor: Option<&str>,
            limit: usize,
        ) -> Result<ScanPage> {
            self.inner.scan(index, cursor, limit).await
        }
        async fn resolve_alias(&self, alias: &str) -> Result<Option<ConcreteName>> {
            self.inner.resolve_alias(alias).await
        }
        async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()> {
            self.inner.update_aliases(actions).await
        }
    }

    #[tokio::test]
    async fn transient_bulk_failures_are_retried() {
        let inner = seeded_pair(15).await;
        let flaky = Arc::new(FlakyBulk {
            inner: Arc::clone(&inner),
            remaining: AtomicU32::new(2),
        });
        let copier = SnapshotCopier::new(flaky, small_config());
        let report = copier.copy("src", "dst").await.unwrap();
        assert_eq!(report.docs_copied, 15);
        assert_eq!(inner.count("dst").await.unwrap(), 15);
    }

    #[tokio::test]
    async fn exhausted_retries_become_copy_pass_failure() {
        let inner = seeded_pair(15).await;
        let flaky = Arc::new(FlakyBulk {
            inner: Arc::clone(&inner),
            remaining: AtomicU32::new(100),
        });
        let copier = SnapshotCopier::new(flaky, small_config());
        let err = copier.copy("src", "dst").await.unwrap_err();
        match err {
            GriddleError::CopyPassFailure { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected CopyPassFailure, got {other:?}"),
        }
    }
}
