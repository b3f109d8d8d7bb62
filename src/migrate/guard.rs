//! Dual-write interception for in-flight migrations.

use crate::bulk::{BulkAction, BulkOperationBatch, BulkOutcome};
use crate::config::GriddleConfig;
use crate::error::{GriddleError, Result};
use crate::migrate::alias::AliasResolver;
use crate::transport::{PutResponse, SearchTransport};
use crate::types::{ConcreteName, LogicalName, VersionStamp, WriteCondition, WriteOp};
use dashmap::DashMap;
use std::sync::Arc;

/// The {source, target} pair a migration registers while its copy phase
/// runs. Installed and removed only by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DualWriteRegistration {
    pub source: ConcreteName,
    pub target: ConcreteName,
}

/// Routes every mutation issued against a logical name.
///
/// Without an active registration the operation is applied once to the index
/// the alias resolves to. With one, the source index is written first with
/// internal versioning — it stays the system of record for the whole
/// migration — and the stamped operation is then replayed to the target
/// conditioned on "only if newer". A stale replay losing that comparison is
/// not an error; the newer write on the target is the one that must survive.
pub struct WriteGuard<T> {
    transport: Arc<T>,
    aliases: AliasResolver<T>,
    config: GriddleConfig,
    registrations: DashMap<LogicalName, DualWriteRegistration>,
}

impl<T: SearchTransport> WriteGuard<T> {
    pub fn new(transport: Arc<T>, aliases: AliasResolver<T>, config: GriddleConfig) -> Self {
        WriteGuard {
            transport,
            aliases,
            config,
            registrations: DashMap::new(),
        }
    }

    pub(crate) fn register(&self, logical: &str, source: &str, target: &str) {
        tracing::info!("[GUARD {}] dual-write on: {} + {}", logical, source, target);
        self.registrations.insert(
            logical.to_string(),
            DualWriteRegistration {
                source: source.to_string(),
                target: target.to_string(),
            },
        );
    }

    pub(crate) fn unregister(&self, logical: &str) {
        if self.registrations.remove(logical).is_some() {
            tracing::info!("[GUARD {}] dual-write off", logical);
        }
    }

    /// Active registration for a logical name, if any.
    pub fn registration(&self, logical: &str) -> Option<DualWriteRegistration> {
        self.registrations.get(logical).map(|r| r.clone())
    }

    /// Apply one mutation through the logical name. Returns the version
    /// stamp the write was assigned on the authoritative index.
    pub async fn write(&self, logical: &str, op: WriteOp) -> Result<VersionStamp> {
        match self.registration(logical) {
            None => {
                let index = self.aliases.resolve(logical).await?;
                Ok(self.apply(&index, &op, WriteCondition::Internal).await?.version)
            }
            Some(reg) => {
                // Source first: if it fails the operation fails outright and
                // the target side is never attempted.
                let stamped = self
                    .apply(&reg.source, &op, WriteCondition::Internal)
                    .await
                    .map_err(|e| GriddleError::SourceWriteFailure {
                        index: reg.source.clone(),
                        reason: e.to_string(),
                    })?;
                self.replay_to_target(logical, &reg.target, &op, stamped.version)
                    .await?;
                Ok(stamped.version)
            }
        }
    }

    /// Apply an ordered batch through the logical name, one engine round
    /// trip per side. Returns the authoritative (source-side) outcomes.
    pub async fn write_bulk(
        &self,
        logical: &str,
        batch: BulkOperationBatch,
    ) -> Result<Vec<BulkOutcome>> {
        match self.registration(logical) {
            None => {
                let index = self.aliases.resolve(logical).await?;
                self.transport.bulk(&index, batch.actions()).await
            }
            Some(reg) => {
                let actions = batch.into_actions();
                let outcomes = self
                    .transport
                    .bulk(&reg.source, &actions)
                    .await
                    .map_err(|e| GriddleError::SourceWriteFailure {
                        index: reg.source.clone(),
                        reason: e.to_string(),
                    })?;

                // Replay only what the source actually applied, stamped with
                // the versions it assigned.
                let mut replay = BulkOperationBatch::with_capacity(actions.len());
                for (action, outcome) in actions.iter().zip(&outcomes) {
                    let version = match outcome {
                        BulkOutcome::Applied(version) => *version,
                        BulkOutcome::Skipped | BulkOutcome::Failed(_) => continue,
                    };
                    match action {
                        BulkAction::Index { doc, .. } => {
                            replay.index_if_newer(doc.clone().with_version(version));
                        }
                        BulkAction::Delete { key, .. } => {
                            replay.delete_if_newer(key.clone(), version);
                        }
                    }
                }
                if !replay.is_empty() {
                    self.replay_bulk_to_target(logical, &reg.target, replay).await?;
                }
                Ok(outcomes)
            }
        }
    }

    async fn apply(
        &self,
        index: &str,
        op: &WriteOp,
        condition: WriteCondition,
    ) -> Result<PutResponse> {
        match op {
            WriteOp::Insert(doc) | WriteOp::Update(doc) => {
                self.transport.put(index, doc, condition).await
            }
            WriteOp::Delete(key) => self.transport.delete(index, key, condition).await,
        }
    }

    async fn replay_to_target(
        &self,
        logical: &str,
        target: &str,
        op: &WriteOp,
        version: VersionStamp,
    ) -> Result<()> {
        let condition = WriteCondition::IfNewer(version);
        let mut attempt = 0;
        loop {
            match self.apply(target, op, condition).await {
                // Applied, or lost to a newer stamp already on the target;
                // both leave the target correct.
                Ok(_) => return Ok(()),
                Err(e) if e.is_retryable() && attempt + 1 < self.config.write_max_retries => {
                    tracing::warn!(
                        "[GUARD {}] target write {} attempt {} failed: {}",
                        logical,
                        op.key(),
                        attempt + 1,
                        e
                    );
                    tokio::time::sleep(self.config.backoff_delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => {
                    // Source already holds the write; the next copy pass
                    // re-copies the authoritative document.
                    return Err(GriddleError::DualWriteTargetFailure {
                        index: target.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    async fn replay_bulk_to_target(
        &self,
        logical: &str,
        target: &str,
        replay: BulkOperationBatch,
    ) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.transport.bulk(target, replay.actions()).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_retryable() && attempt + 1 < self.config.write_max_retries => {
                    tracing::warn!(
                        "[GUARD {}] target bulk replay attempt {} failed: {}",
                        logical,
                        attempt + 1,
                        e
                    );
                    tokio::time::sleep(self.config.backoff_delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(GriddleError::DualWriteTargetFailure {
                        index: target.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}
