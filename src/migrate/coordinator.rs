//! The migration state machine.

use crate::config::GriddleConfig;
use crate::error::{GriddleError, Result};
use crate::migrate::alias::AliasResolver;
use crate::migrate::copier::SnapshotCopier;
use crate::migrate::guard::WriteGuard;
use crate::transport::SearchTransport;
use crate::types::{ConcreteName, IndexDefinition, LogicalName, MigrationInfo, RemapState};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

static LAST_GENERATION: AtomicI64 = AtomicI64::new(0);

/// `{logical}_{yyyymmddhhmmssSSS}`. Strictly increasing within a process so
/// back-to-back migrations of the same logical name never collide.
pub(crate) fn generation_name(logical: &str) -> ConcreteName {
    let now = Utc::now().timestamp_millis();
    let mut prev = LAST_GENERATION.load(Ordering::SeqCst);
    let generation = loop {
        let candidate = now.max(prev + 1);
        match LAST_GENERATION.compare_exchange(prev, candidate, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => break candidate,
            Err(actual) => prev = actual,
        }
    };
    let stamp = chrono::DateTime::from_timestamp_millis(generation)
        .unwrap_or_else(Utc::now)
        .format("%Y%m%d%H%M%S%3f");
    format!("{}_{}", logical, stamp)
}

/// Opaque reference to a started migration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MigrationHandle {
    id: String,
}

impl MigrationHandle {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for MigrationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

struct MigrationEntry {
    info: MigrationInfo,
    cancel: Arc<AtomicBool>,
}

/// Drives `Idle -> Copying -> Cutover -> Done` (or `Failed`) for one logical
/// name at a time.
///
/// Each migration runs on its own spawned task, which exclusively owns the
/// state value; everyone else observes it through [`status`] snapshots. No
/// state is persisted: if the process dies mid-flight the alias still points
/// at the source (nothing before the swap moves it), the source holds every
/// write issued meanwhile, and the half-copied target is garbage that
/// [`purge_orphans`] can reclaim.
///
/// [`status`]: RemapCoordinator::status
/// [`purge_orphans`]: RemapCoordinator::purge_orphans
pub struct RemapCoordinator<T> {
    transport: Arc<T>,
    aliases: AliasResolver<T>,
    guard: Arc<WriteGuard<T>>,
    config: GriddleConfig,
    migrations: DashMap<String, MigrationEntry>,
    /// One in-flight migration per logical name.
    active: DashMap<LogicalName, String>,
}

impl<T: SearchTransport> RemapCoordinator<T> {
    pub fn new(
        transport: Arc<T>,
        aliases: AliasResolver<T>,
        guard: Arc<WriteGuard<T>>,
        config: GriddleConfig,
    ) -> Arc<Self> {
        Arc::new(RemapCoordinator {
            transport,
            aliases,
            guard,
            config,
            migrations: DashMap::new(),
            active: DashMap::new(),
        })
    }

    /// Start migrating `logical` to a freshly created index with
    /// `definition`, and return immediately. Progress is observable via
    /// [`status`](Self::status); ordinary reads and writes continue
    /// untouched throughout.
    ///
    /// A second call for the same logical name while one is in flight is
    /// rejected with `MigrationInProgress` — the compare-and-swap inside the
    /// alias swap remains the backstop should two coordinators race.
    pub fn migrate(
        self: &Arc<Self>,
        logical: &str,
        definition: IndexDefinition,
    ) -> Result<MigrationHandle> {
        use dashmap::mapref::entry::Entry;

        let id = format!("remap_{}_{}", logical, uuid::Uuid::new_v4().simple());
        match self.active.entry(logical.to_string()) {
            Entry::Occupied(_) => {
                return Err(GriddleError::MigrationInProgress(logical.to_string()))
            }
            Entry::Vacant(entry) => {
                entry.insert(id.clone());
            }
        }

        let cancel = Arc::new(AtomicBool::new(false));
        self.migrations.insert(
            id.clone(),
            MigrationEntry {
                info: MigrationInfo::new(
                    id.clone(),
                    logical.to_string(),
                    String::new(),
                    String::new(),
                ),
                cancel: Arc::clone(&cancel),
            },
        );

        let coordinator = Arc::clone(self);
        let task_id = id.clone();
        let task_logical = logical.to_string();
        tokio::spawn(async move {
            coordinator
                .drive(task_id, task_logical, definition, cancel)
                .await;
        });
        Ok(MigrationHandle { id })
    }

    /// Snapshot of a migration's state and progress.
    pub fn status(&self, handle: &MigrationHandle) -> Result<MigrationInfo> {
        self.migrations
            .get(&handle.id)
            .map(|entry| entry.info.clone())
            .ok_or_else(|| GriddleError::MigrationNotFound(handle.id.clone()))
    }

    /// Best-effort cancel. Takes effect at the next batch boundary, and only
    /// before the alias swap — once the swap lands the migration is
    /// committed and runs to completion.
    pub fn abandon(&self, handle: &MigrationHandle) -> Result<()> {
        let entry = self
            .migrations
            .get(&handle.id)
            .ok_or_else(|| GriddleError::MigrationNotFound(handle.id.clone()))?;
        entry.cancel.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Delete generation-suffixed indices of `logical` that are neither
    /// bound by the alias nor part of an in-flight migration — the leftovers
    /// of failed or abandoned attempts. Returns what was deleted.
    pub async fn purge_orphans(&self, logical: &str) -> Result<Vec<ConcreteName>> {
        let bound = self.transport.resolve_alias(logical).await?;
        let in_flight = self.guard.registration(logical);
        let names = self.transport.list_indices(&format!("{}_", logical)).await?;

        let mut removed = Vec::new();
        for name in names {
            if bound.as_deref() == Some(name.as_str()) {
                continue;
            }
            if let Some(reg) = &in_flight {
                if reg.source == name || reg.target == name {
                    continue;
                }
            }
            match self.transport.delete_index(&name).await {
                Ok(()) => {
                    tracing::info!("[REMAP {}] purged orphan {}", logical, name);
                    removed.push(name);
                }
                Err(e) => {
                    tracing::warn!("[REMAP {}] could not purge {}: {}", logical, name, e);
                }
            }
        }
        Ok(removed)
    }

    async fn drive(
        self: Arc<Self>,
        id: String,
        logical: String,
        definition: IndexDefinition,
        cancel: Arc<AtomicBool>,
    ) {
        if let Err(e) = self.run(&id, &logical, definition, &cancel).await {
            tracing::error!("[REMAP {}] migration {} failed: {}", logical, id, e);
            self.guard.unregister(&logical);
            self.set_state(&id, RemapState::Failed(e.to_string()));
        }
        self.active.remove(&logical);
    }

    async fn run(
        &self,
        id: &str,
        logical: &str,
        definition: IndexDefinition,
        cancel: &AtomicBool,
    ) -> Result<()> {
        let source = self.aliases.resolve(logical).await?;
        let target = generation_name(logical);
        self.update_info(id, |info| {
            info.source = source.clone();
            info.target = target.clone();
        });
        tracing::info!("[REMAP {}] {} -> {} ({})", logical, source, target, id);

        self.transport.create_index(&target, &definition).await?;
        // Dual-write starts before the first scan page so every mutation
        // from here on reaches both sides.
        self.guard.register(logical, &source, &target);
        self.set_state(id, RemapState::Copying);

        let copier = SnapshotCopier::new(Arc::clone(&self.transport), self.config.clone());
        let mut copied = 0;
        let mut pass = 0;
        loop {
            let report = copier
                .copy_with_observer(&source, &target, |report| {
                    self.update_info(id, |info| info.docs_copied = copied + report.docs_copied);
                    !cancel.load(Ordering::SeqCst)
                })
                .await?;
            copied += report.docs_copied;
            self.update_info(id, |info| info.docs_copied = copied);
            if cancel.load(Ordering::SeqCst) {
                return self.abandon_cleanup(id, logical, &target).await;
            }
            if report.failed == 0 {
                break;
            }
            // Items that failed inside a copy bulk are absent from the
            // target; cutting over now would lose them. Re-run the pass
            // until one completes clean.
            pass += 1;
            if pass >= self.config.copy_max_retries {
                return Err(GriddleError::CopyPassFailure {
                    attempts: pass,
                    reason: format!("{} documents still failing to copy", report.failed),
                });
            }
            tracing::warn!(
                "[REMAP {}] copy pass left {} failed items, re-running",
                logical,
                report.failed
            );
        }

        self.set_state(id, RemapState::Cutover);
        if cancel.load(Ordering::SeqCst) {
            // Last exit: after the swap the migration is committed.
            return self.abandon_cleanup(id, logical, &target).await;
        }
        self.aliases.swap(logical, &source, &target).await?;

        self.guard.unregister(logical);
        self.retire_source(logical, &source).await;
        self.set_state(id, RemapState::Done);
        tracing::info!("[REMAP {}] done, {} now live", logical, target);
        Ok(())
    }

    /// The source was never disturbed; the half-copied target is garbage.
    async fn abandon_cleanup(&self, id: &str, logical: &str, target: &str) -> Result<()> {
        tracing::info!("[REMAP {}] abandoned before cutover", logical);
        self.guard.unregister(logical);
        if let Err(e) = self.transport.delete_index(target).await {
            tracing::warn!(
                "[REMAP {}] abandoned target {} not deleted: {}",
                logical,
                target,
                e
            );
        }
        self.set_state(id, RemapState::Failed("abandoned".to_string()));
        Ok(())
    }

    /// Delete the retired source after cutover. Failure is logged and
    /// retried but never reopens the migration — the alias has moved on.
    async fn retire_source(&self, logical: &str, source: &str) {
        let mut attempt = 0;
        loop {
            match self.transport.delete_index(source).await {
                Ok(()) => {
                    tracing::info!("[REMAP {}] retired source {}", logical, source);
                    return;
                }
                Err(e) if e.is_retryable() && attempt + 1 < self.config.write_max_retries => {
                    tokio::time::sleep(self.config.backoff_delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "[REMAP {}] retired source {} not deleted: {}",
                        logical,
                        source,
                        e
                    );
                    return;
                }
            }
        }
    }

    fn set_state(&self, id: &str, state: RemapState) {
        self.update_info(id, |info| info.state = state.clone());
    }

    fn update_info(&self, id: &str, update: impl FnOnce(&mut MigrationInfo)) {
        if let Some(mut entry) = self.migrations.get_mut(id) {
            update(&mut entry.info);
        }
    }
}
