//! Caller-facing facade over the transport, the alias layer, the write
//! guard and the migration coordinator.

use crate::bulk::{BulkOperationBatch, BulkOutcome};
use crate::config::GriddleConfig;
use crate::error::{GriddleError, Result};
use crate::migrate::{
    generation_name, AliasResolver, MigrationHandle, RemapCoordinator, WriteGuard,
};
use crate::transport::SearchTransport;
use crate::types::{
    ConcreteName, DocKey, Document, IndexDefinition, MigrationInfo, VersionStamp, WriteOp,
};
use std::sync::Arc;

/// One store per engine. Application code addresses everything by logical
/// name; the concrete generation-suffixed index behind it is an internal
/// detail that migrations move at will.
///
/// Cheap to clone; all clones share the same alias, guard and coordinator
/// state.
pub struct SearchStore<T> {
    transport: Arc<T>,
    aliases: AliasResolver<T>,
    guard: Arc<WriteGuard<T>>,
    coordinator: Arc<RemapCoordinator<T>>,
}

impl<T> Clone for SearchStore<T> {
    fn clone(&self) -> Self {
        SearchStore {
            transport: Arc::clone(&self.transport),
            aliases: self.aliases.clone(),
            guard: Arc::clone(&self.guard),
            coordinator: Arc::clone(&self.coordinator),
        }
    }
}

impl<T: SearchTransport> SearchStore<T> {
    /// Build a store with configuration taken from `GRIDDLE_*` environment
    /// variables (defaults where unset).
    pub fn new(transport: Arc<T>) -> Self {
        Self::with_config(transport, GriddleConfig::from_env())
    }

    pub fn with_config(transport: Arc<T>, config: GriddleConfig) -> Self {
        let aliases = AliasResolver::new(Arc::clone(&transport));
        let guard = Arc::new(WriteGuard::new(
            Arc::clone(&transport),
            aliases.clone(),
            config.clone(),
        ));
        let coordinator = RemapCoordinator::new(
            Arc::clone(&transport),
            aliases.clone(),
            Arc::clone(&guard),
            config,
        );
        SearchStore {
            transport,
            aliases,
            guard,
            coordinator,
        }
    }

    // ---- index lifecycle ----

    /// Create the first generation of `logical` and bind the alias to it.
    /// Returns the concrete index name.
    pub async fn create_index(
        &self,
        logical: &str,
        definition: &IndexDefinition,
    ) -> Result<ConcreteName> {
        if self.transport.resolve_alias(logical).await?.is_some() {
            return Err(GriddleError::IndexAlreadyExists(logical.to_string()));
        }
        let concrete = generation_name(logical);
        self.transport.create_index(&concrete, definition).await?;
        if let Err(e) = self.aliases.bind(logical, &concrete).await {
            // Lost a race for the name; drop the index we just made.
            if let Err(cleanup) = self.transport.delete_index(&concrete).await {
                tracing::warn!("[STORE] could not remove {}: {}", concrete, cleanup);
            }
            return Err(match e {
                GriddleError::AliasSwapConflict { .. } => {
                    GriddleError::IndexAlreadyExists(logical.to_string())
                }
                other => other,
            });
        }
        tracing::info!("[STORE] created {} as {}", logical, concrete);
        Ok(concrete)
    }

    /// Unbind `logical` and delete the concrete index behind it.
    pub async fn delete_index(&self, logical: &str) -> Result<()> {
        let concrete = self.aliases.resolve(logical).await?;
        self.aliases.unbind(logical, &concrete).await?;
        self.transport.delete_index(&concrete).await?;
        tracing::info!("[STORE] deleted {} ({})", logical, concrete);
        Ok(())
    }

    /// Drop all documents of `logical` by replacing its index with an empty
    /// generation carrying `definition`. The logical name stays bound
    /// throughout.
    pub async fn recreate_index(
        &self,
        logical: &str,
        definition: &IndexDefinition,
    ) -> Result<ConcreteName> {
        let old = self.aliases.resolve(logical).await?;
        let fresh = generation_name(logical);
        self.transport.create_index(&fresh, definition).await?;
        self.aliases.swap(logical, &old, &fresh).await?;
        if let Err(e) = self.transport.delete_index(&old).await {
            tracing::warn!("[STORE] recreate left old index {}: {}", old, e);
        }
        Ok(fresh)
    }

    pub async fn index_exists(&self, logical: &str) -> Result<bool> {
        Ok(self.transport.resolve_alias(logical).await?.is_some())
    }

    // ---- documents ----

    pub async fn get(&self, logical: &str, key: &DocKey) -> Result<Option<Document>> {
        let index = self.aliases.resolve(logical).await?;
        self.transport.get(&index, key).await
    }

    pub async fn insert(&self, logical: &str, doc: Document) -> Result<VersionStamp> {
        self.guard.write(logical, WriteOp::Insert(doc)).await
    }

    pub async fn update(&self, logical: &str, doc: Document) -> Result<VersionStamp> {
        self.guard.write(logical, WriteOp::Update(doc)).await
    }

    pub async fn delete(&self, logical: &str, key: DocKey) -> Result<VersionStamp> {
        self.guard.write(logical, WriteOp::Delete(key)).await
    }

    pub async fn bulk(&self, logical: &str, batch: BulkOperationBatch) -> Result<Vec<BulkOutcome>> {
        self.guard.write_bulk(logical, batch).await
    }

    pub async fn count(&self, logical: &str) -> Result<usize> {
        let index = self.aliases.resolve(logical).await?;
        self.transport.count(&index).await
    }

    // ---- migration ----

    /// Start migrating `logical` onto a fresh index built with `definition`.
    pub fn migrate(&self, logical: &str, definition: IndexDefinition) -> Result<MigrationHandle> {
        self.coordinator.migrate(logical, definition)
    }

    pub fn migration_status(&self, handle: &MigrationHandle) -> Result<MigrationInfo> {
        self.coordinator.status(handle)
    }

    pub fn abandon_migration(&self, handle: &MigrationHandle) -> Result<()> {
        self.coordinator.abandon(handle)
    }

    /// Reclaim generation-suffixed indices of `logical` left behind by
    /// failed or abandoned migrations.
    pub async fn purge_orphans(&self, logical: &str) -> Result<Vec<ConcreteName>> {
        self.coordinator.purge_orphans(logical).await
    }
}
