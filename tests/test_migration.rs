//! End-to-end migration coverage: quiet cutover, cutover under live
//! traffic, and abandoning a migration mid-copy.

use async_trait::async_trait;
use griddle::{
    AliasAction, BulkAction, BulkOperationBatch, BulkOutcome, ConcreteName, DocKey, Document,
    GriddleConfig, GriddleError, IndexDefinition, InMemoryEngine, MigrationHandle, PutResponse,
    RemapState, Result, ScanPage, SearchStore, SearchTransport, VersionStamp, WriteCondition,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn test_config() -> GriddleConfig {
    GriddleConfig {
        copy_batch_size: 100,
        retry_backoff_ms: 1,
        ..Default::default()
    }
}

/// Delegates everything to an [`InMemoryEngine`] with injectable faults: a
/// per-page scan delay to stretch the copy phase enough for live traffic to
/// overlap it, hard scan failures, and a one-shot dropped bulk item.
struct FaultInjector {
    inner: Arc<InMemoryEngine>,
    page_delay: Duration,
    fail_scans: AtomicBool,
    drop_next_bulk_item: AtomicBool,
}

impl FaultInjector {
    fn new(inner: Arc<InMemoryEngine>) -> Self {
        FaultInjector {
            inner,
            page_delay: Duration::ZERO,
            fail_scans: AtomicBool::new(false),
            drop_next_bulk_item: AtomicBool::new(false),
        }
    }

    fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }
}

#[async_trait]
impl SearchTransport for FaultInjector {
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
        if self.drop_next_bulk_item.swap(false, Ordering::SeqCst) {
            // First item never reaches the engine; the engine reports it as
            // a per-item failure inside an otherwise-successful request.
            let mut outcomes = vec![BulkOutcome::Failed("item rejected".into())];
            outcomes.extend(self.inner.bulk(index, &actions[1..]).await?);
            return Ok(outcomes);
        }
        self.inner.bulk(index, actions).await
    }
    async fn scan(&self, index: &str, cursor: Option<&str>, limit: usize) -> Result<ScanPage> {
        if self.fail_scans.load(Ordering::SeqCst) {
            return Err(GriddleError::Transport("scan refused".into()));
        }
        tokio::time::sleep(self.page_delay).await;
        self.inner.scan(index, cursor, limit).await
    }
    async fn resolve_alias(&self, alias: &str) -> Result<Option<ConcreteName>> {
        self.inner.resolve_alias(alias).await
    }
    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()> {
        self.inner.update_aliases(actions).await
    }
}

fn doc(id: impl std::fmt::Display, n: i64) -> Document {
    Document::new("article", id.to_string(), json!({ "n": n }))
}

async fn seed<T: SearchTransport>(store: &SearchStore<T>, logical: &str, count: usize) {
    let mut batch = BulkOperationBatch::with_capacity(count);
    for i in 0..count {
        batch.index(doc(format!("{i:04}"), i as i64));
    }
    let outcomes = store.bulk(logical, batch).await.unwrap();
    assert!(outcomes.iter().all(|o| o.is_applied()));
}

async fn wait_for_state<T: SearchTransport>(
    store: &SearchStore<T>,
    handle: &MigrationHandle,
    wanted: RemapState,
) {
    for _ in 0..2_000 {
        let info = store.migration_status(handle).unwrap();
        if info.state == wanted {
            return;
        }
        assert!(
            !info.state.is_terminal(),
            "reached terminal {:?} while waiting for {wanted:?}",
            info.state
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("never reached {wanted:?}");
}

async fn wait_terminal<T: SearchTransport>(
    store: &SearchStore<T>,
    handle: &MigrationHandle,
) -> RemapState {
    for _ in 0..5_000 {
        let info = store.migration_status(handle).unwrap();
        if info.state.is_terminal() {
            return info.state;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("migration never finished");
}

#[tokio::test]
async fn quiet_migration_is_invisible_to_readers() {
    init_tracing();
    let engine = InMemoryEngine::new();
    let store = SearchStore::with_config(Arc::clone(&engine), test_config());

    let first = store
        .create_index("products", &IndexDefinition::default())
        .await
        .unwrap();
    store.insert("products", doc("a", 1)).await.unwrap();
    store.insert("products", doc("b", 2)).await.unwrap();

    let handle = store
        .migrate("products", IndexDefinition::new(json!({ "v": 2 })))
        .unwrap();
    assert_eq!(wait_terminal(&store, &handle).await, RemapState::Done);

    // Same documents behind the same logical name, new index underneath.
    assert_eq!(store.count("products").await.unwrap(), 2);
    let a = store
        .get("products", &DocKey::new("article", "a"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(a.payload["n"], 1);

    let generations = engine.list_indices("products_").await.unwrap();
    assert_eq!(generations.len(), 1, "old generation retired");
    assert_ne!(generations[0], first);
}

#[tokio::test(flavor = "multi_thread")]
async fn migration_under_live_traffic_loses_nothing() {
    init_tracing();
    let engine = InMemoryEngine::new();
    let transport = Arc::new(
        FaultInjector::new(Arc::clone(&engine)).with_page_delay(Duration::from_millis(15)),
    );
    let store = SearchStore::with_config(transport, test_config());

    store
        .create_index("products", &IndexDefinition::default())
        .await
        .unwrap();
    seed(&store, "products", 2_000).await;

    let handle = store
        .migrate("products", IndexDefinition::new(json!({ "v": 2 })))
        .unwrap();
    wait_for_state(&store, &handle, RemapState::Copying).await;

    // Live traffic while pages are still streaming: 10 updates, 10 deletes,
    // 20 inserts.
    for i in 0..10 {
        store
            .update("products", doc(format!("{i:04}"), 10_000 + i))
            .await
            .unwrap();
    }
    for i in 10..20 {
        store
            .delete("products", DocKey::new("article", format!("{i:04}")))
            .await
            .unwrap();
    }
    for i in 0..20 {
        store.insert("products", doc(format!("n{i:02}"), i)).await.unwrap();
    }

    assert_eq!(wait_terminal(&store, &handle).await, RemapState::Done);

    // 2000 - 10 deleted + 20 inserted, all served from the new index.
    assert_eq!(store.count("products").await.unwrap(), 2_010);
    let updated = store
        .get("products", &DocKey::new("article", "0003"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.payload["n"], 10_003, "live update survived cutover");
    assert!(store
        .get("products", &DocKey::new("article", "0015"))
        .await
        .unwrap()
        .is_none(), "live delete survived cutover");
    assert!(store
        .get("products", &DocKey::new("article", "n07"))
        .await
        .unwrap()
        .is_some());
    assert_eq!(engine.list_indices("products_").await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn abandoned_migration_leaves_source_authoritative() {
    init_tracing();
    let engine = InMemoryEngine::new();
    let transport = Arc::new(
        FaultInjector::new(Arc::clone(&engine)).with_page_delay(Duration::from_millis(15)),
    );
    let store = SearchStore::with_config(transport, test_config());

    let source = store
        .create_index("products", &IndexDefinition::default())
        .await
        .unwrap();
    seed(&store, "products", 2_000).await;

    let handle = store
        .migrate("products", IndexDefinition::new(json!({ "v": 2 })))
        .unwrap();

    // Let the copy get roughly halfway.
    loop {
        let info = store.migration_status(&handle).unwrap();
        if info.docs_copied >= 1_000 {
            break;
        }
        assert!(!info.state.is_terminal(), "finished before we could abandon");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    for i in 0..10 {
        store
            .update("products", doc(format!("{i:04}"), 10_000 + i))
            .await
            .unwrap();
    }
    for i in 10..20 {
        store
            .delete("products", DocKey::new("article", format!("{i:04}")))
            .await
            .unwrap();
    }
    for i in 0..20 {
        store.insert("products", doc(format!("n{i:02}"), i)).await.unwrap();
    }

    store.abandon_migration(&handle).unwrap();
    let state = wait_terminal(&store, &handle).await;
    assert!(matches!(state, RemapState::Failed(_)), "got {state:?}");

    // The alias never moved and every mutation issued meanwhile is on the
    // source; the half-copied target is gone.
    assert_eq!(
        engine.resolve_alias("products").await.unwrap().as_deref(),
        Some(source.as_str())
    );
    assert_eq!(store.count("products").await.unwrap(), 2_010);
    assert_eq!(engine.list_indices("products_").await.unwrap(), vec![source]);
}

#[tokio::test(flavor = "multi_thread")]
async fn readers_never_observe_a_broken_alias_during_cutover() {
    init_tracing();
    let engine = InMemoryEngine::new();
    let transport = Arc::new(
        FaultInjector::new(Arc::clone(&engine)).with_page_delay(Duration::from_millis(5)),
    );
    let store = SearchStore::with_config(transport, test_config());

    store
        .create_index("products", &IndexDefinition::default())
        .await
        .unwrap();
    seed(&store, "products", 500).await;

    let handle = store
        .migrate("products", IndexDefinition::default())
        .unwrap();

    let mut readers = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        let handle = handle.clone();
        readers.push(tokio::spawn(async move {
            let key = DocKey::new("article", "0042");
            let mut reads = 0usize;
            loop {
                // Every read must resolve and find the document, whichever
                // side of the swap it lands on.
                let found = store.get("products", &key).await.unwrap();
                assert!(found.is_some());
                reads += 1;
                if store.migration_status(&handle).unwrap().state.is_terminal() {
                    return reads;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }));
    }

    assert_eq!(wait_terminal(&store, &handle).await, RemapState::Done);
    for reader in readers {
        assert!(reader.await.unwrap() > 0);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn versions_stay_monotonic_across_cutover() {
    init_tracing();
    let engine = InMemoryEngine::new();
    let transport = Arc::new(
        FaultInjector::new(Arc::clone(&engine)).with_page_delay(Duration::from_millis(10)),
    );
    let store = SearchStore::with_config(transport, test_config());

    store
        .create_index("products", &IndexDefinition::default())
        .await
        .unwrap();
    seed(&store, "products", 300).await;

    let handle = store
        .migrate("products", IndexDefinition::default())
        .unwrap();
    wait_for_state(&store, &handle, RemapState::Copying).await;

    // Rewrite one key throughout the migration and past it; every stamp the
    // store hands back must be strictly greater than the previous one.
    let mut stamps: Vec<VersionStamp> = Vec::new();
    for i in 0..30 {
        stamps.push(store.update("products", doc("0007", i)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(wait_terminal(&store, &handle).await, RemapState::Done);
    for i in 30..40 {
        stamps.push(store.update("products", doc("0007", i)).await.unwrap());
    }

    assert!(stamps.windows(2).all(|w| w[0] < w[1]), "{stamps:?}");
    let last = store
        .get("products", &DocKey::new("article", "0007"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(last.version, *stamps.last().unwrap());
    assert_eq!(last.payload["n"], 39);
}

#[tokio::test]
async fn concurrent_migration_of_same_logical_name_is_rejected() {
    init_tracing();
    let engine = InMemoryEngine::new();
    let transport = Arc::new(
        FaultInjector::new(Arc::clone(&engine)).with_page_delay(Duration::from_millis(15)),
    );
    let store = SearchStore::with_config(transport, test_config());

    store
        .create_index("products", &IndexDefinition::default())
        .await
        .unwrap();
    seed(&store, "products", 500).await;

    let first = store
        .migrate("products", IndexDefinition::default())
        .unwrap();
    let err = store
        .migrate("products", IndexDefinition::default())
        .unwrap_err();
    assert!(matches!(err, GriddleError::MigrationInProgress(_)));

    // An unrelated logical name migrates concurrently just fine.
    store
        .create_index("users", &IndexDefinition::default())
        .await
        .unwrap();
    let other = store.migrate("users", IndexDefinition::default()).unwrap();
    assert_eq!(wait_terminal(&store, &other).await, RemapState::Done);
    assert_eq!(wait_terminal(&store, &first).await, RemapState::Done);
}

#[tokio::test]
async fn copy_reruns_until_no_items_fail_before_cutover() {
    init_tracing();
    let engine = InMemoryEngine::new();
    let transport = Arc::new(FaultInjector::new(Arc::clone(&engine)));
    let store = SearchStore::with_config(Arc::clone(&transport), test_config());

    store
        .create_index("products", &IndexDefinition::default())
        .await
        .unwrap();
    seed(&store, "products", 30).await;

    // One copy bulk reports a per-item failure; that document must still be
    // on the target when it goes live.
    transport.drop_next_bulk_item.store(true, Ordering::SeqCst);
    let handle = store
        .migrate("products", IndexDefinition::new(json!({ "v": 2 })))
        .unwrap();
    assert_eq!(wait_terminal(&store, &handle).await, RemapState::Done);

    assert_eq!(store.count("products").await.unwrap(), 30, "no documents lost");
    for i in 0..30 {
        let key = DocKey::new("article", format!("{i:04}"));
        assert!(
            store.get("products", &key).await.unwrap().is_some(),
            "{key} missing from the live index"
        );
    }
}

#[tokio::test]
async fn exhausted_copy_retries_fail_the_migration_and_leave_source_live() {
    init_tracing();
    let engine = InMemoryEngine::new();
    let transport = Arc::new(FaultInjector::new(Arc::clone(&engine)));
    let store = SearchStore::with_config(Arc::clone(&transport), test_config());

    let source = store
        .create_index("products", &IndexDefinition::default())
        .await
        .unwrap();
    seed(&store, "products", 50).await;

    transport.fail_scans.store(true, Ordering::SeqCst);
    let handle = store
        .migrate("products", IndexDefinition::new(json!({ "v": 2 })))
        .unwrap();
    let state = wait_terminal(&store, &handle).await;
    assert!(matches!(state, RemapState::Failed(_)), "got {state:?}");

    // Alias untouched, and the dual-write registration is gone: a fresh
    // insert lands only on the source.
    assert_eq!(
        engine.resolve_alias("products").await.unwrap().as_deref(),
        Some(source.as_str())
    );
    store.insert("products", doc("extra", 1)).await.unwrap();
    assert_eq!(store.count("products").await.unwrap(), 51);

    let orphan = engine
        .list_indices("products_")
        .await
        .unwrap()
        .into_iter()
        .find(|name| *name != source)
        .expect("failed migration leaves its target behind");
    assert_eq!(engine.count(&orphan).await.unwrap(), 0);

    // The orphaned target is reclaimable.
    let removed = store.purge_orphans("products").await.unwrap();
    assert_eq!(removed, vec![orphan]);
    assert_eq!(engine.list_indices("products_").await.unwrap(), vec![source]);
}
