//! In-process engine implementing the full transport contract.
//!
//! Faithful to the semantics the core depends on: per-index version
//! counters that catch up past externally-stamped writes, version-stamped
//! delete tombstones, and an alias table mutated only under a single lock so
//! multi-action updates are indivisible. Backs the whole test suite.

use crate::bulk::{BulkAction, BulkOutcome};
use crate::error::{GriddleError, Result};
use crate::transport::{AliasAction, PutResponse, ScanPage, SearchTransport};
use crate::types::{ConcreteName, DocKey, Document, IndexDefinition, VersionStamp, WriteCondition};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
struct Slot {
    version: VersionStamp,
    /// `None` is a tombstone: the key was deleted at `version`.
    payload: Option<serde_json::Value>,
}

struct IndexState {
    #[allow(dead_code)]
    definition: IndexDefinition,
    docs: DashMap<DocKey, Slot>,
    /// High-water mark for internally assigned stamps. Bumped past any
    /// externally-stamped write so post-cutover internal writes always win.
    seq: AtomicU64,
}

impl IndexState {
    fn write(
        &self,
        key: &DocKey,
        payload: Option<serde_json::Value>,
        condition: WriteCondition,
    ) -> PutResponse {
        let mut slot = self.docs.entry(key.clone()).or_insert(Slot {
            version: VersionStamp::ZERO,
            payload: None,
        });
        match condition {
            WriteCondition::Internal => {
                let assigned = (self.seq.fetch_add(1, Ordering::SeqCst) + 1).max(slot.version.0 + 1);
                self.seq.fetch_max(assigned, Ordering::SeqCst);
                slot.version = VersionStamp(assigned);
                slot.payload = payload;
                PutResponse {
                    version: slot.version,
                    applied: true,
                }
            }
            WriteCondition::IfNewer(stamp) => {
                if stamp > slot.version {
                    self.seq.fetch_max(stamp.0, Ordering::SeqCst);
                    slot.version = stamp;
                    slot.payload = payload;
                    PutResponse {
                        version: stamp,
                        applied: true,
                    }
                } else {
                    PutResponse {
                        version: slot.version,
                        applied: false,
                    }
                }
            }
        }
    }
}

fn scan_cursor(key: &DocKey) -> String {
    // Keys sort by (doc_type, id); the cursor is just the last key seen.
    serde_json::to_string(key).unwrap_or_default()
}

/// In-memory search engine.
pub struct InMemoryEngine {
    indices: DashMap<ConcreteName, Arc<IndexState>>,
    aliases: RwLock<HashMap<String, ConcreteName>>,
}

impl InMemoryEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(InMemoryEngine {
            indices: DashMap::new(),
            aliases: RwLock::new(HashMap::new()),
        })
    }

    fn index(&self, name: &str) -> Result<Arc<IndexState>> {
        self.indices
            .get(name)
            .map(|r| Arc::clone(&r))
            .ok_or_else(|| GriddleError::IndexMissing(name.to_string()))
    }
}

#[async_trait]
impl SearchTransport for InMemoryEngine {
    async fn create_index(&self, name: &str, definition: &IndexDefinition) -> Result<()> {
        use dashmap::mapref::entry::Entry;
        if !(definition.mapping.is_object() || definition.mapping.is_null()) {
            return Err(GriddleError::InvalidDefinition(format!(
                "mapping must be an object, got {}",
                definition.mapping
            )));
        }
        match self.indices.entry(name.to_string()) {
            Entry::Occupied(_) => Err(GriddleError::IndexAlreadyExists(name.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(IndexState {
                    definition: definition.clone(),
                    docs: DashMap::new(),
                    seq: AtomicU64::new(0),
                }));
                Ok(())
            }
        }
    }

    async fn delete_index(&self, name: &str) -> Result<()> {
        self.indices
            .remove(name)
            .ok_or_else(|| GriddleError::IndexMissing(name.to_string()))?;
        // Engines drop alias bindings along with the index they point at.
        let mut aliases = self.aliases.write().expect("alias table lock poisoned");
        aliases.retain(|_, bound| bound != name);
        Ok(())
    }

    async fn index_exists(&self, name: &str) -> Result<bool> {
        Ok(self.indices.contains_key(name))
    }

    async fn list_indices(&self, prefix: &str) -> Result<Vec<ConcreteName>> {
        let mut names: Vec<ConcreteName> = self
            .indices
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|name| name.starts_with(prefix))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn get(&self, index: &str, key: &DocKey) -> Result<Option<Document>> {
        let state = self.index(index)?;
        Ok(state.docs.get(key).and_then(|slot| {
            slot.payload.as_ref().map(|payload| Document {
                key: key.clone(),
                version: slot.version,
                payload: payload.clone(),
            })
        }))
    }

    async fn put(
        &self,
        index: &str,
        doc: &Document,
        condition: WriteCondition,
    ) -> Result<PutResponse> {
        let state = self.index(index)?;
        Ok(state.write(&doc.key, Some(doc.payload.clone()), condition))
    }

    async fn delete(
        &self,
        index: &str,
        key: &DocKey,
        condition: WriteCondition,
    ) -> Result<PutResponse> {
        let state = self.index(index)?;
        Ok(state.write(key, None, condition))
    }

    async fn count(&self, index: &str) -> Result<usize> {
        let state = self.index(index)?;
        Ok(state
            .docs
            .iter()
            .filter(|entry| entry.value().payload.is_some())
            .count())
    }

    async fn bulk(&self, index: &str, actions: &[BulkAction]) -> Result<Vec<BulkOutcome>> {
        let state = self.index(index)?;
        let outcomes = actions
            .iter()
            .map(|action| {
                let response = match action {
                    BulkAction::Index { doc, condition } => {
                        state.write(&doc.key, Some(doc.payload.clone()), *condition)
                    }
                    BulkAction::Delete { key, condition } => state.write(key, None, *condition),
                };
                if response.applied {
                    BulkOutcome::Applied(response.version)
                } else {
                    BulkOutcome::Skipped
                }
            })
            .collect();
        Ok(outcomes)
    }

    async fn scan(&self, index: &str, cursor: Option<&str>, limit: usize) -> Result<ScanPage> {
        let state = self.index(index)?;
        let after: Option<DocKey> = match cursor {
            Some(raw) => Some(serde_json::from_str(raw)?),
            None => None,
        };

        let mut live: Vec<Document> = state
            .docs
            .iter()
            .filter_map(|entry| {
                entry.value().payload.as_ref().map(|payload| Document {
                    key: entry.key().clone(),
                    version: entry.value().version,
                    payload: payload.clone(),
                })
            })
            .collect();
        live.sort_by(|a, b| {
            (&a.key.doc_type, &a.key.id).cmp(&(&b.key.doc_type, &b.key.id))
        });

        let start = match &after {
            Some(key) => live
                .iter()
                .position(|doc| (&doc.key.doc_type, &doc.key.id) > (&key.doc_type, &key.id))
                .unwrap_or(live.len()),
            None => 0,
        };
        let remaining = live.len() - start;
        let take = limit.max(1).min(remaining);
        let docs: Vec<Document> = live[start..start + take].to_vec();
        let cursor = if take < remaining {
            docs.last().map(|doc| scan_cursor(&doc.key))
        } else {
            None
        };
        Ok(ScanPage { docs, cursor })
    }

    async fn resolve_alias(&self, alias: &str) -> Result<Option<ConcreteName>> {
        let aliases = self.aliases.read().expect("alias table lock poisoned");
        Ok(aliases.get(alias).cloned())
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()> {
        let mut aliases = self.aliases.write().expect("alias table lock poisoned");
        // Apply against a staged copy so the update is all-or-nothing and
        // earlier actions are visible to later ones (a swap's Remove frees
        // the alias for its Add).
        let mut staged = aliases.clone();
        for action in actions {
            match action {
                AliasAction::Remove { alias, index } => match staged.get(alias) {
                    None => return Err(GriddleError::AliasNotFound(alias.clone())),
                    Some(bound) if bound != index => {
                        return Err(GriddleError::AliasSwapConflict {
                            alias: alias.clone(),
                            expected: index.clone(),
                            actual: bound.clone(),
                        });
                    }
                    Some(_) => {
                        staged.remove(alias);
                    }
                },
                AliasAction::Add { alias, index } => {
                    if !self.indices.contains_key(index) {
                        return Err(GriddleError::IndexMissing(index.clone()));
                    }
                    // An Add never steals a live binding.
                    match staged.get(alias) {
                        Some(bound) if bound != index => {
                            return Err(GriddleError::AliasSwapConflict {
                                alias: alias.clone(),
                                expected: index.clone(),
                                actual: bound.clone(),
                            });
                        }
                        _ => {
                            staged.insert(alias.clone(), index.clone());
                        }
                    }
                }
            }
        }
        *aliases = staged;
        Ok(())
    }
}
