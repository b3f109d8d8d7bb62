//! Logical-name indirection.

use crate::error::{GriddleError, Result};
use crate::transport::{AliasAction, SearchTransport};
use crate::types::ConcreteName;
use std::sync::Arc;

/// Maps a stable logical name to the currently-active concrete index.
///
/// The alias binding is the one piece of shared mutable state in the whole
/// design; it is only ever changed through [`bind`](AliasResolver::bind),
/// [`unbind`](AliasResolver::unbind) and [`swap`](AliasResolver::swap), each
/// a single engine call.
pub struct AliasResolver<T> {
    transport: Arc<T>,
}

impl<T> Clone for AliasResolver<T> {
    fn clone(&self) -> Self {
        AliasResolver {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T: SearchTransport> AliasResolver<T> {
    pub fn new(transport: Arc<T>) -> Self {
        AliasResolver { transport }
    }

    /// The concrete index the logical name currently points at.
    pub async fn resolve(&self, logical: &str) -> Result<ConcreteName> {
        self.transport
            .resolve_alias(logical)
            .await?
            .ok_or_else(|| GriddleError::AliasNotFound(logical.to_string()))
    }

    /// Bind an unbound logical name. Fails with `AliasSwapConflict` if the
    /// alias is already bound to a different index; moving a live binding is
    /// [`swap`](AliasResolver::swap)'s job.
    pub async fn bind(&self, logical: &str, concrete: &str) -> Result<()> {
        self.transport
            .update_aliases(&[AliasAction::Add {
                alias: logical.to_string(),
                index: concrete.to_string(),
            }])
            .await
    }

    pub async fn unbind(&self, logical: &str, concrete: &str) -> Result<()> {
        self.transport
            .update_aliases(&[AliasAction::Remove {
                alias: logical.to_string(),
                index: concrete.to_string(),
            }])
            .await
    }

    /// Atomically repoint `logical` from `from` to `to`.
    ///
    /// Compare-and-swap: fails with `AliasSwapConflict` if the binding moved
    /// since `from` was read (a concurrent, conflicting migration), with
    /// `AliasNotFound` if the alias is unbound, and with `IndexMissing` if
    /// `to` does not exist. Readers resolving concurrently observe either
    /// the old binding or the new one, never an absent or half-updated one —
    /// this is what makes cutover invisible.
    pub async fn swap(&self, logical: &str, from: &str, to: &str) -> Result<()> {
        if !self.transport.index_exists(to).await? {
            return Err(GriddleError::IndexMissing(to.to_string()));
        }
        tracing::info!("[ALIAS {}] swapping {} -> {}", logical, from, to);
        self.transport
            .update_aliases(&[
                AliasAction::Remove {
                    alias: logical.to_string(),
                    index: from.to_string(),
                },
                AliasAction::Add {
                    alias: logical.to_string(),
                    index: to.to_string(),
                },
            ])
            .await
    }
}
