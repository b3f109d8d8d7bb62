//! Zero-downtime index migration.
//!
//! A migration moves a logical name from one concrete index to a freshly
//! built replacement without ever blocking reads or writes:
//!
//!  1. the coordinator creates the target and registers a dual-write pair
//!     with the [`WriteGuard`], so every live mutation lands on both sides;
//!  2. the [`SnapshotCopier`] streams the source into the target in bounded
//!     pages, each write conditioned on "only if newer" so a copy never
//!     overwrites a fresher dual-write;
//!  3. the [`AliasResolver`] swaps the alias in one compare-and-swap call,
//!     after which the old index is retired.
//!
//! If anything dies before step 3 the alias still points at the source and
//! no data was lost; the half-built target is just garbage to purge.

pub mod alias;
pub mod coordinator;
pub mod copier;
pub mod guard;

pub use alias::AliasResolver;
pub use coordinator::{MigrationHandle, RemapCoordinator};
pub use copier::{CopyReport, SnapshotCopier};
pub use guard::{DualWriteRegistration, WriteGuard};

pub(crate) use coordinator::generation_name;
