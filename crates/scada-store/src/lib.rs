//! Snapshot codec (A), snapshot table cache (B), and event log (E) — spec §4.1, §4.2, §4.5.

pub mod cache;
pub mod codec;
pub mod error;
pub mod event;
pub mod snapshot;

pub use cache::{CacheEntry, SnapshotCache, TableKind};
pub use error::{Result, StoreError};
pub use event::Event;
pub use snapshot::{Descriptor, Snapshot, SnapshotTable};
