//! Reconciliation framework for the vSwitch agent.
//!
//! This crate provides the pieces every resource configurator is built
//! from:
//!
//! - [`NameToIdx`]: name to runtime index registry with watchers
//! - [`persist`]: atomic on-disk snapshots and the background persistence loop
//! - [`DeferredIndex`]: resources blocked on a prerequisite
//! - [`correlator`]: resync planning from desired, persisted and dumped state
//! - [`Configurator`] / [`PrerequisiteListener`]: per-family contracts
//! - [`ConfigError`] / [`ErrorList`]: error taxonomy and aggregation
//!
//! # Resync flow
//!
//! 1. At startup each configurator loads the snapshot its registry persisted
//!    on the previous run
//! 2. The dataplane is dumped and the dump is turned into inventory items
//! 3. [`correlate`] computes a [`ResyncPlan`]
//! 4. [`execute`] applies it; failures are collected, never fatal
//! 5. The live registry is persisted in the background from then on
//!
//! # Example
//!
//! ```
//! use vswitch_orch_common::{DeferredIndex, BlockingReason, NameToIdx};
//!
//! let registry: NameToIdx<()> = NameToIdx::new("interfaces");
//! registry.register_name("loop1", 5, ());
//! assert_eq!(registry.lookup_index("loop1"), Some(5));
//!
//! let mut pending = DeferredIndex::new();
//! pending.defer("afp1", "veth1", "config", BlockingReason::MissingPrerequisite);
//! assert_eq!(pending.take_blocked_on("veth1").len(), 1);
//! ```

pub mod configurator;
pub mod correlator;
pub mod deferred;
pub mod idx;
pub mod persist;
mod task;

pub use configurator::{
    Configurator, PrerequisiteEvent, PrerequisiteKind, PrerequisiteListener, ResourceState,
};
pub use correlator::{
    correlate, execute, match_by_key, verify_dataplane_presence, ColdStartPolicy, Correlated,
    InventoryItem, KeyedDiff, Matched, ResyncPlan, ResyncSummary, ResyncTarget,
};
pub use deferred::{BlockingReason, DeferredIndex, PendingEntry};
pub use idx::{IdxEntry, IdxEvent, NameToIdx};
pub use persist::{
    load_snapshot, snapshot_path, spawn_persist_loop, write_snapshot, PersistConfig,
    PersistHandle, PersistedSnapshot,
};
pub use task::{ConfigError, ConfigResult, ErrorList};
