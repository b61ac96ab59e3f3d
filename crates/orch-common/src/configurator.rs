//! Configurator and prerequisite listener contracts.

use std::fmt;

use crate::deferred::BlockingReason;
use crate::task::ConfigResult;

/// Lifecycle state of one desired resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceState {
    Unconfigured,
    /// Desired but deferred; nothing was written to the dataplane.
    Pending(BlockingReason),
    Configured,
}

impl ResourceState {
    pub fn is_pending(&self) -> bool {
        matches!(self, ResourceState::Pending(_))
    }
}

/// Uniform contract of a per-family resource configurator.
///
/// A configurator is driven by one caller at a time. Deferral on a missing
/// prerequisite is a success; precondition errors are returned before any
/// dataplane call; failures of independent follow-up calls are aggregated.
pub trait Configurator<C> {
    /// Realizes a new resource, or defers it.
    fn configure(&mut self, config: &C) -> ConfigResult<()>;

    /// Moves a resource from `old` to `new`, in place or by recreating it.
    fn modify(&mut self, old: &C, new: &C) -> ConfigResult<()>;

    /// Removes a resource, or drops it from the pending set.
    fn delete(&mut self, config: &C) -> ConfigResult<()>;

    /// Converges the dataplane onto the full desired set.
    fn resync(&mut self, desired: &[C]) -> ConfigResult<()>;

    /// Reports the state of the resource with the given key.
    fn resource_state(&self, key: &str) -> ResourceState;
}

/// Kinds of resources other configurators can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrerequisiteKind {
    /// A host-side (Linux) interface.
    LinuxInterface,
    /// A dataplane interface registered by the interface configurator.
    Interface,
    /// An SRv6 policy, by binding SID.
    Srv6Policy,
}

impl fmt::Display for PrerequisiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrerequisiteKind::LinuxInterface => write!(f, "linux-interface"),
            PrerequisiteKind::Interface => write!(f, "interface"),
            PrerequisiteKind::Srv6Policy => write!(f, "srv6-policy"),
        }
    }
}

/// Appearance or disappearance of a prerequisite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrerequisiteEvent {
    Created {
        kind: PrerequisiteKind,
        name: String,
        handle: u32,
    },
    Deleted {
        kind: PrerequisiteKind,
        name: String,
    },
}

impl PrerequisiteEvent {
    pub fn kind(&self) -> PrerequisiteKind {
        match self {
            PrerequisiteEvent::Created { kind, .. } | PrerequisiteEvent::Deleted { kind, .. } => {
                *kind
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PrerequisiteEvent::Created { name, .. } | PrerequisiteEvent::Deleted { name, .. } => {
                name
            }
        }
    }
}

/// A configurator holding resources that wait on prerequisites.
pub trait PrerequisiteListener {
    /// Name used in logs.
    fn listener_name(&self) -> &str;

    fn interested_in(&self, kind: PrerequisiteKind) -> bool;

    /// Replays configuration of every resource blocked on `name`.
    fn resolve_created(&mut self, kind: PrerequisiteKind, name: &str, handle: u32) -> ConfigResult<()>;

    /// Removes resources realized on `name` and defers them again.
    fn resolve_deleted(&mut self, kind: PrerequisiteKind, name: &str) -> ConfigResult<()>;

    /// Routes an event to the matching resolve call.
    fn on_event(&mut self, event: &PrerequisiteEvent) -> ConfigResult<()> {
        match event {
            PrerequisiteEvent::Created { kind, name, handle } => {
                self.resolve_created(*kind, name, *handle)
            }
            PrerequisiteEvent::Deleted { kind, name } => self.resolve_deleted(*kind, name),
        }
    }
}
