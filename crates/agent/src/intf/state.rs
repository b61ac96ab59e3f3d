//! Interface state reporting.
//!
//! A watcher on the interface registry. Every registration is read back from
//! the dataplane into an [`InterfaceState`]; every removal reports the
//! interface as deleted and forgets it. Each change goes out as an
//! [`InterfaceStateNotification`] to the current subscriber.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use vswitch_dpapi::{DataplaneApi, IpNetwork, MacAddress};
use vswitch_orch_common::{ConfigResult, ErrorList, IdxEvent, NameToIdx};

use crate::{debug_log, warn_log};

use super::configurator::observe_interface;
use super::types::{InterfaceConfig, InterfaceKind};

const SOURCE: &str = "InterfaceStateReporter";

/// Subscriber name used on the interface registry.
pub const STATE_WATCHER: &str = "interface-state";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminStatus {
    Up,
    Down,
    Deleted,
}

/// Last known state of one interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceState {
    pub name: String,
    pub index: u32,
    pub kind: InterfaceKind,
    pub admin_status: AdminStatus,
    pub mtu: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<MacAddress>,
    pub ip_addresses: Vec<IpNetwork>,
    pub last_change: DateTime<Utc>,
}

impl InterfaceState {
    fn observed(name: &str, index: u32, observed: InterfaceConfig) -> Self {
        Self {
            name: name.to_string(),
            index,
            kind: observed.kind,
            admin_status: if observed.enabled {
                AdminStatus::Up
            } else {
                AdminStatus::Down
            },
            mtu: observed.mtu,
            mac: observed.mac,
            ip_addresses: observed.ip_addresses,
            last_change: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateChange {
    Updated,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceStateNotification {
    pub change: StateChange,
    pub state: InterfaceState,
}

/// Keeps interface state in step with the interface registry.
pub struct InterfaceStateReporter {
    api: Arc<dyn DataplaneApi>,
    interfaces: Arc<NameToIdx<InterfaceConfig>>,
    rx: UnboundedReceiver<IdxEvent<InterfaceConfig>>,
    states: HashMap<String, InterfaceState>,
    subscriber: Option<UnboundedSender<InterfaceStateNotification>>,
    published: u64,
}

impl std::fmt::Debug for InterfaceStateReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceStateReporter")
            .field("interfaces", &self.states.len())
            .field("published", &self.published)
            .field("subscribed", &self.subscriber.is_some())
            .finish()
    }
}

impl InterfaceStateReporter {
    /// Creates the reporter and starts watching `interfaces`. Interfaces
    /// registered before this call are not reported until they change.
    pub fn new(api: Arc<dyn DataplaneApi>, interfaces: Arc<NameToIdx<InterfaceConfig>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        interfaces.watch(STATE_WATCHER, tx);
        Self {
            api,
            interfaces,
            rx,
            states: HashMap::new(),
            subscriber: None,
            published: 0,
        }
    }

    /// Returns a fresh notification stream. A previous subscriber stops
    /// receiving.
    pub fn subscribe(&mut self) -> UnboundedReceiver<InterfaceStateNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriber = Some(tx);
        rx
    }

    pub fn state(&self, name: &str) -> Option<&InterfaceState> {
        self.states.get(name)
    }

    /// All known states, sorted by name.
    pub fn states(&self) -> Vec<InterfaceState> {
        let mut states: Vec<InterfaceState> = self.states.values().cloned().collect();
        states.sort_by(|a, b| a.name.cmp(&b.name));
        states
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    fn publish(&mut self, change: StateChange, state: InterfaceState) {
        self.published += 1;
        let Some(subscriber) = &self.subscriber else {
            return;
        };
        if subscriber
            .send(InterfaceStateNotification { change, state })
            .is_err()
        {
            debug_log!(SOURCE, "subscriber gone");
            self.subscriber = None;
        }
    }

    /// Handles every queued registry event. A failed read-back leaves that
    /// interface unreported and is returned after the queue is drained.
    pub fn process(&mut self) -> ConfigResult<usize> {
        let mut errors = ErrorList::new();
        let mut handled = 0;
        while let Ok(event) = self.rx.try_recv() {
            handled += 1;
            match event {
                IdxEvent::Registered { name, index, .. } => {
                    let Some(observed) = errors.record(observe_interface(self.api.as_ref(), index)) else {
                        warn_log!(SOURCE, interface = %name, index, "state read-back failed");
                        continue;
                    };
                    match observed {
                        Some(observed) => {
                            let state = InterfaceState::observed(&name, index, observed);
                            self.states.insert(name, state.clone());
                            self.publish(StateChange::Updated, state);
                        }
                        None => debug_log!(SOURCE, interface = %name, index, "interface gone before read-back"),
                    }
                }
                IdxEvent::Unregistered { name, index, .. } => {
                    let mut state = match self.states.remove(&name) {
                        Some(state) => state,
                        None => InterfaceState::observed(&name, index, InterfaceConfig::default()),
                    };
                    state.admin_status = AdminStatus::Deleted;
                    state.last_change = Utc::now();
                    self.publish(StateChange::Deleted, state);
                }
            }
        }
        errors.into_result().map(|()| handled)
    }
}

impl Drop for InterfaceStateReporter {
    fn drop(&mut self) {
        self.interfaces.unwatch(STATE_WATCHER);
    }
}
