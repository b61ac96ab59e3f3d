//! Dependency notification bus.
//!
//! Configurators never call each other. A configurator that realizes a
//! prerequisite publishes a [`PrerequisiteEvent`] through a [`BusHandle`];
//! the owner of the bus drains the queue and hands every event to the
//! listeners interested in its kind, in the order they were passed.
//!
//! Interface registry changes are forwarded onto the bus automatically, so
//! the interface configurator needs no handle of its own.

use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use vswitch_orch_common::{
    ErrorList, IdxEvent, NameToIdx, PrerequisiteEvent, PrerequisiteKind, PrerequisiteListener,
};

use crate::intf::InterfaceConfig;
use crate::{debug_log, warn_log};

const SOURCE: &str = "NotificationBus";

/// Subscriber name used on the interface registry.
pub const BUS_WATCHER: &str = "notification-bus";

/// Cloneable publishing side of the bus.
#[derive(Debug, Clone)]
pub struct BusHandle {
    tx: UnboundedSender<PrerequisiteEvent>,
}

impl BusHandle {
    pub fn publish(&self, event: PrerequisiteEvent) {
        if self.tx.send(event).is_err() {
            warn_log!(SOURCE, "bus closed, event dropped");
        }
    }

    pub fn created(&self, kind: PrerequisiteKind, name: impl Into<String>, handle: u32) {
        self.publish(PrerequisiteEvent::Created {
            kind,
            name: name.into(),
            handle,
        });
    }

    pub fn deleted(&self, kind: PrerequisiteKind, name: impl Into<String>) {
        self.publish(PrerequisiteEvent::Deleted {
            kind,
            name: name.into(),
        });
    }
}

/// Event queue plus the interface registry watch.
pub struct NotificationBus {
    tx: UnboundedSender<PrerequisiteEvent>,
    rx: UnboundedReceiver<PrerequisiteEvent>,
    interface_rx: UnboundedReceiver<IdxEvent<InterfaceConfig>>,
    interfaces: Arc<NameToIdx<InterfaceConfig>>,
    dispatched: u64,
}

impl std::fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBus")
            .field("dispatched", &self.dispatched)
            .finish()
    }
}

impl NotificationBus {
    /// Creates the bus and starts watching `interfaces`.
    pub fn new(interfaces: Arc<NameToIdx<InterfaceConfig>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (interface_tx, interface_rx) = mpsc::unbounded_channel();
        interfaces.watch(BUS_WATCHER, interface_tx);
        Self {
            tx,
            rx,
            interface_rx,
            interfaces,
            dispatched: 0,
        }
    }

    pub fn handle(&self) -> BusHandle {
        BusHandle {
            tx: self.tx.clone(),
        }
    }

    /// Number of events handed to listeners so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    fn next_event(&mut self) -> Option<PrerequisiteEvent> {
        if let Ok(event) = self.interface_rx.try_recv() {
            return Some(match event {
                IdxEvent::Registered { name, index, .. } => PrerequisiteEvent::Created {
                    kind: PrerequisiteKind::Interface,
                    name,
                    handle: index,
                },
                IdxEvent::Unregistered { name, .. } => PrerequisiteEvent::Deleted {
                    kind: PrerequisiteKind::Interface,
                    name,
                },
            });
        }
        self.rx.try_recv().ok()
    }

    /// Drops every queued event without dispatching it.
    pub fn discard(&mut self) -> usize {
        let mut dropped = 0;
        while self.next_event().is_some() {
            dropped += 1;
        }
        dropped
    }

    /// Delivers queued events until both queues are empty. Events published
    /// by listeners while handling are delivered in the same call.
    pub fn dispatch(&mut self, listeners: &mut [&mut dyn PrerequisiteListener]) -> ErrorList {
        let mut errors = ErrorList::new();
        while let Some(event) = self.next_event() {
            self.dispatched += 1;
            debug_log!(SOURCE, kind = %event.kind(), name = event.name(), "dispatching");
            for listener in listeners.iter_mut() {
                if !listener.interested_in(event.kind()) {
                    continue;
                }
                if let Err(e) = listener.on_event(&event) {
                    warn_log!(SOURCE, listener = listener.listener_name(), error = %e, "listener failed");
                    errors.push(e);
                }
            }
        }
        errors
    }
}

impl Drop for NotificationBus {
    fn drop(&mut self) {
        self.interfaces.unwatch(BUS_WATCHER);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vswitch_orch_common::{ConfigError, ConfigResult};

    #[derive(Default)]
    struct Recorder {
        kinds: Vec<PrerequisiteKind>,
        seen: Vec<PrerequisiteEvent>,
        fail: bool,
    }

    impl PrerequisiteListener for Recorder {
        fn listener_name(&self) -> &str {
            "recorder"
        }

        fn interested_in(&self, kind: PrerequisiteKind) -> bool {
            self.kinds.contains(&kind)
        }

        fn resolve_created(&mut self, kind: PrerequisiteKind, name: &str, handle: u32) -> ConfigResult<()> {
            self.seen.push(PrerequisiteEvent::Created {
                kind,
                name: name.to_string(),
                handle,
            });
            if self.fail {
                return Err(ConfigError::not_found("thing", name));
            }
            Ok(())
        }

        fn resolve_deleted(&mut self, kind: PrerequisiteKind, name: &str) -> ConfigResult<()> {
            self.seen.push(PrerequisiteEvent::Deleted {
                kind,
                name: name.to_string(),
            });
            Ok(())
        }
    }

    fn registry() -> Arc<NameToIdx<InterfaceConfig>> {
        Arc::new(NameToIdx::new("interfaces"))
    }

    #[test]
    fn test_registry_changes_forwarded() {
        let interfaces = registry();
        let mut bus = NotificationBus::new(interfaces.clone());
        let config = InterfaceConfig::new("loop1", crate::intf::InterfaceKind::Loopback);
        interfaces.register_name("loop1", 4, config);
        interfaces.unregister_name("loop1");

        let mut listener = Recorder {
            kinds: vec![PrerequisiteKind::Interface],
            ..Default::default()
        };
        let errors = bus.dispatch(&mut [&mut listener]);
        assert!(errors.is_empty());
        assert_eq!(
            listener.seen,
            vec![
                PrerequisiteEvent::Created {
                    kind: PrerequisiteKind::Interface,
                    name: "loop1".to_string(),
                    handle: 4
                },
                PrerequisiteEvent::Deleted {
                    kind: PrerequisiteKind::Interface,
                    name: "loop1".to_string()
                },
            ]
        );
        assert_eq!(bus.dispatched(), 2);
    }

    #[test]
    fn test_only_interested_listeners() {
        let mut bus = NotificationBus::new(registry());
        let handle = bus.handle();
        handle.created(PrerequisiteKind::Srv6Policy, "a::e", 0);
        handle.deleted(PrerequisiteKind::LinuxInterface, "veth1");

        let mut policies = Recorder {
            kinds: vec![PrerequisiteKind::Srv6Policy],
            ..Default::default()
        };
        let mut hosts = Recorder {
            kinds: vec![PrerequisiteKind::LinuxInterface],
            ..Default::default()
        };
        bus.dispatch(&mut [&mut policies, &mut hosts]);
        assert_eq!(policies.seen.len(), 1);
        assert_eq!(hosts.seen.len(), 1);
        assert_eq!(hosts.seen[0].name(), "veth1");
    }

    #[test]
    fn test_listener_errors_collected() {
        let mut bus = NotificationBus::new(registry());
        let handle = bus.handle();
        handle.created(PrerequisiteKind::Srv6Policy, "a::e", 0);
        handle.created(PrerequisiteKind::Srv6Policy, "a::f", 1);

        let mut failing = Recorder {
            kinds: vec![PrerequisiteKind::Srv6Policy],
            fail: true,
            ..Default::default()
        };
        let errors = bus.dispatch(&mut [&mut failing]);
        assert_eq!(errors.len(), 2);
        assert_eq!(failing.seen.len(), 2);
    }

    #[test]
    fn test_discard() {
        let mut bus = NotificationBus::new(registry());
        bus.handle().deleted(PrerequisiteKind::Interface, "x");
        assert_eq!(bus.discard(), 1);
        assert_eq!(bus.dispatch(&mut []).len(), 0);
    }

    #[test]
    fn test_unwatch_on_drop() {
        let interfaces = registry();
        let bus = NotificationBus::new(interfaces.clone());
        drop(bus);
        let config = InterfaceConfig::new("loop1", crate::intf::InterfaceKind::Loopback);
        interfaces.register_name("loop1", 4, config);
        assert!(interfaces.contains("loop1"));
    }
}
