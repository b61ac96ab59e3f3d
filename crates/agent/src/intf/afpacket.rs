//! AF-Packet sub-configurator state.
//!
//! An af-packet interface binds to a host-side interface and can only be
//! created once that interface exists. This tracks which host interfaces
//! are known and which af-packet configs wait for one.

use std::collections::HashSet;

use vswitch_orch_common::{BlockingReason, DeferredIndex, PendingEntry};

use super::types::InterfaceConfig;

#[derive(Debug, Default)]
pub struct AfPacketState {
    /// When false host interfaces are not tracked and nothing is deferred.
    track_hosts: bool,
    known_hosts: HashSet<String>,
    pending: DeferredIndex<InterfaceConfig>,
}

impl AfPacketState {
    pub fn new(track_hosts: bool) -> Self {
        Self {
            track_hosts,
            ..Default::default()
        }
    }

    pub fn tracks_hosts(&self) -> bool {
        self.track_hosts
    }

    /// Returns true if `config` must wait for its host interface.
    pub fn must_defer(&self, config: &InterfaceConfig) -> bool {
        match config.host_interface() {
            Some(host) => self.track_hosts && !self.known_hosts.contains(host),
            None => false,
        }
    }

    /// Stores `config` until its host interface appears.
    pub fn defer(&mut self, config: InterfaceConfig) {
        let host = config.host_interface().unwrap_or_default().to_string();
        self.pending.defer(
            config.name.clone(),
            host,
            config,
            BlockingReason::MissingPrerequisite,
        );
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.pending.is_pending(name)
    }

    pub fn remove_pending(&mut self, name: &str) -> Option<InterfaceConfig> {
        self.pending.remove(name).map(|entry| entry.config)
    }

    pub fn pending(&self) -> Vec<PendingEntry<InterfaceConfig>> {
        self.pending.dump()
    }

    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// Replaces the set of known host interfaces.
    pub fn set_known_hosts<I, S>(&mut self, hosts: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_hosts = hosts.into_iter().map(Into::into).collect();
    }

    pub fn is_host_known(&self, host: &str) -> bool {
        self.known_hosts.contains(host)
    }

    /// Marks `host` as present and releases the configs waiting on it.
    pub fn host_created(&mut self, host: &str) -> Vec<InterfaceConfig> {
        self.known_hosts.insert(host.to_string());
        self.pending
            .take_blocked_on(host)
            .into_iter()
            .map(|entry| entry.config)
            .collect()
    }

    pub fn host_deleted(&mut self, host: &str) {
        self.known_hosts.remove(host);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intf::types::{AfPacketLink, InterfaceKind, InterfaceLink};

    fn afpacket(name: &str, host: &str) -> InterfaceConfig {
        InterfaceConfig::new(name, InterfaceKind::AfPacket).with_link(InterfaceLink::AfPacket(
            AfPacketLink {
                host_if_name: host.to_string(),
            },
        ))
    }

    #[test]
    fn test_defer_and_release() {
        let mut state = AfPacketState::new(true);
        let config = afpacket("afp1", "veth1");
        assert!(state.must_defer(&config));

        state.defer(config.clone());
        assert!(state.is_pending("afp1"));
        assert!(state.host_created("veth2").is_empty());

        let released = state.host_created("veth1");
        assert_eq!(released, vec![config.clone()]);
        assert!(!state.is_pending("afp1"));
        assert!(!state.must_defer(&config));

        state.host_deleted("veth1");
        assert!(state.must_defer(&config));
    }

    #[test]
    fn test_untracked_hosts_never_defer() {
        let state = AfPacketState::new(false);
        assert!(!state.must_defer(&afpacket("afp1", "veth1")));
        let loopback = InterfaceConfig::new("loop1", InterfaceKind::Loopback);
        assert!(!AfPacketState::new(true).must_defer(&loopback));
    }
}
