//! Agent restart recovery
//!
//! A restarted agent finds the interfaces it created in the dataplane and
//! the registry it persisted on the previous run. These tests drive the
//! full agent against a simulated dataplane seeded as a previous run would
//! have left it.

use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;

use vswitch_agent::intf::{InterfaceConfig, InterfaceKind, INTERFACE_REGISTRY};
use vswitch_agent::{Agent, AgentConfig, DesiredState};
use vswitch_dpapi::api::interface::{InterfaceDetails, InterfaceType, LinkDetails};
use vswitch_dpapi::{Request, SimDataplane};
use vswitch_orch_common::persist::read_snapshot;
use vswitch_orch_common::{snapshot_path, write_snapshot, IdxEntry};

fn config(state_dir: &TempDir) -> AgentConfig {
    let mut config = AgentConfig::default();
    config.persistence.enabled = true;
    config.persistence.state_dir = state_dir.path().to_path_buf();
    config.persistence.interval_ms = 20;
    config.persistence.max_jitter_ms = 1;
    config
}

fn seed_loopback(sim: &SimDataplane, index: u32, tag: &str, mtu: u32) {
    sim.seed_interface(InterfaceDetails {
        index,
        internal_name: format!("loop{}", index),
        tag: tag.to_string(),
        if_type: InterfaceType::Loopback,
        admin_up: false,
        mac: None,
        mtu,
        vrf_id: 0,
        addresses: Vec::new(),
        link: LinkDetails::None,
    });
}

fn persist(state_dir: &TempDir, entries: Vec<(&str, u32, InterfaceConfig)>) {
    let path = snapshot_path(state_dir.path(), INTERFACE_REGISTRY);
    let entries = entries
        .into_iter()
        .map(|(name, index, metadata)| IdxEntry {
            name: name.to_string(),
            index,
            metadata,
            version: 1,
        })
        .collect();
    write_snapshot(&path, INTERFACE_REGISTRY, entries).unwrap();
}

fn persisted_indices(state_dir: &TempDir) -> Vec<(String, u32)> {
    let path = snapshot_path(state_dir.path(), INTERFACE_REGISTRY);
    let file = read_snapshot::<InterfaceConfig>(&path)
        .unwrap()
        .expect("snapshot written");
    let mut entries: Vec<(String, u32)> = file
        .entries
        .into_iter()
        .map(|e| (e.name, e.index))
        .collect();
    entries.sort();
    entries
}

#[tokio::test]
async fn test_restart_adopts_persisted_interface_and_changes_only_mtu() {
    let state_dir = TempDir::new().unwrap();
    let sim = Arc::new(SimDataplane::new());
    seed_loopback(&sim, 3, "eth0", 1500);
    persist(
        &state_dir,
        vec![(
            "eth0",
            3,
            InterfaceConfig::new("eth0", InterfaceKind::Loopback).with_mtu(1500),
        )],
    );

    let mut agent = Agent::new(sim.clone(), config(&state_dir));
    agent.init().unwrap();
    let desired = DesiredState {
        interfaces: vec![InterfaceConfig::new("eth0", InterfaceKind::Loopback).with_mtu(2000)],
        ..Default::default()
    };
    let report = agent.resync(&desired);
    assert!(report.is_clean(), "errors: {:?}", report.errors);

    let writes = sim.requests();
    assert_eq!(writes, vec![Request::SetMtu { index: 3, mtu: 2000 }]);
    assert_eq!(agent.interfaces().registry().lookup_index("eth0"), Some(3));
    let summary = report.interfaces.unwrap();
    assert_eq!(summary.modified, 1);
    assert_eq!(summary.created, 0);
    assert_eq!(summary.deleted, 0);

    agent.shutdown().await;
    assert_eq!(persisted_indices(&state_dir), vec![("eth0".to_string(), 3)]);
}

#[tokio::test]
async fn test_restart_removes_persisted_interface_no_longer_desired() {
    let state_dir = TempDir::new().unwrap();
    let sim = Arc::new(SimDataplane::new());
    seed_loopback(&sim, 3, "keep", 0);
    seed_loopback(&sim, 4, "drop", 0);
    persist(
        &state_dir,
        vec![
            ("keep", 3, InterfaceConfig::new("keep", InterfaceKind::Loopback)),
            ("drop", 4, InterfaceConfig::new("drop", InterfaceKind::Loopback)),
        ],
    );

    let mut agent = Agent::new(sim.clone(), config(&state_dir));
    agent.init().unwrap();
    let desired = DesiredState {
        interfaces: vec![InterfaceConfig::new("keep", InterfaceKind::Loopback)],
        ..Default::default()
    };
    let report = agent.resync(&desired);
    assert!(report.is_clean(), "errors: {:?}", report.errors);

    assert_eq!(
        sim.requests(),
        vec![
            Request::SetAdminState { index: 4, up: false },
            Request::DeleteLoopback { index: 4 },
        ]
    );
    assert!(sim.interface(3).is_some());
    assert!(sim.interface(4).is_none());
    assert!(!agent.interfaces().registry().contains("drop"));

    agent.shutdown().await;
    assert_eq!(persisted_indices(&state_dir), vec![("keep".to_string(), 3)]);
}

#[tokio::test]
async fn test_identity_survives_two_agent_generations() {
    let state_dir = TempDir::new().unwrap();
    let sim = Arc::new(SimDataplane::new());
    let desired = DesiredState {
        interfaces: vec![
            InterfaceConfig::new("loop-a", InterfaceKind::Loopback),
            InterfaceConfig::new("loop-b", InterfaceKind::Loopback).with_mtu(1400),
        ],
        ..Default::default()
    };

    let mut first = Agent::new(sim.clone(), config(&state_dir));
    first.init().unwrap();
    assert!(first.resync(&desired).is_clean());
    let index_a = first.interfaces().registry().lookup_index("loop-a").unwrap();
    let index_b = first.interfaces().registry().lookup_index("loop-b").unwrap();
    first.shutdown().await;

    sim.clear_requests();
    let mut second = Agent::new(sim.clone(), config(&state_dir));
    second.init().unwrap();
    let report = second.resync(&desired);
    assert!(report.is_clean(), "errors: {:?}", report.errors);

    assert_eq!(sim.count("create_loopback"), 0);
    assert_eq!(sim.count("delete_loopback"), 0);
    assert_eq!(second.interfaces().registry().lookup_index("loop-a"), Some(index_a));
    assert_eq!(second.interfaces().registry().lookup_index("loop-b"), Some(index_b));
    second.shutdown().await;
}

#[tokio::test]
async fn test_dataplane_restart_recreates_everything() {
    let state_dir = TempDir::new().unwrap();
    let sim = Arc::new(SimDataplane::new());
    let desired = DesiredState {
        interfaces: vec![InterfaceConfig::new("loop-a", InterfaceKind::Loopback)],
        ..Default::default()
    };

    let mut first = Agent::new(sim.clone(), config(&state_dir));
    first.init().unwrap();
    assert!(first.resync(&desired).is_clean());
    first.shutdown().await;

    // The persisted index now points at nothing.
    sim.restart();
    sim.clear_requests();

    let mut second = Agent::new(sim.clone(), config(&state_dir));
    second.init().unwrap();
    let report = second.resync(&desired);
    assert!(report.is_clean(), "errors: {:?}", report.errors);
    assert_eq!(sim.count("create_loopback"), 1);
    let index = second.interfaces().registry().lookup_index("loop-a").unwrap();
    assert_eq!(sim.interface(index).unwrap().tag, "loop-a");
    second.shutdown().await;
}
