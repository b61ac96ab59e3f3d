//! InterfaceConfigurator implementation.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use vswitch_dpapi::api::interface::{self, AfPacketCreate, MemifCreate, TapCreate, VxlanTunnel};
use vswitch_dpapi::{DataplaneApi, Request};
use vswitch_orch_common::{
    correlate, execute, verify_dataplane_presence, BlockingReason, ColdStartPolicy, ConfigError,
    ConfigResult, Configurator, ErrorList, InventoryItem, Matched, NameToIdx, PersistedSnapshot,
    PrerequisiteKind, PrerequisiteListener, ResourceState, ResyncPlan, ResyncSummary, ResyncTarget,
};

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::{audit_log, debug_log, info_log, warn_log};

use super::afpacket::AfPacketState;
use super::dump::{dump_interfaces, dump_memif_sockets, observed_config};
use super::types::{needs_recreate, same_config, InterfaceConfig, InterfaceKind, InterfaceLink};

const SOURCE: &str = "InterfaceConfigurator";

/// Title of the interface registry and stem of its persisted file.
pub const INTERFACE_REGISTRY: &str = "interfaces";

/// Interface configurator settings.
#[derive(Debug, Clone, Default)]
pub struct InterfaceConfiguratorConfig {
    /// MTU programmed when a config leaves it at 0; 0 keeps the dataplane default.
    pub default_mtu: u32,
    pub cold_start_policy: ColdStartPolicy,
    /// Skip correlation entirely when the dump holds nothing configurable.
    pub skip_if_dataplane_empty: bool,
    /// Defer af-packet interfaces until their host interface is reported.
    pub linux_interfaces: bool,
}

/// Interface configurator statistics.
#[derive(Debug, Clone, Default)]
pub struct InterfaceStats {
    pub created: u64,
    pub modified: u64,
    pub recreated: u64,
    pub deleted: u64,
    pub deferred: u64,
}

/// Configures dataplane interfaces and owns the interface registry.
pub struct InterfaceConfigurator {
    api: Arc<dyn DataplaneApi>,
    config: InterfaceConfiguratorConfig,
    registry: Arc<NameToIdx<InterfaceConfig>>,
    afpacket: AfPacketState,
    /// Memif socket filename -> socket id, loaded lazily from the dataplane.
    memif_sockets: Option<HashMap<String, u32>>,
    /// Snapshot persisted by the previous run; consumed by the first resync.
    persisted: Option<PersistedSnapshot<InterfaceConfig>>,
    last_resync: Option<ResyncSummary>,
    resync_count: u64,
    stats: InterfaceStats,
}

impl std::fmt::Debug for InterfaceConfigurator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceConfigurator")
            .field("config", &self.config)
            .field("registered", &self.registry.len())
            .field("pending", &self.afpacket.pending().len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl InterfaceConfigurator {
    pub fn new(api: Arc<dyn DataplaneApi>, config: InterfaceConfiguratorConfig) -> Self {
        let afpacket = AfPacketState::new(config.linux_interfaces);
        Self {
            api,
            config,
            registry: Arc::new(NameToIdx::new(INTERFACE_REGISTRY)),
            afpacket,
            memif_sockets: None,
            persisted: None,
            last_resync: None,
            resync_count: 0,
            stats: InterfaceStats::default(),
        }
    }

    /// Checks that the dataplane speaks every interface message.
    pub fn init(&self) -> ConfigResult<()> {
        self.api
            .check_message_compatibility(interface::MESSAGES)
            .map_err(|source| ConfigError::Incompatible {
                configurator: INTERFACE_REGISTRY.to_string(),
                source,
            })
    }

    /// Shared handle to the interface registry.
    pub fn registry(&self) -> Arc<NameToIdx<InterfaceConfig>> {
        Arc::clone(&self.registry)
    }

    /// Hands over the snapshot persisted by the previous run.
    pub fn load_persisted(&mut self, snapshot: PersistedSnapshot<InterfaceConfig>) {
        info_log!(SOURCE, entries = snapshot.len(), "loaded persisted interface snapshot");
        self.persisted = Some(snapshot);
    }

    pub fn stats(&self) -> &InterfaceStats {
        &self.stats
    }

    pub fn last_resync(&self) -> Option<ResyncSummary> {
        self.last_resync
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.afpacket.is_pending(name)
    }

    /// Names of af-packet interfaces waiting for a host interface.
    pub fn pending_names(&self) -> Vec<String> {
        self.afpacket.pending().into_iter().map(|e| e.key).collect()
    }

    /// Replaces the set of host interfaces known to exist.
    pub fn set_known_host_interfaces<I, S>(&mut self, hosts: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.afpacket.set_known_hosts(hosts);
    }

    /// Returns true if the dataplane holds any configurable interface.
    pub fn verify_dataplane_presence(&mut self) -> ConfigResult<bool> {
        let sockets = self.refresh_memif_sockets()?;
        let inventory = dump_interfaces(self.api.as_ref(), &sockets)
            .map_err(|e| ConfigError::dataplane(INTERFACE_REGISTRY, e))?;
        Ok(verify_dataplane_presence(&inventory))
    }

    fn call(&self, resource: &str, request: Request) -> ConfigResult<()> {
        self.api
            .request(request)
            .map(|_| ())
            .map_err(|e| ConfigError::dataplane(resource, e))
    }

    fn refresh_memif_sockets(&mut self) -> ConfigResult<HashMap<String, u32>> {
        let sockets = dump_memif_sockets(self.api.as_ref())
            .map_err(|e| ConfigError::dataplane("memif sockets", e))?;
        self.memif_sockets = Some(sockets.clone());
        Ok(sockets)
    }

    /// Resolves a socket filename to its id, registering it if needed.
    fn memif_socket_id(&mut self, filename: &str) -> ConfigResult<u32> {
        if self.memif_sockets.is_none() {
            self.refresh_memif_sockets()?;
        }
        let sockets = self.memif_sockets.get_or_insert_with(HashMap::new);
        if let Some(id) = sockets.get(filename) {
            return Ok(*id);
        }
        let socket_id = sockets.values().max().map_or(0, |max| max + 1);
        self.api
            .request(Request::MemifSocketFilenameAdd {
                socket_id,
                filename: filename.to_string(),
            })
            .map_err(|e| ConfigError::dataplane(filename, e))?;
        debug_log!(SOURCE, filename, socket_id, "registered memif socket");
        sockets.insert(filename.to_string(), socket_id);
        Ok(socket_id)
    }

    /// Finds a physical interface by logical or internal name.
    fn find_physical(&self, name: &str) -> ConfigResult<(u32, InterfaceConfig)> {
        if let Some((index, current)) = self.registry.lookup_idx(name) {
            if current.kind == InterfaceKind::Ethernet {
                return Ok((index, current));
            }
        }
        let sockets = HashMap::new();
        let inventory = dump_interfaces(self.api.as_ref(), &sockets)
            .map_err(|e| ConfigError::dataplane(name, e))?;
        inventory
            .into_iter()
            .find(|item| {
                item.observed.kind == InterfaceKind::Ethernet
                    && (item.observed.name == name || item.internal_name == name)
            })
            .map(|item| (item.index, item.observed))
            .ok_or_else(|| ConfigError::not_found("physical interface", name))
    }

    fn create_link(&mut self, config: &InterfaceConfig) -> ConfigResult<u32> {
        let request = match &config.link {
            InterfaceLink::None => Request::CreateLoopback { mac: None },
            InterfaceLink::Memif(memif) => {
                let socket_id = self.memif_socket_id(&memif.socket_filename)?;
                Request::CreateMemif(MemifCreate {
                    id: memif.id,
                    socket_id,
                    master: memif.master,
                    mode: memif.mode,
                    ring_size: memif.ring_size,
                    buffer_size: memif.buffer_size,
                    rx_queues: memif.rx_queues,
                    tx_queues: memif.tx_queues,
                    secret: memif.secret.clone(),
                })
            }
            InterfaceLink::Tap(tap) => Request::CreateTap(TapCreate {
                host_if_name: tap.host_if_name.clone(),
                rx_ring_size: tap.rx_ring_size,
                tx_ring_size: tap.tx_ring_size,
            }),
            InterfaceLink::Vxlan(vxlan) => Request::CreateVxlan(VxlanTunnel {
                src_address: vxlan.src_address,
                dst_address: vxlan.dst_address,
                vni: vxlan.vni,
                encap_vrf_id: config.vrf,
            }),
            InterfaceLink::AfPacket(af) => Request::CreateAfPacket(AfPacketCreate {
                host_if_name: af.host_if_name.clone(),
            }),
        };
        self.api
            .request_index(request)
            .map_err(|e| ConfigError::dataplane(config.name.clone(), e))
    }

    /// Destroys the interface at `index` described by `current`.
    fn destroy(&self, index: u32, current: &InterfaceConfig) -> ConfigResult<()> {
        let request = match (&current.kind, &current.link) {
            (InterfaceKind::Loopback, _) => Request::DeleteLoopback { index },
            (InterfaceKind::Memif, _) => Request::DeleteMemif { index },
            (InterfaceKind::Tap, _) => Request::DeleteTap { index },
            (InterfaceKind::Vxlan, InterfaceLink::Vxlan(vxlan)) => Request::DeleteVxlan(VxlanTunnel {
                src_address: vxlan.src_address,
                dst_address: vxlan.dst_address,
                vni: vxlan.vni,
                encap_vrf_id: current.vrf,
            }),
            (InterfaceKind::AfPacket, InterfaceLink::AfPacket(af)) => {
                Request::DeleteAfPacket(AfPacketCreate {
                    host_if_name: af.host_if_name.clone(),
                })
            }
            (kind, _) => {
                debug_log!(SOURCE, name = %current.name, %kind, "not destroying interface");
                return Ok(());
            }
        };
        self.call(&current.name, request)
    }

    /// Creates the interface and applies its attributes. Follow-up failures
    /// are aggregated; the interface stays registered.
    fn configure_now(&mut self, config: &InterfaceConfig) -> ConfigResult<()> {
        if config.kind == InterfaceKind::Ethernet {
            let (index, observed) = self.find_physical(&config.name)?;
            return self.modify_at(index, &observed, config);
        }

        let index = self.create_link(config)?;
        self.stats.created += 1;
        let name = config.name.as_str();
        let mut errors = ErrorList::new();

        errors.record(self.call(
            name,
            Request::SetInterfaceTag {
                index,
                tag: name.to_string(),
            },
        ));
        if let Some(mac) = config.mac {
            errors.record(self.call(name, Request::SetMac { index, mac }));
        }
        if config.kind != InterfaceKind::Vxlan && config.vrf != 0 {
            errors.record(self.call(
                name,
                Request::SetVrf {
                    index,
                    vrf_id: config.vrf,
                },
            ));
        }
        for address in &config.ip_addresses {
            errors.record(self.call(
                name,
                Request::AddIpAddress {
                    index,
                    address: *address,
                },
            ));
        }
        let mtu = config.effective_mtu(self.config.default_mtu);
        if config.kind != InterfaceKind::Vxlan && mtu != 0 {
            errors.record(self.call(name, Request::SetMtu { index, mtu }));
        }

        self.registry.register_name(name, index, config.clone());

        if config.enabled {
            errors.record(self.call(name, Request::SetAdminState { index, up: true }));
        }
        errors.into_result()
    }

    /// Applies the difference between `old` and `new` to the interface at
    /// `index`, then registers `new` there.
    fn modify_at(&mut self, index: u32, old: &InterfaceConfig, new: &InterfaceConfig) -> ConfigResult<()> {
        let name = new.name.as_str();
        let mut errors = ErrorList::new();

        if old.name != new.name {
            errors.record(self.call(
                name,
                Request::SetInterfaceTag {
                    index,
                    tag: name.to_string(),
                },
            ));
        }
        if old.enabled != new.enabled {
            errors.record(self.call(
                name,
                Request::SetAdminState {
                    index,
                    up: new.enabled,
                },
            ));
        }
        if let Some(mac) = new.mac {
            if old.mac != Some(mac) {
                errors.record(self.call(name, Request::SetMac { index, mac }));
            }
        }

        if new.kind != InterfaceKind::Vxlan && old.vrf != new.vrf {
            // Addresses are bound to the table, so they move with it.
            for address in &old.ip_addresses {
                errors.record(self.call(
                    name,
                    Request::DelIpAddress {
                        index,
                        address: *address,
                    },
                ));
            }
            errors.record(self.call(
                name,
                Request::SetVrf {
                    index,
                    vrf_id: new.vrf,
                },
            ));
            for address in &new.ip_addresses {
                errors.record(self.call(
                    name,
                    Request::AddIpAddress {
                        index,
                        address: *address,
                    },
                ));
            }
        } else {
            let old_set: BTreeSet<_> = old.ip_addresses.iter().copied().collect();
            let new_set: BTreeSet<_> = new.ip_addresses.iter().copied().collect();
            for address in old.removable_addresses().filter(|a| !new_set.contains(*a)) {
                errors.record(self.call(
                    name,
                    Request::DelIpAddress {
                        index,
                        address: *address,
                    },
                ));
            }
            for address in new.ip_addresses.iter().filter(|a| !old_set.contains(a)) {
                errors.record(self.call(
                    name,
                    Request::AddIpAddress {
                        index,
                        address: *address,
                    },
                ));
            }
        }

        let mtu = new.effective_mtu(self.config.default_mtu);
        if new.kind != InterfaceKind::Vxlan
            && mtu != 0
            && mtu != old.effective_mtu(self.config.default_mtu)
        {
            errors.record(self.call(name, Request::SetMtu { index, mtu }));
        }

        self.registry.register_name(name, index, new.clone());
        errors.into_result()
    }

    /// Unwinds a realized interface. Every step is attempted.
    fn delete_realized(&mut self, config: &InterfaceConfig) -> ConfigResult<()> {
        let physical = config.kind == InterfaceKind::Ethernet;
        let found = if physical {
            self.registry.lookup_idx(&config.name)
        } else {
            self.registry.unregister_name(&config.name)
        };
        let (index, current) =
            found.ok_or_else(|| ConfigError::not_found("interface", config.name.clone()))?;

        let name = config.name.as_str();
        let mut errors = ErrorList::new();
        errors.record(self.call(name, Request::SetAdminState { index, up: false }));
        for address in current.removable_addresses() {
            errors.record(self.call(
                name,
                Request::DelIpAddress {
                    index,
                    address: *address,
                },
            ));
        }

        if physical {
            // Physical interfaces stay registered, stripped of their config.
            let reset = InterfaceConfig {
                mtu: current.mtu,
                mac: current.mac,
                vrf: current.vrf,
                ..InterfaceConfig::new(name, InterfaceKind::Ethernet)
            };
            self.registry.register_name(name, index, reset);
        } else {
            errors.record(self.destroy(index, &current));
            self.stats.deleted += 1;
        }
        errors.into_result()
    }

    fn audit(&self, category: AuditCategory, action: &str, name: &str, result: &ConfigResult<()>) {
        let record = AuditRecord::new(category, SOURCE, action)
            .with_object_id(name)
            .with_object_type("interface")
            .with_result(result);
        audit_log!(record);
    }

    fn audit_deferred(&self, config: &InterfaceConfig) {
        let record = AuditRecord::new(AuditCategory::Dependency, SOURCE, "defer")
            .with_outcome(AuditOutcome::InProgress)
            .with_object_id(config.name.clone())
            .with_object_type("interface")
            .with_details(serde_json::json!({
                "host_interface": config.host_interface(),
            }));
        audit_log!(record);
    }

    fn resync_plan(&mut self, desired: &[InterfaceConfig]) -> ConfigResult<ResyncPlan<InterfaceConfig>> {
        let sockets = self.refresh_memif_sockets()?;
        let inventory = dump_interfaces(self.api.as_ref(), &sockets)
            .map_err(|e| ConfigError::dataplane(INTERFACE_REGISTRY, e))?;

        let persisted = match self.persisted.take() {
            Some(snapshot) => snapshot,
            None => PersistedSnapshot::from_entries(
                self.registry
                    .snapshot()
                    .into_iter()
                    .map(|e| (e.name, e.index, e.metadata)),
            ),
        };

        if self.config.skip_if_dataplane_empty && !verify_dataplane_presence(&inventory) {
            debug_log!(SOURCE, "no configurable interfaces in the dataplane, skipping correlation");
            return Ok(ResyncPlan {
                register_existing: inventory,
                to_create: desired.to_vec(),
                ..Default::default()
            });
        }

        let default_mtu = self.config.default_mtu;
        Ok(correlate(
            desired,
            &persisted,
            inventory,
            self.config.cold_start_policy,
            |observed, wanted| same_config(observed, wanted, default_mtu),
        ))
    }
}

/// Resync operations over the interface configurator.
struct InterfaceResync<'a> {
    configurator: &'a mut InterfaceConfigurator,
}

impl ResyncTarget<InterfaceConfig> for InterfaceResync<'_> {
    fn register_existing(&mut self, item: &InventoryItem<InterfaceConfig>) {
        self.configurator.registry.register_name(
            item.observed.name.clone(),
            item.index,
            item.observed.clone(),
        );
    }

    fn adopt(&mut self, matched: &Matched<InterfaceConfig>) -> ConfigResult<()> {
        let c = &mut *self.configurator;
        let name = matched.desired.name.clone();
        // The identity carries over before anything else happens.
        c.registry
            .register_name(name.clone(), matched.index, matched.observed.clone());

        let result = if needs_recreate(&matched.observed, &matched.desired) {
            debug_log!(SOURCE, name = %name, index = matched.index, "recreating on resync");
            c.stats.recreated += 1;
            let mut errors = ErrorList::new();
            errors.record(c.delete_realized(&InterfaceConfig {
                name: name.clone(),
                ..matched.observed.clone()
            }));
            errors.record(c.configure(&matched.desired));
            errors.into_result()
        } else {
            c.stats.modified += 1;
            c.modify_at(matched.index, &matched.observed, &matched.desired)
        };
        c.audit(AuditCategory::ResourceModify, "resync_adopt", &name, &result);
        result
    }

    fn create(&mut self, desired: &InterfaceConfig) -> ConfigResult<()> {
        self.configurator.configure(desired)
    }

    fn remove_obsolete(&mut self, item: &InventoryItem<InterfaceConfig>) -> ConfigResult<()> {
        let c = &mut *self.configurator;
        let mut name = item.observed.name.clone();
        if c.registry.contains(&name) {
            name = format!("{}-obsolete-{}", name, item.index);
        }
        let observed = InterfaceConfig {
            name: name.clone(),
            ..item.observed.clone()
        };
        c.registry.register_name(name.clone(), item.index, observed.clone());
        let result = c.delete_realized(&observed);
        c.audit(AuditCategory::ResourceDelete, "resync_remove_obsolete", &name, &result);
        result
    }
}

impl Configurator<InterfaceConfig> for InterfaceConfigurator {
    fn configure(&mut self, config: &InterfaceConfig) -> ConfigResult<()> {
        config.validate()?;

        if self.afpacket.must_defer(config) {
            debug_log!(
                SOURCE,
                name = %config.name,
                host = config.host_interface().unwrap_or_default(),
                "host interface missing, deferring"
            );
            self.afpacket.defer(config.clone());
            self.stats.deferred += 1;
            self.audit_deferred(config);
            return Ok(());
        }

        let result = self.configure_now(config);
        self.audit(AuditCategory::ResourceCreate, "configure", &config.name, &result);
        result
    }

    fn modify(&mut self, old: &InterfaceConfig, new: &InterfaceConfig) -> ConfigResult<()> {
        new.validate()?;

        if self.afpacket.remove_pending(&old.name).is_some() {
            return self.configure(new);
        }
        let Some((index, _)) = self.registry.lookup_idx(&old.name) else {
            debug_log!(SOURCE, name = %old.name, "not registered, configuring instead");
            return self.configure(new);
        };

        if old.name != new.name || needs_recreate(old, new) {
            self.stats.recreated += 1;
            let mut errors = ErrorList::new();
            errors.record(self.delete(old));
            errors.record(self.configure(new));
            return errors.into_result();
        }

        let result = self.modify_at(index, old, new);
        self.stats.modified += 1;
        self.audit(AuditCategory::ResourceModify, "modify", &new.name, &result);
        result
    }

    fn delete(&mut self, config: &InterfaceConfig) -> ConfigResult<()> {
        if self.afpacket.remove_pending(&config.name).is_some() {
            debug_log!(SOURCE, name = %config.name, "dropped pending interface");
            return Ok(());
        }
        let result = self.delete_realized(config);
        self.audit(AuditCategory::ResourceDelete, "delete", &config.name, &result);
        result
    }

    fn resync(&mut self, desired: &[InterfaceConfig]) -> ConfigResult<()> {
        let mut errors = ErrorList::new();
        let valid: Vec<InterfaceConfig> = desired
            .iter()
            .filter(|config| errors.record(config.validate()).is_some())
            .cloned()
            .collect();

        self.resync_count += 1;
        let plan = match self.resync_plan(&valid) {
            Ok(plan) => plan,
            Err(e) => {
                // Nothing was touched; pending interfaces keep waiting.
                warn_log!(SOURCE, error = %e, "interface resync aborted");
                errors.push(e);
                return errors.into_result();
            }
        };
        // Desired af-packets defer again while the plan executes.
        self.afpacket.clear_pending();
        let start_version = self.registry.version();
        info_log!(
            SOURCE,
            existing = plan.register_existing.len(),
            modify = plan.to_modify.len(),
            create = plan.to_create.len(),
            delete = plan.to_delete.len(),
            cold_start = plan.cold_start,
            "interface resync plan"
        );

        let (summary, failures) = execute(plan, &mut InterfaceResync { configurator: self });
        errors.extend(failures);

        // Entries nothing in this pass confirmed belong to interfaces that
        // are gone.
        for entry in self.registry.snapshot() {
            if entry.version <= start_version {
                debug_log!(SOURCE, name = %entry.name, index = entry.index, "dropping stale registration");
                self.registry.unregister_name(&entry.name);
            }
        }

        self.last_resync = Some(summary);
        let result = errors.into_result();
        let record = AuditRecord::new(AuditCategory::Resync, SOURCE, "resync")
            .with_object_type("interface")
            .with_correlation_id(format!("interface-resync-{}", self.resync_count))
            .with_details(serde_json::to_value(summary).unwrap_or_default())
            .with_result(&result);
        audit_log!(record);
        result
    }

    fn resource_state(&self, key: &str) -> ResourceState {
        if self.afpacket.is_pending(key) {
            ResourceState::Pending(BlockingReason::MissingPrerequisite)
        } else if self.registry.contains(key) {
            ResourceState::Configured
        } else {
            ResourceState::Unconfigured
        }
    }
}

impl PrerequisiteListener for InterfaceConfigurator {
    fn listener_name(&self) -> &str {
        SOURCE
    }

    fn interested_in(&self, kind: PrerequisiteKind) -> bool {
        kind == PrerequisiteKind::LinuxInterface
    }

    fn resolve_created(&mut self, _kind: PrerequisiteKind, host: &str, _handle: u32) -> ConfigResult<()> {
        let released = self.afpacket.host_created(host);
        let mut errors = ErrorList::new();
        for config in released {
            if self.registry.contains(&config.name) {
                warn_log!(SOURCE, name = %config.name, host, "pending interface already realized, recreating");
                errors.record(self.delete_realized(&config));
            }
            info_log!(SOURCE, name = %config.name, host, "host interface appeared");
            errors.record(self.configure(&config));
        }
        errors.into_result()
    }

    fn resolve_deleted(&mut self, _kind: PrerequisiteKind, host: &str) -> ConfigResult<()> {
        self.afpacket.host_deleted(host);
        if !self.afpacket.tracks_hosts() {
            return Ok(());
        }
        let mut errors = ErrorList::new();
        let bound: Vec<InterfaceConfig> = self
            .registry
            .snapshot()
            .into_iter()
            .map(|entry| entry.metadata)
            .filter(|config| config.host_interface() == Some(host))
            .collect();
        for config in bound {
            info_log!(SOURCE, name = %config.name, host, "host interface removed, deferring");
            errors.record(self.delete_realized(&config));
            self.afpacket.defer(config.clone());
            self.stats.deferred += 1;
            self.audit_deferred(&config);
        }
        errors.into_result()
    }
}

/// Reads one interface back from the dataplane as an observed config,
/// without touching the registry.
pub(crate) fn observe_interface(api: &dyn DataplaneApi, index: u32) -> ConfigResult<Option<InterfaceConfig>> {
    let sockets = dump_memif_sockets(api).map_err(|e| ConfigError::dataplane("memif sockets", e))?;
    let by_id: HashMap<u32, &str> = sockets
        .iter()
        .map(|(filename, id)| (*id, filename.as_str()))
        .collect();
    let details = vswitch_dpapi::drain_dump(api, vswitch_dpapi::DumpRequest::Interfaces)
        .map_err(|e| ConfigError::dataplane(INTERFACE_REGISTRY, e))?;
    Ok(details.into_iter().find_map(|detail| match detail {
        vswitch_dpapi::Detail::Interface(d) if d.index == index => Some(observed_config(&d, &by_id)),
        _ => None,
    }))
}
