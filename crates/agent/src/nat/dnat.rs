//! DNAT: labelled groups of static, load-balanced and identity mappings.
//!
//! Each realized mapping is registered under its id in one of two registries
//! (static or identity) and carries a dataplane tag `<label>-static-<n>`,
//! `<label>-staticLb-<n>` or `<label>-identity-<n>` so a dump can be grouped
//! back into labels. Mappings bound to an interface that is not registered
//! wait in a deferred index until it appears.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use vswitch_dpapi::api::nat::{Nat44IdentityMapping, Nat44LbStaticMapping, Nat44StaticMapping};
use vswitch_dpapi::{drain_dump, Detail, DumpRequest, Request};
use vswitch_orch_common::{
    match_by_key, BlockingReason, ConfigError, ConfigResult, Configurator, DeferredIndex,
    ErrorList, NameToIdx, ResourceState,
};

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::{audit_log, debug_log, info_log, warn_log};

use super::configurator::NatConfigurator;
use super::types::{DNatConfig, IdentityMapping, LocalAddress, StaticMapping};

const SOURCE: &str = "NatConfigurator";

pub const DNAT_REGISTRY: &str = "dnat-indices";
pub const STATIC_MAPPING_REGISTRY: &str = "dnat-st-mapping-indices";
pub const IDENTITY_MAPPING_REGISTRY: &str = "dnat-id-mapping-indices";

const STATIC_TAG: &str = "-static-";
const BALANCED_TAG: &str = "-staticLb-";
const IDENTITY_TAG: &str = "-identity-";

/// One mapping of a DNAT, as configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingConfig {
    Static(StaticMapping),
    Identity(IdentityMapping),
}

impl MappingConfig {
    pub fn id(&self) -> String {
        match self {
            MappingConfig::Static(m) => m.id(),
            MappingConfig::Identity(m) => m.id(),
        }
    }

    /// The interface the mapping takes its address from, if any.
    pub fn interface(&self) -> Option<&str> {
        match self {
            MappingConfig::Static(m) => m.external_interface.as_deref(),
            MappingConfig::Identity(m) => m.addressed_interface.as_deref(),
        }
    }

    fn tag_marker(&self) -> &'static str {
        match self {
            MappingConfig::Static(m) if m.is_load_balanced() => BALANCED_TAG,
            MappingConfig::Static(_) => STATIC_TAG,
            MappingConfig::Identity(_) => IDENTITY_TAG,
        }
    }
}

fn mappings_of(dnat: &DNatConfig) -> Vec<MappingConfig> {
    dnat.st_mappings
        .iter()
        .cloned()
        .map(MappingConfig::Static)
        .chain(dnat.id_mappings.iter().cloned().map(MappingConfig::Identity))
        .collect()
}

/// A mapping as the dataplane holds it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RealizedMapping {
    Static(Nat44StaticMapping),
    Balanced(Nat44LbStaticMapping),
    Identity(Nat44IdentityMapping),
}

impl RealizedMapping {
    pub fn tag(&self) -> &str {
        match self {
            RealizedMapping::Static(m) => &m.tag,
            RealizedMapping::Balanced(m) => &m.tag,
            RealizedMapping::Identity(m) => &m.tag,
        }
    }

    /// Label encoded in the tag.
    pub fn label(&self) -> Option<&str> {
        let tag = self.tag();
        [BALANCED_TAG, STATIC_TAG, IDENTITY_TAG]
            .iter()
            .filter_map(|marker| tag.rfind(marker))
            .max()
            .map(|pos| &tag[..pos])
            .filter(|label| !label.is_empty())
    }

    /// The mapping with its tag cleared. Two mappings with equal untagged
    /// forms are the same dataplane entry.
    fn untagged(&self) -> RealizedMapping {
        let mut mapping = self.clone();
        match &mut mapping {
            RealizedMapping::Static(m) => m.tag.clear(),
            RealizedMapping::Balanced(m) => m.tag.clear(),
            RealizedMapping::Identity(m) => m.tag.clear(),
        }
        mapping
    }

    fn interface_index(&self) -> Option<u32> {
        match self {
            RealizedMapping::Static(m) => m.external_index,
            RealizedMapping::Balanced(_) => None,
            RealizedMapping::Identity(m) => m.index,
        }
    }

    fn request(&self, is_add: bool) -> Request {
        match self.clone() {
            RealizedMapping::Static(mapping) => Request::Nat44StaticMapping { mapping, is_add },
            RealizedMapping::Balanced(mapping) => Request::Nat44LbStaticMapping { mapping, is_add },
            RealizedMapping::Identity(mapping) => Request::Nat44IdentityMapping { mapping, is_add },
        }
    }
}

/// Registry metadata of a realized mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    pub label: String,
    pub config: MappingConfig,
    pub realized: RealizedMapping,
}

/// A mapping waiting for its interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMapping {
    pub label: String,
    pub config: MappingConfig,
}

/// DNAT bookkeeping held by the NAT configurator.
pub(super) struct DNatState {
    labels: NameToIdx<DNatConfig>,
    st_mappings: NameToIdx<MappingEntry>,
    id_mappings: NameToIdx<MappingEntry>,
    pending: DeferredIndex<PendingMapping>,
    next_index: u32,
    next_tag: u32,
}

impl DNatState {
    pub(super) fn new() -> Self {
        Self {
            labels: NameToIdx::new(DNAT_REGISTRY),
            st_mappings: NameToIdx::new(STATIC_MAPPING_REGISTRY),
            id_mappings: NameToIdx::new(IDENTITY_MAPPING_REGISTRY),
            pending: DeferredIndex::new(),
            next_index: 1,
            next_tag: 1,
        }
    }

    fn registry(&self, config: &MappingConfig) -> &NameToIdx<MappingEntry> {
        match config {
            MappingConfig::Static(_) => &self.st_mappings,
            MappingConfig::Identity(_) => &self.id_mappings,
        }
    }

    fn tag(&mut self, label: &str, config: &MappingConfig) -> String {
        let tag = format!("{}{}{}", label, config.tag_marker(), self.next_tag);
        self.next_tag += 1;
        tag
    }

    fn register_label(&mut self, dnat: &DNatConfig) {
        let index = match self.labels.lookup_index(&dnat.label) {
            Some(index) => index,
            None => {
                self.next_index += 1;
                self.next_index - 1
            }
        };
        self.labels.register_name(dnat.label.clone(), index, dnat.clone());
    }

    fn register_mapping(&mut self, label: &str, config: MappingConfig, realized: RealizedMapping) {
        let index = self.next_index;
        self.next_index += 1;
        let id = config.id();
        let entry = MappingEntry {
            label: label.to_string(),
            config,
            realized,
        };
        self.registry(&entry.config).register_name(id, index, entry);
    }

    fn entries(&self) -> Vec<MappingEntry> {
        self.st_mappings
            .snapshot()
            .into_iter()
            .chain(self.id_mappings.snapshot())
            .map(|e| e.metadata)
            .collect()
    }

    fn clear(&mut self) {
        self.labels.clear();
        self.st_mappings.clear();
        self.id_mappings.clear();
        self.pending.clear();
    }

    pub(super) fn pending_keys(&self) -> Vec<String> {
        self.pending.keys()
    }
}

impl NatConfigurator {
    /// Labels of the configured DNATs, sorted.
    pub fn dnat_labels(&self) -> Vec<String> {
        let mut labels = self.dnat.labels.names();
        labels.sort();
        labels
    }

    /// Ids of the mappings waiting for an interface.
    pub fn pending_mappings(&self) -> Vec<String> {
        self.dnat.pending_keys()
    }

    pub fn static_mapping_registry(&self) -> &NameToIdx<MappingEntry> {
        &self.dnat.st_mappings
    }

    pub fn identity_mapping_registry(&self) -> &NameToIdx<MappingEntry> {
        &self.dnat.id_mappings
    }

    /// State of one mapping by id.
    pub fn mapping_state(&self, id: &str) -> ResourceState {
        if let Some(entry) = self.dnat.pending.get(id) {
            ResourceState::Pending(entry.reason.clone())
        } else if self.dnat.st_mappings.contains(id) || self.dnat.id_mappings.contains(id) {
            ResourceState::Configured
        } else {
            ResourceState::Unconfigured
        }
    }

    /// Builds the dataplane form of `config`. None while its interface is
    /// not registered.
    fn realize(&self, config: &MappingConfig, tag: String) -> Option<RealizedMapping> {
        let index = match config.interface() {
            Some(name) => Some(self.interfaces.lookup_index(name)?),
            None => None,
        };
        let realized = match config {
            MappingConfig::Static(m) if m.is_load_balanced() => {
                RealizedMapping::Balanced(Nat44LbStaticMapping {
                    tag,
                    external_ip: m.external_ip.unwrap_or(Ipv4Addr::UNSPECIFIED),
                    external_port: m.external_port,
                    protocol: m.protocol,
                    locals: m.backends(),
                    vrf_id: m.vrf_id,
                    twice_nat: m.twice_nat,
                })
            }
            MappingConfig::Static(m) => {
                let local = m.local_ips.first()?;
                RealizedMapping::Static(Nat44StaticMapping {
                    tag,
                    local_ip: local.local_ip,
                    local_port: local.local_port,
                    external_ip: match index {
                        Some(_) => Ipv4Addr::UNSPECIFIED,
                        None => m.external_ip.unwrap_or(Ipv4Addr::UNSPECIFIED),
                    },
                    external_port: m.external_port,
                    external_index: index,
                    protocol: m.protocol,
                    vrf_id: m.vrf_id,
                    twice_nat: m.twice_nat,
                    address_only: local.local_port == 0 || m.external_port == 0,
                })
            }
            MappingConfig::Identity(m) => RealizedMapping::Identity(Nat44IdentityMapping {
                tag,
                ip: match index {
                    Some(_) => None,
                    None => m.ip_address,
                },
                index,
                port: m.port,
                protocol: m.protocol,
                vrf_id: m.vrf_id,
            }),
        };
        Some(realized)
    }

    fn defer_mapping(&mut self, label: &str, config: &MappingConfig, reason: BlockingReason) {
        let id = config.id();
        let interface = config.interface().unwrap_or_default().to_string();
        debug_log!(SOURCE, mapping = %id, interface = %interface, reason = %reason, "deferring dnat mapping");
        self.dnat.pending.defer(
            id.clone(),
            interface,
            PendingMapping {
                label: label.to_string(),
                config: config.clone(),
            },
            reason,
        );
        let record = AuditRecord::new(AuditCategory::Dependency, SOURCE, "defer")
            .with_outcome(AuditOutcome::InProgress)
            .with_object_id(id)
            .with_object_type("dnat_mapping");
        audit_log!(record);
    }

    fn install(&mut self, label: &str, config: MappingConfig, realized: RealizedMapping) -> ConfigResult<()> {
        self.call(&config.id(), realized.request(true))?;
        self.dnat.register_mapping(label, config, realized);
        Ok(())
    }

    fn add_mapping(&mut self, label: &str, config: &MappingConfig) -> ConfigResult<()> {
        let tag = self.dnat.tag(label, config);
        match self.realize(config, tag) {
            Some(realized) => self.install(label, config.clone(), realized),
            None => {
                self.defer_mapping(label, config, BlockingReason::MissingPrerequisite);
                Ok(())
            }
        }
    }

    fn remove_realized(&self, id: &str, realized: &RealizedMapping) -> ConfigResult<()> {
        match self.api.request(realized.request(false)) {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug_log!(SOURCE, mapping = id, "dnat mapping already gone");
                Ok(())
            }
            Err(e) => Err(ConfigError::dataplane(id, e)),
        }
    }

    fn remove_mapping(&mut self, config: &MappingConfig) -> ConfigResult<()> {
        let id = config.id();
        if self.dnat.pending.remove(&id).is_some() {
            return Ok(());
        }
        match self.dnat.registry(config).unregister_name(&id) {
            Some((_, entry)) => self.remove_realized(&id, &entry.realized),
            None => {
                debug_log!(SOURCE, mapping = %id, "dnat mapping not registered");
                Ok(())
            }
        }
    }

    /// Re-adds mappings bound to `name` whose index went stale and releases
    /// the ones waiting for it.
    pub(super) fn reconcile_dnat_interface(&mut self, name: &str) -> ConfigResult<()> {
        let current = self.interfaces.lookup_index(name);
        let mut errors = ErrorList::new();

        let stale: Vec<MappingEntry> = self
            .dnat
            .entries()
            .into_iter()
            .filter(|e| e.config.interface() == Some(name) && e.realized.interface_index() != current)
            .collect();
        for entry in stale {
            info_log!(SOURCE, interface = name, mapping = %entry.config.id(), "interface changed under dnat mapping");
            errors.record(self.remove_mapping(&entry.config));
            errors.record(self.add_mapping(&entry.label, &entry.config));
        }

        if current.is_some() {
            for pending in self.dnat.pending.take_blocked_on(name) {
                let result = self.add_mapping(&pending.config.label, &pending.config.config);
                if let Err(e) = &result {
                    warn_log!(SOURCE, mapping = %pending.key, error = %e, "released dnat mapping failed, deferring again");
                    self.defer_mapping(
                        &pending.config.label,
                        &pending.config.config,
                        BlockingReason::ApplyError(e.to_string()),
                    );
                }
                errors.record(result);
            }
        }
        errors.into_result()
    }

    fn dump_realized(&self) -> ConfigResult<Vec<RealizedMapping>> {
        let dump = |request: DumpRequest| {
            drain_dump(self.api.as_ref(), request).map_err(|e| ConfigError::dataplane("nat44 dnat", e))
        };
        let mut mappings = Vec::new();
        for detail in dump(DumpRequest::Nat44StaticMappings)?
            .into_iter()
            .chain(dump(DumpRequest::Nat44LbStaticMappings)?)
            .chain(dump(DumpRequest::Nat44IdentityMappings)?)
        {
            match detail {
                Detail::Nat44StaticMapping(m) => mappings.push(RealizedMapping::Static(m)),
                Detail::Nat44LbStaticMapping(m) => mappings.push(RealizedMapping::Balanced(m)),
                Detail::Nat44IdentityMapping(m) => mappings.push(RealizedMapping::Identity(m)),
                _ => {}
            }
        }
        Ok(mappings)
    }

    fn observed_config(&self, realized: &RealizedMapping) -> MappingConfig {
        match realized {
            RealizedMapping::Static(m) => MappingConfig::Static(StaticMapping {
                external_interface: m.external_index.map(|i| self.interface_name(i)),
                external_ip: m.external_index.is_none().then_some(m.external_ip),
                external_port: m.external_port,
                local_ips: vec![LocalAddress::new(m.local_ip, m.local_port)],
                protocol: m.protocol,
                vrf_id: m.vrf_id,
                twice_nat: m.twice_nat,
            }),
            RealizedMapping::Balanced(m) => MappingConfig::Static(StaticMapping {
                external_interface: None,
                external_ip: Some(m.external_ip),
                external_port: m.external_port,
                local_ips: m
                    .locals
                    .iter()
                    .map(|l| LocalAddress {
                        local_ip: l.ip,
                        local_port: l.port,
                        probability: l.probability,
                    })
                    .collect(),
                protocol: m.protocol,
                vrf_id: m.vrf_id,
                twice_nat: m.twice_nat,
            }),
            RealizedMapping::Identity(m) => MappingConfig::Identity(IdentityMapping {
                addressed_interface: m.index.map(|i| self.interface_name(i)),
                ip_address: m.ip,
                port: m.port,
                protocol: m.protocol,
                vrf_id: m.vrf_id,
            }),
        }
    }

    /// Reads the DNAT mappings back from the dataplane, grouped by the label
    /// in their tag. Untagged mappings are grouped under `unlabelled`.
    pub fn dump_dnat(&self) -> ConfigResult<Vec<DNatConfig>> {
        let mut by_label: BTreeMap<String, DNatConfig> = BTreeMap::new();
        for realized in self.dump_realized()? {
            let label = realized.label().unwrap_or("unlabelled").to_string();
            let dnat = by_label
                .entry(label.clone())
                .or_insert_with(|| DNatConfig::new(label));
            match self.observed_config(&realized) {
                MappingConfig::Static(m) => dnat.st_mappings.push(m),
                MappingConfig::Identity(m) => dnat.id_mappings.push(m),
            }
        }
        Ok(by_label.into_values().collect())
    }

    fn add_all(&mut self, dnat: &DNatConfig) -> ConfigResult<()> {
        dnat.validate()?;
        let mut errors = ErrorList::new();
        for mapping in mappings_of(dnat) {
            errors.record(self.add_mapping(&dnat.label, &mapping));
        }
        self.dnat.register_label(dnat);
        errors.into_result()
    }

    fn remove_all(&mut self, dnat: &DNatConfig) -> ConfigResult<()> {
        let mut errors = ErrorList::new();
        for mapping in mappings_of(dnat) {
            errors.record(self.remove_mapping(&mapping));
        }
        self.dnat.labels.unregister_name(&dnat.label);
        errors.into_result()
    }

    fn audit_dnat(&self, category: AuditCategory, action: &str, label: &str, result: &ConfigResult<()>) {
        let record = AuditRecord::new(category, SOURCE, action)
            .with_object_id(label)
            .with_object_type("nat44_dnat")
            .with_result(result);
        audit_log!(record);
    }
}

impl Configurator<DNatConfig> for NatConfigurator {
    fn configure(&mut self, config: &DNatConfig) -> ConfigResult<()> {
        let result = self.add_all(config);
        self.audit_dnat(AuditCategory::ResourceCreate, "configure", &config.label, &result);
        result
    }

    /// A new label replaces the DNAT; otherwise only the mappings that
    /// changed are removed and added.
    fn modify(&mut self, old: &DNatConfig, new: &DNatConfig) -> ConfigResult<()> {
        let result = if old.label != new.label {
            new.validate().and_then(|()| {
                let mut errors = ErrorList::new();
                errors.record(self.remove_all(old));
                errors.record(self.add_all(new));
                errors.into_result()
            })
        } else {
            new.validate().and_then(|()| {
                let before = mappings_of(old);
                let after = mappings_of(new);
                let mut errors = ErrorList::new();
                for mapping in before.iter().filter(|m| !after.contains(m)) {
                    errors.record(self.remove_mapping(mapping));
                }
                for mapping in after.iter().filter(|m| !before.contains(m)) {
                    errors.record(self.add_mapping(&new.label, mapping));
                }
                self.dnat.register_label(new);
                errors.into_result()
            })
        };
        self.audit_dnat(AuditCategory::ResourceModify, "modify", &new.label, &result);
        result
    }

    fn delete(&mut self, config: &DNatConfig) -> ConfigResult<()> {
        let result = self.remove_all(config);
        self.audit_dnat(AuditCategory::ResourceDelete, "delete", &config.label, &result);
        result
    }

    /// Matches the desired mappings against the dump by their untagged
    /// dataplane form. Matches keep the dumped tag, obsolete mappings are
    /// removed before missing ones are added.
    fn resync(&mut self, desired: &[DNatConfig]) -> ConfigResult<()> {
        let dumped = self.dump_realized()?;
        self.dnat.clear();

        let mut errors = ErrorList::new();
        let mut resolved = Vec::new();
        for dnat in desired {
            if errors.record(dnat.validate()).is_none() {
                continue;
            }
            for mapping in mappings_of(dnat) {
                let tag = self.dnat.tag(&dnat.label, &mapping);
                match self.realize(&mapping, tag) {
                    Some(realized) => resolved.push((dnat.label.clone(), mapping, realized)),
                    None => self.defer_mapping(&dnat.label, &mapping, BlockingReason::MissingPrerequisite),
                }
            }
            self.dnat.register_label(dnat);
        }

        let diff = match_by_key(
            resolved,
            dumped,
            |(_, _, realized)| realized.untagged(),
            RealizedMapping::untagged,
        );
        let (kept, obsolete, missing) = (diff.matched.len(), diff.obsolete.len(), diff.missing.len());
        for ((label, mapping, _), realized) in diff.matched {
            self.dnat.register_mapping(&label, mapping, realized);
        }
        for realized in diff.obsolete {
            let id = realized.tag().to_string();
            errors.record(self.remove_realized(&id, &realized));
        }
        for (label, mapping, realized) in diff.missing {
            errors.record(self.install(&label, mapping, realized));
        }

        let result = errors.into_result();
        let record = AuditRecord::new(AuditCategory::Resync, SOURCE, "resync")
            .with_object_type("nat44_dnat")
            .with_details(serde_json::json!({
                "kept": kept,
                "removed": obsolete,
                "added": missing,
                "pending": self.dnat.pending.len(),
            }))
            .with_result(&result);
        audit_log!(record);
        result
    }

    /// Pending while any of the label's mappings waits for an interface.
    fn resource_state(&self, label: &str) -> ResourceState {
        if !self.dnat.labels.contains(label) {
            return ResourceState::Unconfigured;
        }
        self.dnat
            .pending
            .dump()
            .into_iter()
            .find(|e| e.config.label == label)
            .map(|e| ResourceState::Pending(e.reason))
            .unwrap_or(ResourceState::Configured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intf::{InterfaceConfig, InterfaceConfigurator, InterfaceConfiguratorConfig, InterfaceKind};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use vswitch_dpapi::api::nat::{NatProtocol, TwiceNat};
    use vswitch_dpapi::{ApiStatus, DataplaneApi, SimDataplane};
    use vswitch_orch_common::{PrerequisiteKind, PrerequisiteListener};

    fn setup() -> (Arc<SimDataplane>, InterfaceConfigurator, NatConfigurator) {
        let sim = Arc::new(SimDataplane::new());
        let interfaces = InterfaceConfigurator::new(sim.clone(), InterfaceConfiguratorConfig::default());
        let nat = NatConfigurator::new(sim.clone(), interfaces.registry());
        (sim, interfaces, nat)
    }

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn web() -> StaticMapping {
        StaticMapping {
            external_ip: Some(ip("80.80.80.80")),
            external_port: 8080,
            local_ips: vec![LocalAddress::new(ip("10.0.0.1"), 80)],
            ..Default::default()
        }
    }

    fn balanced() -> StaticMapping {
        StaticMapping {
            external_ip: Some(ip("80.80.80.81")),
            external_port: 443,
            local_ips: vec![
                LocalAddress {
                    probability: 40,
                    ..LocalAddress::new(ip("10.0.0.2"), 8443)
                },
                LocalAddress {
                    probability: 60,
                    ..LocalAddress::new(ip("10.0.0.3"), 8443)
                },
            ],
            protocol: NatProtocol::Tcp,
            twice_nat: TwiceNat::Enabled,
            ..Default::default()
        }
    }

    fn on_interface(name: &str) -> IdentityMapping {
        IdentityMapping {
            addressed_interface: Some(name.to_string()),
            port: 22,
            ..Default::default()
        }
    }

    fn dnat() -> DNatConfig {
        DNatConfig::new("dnat1")
            .with_static(web())
            .with_static(balanced())
            .with_identity(IdentityMapping {
                ip_address: Some(ip("10.0.0.9")),
                protocol: NatProtocol::Udp,
                ..Default::default()
            })
    }

    #[test]
    fn test_configure_installs_every_kind() {
        let (sim, _interfaces, mut nat) = setup();
        nat.configure(&dnat()).unwrap();

        let statics = sim.nat_static_mappings();
        assert_eq!(statics.len(), 1);
        assert_eq!(statics[0].tag, "dnat1-static-1");
        assert_eq!(statics[0].external_ip, ip("80.80.80.80"));
        assert!(!statics[0].address_only);

        let balanced = sim.nat_lb_static_mappings();
        assert_eq!(balanced.len(), 1);
        assert_eq!(balanced[0].tag, "dnat1-staticLb-2");
        assert_eq!(balanced[0].locals.len(), 2);
        assert_eq!(balanced[0].locals[1].probability, 60);

        let identities = sim.nat_identity_mappings();
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].ip, Some(ip("10.0.0.9")));

        assert_eq!(nat.dnat_labels(), vec!["dnat1"]);
        assert_eq!(nat.static_mapping_registry().len(), 2);
        assert_eq!(nat.identity_mapping_registry().len(), 1);
        assert_eq!(
            Configurator::<DNatConfig>::resource_state(&nat, "dnat1"),
            ResourceState::Configured
        );
    }

    #[test]
    fn test_invalid_dnat_touches_nothing() {
        let (sim, _interfaces, mut nat) = setup();
        let mut bad = dnat();
        bad.st_mappings[1].external_port = 0;

        let err = nat.configure(&bad).unwrap_err();
        assert!(err.to_string().contains("external port"));
        assert!(sim.requests().is_empty());
        assert!(nat.dnat_labels().is_empty());
    }

    #[test]
    fn test_mapping_waits_for_interface() {
        let (sim, mut interfaces, mut nat) = setup();
        let config = DNatConfig::new("ssh").with_identity(on_interface("loop1"));
        let id = config.id_mappings[0].id();

        nat.configure(&config).unwrap();
        assert!(sim.nat_identity_mappings().is_empty());
        assert_eq!(nat.pending_mappings(), vec![id.clone()]);
        assert!(Configurator::<DNatConfig>::resource_state(&nat, "ssh").is_pending());

        interfaces
            .configure(&InterfaceConfig::new("loop1", InterfaceKind::Loopback))
            .unwrap();
        let index = interfaces.registry().lookup_index("loop1").unwrap();
        nat.resolve_created(PrerequisiteKind::Interface, "loop1", index)
            .unwrap();

        let identities = sim.nat_identity_mappings();
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].index, Some(index));
        assert_eq!(identities[0].ip, None);
        assert_eq!(nat.mapping_state(&id), ResourceState::Configured);
        assert!(nat.pending_mappings().is_empty());
    }

    #[test]
    fn test_mapping_follows_recreated_interface() {
        let (sim, mut interfaces, mut nat) = setup();
        let loop1 = InterfaceConfig::new("loop1", InterfaceKind::Loopback);
        interfaces.configure(&loop1).unwrap();
        let config = DNatConfig::new("ssh").with_identity(on_interface("loop1"));
        nat.configure(&config).unwrap();
        let id = config.id_mappings[0].id();

        interfaces.delete(&loop1).unwrap();
        nat.resolve_deleted(PrerequisiteKind::Interface, "loop1")
            .unwrap();
        assert!(nat.mapping_state(&id).is_pending());
        assert!(sim.nat_identity_mappings().is_empty());

        interfaces.configure(&loop1).unwrap();
        let index = interfaces.registry().lookup_index("loop1").unwrap();
        nat.resolve_created(PrerequisiteKind::Interface, "loop1", index)
            .unwrap();
        assert_eq!(sim.nat_identity_mappings()[0].index, Some(index));
        assert_eq!(nat.mapping_state(&id), ResourceState::Configured);
    }

    #[test]
    fn test_released_mapping_failure_stays_pending() {
        let (sim, mut interfaces, mut nat) = setup();
        let config = DNatConfig::new("ssh").with_identity(on_interface("loop1"));
        let id = config.id_mappings[0].id();
        nat.configure(&config).unwrap();

        sim.inject_failure("nat44_add_del_identity_mapping", ApiStatus::Unspecified);
        interfaces
            .configure(&InterfaceConfig::new("loop1", InterfaceKind::Loopback))
            .unwrap();
        assert!(nat
            .resolve_created(PrerequisiteKind::Interface, "loop1", 0)
            .is_err());
        match nat.mapping_state(&id) {
            ResourceState::Pending(BlockingReason::ApplyError(e)) => {
                assert!(e.contains("nat44_add_del_identity_mapping"), "{}", e)
            }
            other => panic!("unexpected state {:?}", other),
        }

        sim.clear_failures();
        nat.resolve_created(PrerequisiteKind::Interface, "loop1", 0)
            .unwrap();
        assert_eq!(nat.mapping_state(&id), ResourceState::Configured);
    }

    #[test]
    fn test_modify_diffs_mappings() {
        let (sim, _interfaces, mut nat) = setup();
        let old = dnat();
        nat.configure(&old).unwrap();
        sim.clear_requests();

        let mut new = old.clone();
        new.st_mappings[0].external_port = 8081;
        nat.modify(&old, &new).unwrap();

        // Only the changed static mapping is swapped.
        assert_eq!(sim.count("nat44_add_del_static_mapping"), 2);
        assert_eq!(sim.count("nat44_add_del_lb_static_mapping"), 0);
        assert_eq!(sim.count("nat44_add_del_identity_mapping"), 0);
        assert_eq!(sim.nat_static_mappings()[0].external_port, 8081);
        assert_eq!(nat.mapping_state(&old.st_mappings[0].id()), ResourceState::Unconfigured);
        assert_eq!(nat.mapping_state(&new.st_mappings[0].id()), ResourceState::Configured);
    }

    #[test]
    fn test_relabel_recreates() {
        let (sim, _interfaces, mut nat) = setup();
        let old = DNatConfig::new("a").with_static(web());
        nat.configure(&old).unwrap();

        let new = DNatConfig::new("b").with_static(web());
        nat.modify(&old, &new).unwrap();
        assert_eq!(nat.dnat_labels(), vec!["b"]);
        let statics = sim.nat_static_mappings();
        assert_eq!(statics.len(), 1);
        assert!(statics[0].tag.starts_with("b-static-"));
    }

    #[test]
    fn test_delete_removes_mappings() {
        let (sim, _interfaces, mut nat) = setup();
        nat.configure(&dnat()).unwrap();
        nat.delete(&dnat()).unwrap();

        assert!(sim.nat_static_mappings().is_empty());
        assert!(sim.nat_lb_static_mappings().is_empty());
        assert!(sim.nat_identity_mappings().is_empty());
        assert!(nat.dnat_labels().is_empty());
        assert_eq!(
            Configurator::<DNatConfig>::resource_state(&nat, "dnat1"),
            ResourceState::Unconfigured
        );
    }

    #[test]
    fn test_resync_matches_by_value() {
        let (sim, _interfaces, mut nat) = setup();
        // Present with a foreign tag, must be kept.
        let kept = Nat44StaticMapping {
            tag: "old-static-7".to_string(),
            local_ip: ip("10.0.0.1"),
            local_port: 80,
            external_ip: ip("80.80.80.80"),
            external_port: 8080,
            external_index: None,
            protocol: NatProtocol::Tcp,
            vrf_id: 0,
            twice_nat: TwiceNat::Disabled,
            address_only: false,
        };
        let stale = Nat44StaticMapping {
            tag: "old-static-8".to_string(),
            external_port: 9090,
            ..kept.clone()
        };
        for mapping in [kept.clone(), stale] {
            sim.request(Request::Nat44StaticMapping { mapping, is_add: true })
                .unwrap();
        }
        sim.clear_requests();

        Configurator::<DNatConfig>::resync(&mut nat, &[dnat()]).unwrap();

        // Stale static removed, balanced and identity added.
        assert_eq!(sim.count("nat44_add_del_static_mapping"), 1);
        assert_eq!(sim.count("nat44_add_del_lb_static_mapping"), 1);
        assert_eq!(sim.count("nat44_add_del_identity_mapping"), 1);
        assert_eq!(sim.nat_static_mappings(), vec![kept]);

        let (_, entry) = nat
            .static_mapping_registry()
            .lookup_idx(&web().id())
            .unwrap();
        assert_eq!(entry.realized.tag(), "old-static-7");
        assert_eq!(entry.label, "dnat1");

        sim.clear_requests();
        Configurator::<DNatConfig>::resync(&mut nat, &[dnat()]).unwrap();
        assert!(sim.requests().is_empty());
    }

    #[test]
    fn test_dump_groups_by_label() {
        let (_sim, _interfaces, mut nat) = setup();
        nat.configure(&dnat()).unwrap();
        nat.configure(&DNatConfig::new("other-static-x").with_static(StaticMapping {
            external_port: 0,
            ..web()
        }))
        .unwrap();

        let dumped = nat.dump_dnat().unwrap();
        let labels: Vec<&str> = dumped.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["dnat1", "other-static-x"]);
        assert_eq!(dumped[0].st_mappings.len(), 2);
        assert_eq!(dumped[0].id_mappings.len(), 1);
        assert!(dumped[0].st_mappings.contains(&balanced()));
    }

    #[test]
    fn test_label_from_tag() {
        let mapping = |tag: &str| {
            RealizedMapping::Identity(Nat44IdentityMapping {
                tag: tag.to_string(),
                ip: None,
                index: Some(1),
                port: 0,
                protocol: NatProtocol::Tcp,
                vrf_id: 0,
            })
        };
        assert_eq!(mapping("web-identity-3").label(), Some("web"));
        assert_eq!(mapping("a-static-b-identity-1").label(), Some("a-static-b"));
        assert_eq!(mapping("manual").label(), None);
        assert_eq!(mapping("-identity-1").label(), None);
    }
}
