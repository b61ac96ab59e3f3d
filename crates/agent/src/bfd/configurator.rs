//! BfdConfigurator implementation.

use std::collections::HashSet;
use std::sync::Arc;

use vswitch_dpapi::api::bfd::{self, BfdAuthKeyDetails, BfdUdpSession};
use vswitch_dpapi::{drain_dump, DataplaneApi, Detail, DumpRequest, Request};
use vswitch_orch_common::{
    match_by_key, BlockingReason, ConfigError, ConfigResult, Configurator, DeferredIndex,
    ErrorList, NameToIdx, PrerequisiteKind, PrerequisiteListener, ResourceState,
};

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::intf::InterfaceConfig;
use crate::{audit_log, debug_log, info_log, warn_log};

use super::types::{BfdEchoConfig, BfdKeyConfig, BfdSessionConfig};

const SOURCE: &str = "BfdConfigurator";
const ECHO_KEY: &str = "echo";

fn session_key(interface: &str) -> String {
    format!("session/{}", interface)
}

/// Registry metadata of a realized session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BfdSessionEntry {
    pub config: BfdSessionConfig,
    /// Interface index the session was programmed on.
    pub if_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingBfd {
    Session(BfdSessionConfig),
    Echo(BfdEchoConfig),
}

#[derive(Debug, Clone, Default)]
pub struct BfdStats {
    pub sessions_created: u64,
    pub sessions_deleted: u64,
    pub keys_set: u64,
    pub deferred: u64,
}

/// Configures BFD sessions, authentication keys and the echo function.
pub struct BfdConfigurator {
    api: Arc<dyn DataplaneApi>,
    interfaces: Arc<NameToIdx<InterfaceConfig>>,
    /// Keyed by interface name; the index is a session id.
    sessions: NameToIdx<BfdSessionEntry>,
    /// Keyed by the key id.
    keys: NameToIdx<BfdKeyConfig>,
    echo: Option<(BfdEchoConfig, u32)>,
    pending: DeferredIndex<PendingBfd>,
    next_session_id: u32,
    stats: BfdStats,
}

impl std::fmt::Debug for BfdConfigurator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BfdConfigurator")
            .field("sessions", &self.sessions.len())
            .field("keys", &self.keys.len())
            .field("echo", &self.echo)
            .field("pending", &self.pending.keys())
            .field("stats", &self.stats)
            .finish()
    }
}

impl BfdConfigurator {
    pub fn new(api: Arc<dyn DataplaneApi>, interfaces: Arc<NameToIdx<InterfaceConfig>>) -> Self {
        Self {
            api,
            interfaces,
            sessions: NameToIdx::new("bfd-sessions"),
            keys: NameToIdx::new("bfd-keys"),
            echo: None,
            pending: DeferredIndex::new(),
            next_session_id: 1,
            stats: BfdStats::default(),
        }
    }

    pub fn init(&self) -> ConfigResult<()> {
        self.api
            .check_message_compatibility(bfd::MESSAGES)
            .map_err(|source| ConfigError::Incompatible {
                configurator: "bfd".to_string(),
                source,
            })
    }

    pub fn sessions(&self) -> &NameToIdx<BfdSessionEntry> {
        &self.sessions
    }

    pub fn keys(&self) -> &NameToIdx<BfdKeyConfig> {
        &self.keys
    }

    pub fn echo(&self) -> Option<&BfdEchoConfig> {
        self.echo.as_ref().map(|(config, _)| config)
    }

    pub fn pending_keys(&self) -> Vec<String> {
        self.pending.keys()
    }

    pub fn stats(&self) -> &BfdStats {
        &self.stats
    }

    fn call(&self, resource: &str, request: Request) -> ConfigResult<()> {
        self.api
            .request(request)
            .map(|_| ())
            .map_err(|e| ConfigError::dataplane(resource, e))
    }

    fn audit(&self, category: AuditCategory, action: &str, object_type: &str, id: &str, result: &ConfigResult<()>) {
        let record = AuditRecord::new(category, SOURCE, action)
            .with_object_id(id)
            .with_object_type(object_type)
            .with_result(result);
        audit_log!(record);
    }

    fn defer(&mut self, key: String, interface: &str, config: PendingBfd) {
        debug_log!(SOURCE, key = %key, interface, "interface missing, deferring");
        self.pending
            .defer(key.clone(), interface, config, BlockingReason::MissingPrerequisite);
        self.stats.deferred += 1;
        let record = AuditRecord::new(AuditCategory::Dependency, SOURCE, "defer")
            .with_outcome(AuditOutcome::InProgress)
            .with_object_id(key)
            .with_details(serde_json::json!({ "interface": interface }));
        audit_log!(record);
    }

    /// Realizes a session, or defers it while its interface is missing.
    fn add_session(&mut self, config: &BfdSessionConfig) -> ConfigResult<()> {
        let Some((if_index, interface)) = self.interfaces.lookup_idx(&config.interface) else {
            self.defer(
                session_key(&config.interface),
                &config.interface,
                PendingBfd::Session(config.clone()),
            );
            return Ok(());
        };
        self.check_session(config, &interface)?;
        self.call(&config.interface, Request::BfdUdpAdd(config.to_session(if_index)))?;
        let id = self.next_session_id;
        self.next_session_id += 1;
        self.sessions.register_name(
            config.interface.clone(),
            id,
            BfdSessionEntry {
                config: config.clone(),
                if_index,
            },
        );
        self.stats.sessions_created += 1;
        Ok(())
    }

    fn check_session(&self, config: &BfdSessionConfig, interface: &InterfaceConfig) -> ConfigResult<()> {
        if !interface
            .ip_addresses
            .iter()
            .any(|a| a.address() == config.source_address)
        {
            return Err(ConfigError::invalid(
                config.interface.clone(),
                format!("source address {} is not configured on the interface", config.source_address),
            ));
        }
        if let Some(auth) = config.authentication {
            if !self.keys.contains(&auth.key_id.to_string()) {
                return Err(ConfigError::not_found(
                    "bfd authentication key",
                    auth.key_id.to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Removes a session from the dataplane. A session already gone with its
    /// interface counts as removed.
    fn remove_session(&mut self, session: BfdUdpSession, resource: &str) -> ConfigResult<()> {
        match self.api.request(Request::BfdUdpDel(session)) {
            Ok(_) => {
                self.stats.sessions_deleted += 1;
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug_log!(SOURCE, resource, "session already gone");
                Ok(())
            }
            Err(e) => Err(ConfigError::dataplane(resource, e)),
        }
    }

    fn set_echo(&mut self, config: &BfdEchoConfig) -> ConfigResult<()> {
        let interface = &config.echo_source_interface;
        let Some(index) = self.interfaces.lookup_index(interface) else {
            let interface = interface.clone();
            self.defer(ECHO_KEY.to_string(), &interface, PendingBfd::Echo(config.clone()));
            return Ok(());
        };
        self.call(interface, Request::BfdSetEchoSource { index })?;
        self.echo = Some((config.clone(), index));
        Ok(())
    }

    fn sessions_using_key(&self, key_id: u32) -> Vec<(String, BfdSessionEntry)> {
        self.sessions
            .snapshot()
            .into_iter()
            .filter(|e| {
                e.metadata
                    .config
                    .authentication
                    .is_some_and(|a| a.key_id == key_id)
            })
            .map(|e| (e.name, e.metadata))
            .collect()
    }

    /// Brings the sessions and echo function bound to `interface` in line
    /// with the interface registry.
    ///
    /// Creation and deletion events both land here, so a stale or repeated
    /// event is harmless.
    fn reconcile_interface(&mut self, interface: &str) -> ConfigResult<()> {
        let current = self.interfaces.lookup_index(interface);
        let mut errors = ErrorList::new();

        if let Some((_, entry)) = self.sessions.lookup_idx(interface) {
            if current != Some(entry.if_index) {
                info_log!(SOURCE, interface, "interface changed under session");
                self.sessions.unregister_name(interface);
                errors.record(self.remove_session(entry.config.to_session(entry.if_index), interface));
                errors.record(self.add_session(&entry.config));
            }
        }

        if let Some((config, index)) = self.echo.clone() {
            if config.echo_source_interface == interface && current != Some(index) {
                // The dataplane drops the echo source with its interface.
                self.echo = None;
                errors.record(self.set_echo(&config));
            }
        }

        if current.is_some() {
            for entry in self.pending.take_blocked_on(interface) {
                let result = match &entry.config {
                    PendingBfd::Session(config) => self.add_session(config),
                    PendingBfd::Echo(config) => self.set_echo(config),
                };
                self.audit(AuditCategory::Dependency, "release", "bfd", &entry.key, &result);
                errors.record(result);
            }
        }
        errors.into_result()
    }

    fn dump_sessions(&self) -> ConfigResult<Vec<BfdUdpSession>> {
        let details = drain_dump(self.api.as_ref(), DumpRequest::BfdSessions)
            .map_err(|e| ConfigError::dataplane("bfd sessions", e))?;
        Ok(details
            .into_iter()
            .filter_map(|d| match d {
                Detail::BfdSession(s) => Some(s),
                _ => None,
            })
            .collect())
    }

    fn dump_keys(&self) -> ConfigResult<Vec<BfdAuthKeyDetails>> {
        let details = drain_dump(self.api.as_ref(), DumpRequest::BfdAuthKeys)
            .map_err(|e| ConfigError::dataplane("bfd keys", e))?;
        Ok(details
            .into_iter()
            .filter_map(|d| match d {
                Detail::BfdAuthKey(k) => Some(k),
                _ => None,
            })
            .collect())
    }

    fn dump_echo(&self) -> ConfigResult<Option<u32>> {
        let details = drain_dump(self.api.as_ref(), DumpRequest::BfdEchoSource)
            .map_err(|e| ConfigError::dataplane("bfd echo", e))?;
        Ok(details.into_iter().find_map(|d| match d {
            Detail::BfdEchoSource { index } => Some(index),
            _ => None,
        }))
    }

    fn audit_resync(&self, object_type: &str, details: serde_json::Value, result: &ConfigResult<()>) {
        let record = AuditRecord::new(AuditCategory::Resync, SOURCE, "resync")
            .with_object_type(object_type)
            .with_details(details)
            .with_result(result);
        audit_log!(record);
    }
}

impl Configurator<BfdSessionConfig> for BfdConfigurator {
    fn configure(&mut self, config: &BfdSessionConfig) -> ConfigResult<()> {
        config.validate()?;
        if self.sessions.contains(&config.interface) {
            return Err(ConfigError::invalid(
                config.interface.clone(),
                "a session is already configured on this interface",
            ));
        }
        let result = self.add_session(config);
        self.audit(AuditCategory::ResourceCreate, "configure", "bfd_session", &config.interface, &result);
        result
    }

    fn modify(&mut self, old: &BfdSessionConfig, new: &BfdSessionConfig) -> ConfigResult<()> {
        new.validate()?;
        if old.source_address != new.source_address
            || old.destination_address != new.destination_address
        {
            return Err(ConfigError::invalid(
                new.interface.clone(),
                "source and destination addresses cannot be modified",
            ));
        }
        if old.interface != new.interface {
            let mut errors = ErrorList::new();
            errors.record(Configurator::<BfdSessionConfig>::delete(self, old));
            errors.record(Configurator::<BfdSessionConfig>::configure(self, new));
            return errors.into_result();
        }
        if self.pending.remove(&session_key(&old.interface)).is_some() {
            return self.add_session(new);
        }
        let Some((id, entry)) = self.sessions.lookup_idx(&old.interface) else {
            debug_log!(SOURCE, interface = %old.interface, "session not found, creating");
            return self.add_session(new);
        };

        let result = if entry.config.timers_only_differ(new) {
            self.call(&new.interface, Request::BfdUdpMod(new.to_session(entry.if_index)))
                .map(|()| {
                    self.sessions.register_name(
                        new.interface.clone(),
                        id,
                        BfdSessionEntry {
                            config: new.clone(),
                            if_index: entry.if_index,
                        },
                    );
                })
        } else {
            // Authentication can only change by re-adding the session.
            match self.interfaces.lookup_idx(&new.interface) {
                Some((_, interface)) => self.check_session(new, &interface).and_then(|()| {
                    self.sessions.unregister_name(&old.interface);
                    self.remove_session(entry.config.to_session(entry.if_index), &old.interface)?;
                    self.add_session(new)
                }),
                None => Err(ConfigError::not_found("interface", new.interface.clone())),
            }
        };
        self.audit(AuditCategory::ResourceModify, "modify", "bfd_session", &new.interface, &result);
        result
    }

    fn delete(&mut self, config: &BfdSessionConfig) -> ConfigResult<()> {
        if self.pending.remove(&session_key(&config.interface)).is_some() {
            return Ok(());
        }
        let Some((_, entry)) = self.sessions.unregister_name(&config.interface) else {
            return Err(ConfigError::not_found("bfd session", config.interface.clone()));
        };
        let result = self.remove_session(entry.config.to_session(entry.if_index), &config.interface);
        self.audit(AuditCategory::ResourceDelete, "delete", "bfd_session", &config.interface, &result);
        result
    }

    fn resync(&mut self, desired: &[BfdSessionConfig]) -> ConfigResult<()> {
        let mut errors = ErrorList::new();
        let dumped = self.dump_sessions()?;

        self.sessions.clear();
        for key in self.pending.keys() {
            if key.starts_with("session/") {
                self.pending.remove(&key);
            }
        }

        let mut resolved = Vec::new();
        for config in desired {
            if errors.record(config.validate()).is_none() {
                continue;
            }
            match self.interfaces.lookup_idx(&config.interface) {
                Some((index, interface)) => {
                    if errors.record(self.check_session(config, &interface)).is_some() {
                        resolved.push((config.clone(), index));
                    }
                }
                None => self.defer(
                    session_key(&config.interface),
                    &config.interface,
                    PendingBfd::Session(config.clone()),
                ),
            }
        }

        let diff = match_by_key(
            resolved,
            dumped,
            |(c, index)| (*index, c.source_address, c.destination_address),
            |s| (s.index, s.local_addr, s.peer_addr),
        );
        let (kept, missing, obsolete) = (diff.matched.len(), diff.missing.len(), diff.obsolete.len());

        for session in diff.obsolete {
            let name = format!("{}->{}", session.local_addr, session.peer_addr);
            errors.record(self.remove_session(session, &name));
        }
        for ((config, if_index), dumped) in diff.matched {
            let wanted = config.to_session(if_index);
            let result = if wanted == dumped {
                Ok(())
            } else if wanted.auth == dumped.auth {
                self.call(&config.interface, Request::BfdUdpMod(wanted))
            } else {
                self.remove_session(dumped, &config.interface)
                    .and_then(|()| self.call(&config.interface, Request::BfdUdpAdd(wanted)))
            };
            if errors.record(result).is_some() {
                let id = self.next_session_id;
                self.next_session_id += 1;
                self.sessions
                    .register_name(config.interface.clone(), id, BfdSessionEntry { config, if_index });
            }
        }
        for (config, _) in diff.missing {
            errors.record(self.add_session(&config));
        }

        let result = errors.into_result();
        self.audit_resync(
            "bfd_session",
            serde_json::json!({ "kept": kept, "created": missing, "deleted": obsolete }),
            &result,
        );
        result
    }

    fn resource_state(&self, interface: &str) -> ResourceState {
        if self.pending.is_pending(&session_key(interface)) {
            ResourceState::Pending(BlockingReason::MissingPrerequisite)
        } else if self.sessions.contains(interface) {
            ResourceState::Configured
        } else {
            ResourceState::Unconfigured
        }
    }
}

impl Configurator<BfdKeyConfig> for BfdConfigurator {
    fn configure(&mut self, config: &BfdKeyConfig) -> ConfigResult<()> {
        config.validate()?;
        let key = config.key();
        let result = self
            .call(&key, Request::BfdAuthSetKey(config.to_key()))
            .map(|()| {
                self.keys.register_name(key.clone(), config.id, config.clone());
                self.stats.keys_set += 1;
            });
        self.audit(AuditCategory::ResourceCreate, "configure", "bfd_key", &key, &result);
        result
    }

    fn modify(&mut self, old: &BfdKeyConfig, new: &BfdKeyConfig) -> ConfigResult<()> {
        new.validate()?;
        if old.id != new.id {
            let mut errors = ErrorList::new();
            errors.record(Configurator::<BfdKeyConfig>::delete(self, old));
            errors.record(Configurator::<BfdKeyConfig>::configure(self, new));
            return errors.into_result();
        }

        // A key in use cannot be replaced; its sessions step aside first.
        let key = new.key();
        let users = self.sessions_using_key(new.id);
        let mut errors = ErrorList::new();
        for (name, entry) in &users {
            errors.record(self.remove_session(entry.config.to_session(entry.if_index), name));
        }
        if errors
            .record(self.call(&key, Request::BfdAuthSetKey(new.to_key())))
            .is_some()
        {
            self.keys.register_name(key.clone(), new.id, new.clone());
            self.stats.keys_set += 1;
        }
        for (name, entry) in &users {
            errors.record(self.call(name, Request::BfdUdpAdd(entry.config.to_session(entry.if_index))));
        }

        let result = errors.into_result();
        self.audit(AuditCategory::ResourceModify, "modify", "bfd_key", &key, &result);
        result
    }

    fn delete(&mut self, config: &BfdKeyConfig) -> ConfigResult<()> {
        let key = config.key();
        if !self.keys.contains(&key) {
            return Err(ConfigError::not_found("bfd authentication key", key));
        }
        let result = self
            .call(&key, Request::BfdAuthDelKey { conf_key_id: config.id })
            .map(|()| {
                self.keys.unregister_name(&key);
            });
        self.audit(AuditCategory::ResourceDelete, "delete", "bfd_key", &key, &result);
        result
    }

    fn resync(&mut self, desired: &[BfdKeyConfig]) -> ConfigResult<()> {
        let mut errors = ErrorList::new();
        let valid: Vec<BfdKeyConfig> = desired
            .iter()
            .filter(|k| errors.record(k.validate()).is_some())
            .cloned()
            .collect();
        let dumped = self.dump_keys()?;
        self.keys.clear();

        let diff = match_by_key(valid, dumped, |d| d.id, |a| a.conf_key_id);
        let mut replace = Vec::new();
        for (config, dumped) in diff.matched {
            // Secrets are never dumped; only the type can be compared.
            if config.authentication_type == dumped.auth_type {
                self.keys.register_name(config.key(), config.id, config);
            } else {
                replace.push(config);
            }
        }

        let blocked: HashSet<u32> = replace
            .iter()
            .map(|k| k.id)
            .chain(diff.obsolete.iter().map(|k| k.conf_key_id))
            .collect();
        if !blocked.is_empty() {
            for session in self.dump_sessions()? {
                if session.auth.is_some_and(|a| blocked.contains(&a.conf_key_id)) {
                    let name = format!("{}->{}", session.local_addr, session.peer_addr);
                    errors.record(self.remove_session(session, &name));
                }
            }
        }

        for obsolete in &diff.obsolete {
            let key = obsolete.conf_key_id.to_string();
            errors.record(self.call(
                &key,
                Request::BfdAuthDelKey {
                    conf_key_id: obsolete.conf_key_id,
                },
            ));
        }
        for config in replace.iter().chain(diff.missing.iter()) {
            errors.record(Configurator::<BfdKeyConfig>::configure(self, config));
        }

        let result = errors.into_result();
        self.audit_resync(
            "bfd_key",
            serde_json::json!({
                "replaced": replace.len(),
                "created": diff.missing.len(),
                "deleted": diff.obsolete.len(),
            }),
            &result,
        );
        result
    }

    fn resource_state(&self, id: &str) -> ResourceState {
        if self.keys.contains(id) {
            ResourceState::Configured
        } else {
            ResourceState::Unconfigured
        }
    }
}

impl Configurator<BfdEchoConfig> for BfdConfigurator {
    fn configure(&mut self, config: &BfdEchoConfig) -> ConfigResult<()> {
        config.validate()?;
        let result = self.set_echo(config);
        self.audit(
            AuditCategory::ResourceCreate,
            "configure",
            "bfd_echo",
            &config.echo_source_interface,
            &result,
        );
        result
    }

    fn modify(&mut self, _old: &BfdEchoConfig, new: &BfdEchoConfig) -> ConfigResult<()> {
        new.validate()?;
        self.pending.remove(ECHO_KEY);
        let result = self.set_echo(new);
        self.audit(
            AuditCategory::ResourceModify,
            "modify",
            "bfd_echo",
            &new.echo_source_interface,
            &result,
        );
        result
    }

    fn delete(&mut self, config: &BfdEchoConfig) -> ConfigResult<()> {
        if self.pending.remove(ECHO_KEY).is_some() {
            return Ok(());
        }
        if self.echo.take().is_none() {
            return Err(ConfigError::not_found(
                "bfd echo function",
                config.echo_source_interface.clone(),
            ));
        }
        let result = self.call(&config.echo_source_interface, Request::BfdDelEchoSource);
        self.audit(
            AuditCategory::ResourceDelete,
            "delete",
            "bfd_echo",
            &config.echo_source_interface,
            &result,
        );
        result
    }

    fn resync(&mut self, desired: &[BfdEchoConfig]) -> ConfigResult<()> {
        if desired.len() > 1 {
            warn_log!(
                SOURCE,
                count = desired.len(),
                "only one echo function is supported, using the first"
            );
        }
        let dumped = self.dump_echo()?;
        self.pending.remove(ECHO_KEY);
        self.echo = None;

        let wanted = desired.first();
        let target = wanted.and_then(|c| self.interfaces.lookup_index(&c.echo_source_interface));
        let mut errors = ErrorList::new();

        if dumped.is_some() && target.is_none() {
            errors.record(self.call("bfd echo", Request::BfdDelEchoSource));
        }
        if let Some(config) = wanted {
            if errors.record(config.validate()).is_some() {
                match (target, dumped) {
                    (Some(index), Some(current)) if index == current => {
                        self.echo = Some((config.clone(), index));
                    }
                    _ => {
                        errors.record(self.set_echo(config));
                    }
                }
            }
        }

        let result = errors.into_result();
        self.audit_resync(
            "bfd_echo",
            serde_json::json!({ "dumped": dumped, "desired": wanted.map(|c| &c.echo_source_interface) }),
            &result,
        );
        result
    }

    fn resource_state(&self, interface: &str) -> ResourceState {
        match (&self.echo, self.pending.get(ECHO_KEY)) {
            (_, Some(entry)) if entry.prerequisite == interface => {
                ResourceState::Pending(entry.reason.clone())
            }
            (Some((config, _)), _) if config.echo_source_interface == interface => {
                ResourceState::Configured
            }
            _ => ResourceState::Unconfigured,
        }
    }
}

impl PrerequisiteListener for BfdConfigurator {
    fn listener_name(&self) -> &str {
        SOURCE
    }

    fn interested_in(&self, kind: PrerequisiteKind) -> bool {
        kind == PrerequisiteKind::Interface
    }

    fn resolve_created(&mut self, _kind: PrerequisiteKind, name: &str, _handle: u32) -> ConfigResult<()> {
        self.reconcile_interface(name)
    }

    fn resolve_deleted(&mut self, _kind: PrerequisiteKind, name: &str) -> ConfigResult<()> {
        self.reconcile_interface(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intf::{InterfaceConfigurator, InterfaceConfiguratorConfig, InterfaceKind};
    use vswitch_dpapi::api::bfd::BfdAuthType;
    use vswitch_dpapi::{ApiStatus, SimDataplane};

    struct Fixture {
        sim: Arc<SimDataplane>,
        interfaces: InterfaceConfigurator,
        bfd: BfdConfigurator,
    }

    fn fixture() -> Fixture {
        let sim = Arc::new(SimDataplane::new());
        let interfaces = InterfaceConfigurator::new(sim.clone(), InterfaceConfiguratorConfig::default());
        let bfd = BfdConfigurator::new(sim.clone(), interfaces.registry());
        Fixture { sim, interfaces, bfd }
    }

    fn loop1() -> InterfaceConfig {
        InterfaceConfig::new("loop1", InterfaceKind::Loopback)
            .with_enabled(true)
            .with_addresses(vec!["10.0.0.1/24".parse().unwrap()])
    }

    fn session() -> BfdSessionConfig {
        BfdSessionConfig::new(
            "loop1",
            "10.0.0.1".parse().unwrap(),
            "10.0.0.2".parse().unwrap(),
        )
    }

    fn key(secret: &str) -> BfdKeyConfig {
        BfdKeyConfig::new(1, BfdAuthType::KeyedSha1, secret)
    }

    #[test]
    fn test_session_waits_for_interface() {
        let mut f = fixture();
        f.bfd.configure(&session()).unwrap();
        assert!(f.sim.bfd_sessions().is_empty());
        assert!(Configurator::<BfdSessionConfig>::resource_state(&f.bfd, "loop1").is_pending());

        f.interfaces.configure(&loop1()).unwrap();
        f.bfd
            .resolve_created(PrerequisiteKind::Interface, "loop1", 0)
            .unwrap();
        assert_eq!(f.sim.bfd_sessions().len(), 1);
        assert_eq!(
            Configurator::<BfdSessionConfig>::resource_state(&f.bfd, "loop1"),
            ResourceState::Configured
        );
    }

    #[test]
    fn test_source_address_must_be_on_interface() {
        let mut f = fixture();
        f.interfaces.configure(&loop1()).unwrap();
        f.sim.clear_requests();

        let mut foreign = session();
        foreign.source_address = "10.9.9.9".parse().unwrap();
        assert!(f.bfd.configure(&foreign).unwrap_err().is_precondition());
        assert!(f.sim.requests().is_empty());
    }

    #[test]
    fn test_unknown_key_is_not_found() {
        let mut f = fixture();
        f.interfaces.configure(&loop1()).unwrap();
        let err = f.bfd.configure(&session().with_authentication(9, 1)).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_modify_timers_in_place() {
        let mut f = fixture();
        f.interfaces.configure(&loop1()).unwrap();
        f.bfd.configure(&session()).unwrap();
        f.sim.clear_requests();

        let new = session().with_timers(50_000, 50_000, 5);
        f.bfd.modify(&session(), &new).unwrap();
        assert_eq!(f.sim.count("bfd_udp_mod"), 1);
        assert_eq!(f.sim.bfd_sessions()[0].detect_mult, 5);
        assert_eq!(f.bfd.sessions().lookup_idx("loop1").unwrap().1.config, new);

        let mut moved = new.clone();
        moved.destination_address = "10.0.0.3".parse().unwrap();
        assert!(f.bfd.modify(&new, &moved).unwrap_err().is_precondition());
    }

    #[test]
    fn test_key_modify_cycles_sessions() {
        let mut f = fixture();
        f.interfaces.configure(&loop1()).unwrap();
        f.bfd.configure(&key("secret-a")).unwrap();
        f.bfd.configure(&session().with_authentication(1, 1)).unwrap();
        f.sim.clear_requests();

        f.bfd.modify(&key("secret-a"), &key("secret-b")).unwrap();
        assert_eq!(f.sim.count("bfd_udp_del"), 1);
        assert_eq!(f.sim.count("bfd_auth_set_key"), 1);
        assert_eq!(f.sim.count("bfd_udp_add"), 1);
        assert_eq!(f.sim.bfd_sessions().len(), 1);
    }

    #[test]
    fn test_key_delete_in_use_fails() {
        let mut f = fixture();
        f.interfaces.configure(&loop1()).unwrap();
        f.bfd.configure(&key("s")).unwrap();
        f.bfd.configure(&session().with_authentication(1, 1)).unwrap();

        let err = Configurator::<BfdKeyConfig>::delete(&mut f.bfd, &key("s")).unwrap_err();
        assert!(matches!(err, ConfigError::Dataplane { .. }));
        assert_eq!(f.sim.bfd_key_ids(), vec![1]);
    }

    #[test]
    fn test_echo_lifecycle() {
        let mut f = fixture();
        let echo = BfdEchoConfig::new("loop1");
        f.bfd.configure(&echo).unwrap();
        assert!(f.sim.echo_source().is_none());

        f.interfaces.configure(&loop1()).unwrap();
        f.bfd
            .resolve_created(PrerequisiteKind::Interface, "loop1", 0)
            .unwrap();
        let index = f.interfaces.registry().lookup_index("loop1");
        assert_eq!(f.sim.echo_source(), index);

        f.bfd.delete(&echo).unwrap();
        assert!(f.sim.echo_source().is_none());
        assert!(f.bfd.delete(&echo).is_err());
    }

    #[test]
    fn test_interface_loss_defers_session_again() {
        let mut f = fixture();
        f.interfaces.configure(&loop1()).unwrap();
        f.bfd.configure(&session()).unwrap();

        f.interfaces.delete(&loop1()).unwrap();
        f.bfd
            .resolve_deleted(PrerequisiteKind::Interface, "loop1")
            .unwrap();
        assert!(f.bfd.sessions().is_empty());
        assert!(Configurator::<BfdSessionConfig>::resource_state(&f.bfd, "loop1").is_pending());

        f.interfaces.configure(&loop1()).unwrap();
        f.bfd
            .resolve_created(PrerequisiteKind::Interface, "loop1", 0)
            .unwrap();
        let index = f.interfaces.registry().lookup_index("loop1").unwrap();
        assert_eq!(f.sim.bfd_sessions()[0].index, index);

        // A repeated event changes nothing.
        f.sim.clear_requests();
        f.bfd
            .resolve_created(PrerequisiteKind::Interface, "loop1", 0)
            .unwrap();
        assert!(f.sim.requests().is_empty());
    }

    #[test]
    fn test_session_resync() {
        let mut f = fixture();
        f.interfaces.configure(&loop1()).unwrap();
        let index = f.interfaces.registry().lookup_index("loop1").unwrap();
        let kept = session().to_session(index);
        let mut stale = kept.clone();
        stale.peer_addr = "10.0.0.99".parse().unwrap();
        f.sim.request(Request::BfdUdpAdd(kept)).unwrap();
        f.sim.request(Request::BfdUdpAdd(stale.clone())).unwrap();
        f.sim.clear_requests();

        Configurator::<BfdSessionConfig>::resync(&mut f.bfd, &[session()]).unwrap();
        assert_eq!(f.sim.requests(), vec![Request::BfdUdpDel(stale)]);
        assert!(f.bfd.sessions().contains("loop1"));
    }

    #[test]
    fn test_key_resync_removes_obsolete_and_its_sessions() {
        let mut f = fixture();
        f.interfaces.configure(&loop1()).unwrap();
        f.bfd.configure(&BfdKeyConfig::new(2, BfdAuthType::KeyedSha1, "old")).unwrap();
        f.bfd.configure(&session().with_authentication(2, 2)).unwrap();

        Configurator::<BfdKeyConfig>::resync(&mut f.bfd, &[key("new")]).unwrap();
        assert_eq!(f.sim.bfd_key_ids(), vec![1]);
        assert!(f.sim.bfd_sessions().is_empty());
    }

    #[test]
    fn test_echo_resync_uses_first() {
        let mut f = fixture();
        f.interfaces.configure(&loop1()).unwrap();
        Configurator::<BfdEchoConfig>::resync(
            &mut f.bfd,
            &[BfdEchoConfig::new("loop1"), BfdEchoConfig::new("loop2")],
        )
        .unwrap();
        assert_eq!(f.bfd.echo().unwrap().echo_source_interface, "loop1");
        assert!(f.sim.echo_source().is_some());
    }

    #[test]
    fn test_dataplane_failure_leaves_session_unregistered() {
        let mut f = fixture();
        f.interfaces.configure(&loop1()).unwrap();
        f.sim.inject_failure("bfd_udp_add", ApiStatus::Unspecified);
        assert!(f.bfd.configure(&session()).is_err());
        assert!(f.bfd.sessions().is_empty());
    }
}
