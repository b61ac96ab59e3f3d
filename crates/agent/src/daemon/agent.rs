//! Agent implementation.
//!
//! The agent owns every configurator and the notification bus, and is the
//! only place that knows the order families depend on each other:
//! interfaces first, then BFD keys, sessions and echo, STN, the NAT44
//! global settings and DNATs, and the SRv6 local SIDs, policies and
//! steerings.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedReceiver;

use vswitch_dpapi::DataplaneApi;
use vswitch_orch_common::{
    load_snapshot, snapshot_path, spawn_persist_loop, ConfigResult, Configurator, ErrorList,
    PersistHandle, PrerequisiteEvent, PrerequisiteKind, PrerequisiteListener, ResyncSummary,
};

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::bfd::{BfdConfigurator, BfdEchoConfig, BfdKeyConfig, BfdSessionConfig};
use crate::bus::NotificationBus;
use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use crate::intf::{
    InterfaceConfigurator, InterfaceConfiguratorConfig, InterfaceStateNotification,
    InterfaceStateReporter, INTERFACE_REGISTRY,
};
use crate::nat::{DNatConfig, Nat44GlobalConfig, NatConfigurator};
use crate::srv6::{LocalSidConfig, PolicyConfig, Srv6Configurator, SteeringConfig};
use crate::stn::StnConfigurator;
use crate::{audit_log, debug_log, error_log, info_log, warn_log};

use super::desired::{DataChange, DesiredState};

const SOURCE: &str = "Agent";

/// Outcome of a full resync.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResyncReport {
    /// Interface correlation counts; absent if the interface resync failed
    /// before correlating.
    pub interfaces: Option<ResyncSummary>,
    /// Every failure from every family, in order.
    #[serde(skip)]
    pub errors: ErrorList,
    pub error_count: usize,
    pub duration_ms: u64,
}

impl ResyncReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// The reconciliation agent.
pub struct Agent {
    config: AgentConfig,
    interfaces: InterfaceConfigurator,
    bfd: BfdConfigurator,
    stn: StnConfigurator,
    nat: NatConfigurator,
    srv6: Srv6Configurator,
    bus: NotificationBus,
    state: InterfaceStateReporter,
    persist: Vec<PersistHandle>,
    resyncs: u64,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("interfaces", &self.interfaces)
            .field("bfd", &self.bfd)
            .field("stn", &self.stn)
            .field("nat", &self.nat)
            .field("srv6", &self.srv6)
            .field("state", &self.state)
            .field("persisting", &self.persist.len())
            .finish()
    }
}

impl Agent {
    pub fn new(api: Arc<dyn DataplaneApi>, config: AgentConfig) -> Self {
        let interfaces = InterfaceConfigurator::new(
            api.clone(),
            InterfaceConfiguratorConfig {
                default_mtu: config.interfaces.default_mtu,
                cold_start_policy: config.resync.cold_start_policy,
                skip_if_dataplane_empty: config.resync.skip_if_dataplane_empty,
                linux_interfaces: config.interfaces.linux_interfaces,
            },
        );
        let registry = interfaces.registry();
        let bus = NotificationBus::new(registry.clone());
        let state = InterfaceStateReporter::new(api.clone(), registry.clone());
        Self {
            bfd: BfdConfigurator::new(api.clone(), registry.clone()),
            stn: StnConfigurator::new(api.clone(), registry.clone()),
            nat: NatConfigurator::new(api.clone(), registry.clone()),
            srv6: Srv6Configurator::new(api, registry, bus.handle()),
            interfaces,
            bus,
            state,
            config,
            persist: Vec::new(),
            resyncs: 0,
        }
    }

    pub fn interfaces(&self) -> &InterfaceConfigurator {
        &self.interfaces
    }

    pub fn bfd(&self) -> &BfdConfigurator {
        &self.bfd
    }

    pub fn stn(&self) -> &StnConfigurator {
        &self.stn
    }

    pub fn nat(&self) -> &NatConfigurator {
        &self.nat
    }

    pub fn srv6(&self) -> &Srv6Configurator {
        &self.srv6
    }

    pub fn interface_state(&self) -> &InterfaceStateReporter {
        &self.state
    }

    /// Streams interface state changes from now on.
    pub fn subscribe_interface_state(&mut self) -> UnboundedReceiver<InterfaceStateNotification> {
        self.state.subscribe()
    }

    /// Checks dataplane compatibility, loads persisted identities and
    /// starts the persistence loop.
    ///
    /// An incompatible dataplane is fatal. With persistence enabled this
    /// must run inside a tokio runtime.
    pub fn init(&mut self) -> AgentResult<()> {
        let record = AuditRecord::new(AuditCategory::SystemLifecycle, SOURCE, "init")
            .with_outcome(AuditOutcome::InProgress);
        audit_log!(record);

        let checks = [
            self.interfaces.init(),
            self.bfd.init(),
            self.stn.init(),
            self.nat.init(),
            self.srv6.init(),
        ];
        for check in checks {
            if let Err(e) = check {
                error_log!(SOURCE, error = %e, "dataplane is not compatible");
                let record = AuditRecord::new(AuditCategory::SystemLifecycle, SOURCE, "init")
                    .with_outcome(AuditOutcome::Failure)
                    .with_error(e.to_string());
                audit_log!(record);
                return Err(AgentError::Init(e));
            }
        }

        if self.config.persistence.enabled {
            let path = snapshot_path(&self.config.persistence.state_dir, INTERFACE_REGISTRY);
            self.interfaces.load_persisted(load_snapshot(&path));
            let handle = spawn_persist_loop(
                self.interfaces.registry(),
                path,
                self.config.persist_config(),
            );
            info_log!(SOURCE, path = %handle.path().display(), "persisting interface registry");
            self.persist.push(handle);
        } else {
            info_log!(SOURCE, "persistence disabled, resync starts cold");
        }

        let record = AuditRecord::new(AuditCategory::SystemLifecycle, SOURCE, "init")
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::json!({
                "persistence": self.config.persistence.enabled,
                "cold_start_policy": self.config.resync.cold_start_policy,
            }));
        audit_log!(record);
        Ok(())
    }

    /// Converges every family on `desired`. Failures are collected; one
    /// family failing never stops the others.
    pub fn resync(&mut self, desired: &DesiredState) -> ResyncReport {
        let started = Instant::now();
        self.resyncs += 1;
        info_log!(SOURCE, round = self.resyncs, "resync started");

        let mut errors = ErrorList::new();
        self.interfaces
            .set_known_host_interfaces(desired.linux_interfaces.iter().cloned());
        errors.record(self.interfaces.resync(&desired.interfaces));

        errors.record(Configurator::<BfdKeyConfig>::resync(&mut self.bfd, &desired.bfd_keys));
        errors.record(Configurator::<BfdSessionConfig>::resync(&mut self.bfd, &desired.bfd_sessions));
        let echo: Vec<BfdEchoConfig> = desired.bfd_echo.iter().cloned().collect();
        errors.record(Configurator::<BfdEchoConfig>::resync(&mut self.bfd, &echo));

        errors.record(self.stn.resync(&desired.stn_rules));
        let nat: Vec<_> = desired.nat_global.iter().cloned().collect();
        errors.record(Configurator::<Nat44GlobalConfig>::resync(&mut self.nat, &nat));
        errors.record(Configurator::<DNatConfig>::resync(&mut self.nat, &desired.dnats));

        errors.record(Configurator::<LocalSidConfig>::resync(&mut self.srv6, &desired.local_sids));
        errors.record(Configurator::<PolicyConfig>::resync(&mut self.srv6, &desired.sr_policies));
        errors.record(Configurator::<SteeringConfig>::resync(&mut self.srv6, &desired.sr_steerings));

        errors.extend(self.dispatch());
        self.report_state();

        let report = ResyncReport {
            interfaces: self.interfaces.last_resync(),
            error_count: errors.len(),
            errors,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        for error in report.errors.iter() {
            warn_log!(SOURCE, error = %error, "resync failure");
        }
        let record = AuditRecord::new(AuditCategory::Resync, SOURCE, "resync")
            .with_outcome(if report.is_clean() {
                AuditOutcome::Success
            } else {
                AuditOutcome::Failure
            })
            .with_correlation_id(format!("agent-resync-{}", self.resyncs))
            .with_details(serde_json::to_value(&report).unwrap_or_default());
        audit_log!(record);
        report
    }

    /// Applies one keyed change, then lets dependents react to it.
    pub fn apply(&mut self, change: DataChange) -> ConfigResult<()> {
        debug_log!(SOURCE, family = change.family(), "applying change");
        let result = match change {
            DataChange::Interface(c) => c.apply_to(&mut self.interfaces),
            DataChange::BfdKey(c) => c.apply_to(&mut self.bfd),
            DataChange::BfdSession(c) => c.apply_to(&mut self.bfd),
            DataChange::BfdEcho(c) => c.apply_to(&mut self.bfd),
            DataChange::Stn(c) => c.apply_to(&mut self.stn),
            DataChange::Nat(c) => c.apply_to(&mut self.nat),
            DataChange::DNat(c) => c.apply_to(&mut self.nat),
            DataChange::LocalSid(c) => c.apply_to(&mut self.srv6),
            DataChange::SrPolicy(c) => c.apply_to(&mut self.srv6),
            DataChange::SrSteering(c) => c.apply_to(&mut self.srv6),
            DataChange::LinuxInterface { name, present } => {
                let handle = self.bus.handle();
                if present {
                    handle.created(PrerequisiteKind::LinuxInterface, name, 0);
                } else {
                    handle.deleted(PrerequisiteKind::LinuxInterface, name);
                }
                Ok(())
            }
        };
        let mut errors = ErrorList::new();
        errors.record(result);
        errors.extend(self.dispatch());
        self.report_state();
        errors.into_result()
    }

    /// Publishes an externally observed prerequisite event and dispatches it.
    pub fn notify(&mut self, event: PrerequisiteEvent) -> ConfigResult<()> {
        self.bus.handle().publish(event);
        let result = self.dispatch().into_result();
        self.report_state();
        result
    }

    /// State reporting never fails a change; read-back errors are logged.
    fn report_state(&mut self) {
        if let Err(e) = self.state.process() {
            warn_log!(SOURCE, error = %e, "interface state read-back failed");
        }
    }

    fn dispatch(&mut self) -> ErrorList {
        let Self {
            bus,
            interfaces,
            bfd,
            stn,
            nat,
            srv6,
            ..
        } = self;
        let mut listeners: [&mut dyn PrerequisiteListener; 5] = [interfaces, bfd, stn, nat, srv6];
        bus.dispatch(&mut listeners)
    }

    /// Stops the persistence loops after a final flush.
    pub async fn shutdown(self) {
        info_log!(SOURCE, loops = self.persist.len(), "shutting down");
        for handle in self.persist {
            handle.shutdown().await;
        }
        let record = AuditRecord::new(AuditCategory::SystemLifecycle, SOURCE, "shutdown")
            .with_outcome(AuditOutcome::Success);
        audit_log!(record);
    }
}
