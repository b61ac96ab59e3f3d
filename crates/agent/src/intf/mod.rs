//! Interface family.
//!
//! Realizes loopback, memif, tap, vxlan, af-packet and physical interfaces
//! and owns the interface registry every other family resolves names
//! through. The registry maps logical names to dataplane indices and is
//! persisted so that a restarted agent recognizes the interfaces it created.
//!
//! AF-Packet interfaces depend on a host interface; when host interfaces
//! are tracked, an af-packet config whose host is missing is deferred and
//! realized once the host interface is reported.
//!
//! The state reporter watches the registry and reads every registered
//! interface back from the dataplane for state notifications.

mod afpacket;
mod configurator;
mod dump;
mod state;
mod types;

pub use afpacket::AfPacketState;
pub use configurator::{
    InterfaceConfigurator, InterfaceConfiguratorConfig, InterfaceStats, INTERFACE_REGISTRY,
};
pub use dump::{dump_interfaces, dump_memif_sockets, observed_config};
pub use state::{
    AdminStatus, InterfaceState, InterfaceStateNotification, InterfaceStateReporter, StateChange,
    STATE_WATCHER,
};
pub use types::{
    needs_recreate, same_config, AfPacketLink, InterfaceConfig, InterfaceKind, InterfaceLink,
    MemifLink, TapLink, VxlanLink,
};
