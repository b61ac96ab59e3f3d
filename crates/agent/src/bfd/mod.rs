//! BFD family.
//!
//! Single-hop UDP sessions keyed by interface, authentication keys keyed by
//! id, and the echo function. Sessions and the echo function depend on an
//! interface being registered and follow it through deletion and
//! recreation.

mod configurator;
mod types;

pub use configurator::{BfdConfigurator, BfdSessionEntry, BfdStats};
pub use types::{BfdEchoConfig, BfdKeyConfig, BfdSessionAuthentication, BfdSessionConfig};
