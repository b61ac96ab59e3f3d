//! STN (steal the NIC) family.
//!
//! One rule per interface, kept in a private registry. Rules wait for their
//! interface and follow it through deletion and recreation.

mod configurator;
mod types;

pub use configurator::{StnConfigurator, StnEntry};
pub use types::{rule_key, StnConfig};
