//! NAT44 family.
//!
//! A single global configuration: the forwarding flag, interfaces with the
//! inside or outside feature, and outside address pools. Next to it, any
//! number of labelled DNATs made of static, load-balanced and identity
//! mappings. Interfaces that are not registered yet are enabled, and
//! mappings bound to them installed, once they appear.

mod configurator;
mod dnat;
mod types;

pub use configurator::NatConfigurator;
pub use dnat::{
    MappingConfig, MappingEntry, PendingMapping, RealizedMapping, DNAT_REGISTRY,
    IDENTITY_MAPPING_REGISTRY, STATIC_MAPPING_REGISTRY,
};
pub use types::{
    AddressPool, DNatConfig, IdentityMapping, LocalAddress, Nat44GlobalConfig, NatInterface,
    StaticMapping,
};
