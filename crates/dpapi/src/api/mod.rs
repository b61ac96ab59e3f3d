//! Dataplane message definitions, one module per resource family.
//!
//! Each submodule exports a `MESSAGES` list naming every request and dump it
//! relies on, so a configurator can verify the dataplane understands them
//! before it starts.

pub mod bfd;
pub mod interface;
pub mod nat;
pub mod srv6;
pub mod stn;
