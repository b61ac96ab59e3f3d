//! SRv6 family: local SIDs, policies and steering.
//!
//! Policies are prerequisites of steerings and are announced on the
//! notification bus. Segment lists of an existing policy are changed in
//! place; anything else about a policy forces it to be recreated.

mod configurator;
mod types;

pub use configurator::{PolicyEntry, Srv6Configurator, SteeringEntry};
pub use types::{
    index_key, LocalSidConfig, LocalSidFunction, PolicyConfig, PolicyRef, SegmentListConfig,
    SteeringConfig, SteeringTrafficConfig,
};
