//! Agent daemon: startup, resync, change application and shutdown.

mod agent;
mod desired;

pub use agent::{Agent, ResyncReport};
pub use desired::{Change, DataChange, DesiredState};
