//! vSwitch agent.
//!
//! Keeps a packet-processing dataplane converged on a declared desired
//! configuration, and recovers correctly after either side restarts.
//!
//! # Architecture
//!
//! ```text
//! [desired state] ──> [Agent] ──> [configurators] ──> [DataplaneApi] ──> [dataplane]
//!                        │              │  ▲
//!                        │              ▼  │
//!                        └──────> [notification bus]
//! ```
//!
//! # Key Components
//!
//! - [`daemon::Agent`]: owns the configurators, orders resync, routes changes
//! - [`intf`]: interfaces and the shared interface registry
//! - [`bfd`], [`stn`], [`nat`], [`srv6`]: families depending on interfaces
//! - [`bus`]: prerequisite notifications between families
//! - [`audit`]: structured logging and audit records

pub mod audit;
pub mod bfd;
pub mod bus;
pub mod config;
pub mod daemon;
pub mod error;
pub mod intf;
pub mod nat;
pub mod srv6;
pub mod stn;

pub use config::AgentConfig;
pub use daemon::{Agent, Change, DataChange, DesiredState, ResyncReport};
pub use error::{AgentError, AgentResult};
pub use vswitch_orch_common::{ConfigError, ConfigResult, ErrorList};
