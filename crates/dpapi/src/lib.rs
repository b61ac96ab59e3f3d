//! Typed boundary to the packet-processing dataplane.
//!
//! The dataplane speaks a request/reply protocol: single requests are
//! answered by one reply carrying a return value, bulk dumps are answered by
//! a stream of detail messages terminated by a control sentinel. This crate
//! models that boundary without the wire encoding:
//!
//! - [`types`]: runtime indices, MAC and IP network values
//! - [`error`]: reply status codes and API errors
//! - [`api`]: message payloads per resource family
//! - [`message`]: request, reply and dump envelopes
//! - [`channel`]: the [`DataplaneApi`] trait and [`drain_dump`]
//! - [`sim`]: an in-memory dataplane for simulation and tests
//!
//! # Example
//!
//! ```
//! use vswitch_dpapi::{drain_dump, DataplaneApi, DumpRequest, Request, SimDataplane};
//!
//! let dataplane = SimDataplane::new();
//! let index = dataplane
//!     .request_index(Request::CreateLoopback { mac: None })
//!     .unwrap();
//! let details = drain_dump(&dataplane, DumpRequest::Interfaces).unwrap();
//! assert_eq!(details.len(), 2);
//! assert_eq!(index, 1);
//! ```

pub mod api;
pub mod channel;
pub mod error;
pub mod message;
pub mod sim;
pub mod types;

pub use channel::{drain_dump, DataplaneApi, MultiReply};
pub use error::{ApiError, ApiResult, ApiStatus, RetvalExt};
pub use message::{Detail, DumpRequest, Reply, Request};
pub use sim::SimDataplane;
pub use types::{
    parse_address_strip_mask, parse_sid, InterfaceIndex, IpNetwork, MacAddress, ParseError,
    LOCAL_INTERFACE_INDEX,
};
