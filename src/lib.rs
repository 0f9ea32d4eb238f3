//! A minimalist passive BGP-4 speaker core: FSM, wire codec and the
//! tokio runtime that drives one session per accepted connection.
//!
//! Everything outside those three concerns — configuration loading,
//! logging setup, signal handling, a RIB/FIB, routing policy, active
//! outbound sessions, authentication, graceful restart, add-path, any
//! CLI — is left to a consumer; see `bgplited` for a thin one.

pub mod capability;
pub mod error;
pub mod framer;
pub mod fsm;
pub mod ip;
pub mod message;
pub mod peering;
pub mod route;
pub mod server;
pub mod timer;

pub use capability::{AfiSafi, CapabilitySet};
pub use error::{BgpError, BgpResult};
pub use fsm::{Fsm, FsmEvent, FsmOutcome, FsmState, DEFAULT_HOLD_TIME};
pub use ip::{IpAddress, IpPrefix, Ipv4Prefix, Ipv6Prefix};
pub use message::{Message, MessageType, NotificationErrorCode, Origin};
pub use peering::{ErrorHandler, Peering, RouteHandler};
pub use route::{RouteAddition, RouteRemoval, RouteUpdate};
pub use server::{NeighborInfo, PeerDownHandler, PeerUpHandler, Server, DEFAULT_BGP_PORT};
