//! Route addition/removal value types surfaced to the application.
//! Mirrors `beka/route.py`.

use serde::{Deserialize, Serialize};

use crate::ip::{IpAddress, IpPrefix};
use crate::message::Origin;

/// A route learned from a peer (or queued for advertisement).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteAddition {
    pub prefix: IpPrefix,
    pub next_hop: IpAddress,
    pub as_path: String,
    pub origin: Origin,
    pub is_withdraw: bool,
}

impl RouteAddition {
    pub fn new(prefix: IpPrefix, next_hop: IpAddress, as_path: String, origin: Origin) -> Self {
        Self {
            prefix,
            next_hop,
            as_path,
            origin,
            is_withdraw: false,
        }
    }
}

/// A route withdrawn by a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRemoval {
    pub prefix: IpPrefix,
    pub next_hop: Option<IpAddress>,
    pub is_withdraw: bool,
}

impl RouteRemoval {
    pub fn new(prefix: IpPrefix) -> Self {
        Self {
            prefix,
            next_hop: None,
            is_withdraw: true,
        }
    }
}

/// What gets delivered to a `route_handler` callback: either kind,
/// distinguished by `is_withdraw` the way spec.md §6 describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RouteUpdate {
    Addition(RouteAddition),
    Removal(RouteRemoval),
}

impl RouteUpdate {
    pub fn is_withdraw(&self) -> bool {
        match self {
            RouteUpdate::Addition(a) => a.is_withdraw,
            RouteUpdate::Removal(r) => r.is_withdraw,
        }
    }

    pub fn prefix(&self) -> &IpPrefix {
        match self {
            RouteUpdate::Addition(a) => &a.prefix,
            RouteUpdate::Removal(r) => &r.prefix,
        }
    }
}

impl From<RouteAddition> for RouteUpdate {
    fn from(addition: RouteAddition) -> Self {
        RouteUpdate::Addition(addition)
    }
}

impl From<RouteRemoval> for RouteUpdate {
    fn from(removal: RouteRemoval) -> Self {
        RouteUpdate::Removal(removal)
    }
}
