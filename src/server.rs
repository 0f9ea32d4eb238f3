//! Listening socket, peer registry and accept loop.
//!
//! Grounded on `beka/beka.py`'s `Beka` class, with the peer table kept
//! behind an `Arc<RwLock<HashMap<_, _>>>` the way `focl::bgp::BgpService`
//! holds its `peers` map.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{Notify, RwLock};

use crate::fsm::{Fsm, DEFAULT_HOLD_TIME};
use crate::ip::IpAddress;
use crate::message::Origin;
use crate::peering::{ErrorHandler, Peering, RouteHandler};
use crate::route::RouteAddition;

pub const DEFAULT_BGP_PORT: u16 = 179;

pub type PeerUpHandler = Arc<dyn Fn(IpAddress, u32) + Send + Sync>;
pub type PeerDownHandler = Arc<dyn Fn(IpAddress, u32) + Send + Sync>;

/// A snapshot of one active peering, as returned by [`Server::neighbor_states`].
#[derive(Debug, Clone, Serialize)]
pub struct NeighborInfo {
    pub uptime: i64,
}

struct NeighborConfig {
    peer_as: u32,
}

struct ServerInner {
    local_address: String,
    bgp_port: u16,
    local_as: u32,
    router_id: Ipv4Addr,
    peer_up_handler: PeerUpHandler,
    peer_down_handler: PeerDownHandler,
    route_handler: RouteHandler,
    error_handler: Option<ErrorHandler>,
    peers: RwLock<HashMap<IpAddress, NeighborConfig>>,
    peerings: RwLock<HashMap<IpAddress, Peering>>,
    routes_to_advertise: RwLock<Vec<RouteAddition>>,
    shutdown: Notify,
}

/// The passive BGP speaker core: a registered-neighbor table plus an
/// accept loop that hands each connection off to a [`Peering`].
///
/// Cheaply cloneable: every clone shares the same listener and peer
/// table, so `shutdown()` can be called from outside the task running
/// `run()`.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_address: impl Into<String>,
        bgp_port: u16,
        local_as: u32,
        router_id: Ipv4Addr,
        peer_up_handler: PeerUpHandler,
        peer_down_handler: PeerDownHandler,
        route_handler: RouteHandler,
        error_handler: Option<ErrorHandler>,
    ) -> Self {
        let bgp_port = if bgp_port == 0 { DEFAULT_BGP_PORT } else { bgp_port };
        Self {
            inner: Arc::new(ServerInner {
                local_address: local_address.into(),
                bgp_port,
                local_as,
                router_id,
                peer_up_handler,
                peer_down_handler,
                route_handler,
                error_handler,
                peers: RwLock::new(HashMap::new()),
                peerings: RwLock::new(HashMap::new()),
                routes_to_advertise: RwLock::new(Vec::new()),
                shutdown: Notify::new(),
            }),
        }
    }

    pub async fn add_neighbor(&self, connect_mode: &str, peer_ip: IpAddress, peer_as: u32) -> Result<()> {
        if connect_mode != "passive" {
            return Err(anyhow!("only passive BGP supported"));
        }
        let mut peers = self.inner.peers.write().await;
        if peers.contains_key(&peer_ip) {
            return Err(anyhow!("peer already added: {peer_ip} {peer_as}"));
        }
        peers.insert(peer_ip, NeighborConfig { peer_as });
        Ok(())
    }

    pub async fn add_route(&self, prefix: &str, next_hop: &str) -> Result<()> {
        let prefix = prefix
            .parse()
            .with_context(|| format!("invalid route prefix {prefix}"))?;
        let next_hop = next_hop
            .parse()
            .with_context(|| format!("invalid next hop {next_hop}"))?;
        self.inner
            .routes_to_advertise
            .write()
            .await
            .push(RouteAddition::new(prefix, next_hop, String::new(), Origin::Igp));
        Ok(())
    }

    /// A snapshot of every active peering's address and uptime.
    pub async fn neighbor_states(&self) -> Vec<(IpAddress, NeighborInfo)> {
        self.inner
            .peerings
            .read()
            .await
            .values()
            .map(|peering| {
                (
                    peering.peer_address(),
                    NeighborInfo {
                        uptime: peering.uptime(),
                    },
                )
            })
            .collect()
    }

    pub fn listening_on(&self, address: &str, port: u16) -> bool {
        self.inner.local_address == address && self.inner.bgp_port == port
    }

    /// Binds `(local_address, bgp_port)` and accepts connections until
    /// [`Server::shutdown`] is called. Runs forever otherwise; the caller
    /// is expected to spawn this on its own task.
    pub async fn run(&self) -> Result<()> {
        let bind_addr = if self.inner.local_address.contains(':') {
            format!("[{}]:{}", self.inner.local_address, self.inner.bgp_port)
        } else {
            format!("{}:{}", self.inner.local_address, self.inner.bgp_port)
        };
        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("failed binding BGP listener on {bind_addr}"))?;
        tracing::info!(address = %bind_addr, "listening for BGP connections");

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = self.inner.shutdown.notified() => {
                    tracing::info!("listener shutting down");
                    return Ok(());
                }
            };

            let (stream, remote) = match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::warn!(%err, "failed accepting connection");
                    continue;
                }
            };

            let peer_ip = ip_address(remote.ip());
            let peer_as = {
                let peers = self.inner.peers.read().await;
                peers.get(&peer_ip).map(|cfg| cfg.peer_as)
            };

            let Some(peer_as) = peer_as else {
                if let Some(handler) = &self.inner.error_handler {
                    handler(format!("rejecting connection from unregistered peer {peer_ip}"));
                }
                drop(stream);
                continue;
            };

            let local_address: IpAddress = self
                .inner
                .local_address
                .parse()
                .unwrap_or(IpAddress::V4(Ipv4Addr::UNSPECIFIED));

            let mut fsm = Fsm::new(
                self.inner.local_as,
                peer_as,
                self.inner.router_id,
                local_address,
                peer_ip,
                DEFAULT_HOLD_TIME,
            );
            fsm.routes_to_advertise = self.inner.routes_to_advertise.read().await.clone();

            let peering = Peering::new(fsm, peer_ip);
            self.inner
                .peerings
                .write()
                .await
                .insert(peer_ip, peering.clone());

            (self.inner.peer_up_handler)(peer_ip, peer_as);

            let server = self.clone();
            tokio::spawn(async move {
                peering
                    .run(
                        stream,
                        server.inner.route_handler.clone(),
                        server.inner.error_handler.clone(),
                    )
                    .await;
                (server.inner.peer_down_handler)(peer_ip, peer_as);
                server.inner.peerings.write().await.remove(&peer_ip);
            });
        }
    }

    /// Stops the listener and asks every active peering to shut down.
    pub async fn shutdown(&self) {
        self.inner.shutdown.notify_waiters();
        for peering in self.inner.peerings.read().await.values() {
            peering.shutdown();
        }
    }
}

fn ip_address(addr: IpAddr) -> IpAddress {
    match addr {
        IpAddr::V4(addr) => IpAddress::V4(addr),
        IpAddr::V6(addr) => IpAddress::V6(addr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> Server {
        Server::new(
            "127.0.0.1",
            0,
            65001,
            Ipv4Addr::new(1, 1, 1, 1),
            Arc::new(|_, _| {}),
            Arc::new(|_, _| {}),
            Arc::new(|_| {}),
            None,
        )
    }

    #[tokio::test]
    async fn defaults_unset_port_to_179() {
        let server = server();
        assert!(server.listening_on("127.0.0.1", DEFAULT_BGP_PORT));
    }

    #[tokio::test]
    async fn add_neighbor_rejects_active_mode() {
        let server = server();
        let err = server
            .add_neighbor("active", "10.0.0.1".parse().unwrap(), 65002)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("passive"));
    }

    #[tokio::test]
    async fn add_neighbor_rejects_duplicate_peer() {
        let server = server();
        server
            .add_neighbor("passive", "10.0.0.1".parse().unwrap(), 65002)
            .await
            .unwrap();
        let err = server
            .add_neighbor("passive", "10.0.0.1".parse().unwrap(), 65003)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already added"));
    }

    #[tokio::test]
    async fn add_route_parses_prefix_and_next_hop() {
        let server = server();
        server.add_route("10.0.0.0/8", "192.168.0.1").await.unwrap();
        let routes = server.inner.routes_to_advertise.read().await;
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].prefix, "10.0.0.0/8".parse().unwrap());
    }

    #[tokio::test]
    async fn neighbor_states_starts_empty() {
        let server = server();
        assert!(server.neighbor_states().await.is_empty());
    }
}
