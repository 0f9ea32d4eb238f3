use std::net::Ipv4Addr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use bgplite::{IpAddress, RouteUpdate, Server};

#[derive(Debug, Parser)]
#[command(name = "bgplited", about = "A minimalist passive BGP-4 speaker")]
struct Args {
    /// Address to listen on; an IPv6 literal switches the listener to AF_INET6.
    #[arg(long, default_value = "0.0.0.0")]
    local_address: String,

    /// TCP port to listen on. 0 means the registered BGP port, 179.
    #[arg(long, default_value_t = 0)]
    port: u16,

    /// This speaker's own AS number.
    #[arg(long)]
    asn: u32,

    /// BGP identifier advertised in the OPEN message.
    #[arg(long)]
    router_id: Ipv4Addr,

    /// A peer allowed to connect, as `address,as_number`. May be repeated.
    #[arg(long = "neighbor", value_parser = parse_neighbor)]
    neighbors: Vec<(String, u32)>,

    /// A static route to advertise, as `prefix,next_hop`. May be repeated.
    #[arg(long = "route", value_parser = parse_route)]
    routes: Vec<(String, String)>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_neighbor(raw: &str) -> Result<(String, u32), String> {
    let (address, asn) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected address,as_number, got {raw}"))?;
    let asn: u32 = asn
        .parse()
        .map_err(|_| format!("invalid AS number in neighbor {raw}"))?;
    Ok((address.to_string(), asn))
}

fn parse_route(raw: &str) -> Result<(String, String), String> {
    let (prefix, next_hop) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected prefix,next_hop, got {raw}"))?;
    Ok((prefix.to_string(), next_hop.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let server = Server::new(
        args.local_address.clone(),
        args.port,
        args.asn,
        args.router_id,
        Arc::new(|peer, asn| tracing::info!(%peer, asn, "peer up")),
        Arc::new(|peer, asn| tracing::info!(%peer, asn, "peer down")),
        Arc::new(|update| match update {
            RouteUpdate::Addition(addition) => tracing::info!(
                prefix = %addition.prefix,
                next_hop = %addition.next_hop,
                as_path = %addition.as_path,
                "route added"
            ),
            RouteUpdate::Removal(removal) => {
                tracing::info!(prefix = %removal.prefix, "route withdrawn")
            }
        }),
        Some(Arc::new(|message: String| tracing::warn!(%message, "bgp session error"))),
    );

    for (address, asn) in &args.neighbors {
        let peer_ip: IpAddress = address
            .parse()
            .with_context(|| format!("invalid neighbor address {address}"))?;
        server
            .add_neighbor("passive", peer_ip, *asn)
            .await
            .with_context(|| format!("failed adding neighbor {address}"))?;
    }

    for (prefix, next_hop) in &args.routes {
        server
            .add_route(prefix, next_hop)
            .await
            .with_context(|| format!("failed adding route {prefix} via {next_hop}"))?;
    }

    let listener = server.clone();
    let listener_task = tokio::spawn(async move { listener.run().await });

    tokio::signal::ctrl_c()
        .await
        .context("failed waiting for ctrl-c")?;
    tracing::info!("received ctrl-c, shutting down");
    server.shutdown().await;

    match listener_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(%err, "listener exited with an error"),
        Err(err) => tracing::warn!(%err, "listener task panicked"),
    }

    Ok(())
}

fn init_tracing(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}
