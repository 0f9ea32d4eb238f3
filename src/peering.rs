//! Socket ↔ framer ↔ FSM ↔ queue runtime: the four cooperating tasks that
//! turn one accepted TCP connection into a running BGP session.
//!
//! Grounded on `beka/peering.py`'s `receive_messages`/`send_messages`/
//! `print_route_updates`/`kick_timers` eventlets, adapted to
//! `tokio::task`s per spec.md §5's "an implementation may instead use OS
//! threads" escape hatch: since tasks here may run on different worker
//! threads of a multi-threaded runtime, the two tasks that mutate the FSM
//! (receiver and ticker) serialize through a `tokio::sync::Mutex` rather
//! than relying on cooperative single-threadedness.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex, Notify};

use crate::capability::CapabilitySet;
use crate::framer::Framer;
use crate::fsm::{Fsm, FsmEvent, FsmOutcome};
use crate::ip::IpAddress;
use crate::message::{frame, Message, MessageType};
use crate::route::RouteUpdate;

/// Invoked once per surfaced route addition/removal.
pub type RouteHandler = Arc<dyn Fn(RouteUpdate) + Send + Sync>;
/// Invoked with a human-readable description whenever a peering hits a
/// socket, protocol or FSM error.
pub type ErrorHandler = Arc<dyn Fn(String) + Send + Sync>;

fn now_unix() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

struct PeeringInner {
    fsm: Mutex<Fsm>,
    peer_address: IpAddress,
    start_time: i64,
    shutdown_requested: watch::Sender<bool>,
    teardown: Notify,
}

/// A running (or not-yet-started) peer session. Cheaply cloneable: every
/// clone shares the same FSM, so a registry (`Server`) can hold one while
/// the session's own task calls [`Peering::run`].
#[derive(Clone)]
pub struct Peering {
    inner: Arc<PeeringInner>,
}

impl Peering {
    pub fn new(fsm: Fsm, peer_address: IpAddress) -> Self {
        let (shutdown_requested, _) = watch::channel(false);
        Self {
            inner: Arc::new(PeeringInner {
                fsm: Mutex::new(fsm),
                peer_address,
                start_time: chrono::Utc::now().timestamp(),
                shutdown_requested,
                teardown: Notify::new(),
            }),
        }
    }

    pub fn peer_address(&self) -> IpAddress {
        self.inner.peer_address
    }

    pub fn uptime(&self) -> i64 {
        chrono::Utc::now().timestamp() - self.inner.start_time
    }

    /// Requests a graceful shutdown: the next tick the ticker task sees,
    /// it feeds `FsmEvent::Shutdown` to the FSM (emitting a CEASE
    /// NOTIFICATION from OpenConfirm/Established) and the runtime tears
    /// the session's tasks down once the FSM drains.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown_requested.send(true);
    }

    /// Runs the four cooperating tasks over `stream` until the FSM goes
    /// idle (from either side) or the socket closes. Returns once every
    /// task has wound down, draining the outbound queue on a best-effort
    /// basis first.
    pub async fn run(
        &self,
        stream: TcpStream,
        route_handler: RouteHandler,
        error_handler: Option<ErrorHandler>,
    ) {
        let (read_half, write_half) = stream.into_split();

        let fourbyteas = Arc::new(AtomicBool::new(false));
        {
            let fourbyteas = Arc::clone(&fourbyteas);
            let mut fsm = self.inner.fsm.lock().await;
            fsm.set_open_handler(Box::new(move |caps: &CapabilitySet| {
                if caps.four_octet_asn.is_some() {
                    fourbyteas.store(true, Ordering::SeqCst);
                }
            }));
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (route_tx, route_rx) = mpsc::unbounded_channel::<RouteUpdate>();

        let receiver = tokio::spawn(receiver_task(
            Arc::clone(&self.inner),
            read_half,
            outbound_tx.clone(),
            route_tx.clone(),
            Arc::clone(&fourbyteas),
            error_handler.clone(),
        ));
        let ticker = tokio::spawn(ticker_task(
            Arc::clone(&self.inner),
            outbound_tx,
            route_tx,
            error_handler,
        ));
        let sender = tokio::spawn(sender_task(write_half, outbound_rx, fourbyteas));
        let publisher = tokio::spawn(route_publisher_task(route_rx, route_handler));

        let _ = receiver.await;
        let _ = ticker.await;
        let _ = sender.await;
        let _ = publisher.await;
    }
}

fn drain_fsm(
    fsm: &mut Fsm,
    outbound_tx: &mpsc::UnboundedSender<Message>,
    route_tx: &mpsc::UnboundedSender<RouteUpdate>,
) {
    while let Some(message) = fsm.pop_output_message() {
        let _ = outbound_tx.send(message);
    }
    while let Some(update) = fsm.pop_route_update() {
        let _ = route_tx.send(update);
    }
}

fn report(error_handler: &Option<ErrorHandler>, peer: IpAddress, message: impl Into<String>) {
    let message = message.into();
    tracing::warn!(neighbor = %peer, %message, "peering error");
    if let Some(handler) = error_handler {
        handler(format!("Peering {peer}: {message}"));
    }
}

async fn receiver_task(
    inner: Arc<PeeringInner>,
    read_half: OwnedReadHalf,
    outbound_tx: mpsc::UnboundedSender<Message>,
    route_tx: mpsc::UnboundedSender<RouteUpdate>,
    fourbyteas: Arc<AtomicBool>,
    error_handler: Option<ErrorHandler>,
) {
    let mut framer = Framer::new(read_half);
    loop {
        let frame = tokio::select! {
            frame = framer.next_frame() => frame,
            _ = inner.teardown.notified() => return,
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                report(&error_handler, inner.peer_address, err.to_string());
                inner.teardown.notify_waiters();
                return;
            }
        };

        let message = match frame.message_type {
            MessageType::Update => {
                Message::parse_update_with_capabilities(&frame.body, fourbyteas.load(Ordering::SeqCst))
            }
            other => Message::parse(other, &frame.body),
        };
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                report(&error_handler, inner.peer_address, err.to_string());
                inner.teardown.notify_waiters();
                return;
            }
        };

        let outcome = {
            let mut fsm = inner.fsm.lock().await;
            let outcome = fsm.event(FsmEvent::MessageReceived(message), now_unix());
            drain_fsm(&mut fsm, &outbound_tx, &route_tx);
            outcome
        };

        if outcome == FsmOutcome::Closed {
            report(&error_handler, inner.peer_address, "session went idle");
            inner.teardown.notify_waiters();
            return;
        }
    }
}

async fn ticker_task(
    inner: Arc<PeeringInner>,
    outbound_tx: mpsc::UnboundedSender<Message>,
    route_tx: mpsc::UnboundedSender<RouteUpdate>,
    error_handler: Option<ErrorHandler>,
) {
    let mut shutdown_rx = inner.shutdown_requested.subscribe();
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let outcome = {
                    let mut fsm = inner.fsm.lock().await;
                    let outcome = fsm.event(FsmEvent::TimerExpired, now_unix());
                    drain_fsm(&mut fsm, &outbound_tx, &route_tx);
                    outcome
                };
                if outcome == FsmOutcome::Closed {
                    report(&error_handler, inner.peer_address, "hold timer expired");
                    inner.teardown.notify_waiters();
                    return;
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    {
                        let mut fsm = inner.fsm.lock().await;
                        fsm.event(FsmEvent::Shutdown, now_unix());
                        drain_fsm(&mut fsm, &outbound_tx, &route_tx);
                    }
                    inner.teardown.notify_waiters();
                    return;
                }
            }
            _ = inner.teardown.notified() => return,
        }
    }
}

async fn sender_task(
    mut write_half: OwnedWriteHalf,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    fourbyteas: Arc<AtomicBool>,
) {
    while let Some(message) = outbound_rx.recv().await {
        let packed = match &message {
            Message::Update(update) => {
                let four_octet = fourbyteas.load(Ordering::SeqCst);
                match update.pack_with_capabilities(four_octet) {
                    Ok(body) => frame(MessageType::Update, body),
                    Err(err) => {
                        tracing::warn!(%err, "failed packing outbound UPDATE, dropping it");
                        continue;
                    }
                }
            }
            other => other.pack(),
        };
        if let Err(err) = write_half.write_all(&packed).await {
            tracing::warn!(%err, "failed writing BGP message, closing send side");
            return;
        }
    }
}

async fn route_publisher_task(
    mut route_rx: mpsc::UnboundedReceiver<RouteUpdate>,
    route_handler: RouteHandler,
) {
    while let Some(update) = route_rx.recv().await {
        route_handler(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::AfiSafi;
    use crate::message::{Message as WireMessage, OpenMessage};
    use std::net::Ipv4Addr;
    use std::sync::Mutex as StdMutex;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (accept_result, connect_result) = tokio::join!(listener.accept(), connect);
        (accept_result.unwrap().0, connect_result.unwrap())
    }

    #[tokio::test]
    async fn passive_handshake_over_loopback_reaches_established_and_surfaces_routes() {
        let (server_side, mut client_side) = loopback_pair().await;

        let fsm = Fsm::new(
            65001,
            65002,
            Ipv4Addr::new(192, 168, 0, 1),
            "192.168.0.1".parse::<IpAddress>().unwrap(),
            "192.168.0.2".parse::<IpAddress>().unwrap(),
            240,
        );
        let peering = Peering::new(fsm, "192.168.0.2".parse().unwrap());

        let seen: Arc<StdMutex<Vec<RouteUpdate>>> = Arc::new(StdMutex::new(Vec::new()));
        let seen_for_handler = Arc::clone(&seen);
        let route_handler: RouteHandler = Arc::new(move |update| {
            seen_for_handler.lock().unwrap().push(update);
        });

        let run_task = {
            let peering = peering.clone();
            tokio::spawn(async move { peering.run(server_side, route_handler, None).await })
        };

        let open = WireMessage::Open(OpenMessage::new(
            65002,
            240,
            Ipv4Addr::new(192, 168, 0, 2),
            CapabilitySet {
                multiprotocol: vec![AfiSafi::Ipv4Unicast],
                ..Default::default()
            },
        ));
        client_side.write_all(&open.pack()).await.unwrap();

        let mut header = [0u8; 19];
        client_side.read_exact(&mut header).await.unwrap();
        assert_eq!(header[18], MessageType::Open.code());
        let mut header2 = [0u8; 19];
        client_side.read_exact(&mut header2).await.unwrap();
        assert_eq!(header2[18], MessageType::Keepalive.code());

        client_side
            .write_all(&WireMessage::Keepalive.pack())
            .await
            .unwrap();

        let update = crate::message::UpdateMessage::new(
            Vec::new(),
            crate::message::PathAttributes {
                origin: Some(crate::message::Origin::Igp),
                as_path: Some(String::new()),
                next_hop: Some(Ipv4Addr::new(192, 168, 0, 2)),
                ..Default::default()
            },
            vec!["10.0.0.0/8".parse().unwrap()],
        );
        client_side
            .write_all(&WireMessage::Update(update).pack())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        peering.shutdown();
        let _ = run_task.await;

        let updates = seen.lock().unwrap();
        assert_eq!(updates.len(), 1);
        match &updates[0] {
            RouteUpdate::Addition(addition) => {
                assert_eq!(addition.prefix, "10.0.0.0/8".parse().unwrap());
            }
            other => panic!("expected a route addition, got {other:?}"),
        }
    }
}
