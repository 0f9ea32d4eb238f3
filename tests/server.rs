use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bgplite::{IpAddress, RouteUpdate, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::test]
async fn rejects_connections_from_unregistered_peers() {
    let rejected: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let rejected_for_handler = Arc::clone(&rejected);

    let port = ephemeral_port().await;
    let server = Server::new(
        "127.0.0.1",
        port,
        65001,
        Ipv4Addr::new(192, 0, 2, 1),
        Arc::new(|_, _| {}),
        Arc::new(|_, _| {}),
        Arc::new(|_| {}),
        Some(Arc::new(move |message: String| {
            rejected_for_handler.lock().unwrap().push(message);
        })),
    );
    assert!(server.listening_on("127.0.0.1", port));

    let run_task = {
        let server = server.clone();
        tokio::spawn(async move { server.run().await })
    };

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut probe = [0u8; 1];
    let read = stream.read(&mut probe).await.unwrap();
    assert_eq!(read, 0, "unregistered peer's connection should be closed");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(rejected.lock().unwrap().len(), 1);

    server.shutdown().await;
    let _ = run_task.await;
}

#[tokio::test]
async fn full_session_with_a_registered_neighbor_surfaces_routes_and_calls_handlers() {
    let up: Arc<Mutex<Vec<(IpAddress, u32)>>> = Arc::new(Mutex::new(Vec::new()));
    let down: Arc<Mutex<Vec<(IpAddress, u32)>>> = Arc::new(Mutex::new(Vec::new()));
    let routes: Arc<Mutex<Vec<RouteUpdate>>> = Arc::new(Mutex::new(Vec::new()));

    let up_for_handler = Arc::clone(&up);
    let down_for_handler = Arc::clone(&down);
    let routes_for_handler = Arc::clone(&routes);

    let port = ephemeral_port().await;
    let server = Server::new(
        "127.0.0.1",
        port,
        65001,
        Ipv4Addr::new(192, 0, 2, 1),
        Arc::new(move |peer, asn| up_for_handler.lock().unwrap().push((peer, asn))),
        Arc::new(move |peer, asn| down_for_handler.lock().unwrap().push((peer, asn))),
        Arc::new(move |update| routes_for_handler.lock().unwrap().push(update)),
        None,
    );

    server
        .add_neighbor("passive", "127.0.0.1".parse().unwrap(), 65002)
        .await
        .unwrap();
    server.add_route("10.0.0.0/8", "192.0.2.9").await.unwrap();

    let run_task = {
        let server = server.clone();
        tokio::spawn(async move { server.run().await })
    };

    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    let open = bgplite::Message::Open(open_message());
    client.write_all(&open.pack()).await.unwrap();

    let mut header = [0u8; 19];
    client.read_exact(&mut header).await.unwrap(); // OPEN reply
    client.read_exact(&mut header).await.unwrap(); // KEEPALIVE

    client
        .write_all(&bgplite::Message::Keepalive.pack())
        .await
        .unwrap();

    // Established: the speaker now advertises the configured static route.
    client.read_exact(&mut header).await.unwrap();
    assert_eq!(header[18], bgplite::MessageType::Update.code());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(up.lock().unwrap().len(), 1);
    assert!(down.lock().unwrap().is_empty());

    drop(client);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(down.lock().unwrap().len(), 1);
    assert!(routes.lock().unwrap().is_empty());

    server.shutdown().await;
    let _ = run_task.await;
}

fn open_message() -> bgplite::message::OpenMessage {
    bgplite::message::OpenMessage::new(
        65002,
        240,
        Ipv4Addr::new(127, 0, 0, 1),
        bgplite::CapabilitySet {
            multiprotocol: vec![bgplite::AfiSafi::Ipv4Unicast],
            ..Default::default()
        },
    )
}

async fn ephemeral_port() -> u16 {
    // Servers bind their own listener inside `run()`; tests need a free
    // port up front, so reserve one with a throwaway bind-and-drop.
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);
    port
}
