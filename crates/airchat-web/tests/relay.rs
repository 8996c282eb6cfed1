/// End-to-end relay test: a real WebSocket client drives the gateway, which
/// connects to a scripted IRC network on loopback.
use std::sync::Arc;
use std::time::Duration;

use airchat_server::config::GatewayConfig;
use airchat_server::irc::profile::ProfileStore;
use airchat_server::irc::wire::{ClientCommand, ServerEvent};
use airchat_web::build_router;
use airchat_web::state::AppState;
use futures::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const WAIT: Duration = Duration::from_secs(5);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn next_line(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> String {
    timeout(WAIT, lines.next_line()).await.unwrap().unwrap().unwrap()
}

async fn next_event(ws: &mut Socket) -> ServerEvent {
    let frame = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    ServerEvent::from_json(frame.to_text().unwrap()).unwrap()
}

#[tokio::test]
async fn relay_socket_connects_a_network_and_streams_events() {
    let state = AppState::with_profiles(
        GatewayConfig {
            shutdown_grace: Duration::from_millis(500),
            ..GatewayConfig::default()
        },
        Arc::new(ProfileStore::new()),
    );
    let session = state.registry.create_session("alice").await.unwrap();

    let web = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let web_addr = web.local_addr().unwrap();
    let app = build_router(state.clone());
    tokio::spawn(async move { axum::serve(web, app).await });

    let irc = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let network = irc.local_addr().unwrap().to_string();

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{web_addr}/api/ws"))
        .await
        .unwrap();

    // Garbage is ignored; the socket stays usable.
    ws.send(Message::Text("{\"type\":\"nonsense\"}".into())).await.unwrap();

    let connect = ClientCommand::ConnectNetwork {
        network: network.clone(),
        nick: "alice".into(),
        first_channel: "#room".into(),
        session_id: session.clone(),
    };
    ws.send(Message::Text(connect.to_json().unwrap().into())).await.unwrap();

    let (stream, _) = timeout(WAIT, irc.accept()).await.unwrap().unwrap();
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    assert_eq!(next_line(&mut lines).await, "NICK :alice");
    assert_eq!(next_line(&mut lines).await, "USER airchat_alice 0 * :Airchat User");
    write
        .write_all(b":irc.test 001 alice :Welcome\r\n:bob!u@h PRIVMSG alice :hey alice\r\n")
        .await
        .unwrap();

    assert_eq!(
        next_event(&mut ws).await,
        ServerEvent::Connected { network: network.clone(), nick: "alice".into() }
    );
    assert_eq!(
        next_event(&mut ws).await,
        ServerEvent::HighPriorityMessage {
            network: network.clone(),
            from: "bob".into(),
            message: "hey alice".into(),
        }
    );

    assert_eq!(next_line(&mut lines).await, "JOIN :#room");

    // Logout tears the network connection down.
    state.registry.logout(&session).await.unwrap();
    assert_eq!(next_line(&mut lines).await, "QUIT :Connection to server closed.");
}
