/// Integration tests for the session registry against a scripted IRC
/// network on loopback.
///
/// Each test plays the network side by hand: it reads the lines the
/// gateway writes and answers with whatever the scenario needs, then checks
/// what the registry relays back.
use std::sync::Arc;
use std::time::Duration;

use airchat_server::config::GatewayConfig;
use airchat_server::irc::profile::{Profile, ProfileError, ProfileProvider, ProfileStore};
use airchat_server::irc::registry::{SessionId, SessionRegistry};
use airchat_server::irc::wire::{ClientCommand, ServerEvent};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

/// Network side of one gateway connection.
struct Peer {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Peer {
    async fn expect(&mut self) -> String {
        timeout(WAIT, self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .expect("read failed")
            .expect("gateway closed the connection")
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }

    /// Read NICK/USER and answer with a welcome.
    async fn register(&mut self, nick: &str) {
        assert_eq!(self.expect().await, format!("NICK :{nick}"));
        assert_eq!(self.expect().await, format!("USER airchat_{nick} 0 * :Airchat User"));
        self.send(&format!(":irc.test 001 {nick} :Welcome")).await;
    }

    /// Answer the first-channel JOIN with an echo and a NAMES listing.
    async fn accept_join(&mut self, nick: &str, channel: &str, others: &str) {
        assert_eq!(self.expect().await, format!("JOIN :{channel}"));
        self.send(&format!(":{nick}!u@h JOIN {channel}")).await;
        self.send(&format!(":irc.test 353 {nick} = {channel} :@{nick} {others}")).await;
        self.send(&format!(":irc.test 366 {nick} {channel} :End of /NAMES list.")).await;
    }
}

struct Network {
    listener: TcpListener,
    name: String,
}

impl Network {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let name = listener.local_addr().unwrap().to_string();
        Self { listener, name }
    }

    async fn accept(&self) -> Peer {
        let (stream, _) = timeout(WAIT, self.listener.accept())
            .await
            .expect("timed out waiting for the gateway to connect")
            .unwrap();
        let (read, writer) = stream.into_split();
        Peer {
            lines: BufReader::new(read).lines(),
            writer,
        }
    }
}

/// Profile backend that is always down.
struct BrokenProfiles;

#[async_trait]
impl ProfileProvider for BrokenProfiles {
    async fn profile_info(&self, _nicks: &[String]) -> Result<Vec<Profile>, ProfileError> {
        Err(ProfileError::Unavailable("backend offline".into()))
    }
}

fn config() -> GatewayConfig {
    GatewayConfig {
        shutdown_grace: Duration::from_millis(500),
        ..GatewayConfig::default()
    }
}

fn registry() -> SessionRegistry {
    SessionRegistry::new(&config(), Arc::new(ProfileStore::new()))
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> ServerEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("relay closed")
}

/// Connect `alice` to `net` and play registration plus the first join.
async fn connect_alice(
    reg: &SessionRegistry,
    net: &Network,
) -> (SessionId, Peer, mpsc::UnboundedReceiver<ServerEvent>) {
    let id = reg.create_session("alice").await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    reg.join(&id, &net.name, "alice", "#room", tx).await;

    let mut peer = net.accept().await;
    peer.register("alice").await;
    assert_eq!(
        next_event(&mut rx).await,
        ServerEvent::Connected { network: net.name.clone(), nick: "alice".into() }
    );
    peer.accept_join("alice", "#room", "bob").await;
    (id, peer, rx)
}

/// Wait for the join and roster of the first channel, in either order.
async fn drain_join(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = vec![next_event(rx).await, next_event(rx).await];
    events.sort_by_key(|e| e.kind());
    events
}

// ── Connection lifecycle ─────────────────────────────────────────────

#[tokio::test]
async fn connect_relays_welcome_join_and_roster() {
    let reg = registry();
    let net = Network::start().await;
    let (_id, _peer, mut rx) = connect_alice(&reg, &net).await;

    let events = drain_join(&mut rx).await;
    match &events[..] {
        [ServerEvent::Roster { channel, users, .. }, ServerEvent::UserJoined { nick, picture, .. }] => {
            assert_eq!(channel, "#room");
            let nicks: Vec<_> = users.iter().map(|u| u.nick.as_str()).collect();
            assert_eq!(nicks, vec!["alice", "bob"]);
            assert_eq!(nick, "alice");
            assert_eq!(picture, "/images/defaultusericon.jpg");
        }
        other => panic!("unexpected events: {other:?}"),
    }
}

#[tokio::test]
async fn nick_in_use_retries_with_underscore() {
    let reg = registry();
    let net = Network::start().await;
    let id = reg.create_session("alice").await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    reg.join(&id, &net.name, "alice", "#room", tx).await;

    let mut peer = net.accept().await;
    assert_eq!(peer.expect().await, "NICK :alice");
    peer.expect().await;
    peer.send(":irc.test 433 * alice :Nickname is already in use").await;
    assert_eq!(peer.expect().await, "NICK :alice_");
    peer.send(":irc.test 001 alice_ :Welcome").await;

    assert_eq!(
        next_event(&mut rx).await,
        ServerEvent::Connected { network: net.name.clone(), nick: "alice_".into() }
    );
}

#[tokio::test]
async fn second_connect_to_same_network_is_ignored() {
    let reg = registry();
    let net = Network::start().await;
    let (id, _peer, _rx) = connect_alice(&reg, &net).await;

    let (tx, _rx2) = mpsc::unbounded_channel();
    reg.join(&id, &net.name, "alice", "#other", tx).await;

    assert!(
        timeout(Duration::from_millis(300), net.listener.accept()).await.is_err(),
        "a second connection was opened"
    );
    assert_eq!(reg.networks(&id).await, Some(vec![net.name.clone()]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn racing_first_connects_open_one_connection() {
    let reg = registry();
    let net = Network::start().await;
    let id = reg.create_session("alice").await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let first = tokio::spawn({
        let (reg, id, name, tx) = (reg.clone(), id.clone(), net.name.clone(), tx.clone());
        async move { reg.join(&id, &name, "alice", "#room", tx).await }
    });
    let second = tokio::spawn({
        let (reg, id, name) = (reg.clone(), id.clone(), net.name.clone());
        async move { reg.join(&id, &name, "alice", "#other", tx).await }
    });
    let (a, b) = tokio::join!(first, second);
    a.unwrap();
    b.unwrap();

    let mut peer = net.accept().await;
    assert!(
        timeout(Duration::from_millis(300), net.listener.accept()).await.is_err(),
        "a second connection was opened"
    );
    assert_eq!(reg.networks(&id).await, Some(vec![net.name.clone()]));

    peer.register("alice").await;
    assert_eq!(
        next_event(&mut rx).await,
        ServerEvent::Connected { network: net.name.clone(), nick: "alice".into() }
    );
}

#[tokio::test]
async fn logout_quits_every_connection_before_returning() {
    let reg = registry();
    let net = Network::start().await;
    let (id, mut peer, mut rx) = connect_alice(&reg, &net).await;
    drain_join(&mut rx).await;

    reg.logout(&id).await.unwrap();
    assert_eq!(peer.expect().await, "QUIT :Connection to server closed.");
    assert!(!reg.contains(&id).await);

    // Later commands for the session reach nothing.
    reg.send_message(&id, &net.name, "#room", "after logout").await;
    let rest = timeout(Duration::from_millis(300), peer.lines.next_line()).await;
    assert!(matches!(rest, Ok(Ok(None)) | Err(_)), "unexpected line: {rest:?}");

    // The relay closes once the connection is gone.
    assert_eq!(timeout(WAIT, rx.recv()).await.unwrap(), None);
}

// ── Outbound commands ────────────────────────────────────────────────

#[tokio::test]
async fn dispatch_routes_commands_to_the_named_network() {
    let reg = registry();
    let net = Network::start().await;
    let (id, mut peer, mut rx) = connect_alice(&reg, &net).await;
    drain_join(&mut rx).await;
    let (relay, _unused) = mpsc::unbounded_channel();

    reg.dispatch(
        ClientCommand::SendMessage {
            network: net.name.clone(),
            destination: "#room".into(),
            message: "hello".into(),
            session_id: id.clone(),
        },
        &relay,
    )
    .await;
    assert_eq!(peer.expect().await, "PRIVMSG #room :hello");

    reg.dispatch(
        ClientCommand::ChangeNick {
            network: net.name.clone(),
            nick: "alicia".into(),
            session_id: id.clone(),
        },
        &relay,
    )
    .await;
    assert_eq!(peer.expect().await, "NICK :alicia");

    reg.dispatch(
        ClientCommand::RawCommand {
            network: net.name.clone(),
            args: vec!["MODE".into(), "alice".into(), "+i".into()],
            session_id: id,
        },
        &relay,
    )
    .await;
    assert_eq!(peer.expect().await, "MODE alice :+i");
}

#[tokio::test]
async fn messages_to_a_parted_channel_are_discarded() {
    let reg = registry();
    let net = Network::start().await;
    let (id, mut peer, mut rx) = connect_alice(&reg, &net).await;
    drain_join(&mut rx).await;

    reg.part_channel(&id, &net.name, "#room", "aIRChat client parted.").await;
    assert_eq!(peer.expect().await, "PART #room :aIRChat client parted.");
    peer.send(":alice!u@h PART #room :aIRChat client parted.").await;
    match next_event(&mut rx).await {
        ServerEvent::UserLeft { channel, nick, .. } => {
            assert_eq!((channel.as_str(), nick.as_str()), ("#room", "alice"));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    reg.send_message(&id, &net.name, "#room", "ghost").await;
    reg.send_message(&id, &net.name, "bob", "marker").await;
    assert_eq!(peer.expect().await, "PRIVMSG bob :marker");
}

#[tokio::test]
async fn kicked_channel_still_accepts_messages() {
    let reg = registry();
    let net = Network::start().await;
    let (id, mut peer, mut rx) = connect_alice(&reg, &net).await;
    drain_join(&mut rx).await;

    peer.send(":bob!u@h KICK #room alice :behave").await;
    assert_eq!(
        next_event(&mut rx).await,
        ServerEvent::UserKicked {
            network: net.name.clone(),
            channel: "#room".into(),
            nick: "alice".into(),
            by: "bob".into(),
            reason: "behave".into(),
        }
    );

    reg.send_message(&id, &net.name, "#room", "still here").await;
    assert_eq!(peer.expect().await, "PRIVMSG #room :still here");
}

// ── Inbound relay ────────────────────────────────────────────────────

#[tokio::test]
async fn failed_profile_lookup_drops_roster_but_not_messages() {
    let reg = SessionRegistry::new(&config(), Arc::new(BrokenProfiles));
    let net = Network::start().await;
    let (_id, mut peer, mut rx) = connect_alice(&reg, &net).await;

    peer.send(":bob!u@h PRIVMSG #room :<hello>").await;
    assert_eq!(
        next_event(&mut rx).await,
        ServerEvent::LowPriorityMessage {
            network: net.name.clone(),
            channel: "#room".into(),
            from: "bob".into(),
            message: "&lt;hello&gt;".into(),
        }
    );
}

#[tokio::test]
async fn unreachable_network_reports_protocol_error() {
    let reg = registry();
    let id = reg.create_session("alice").await.unwrap();
    // Bind then drop to get a port nobody listens on.
    let name = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let (tx, mut rx) = mpsc::unbounded_channel();
    reg.join(&id, &name, "alice", "#room", tx).await;

    match next_event(&mut rx).await {
        ServerEvent::ProtocolError { network, .. } => assert_eq!(network, name),
        other => panic!("unexpected event: {other:?}"),
    }
}
