/// Protocol connection: one live IRC client connection owned by a session.
///
/// `spawn` opens the TCP connection, registers, joins the first channel and
/// then drives a single task that both reads the network and executes
/// commands from the session. Inbound lines are translated by
/// [`ProtocolState`] into relay events tagged with the network name; free
/// text is escaped before it leaves. Roster and join events wait for a
/// profile lookup and are dropped if it fails.
///
/// Nothing is retried: a dropped socket or failed write ends the task.
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::codec::IrcCodec;
use super::message::Message;
use super::profile::{Profile, ProfileProvider};
use super::sanitize::sanitize;
use super::wire::{RosterEntry, ServerEvent};
use crate::metrics;

/// Outbound half of a session's relay channel.
pub type RelaySender = mpsc::UnboundedSender<ServerEvent>;

/// `USER` realname sent at registration.
const REALNAME: &str = "Airchat User";
/// Ident prefix; the full ident is `airchat_<nick>`.
const IDENT_PREFIX: &str = "airchat_";

/// Case-insensitive IRC name comparison (CASEMAPPING=ascii).
pub(crate) fn irc_lower(s: &str) -> String {
    s.to_ascii_lowercase()
}

/// Channel targets start with `#` or `&`; anything else is a nick.
pub fn is_channel(target: &str) -> bool {
    target.starts_with('#') || target.starts_with('&')
}

/// A middle param must be one word that cannot be mistaken for the
/// trailing param.
fn is_word(param: &str) -> bool {
    !param.is_empty() && !param.starts_with(':') && !param.contains([' ', '\r', '\n', '\0'])
}

/// A single channel or nick; comma lists would address several targets.
fn is_target(param: &str) -> bool {
    is_word(param) && !param.contains(',')
}

/// Socket address for a network name: `host`, `host:port`, `[v6]:port`.
pub fn network_addr(network: &str, default_port: u16) -> String {
    if network.parse::<SocketAddr>().is_ok() {
        return network.to_string();
    }
    match network.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => {
            network.to_string()
        }
        _ if network.contains(':') => format!("[{network}]:{default_port}"),
        _ => format!("{network}:{default_port}"),
    }
}

/// Commands from the session to a running connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionCommand {
    Join { channel: String },
    Part { channel: String, message: String },
    Say { target: String, text: String },
    Nick { nick: String },
    Raw { args: Vec<String> },
    /// Send QUIT with the message and end the task.
    Disconnect { message: String },
}

/// What the connection task should do in response to one inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Relay to the client as-is.
    Relay(ServerEvent),
    /// Write back to the network.
    Reply(Message),
    /// Look up profiles for `nicks`, then relay the roster.
    Roster { channel: String, nicks: Vec<String> },
    /// Look up `nick`'s profile, then relay the join.
    Joined { channel: String, nick: String },
}

/// Protocol bookkeeping for one connection.
///
/// Tracks the current nick, registration, and the members of every joined
/// channel. Membership is what lets NICK and QUIT, which name no channel,
/// fan out one relay event per shared channel.
#[derive(Debug)]
pub struct ProtocolState {
    network: String,
    nick: String,
    first_channel: Option<String>,
    registered: bool,
    /// Joined channels keyed by lowercased name: (display name, members).
    channels: HashMap<String, (String, HashSet<String>)>,
    /// NAMES replies collected until end-of-names.
    pending_names: HashMap<String, Vec<String>>,
    /// Commands received before registration finished.
    pre_registration: Vec<ConnectionCommand>,
}

impl ProtocolState {
    pub fn new(network: &str, nick: &str, first_channel: &str) -> Self {
        Self {
            network: network.to_string(),
            nick: nick.to_string(),
            first_channel: Some(first_channel.to_string()).filter(|c| !c.is_empty()),
            registered: false,
            channels: HashMap::new(),
            pending_names: HashMap::new(),
            pre_registration: Vec::new(),
        }
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn is_joined(&self, channel: &str) -> bool {
        self.channels.contains_key(&irc_lower(channel))
    }

    /// Lines that open the connection.
    pub fn registration(&self) -> Vec<Message> {
        vec![
            Message::new("NICK", vec![self.nick.clone()]),
            Message::new(
                "USER",
                vec![
                    format!("{IDENT_PREFIX}{}", self.nick),
                    "0".into(),
                    "*".into(),
                    REALNAME.into(),
                ],
            ),
        ]
    }

    fn is_self(&self, nick: &str) -> bool {
        irc_lower(nick) == irc_lower(&self.nick)
    }

    fn relay(&self, event: impl FnOnce(String) -> ServerEvent) -> Inbound {
        Inbound::Relay(event(self.network.clone()))
    }

    /// Translate one inbound line.
    pub fn on_message(&mut self, msg: &Message) -> Vec<Inbound> {
        let source = msg.source_nick().unwrap_or_default().to_string();
        let p = |i: usize| msg.param(i).unwrap_or_default().to_string();

        match msg.command.as_str() {
            "PING" => vec![Inbound::Reply(Message::new("PONG", vec![p(0)]))],

            "001" => {
                self.registered = true;
                if let Some(nick) = msg.param(0) {
                    self.nick = nick.to_string();
                }
                let nick = self.nick.clone();
                let mut out = vec![self.relay(|network| ServerEvent::Connected { network, nick })];
                if let Some(channel) = self.first_channel.take() {
                    out.push(Inbound::Reply(Message::new("JOIN", vec![channel])));
                }
                out
            }

            "433" if !self.registered => {
                self.nick.push('_');
                warn!(network = %self.network, nick = %self.nick, "nick in use, retrying");
                vec![Inbound::Reply(Message::new("NICK", vec![self.nick.clone()]))]
            }

            "PRIVMSG" => {
                let target = p(0);
                let message = sanitize(&p(1));
                let from = source;
                if self.is_self(&target) {
                    vec![self.relay(|network| ServerEvent::HighPriorityMessage { network, from, message })]
                } else {
                    vec![self.relay(|network| ServerEvent::LowPriorityMessage {
                        network,
                        channel: target,
                        from,
                        message,
                    })]
                }
            }

            "353" => {
                let channel = p(2);
                let names = msg
                    .param(3)
                    .unwrap_or_default()
                    .split_whitespace()
                    .map(|n| n.trim_start_matches(['~', '&', '@', '%', '+']).to_string())
                    .filter(|n| !n.is_empty());
                self.pending_names.entry(irc_lower(&channel)).or_default().extend(names);
                Vec::new()
            }

            "366" => {
                let channel = p(1);
                let nicks = self.pending_names.remove(&irc_lower(&channel)).unwrap_or_default();
                if let Some((_, members)) = self.channels.get_mut(&irc_lower(&channel)) {
                    members.extend(nicks.iter().cloned());
                }
                vec![Inbound::Roster { channel, nicks }]
            }

            "JOIN" => {
                let channel = p(0);
                let key = irc_lower(&channel);
                if self.is_self(&source) {
                    self.channels
                        .entry(key)
                        .or_insert_with(|| (channel.clone(), HashSet::new()))
                        .1
                        .insert(source.clone());
                } else if let Some((_, members)) = self.channels.get_mut(&key) {
                    members.insert(source.clone());
                }
                vec![Inbound::Joined { channel, nick: source }]
            }

            "PART" => {
                let channel = p(0);
                let key = irc_lower(&channel);
                if self.is_self(&source) {
                    self.channels.remove(&key);
                } else if let Some((_, members)) = self.channels.get_mut(&key) {
                    members.remove(&source);
                }
                let reason = sanitize(&p(1));
                vec![self.relay(|network| ServerEvent::UserLeft {
                    network,
                    channel,
                    nick: source,
                    reason,
                })]
            }

            "QUIT" => {
                let reason = sanitize(&p(0));
                let mut out = Vec::new();
                for (name, members) in self.channels.values_mut() {
                    if members.remove(&source) {
                        out.push(Inbound::Relay(ServerEvent::UserLeft {
                            network: self.network.clone(),
                            channel: name.clone(),
                            nick: source.clone(),
                            reason: reason.clone(),
                        }));
                    }
                }
                out
            }

            "KICK" => {
                let channel = p(0);
                let nick = p(1);
                // A kicked viewer stays in the joined set; sends to the
                // channel keep flowing until it is parted.
                if !self.is_self(&nick) {
                    if let Some((_, members)) = self.channels.get_mut(&irc_lower(&channel)) {
                        members.remove(&nick);
                    }
                }
                let reason = sanitize(&p(2));
                vec![self.relay(|network| ServerEvent::UserKicked {
                    network,
                    channel,
                    nick,
                    by: source,
                    reason,
                })]
            }

            "NICK" => {
                let new = p(0);
                if self.is_self(&source) {
                    self.nick = new.clone();
                }
                let mut out = Vec::new();
                for (name, members) in self.channels.values_mut() {
                    if members.remove(&source) {
                        members.insert(new.clone());
                        out.push(Inbound::Relay(ServerEvent::NickChanged {
                            network: self.network.clone(),
                            channel: name.clone(),
                            old: source.clone(),
                            new: new.clone(),
                        }));
                    }
                }
                out
            }

            "INVITE" => {
                let target_channel = p(1);
                vec![self.relay(|network| ServerEvent::Invited {
                    network,
                    target_channel,
                    by: source,
                })]
            }

            "ERROR" => {
                let details = sanitize(&msg.params.join(" "));
                vec![self.relay(|network| ServerEvent::ProtocolError { network, details })]
            }

            _ => match msg.numeric() {
                Some(400..=599) => {
                    // First param is our own nick; the rest describes the error.
                    let rest = msg.params.get(1..).unwrap_or_default().join(" ");
                    let details = sanitize(&format!("{} {rest}", msg.command));
                    vec![self.relay(|network| ServerEvent::ProtocolError { network, details })]
                }
                _ => Vec::new(),
            },
        }
    }

    /// Turn a session command into an outbound line. `None` means the
    /// command was held for later or discarded.
    pub fn on_command(&mut self, cmd: ConnectionCommand) -> Option<Message> {
        if !self.registered && !matches!(cmd, ConnectionCommand::Disconnect { .. }) {
            self.pre_registration.push(cmd);
            return None;
        }

        match cmd {
            ConnectionCommand::Join { channel } => {
                if !self.accepts("JOIN", &[channel.as_str()], is_target) {
                    return None;
                }
                if self.is_joined(&channel) {
                    debug!(network = %self.network, %channel, "already joined");
                    return None;
                }
                Some(Message::new("JOIN", vec![channel]))
            }
            ConnectionCommand::Part { channel, message } => {
                if !self.accepts("PART", &[channel.as_str()], is_target) {
                    return None;
                }
                Some(Message::new("PART", vec![channel, message]))
            }
            ConnectionCommand::Say { target, text } => {
                if !self.accepts("PRIVMSG", &[target.as_str()], is_target) {
                    return None;
                }
                if is_channel(&target) && !self.is_joined(&target) {
                    debug!(network = %self.network, %target, "dropping message to unjoined channel");
                    metrics::command_dropped("not_joined");
                    return None;
                }
                Some(Message::new("PRIVMSG", vec![target, text]))
            }
            ConnectionCommand::Nick { nick } => {
                if !self.accepts("NICK", &[nick.as_str()], is_target) {
                    return None;
                }
                Some(Message::new("NICK", vec![nick]))
            }
            ConnectionCommand::Raw { mut args } => {
                if args.is_empty() {
                    return None;
                }
                let command = args.remove(0).to_ascii_uppercase();
                // The last arg goes out as trailing text; the rest are words.
                let middle: Vec<&str> = match args.split_last() {
                    Some((_, init)) => init.iter().map(String::as_str).collect(),
                    None => Vec::new(),
                };
                if !self.accepts(&command, &[command.as_str()], is_word)
                    || !self.accepts(&command, &middle, is_word)
                {
                    return None;
                }
                Some(Message::new(command, args))
            }
            ConnectionCommand::Disconnect { message } => Some(Message::new("QUIT", vec![message])),
        }
    }

    /// Check the word-shaped params of an outbound command.
    fn accepts(&self, command: &str, params: &[&str], valid: fn(&str) -> bool) -> bool {
        match params.iter().copied().find(|p| !valid(p)) {
            Some(bad) => {
                debug!(network = %self.network, %command, param = %bad.escape_debug(), "dropping command with malformed param");
                metrics::command_dropped("malformed_param");
                false
            }
            None => true,
        }
    }

    /// Commands held back until registration; empty until then.
    pub fn take_pre_registration(&mut self) -> Vec<ConnectionCommand> {
        if self.registered {
            std::mem::take(&mut self.pre_registration)
        } else {
            Vec::new()
        }
    }
}

/// Everything a connection needs from its surroundings.
#[derive(Clone)]
pub struct ConnectionContext {
    pub relay: RelaySender,
    pub profiles: Arc<dyn ProfileProvider>,
    pub default_picture: String,
    pub irc_port: u16,
}

/// Handle for a running connection task.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub network: String,
    cmd_tx: mpsc::UnboundedSender<ConnectionCommand>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    /// Queue a command. Returns false if the task has already ended.
    pub fn send(&self, cmd: ConnectionCommand) -> bool {
        self.cmd_tx.send(cmd).is_ok()
    }

    /// Send QUIT and wait for the task to end, aborting it after `grace`.
    /// Once this returns the connection emits nothing further.
    pub async fn shutdown(mut self, message: &str, grace: Duration) {
        let _ = self.cmd_tx.send(ConnectionCommand::Disconnect {
            message: message.to_string(),
        });
        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            warn!(network = %self.network, "connection did not close in time, aborting");
            self.task.abort();
            let _ = self.task.await;
        }
    }
}

/// Start a connection to `network` as `nick`, joining `first_channel` once
/// registered.
pub fn spawn(network: &str, nick: &str, first_channel: &str, ctx: ConnectionContext) -> ConnectionHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let state = ProtocolState::new(network, nick, first_channel);
    let task = tokio::spawn(connection_task(state, cmd_rx, ctx));
    ConnectionHandle {
        network: network.to_string(),
        cmd_tx,
        task,
    }
}

/// Keeps the active-connections gauge right even when the task is aborted.
struct ActiveGuard;

impl ActiveGuard {
    fn new() -> Self {
        metrics::connection_opened();
        Self
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        metrics::connection_closed();
    }
}

fn emit(relay: &RelaySender, event: ServerEvent) {
    metrics::relay_event(event.kind());
    // A closed relay means the client went away; events are not buffered.
    let _ = relay.send(event);
}

async fn connection_task(
    mut state: ProtocolState,
    mut cmd_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    ctx: ConnectionContext,
) {
    let _active = ActiveGuard::new();
    let network = state.network.clone();
    let addr = network_addr(&network, ctx.irc_port);
    info!(%network, nick = %state.nick(), "connecting to {addr}");

    let stream = match TcpStream::connect(&addr).await {
        Ok(s) => s,
        Err(e) => {
            warn!(%network, "connect to {addr} failed: {e}");
            emit(
                &ctx.relay,
                ServerEvent::ProtocolError {
                    network,
                    details: sanitize(&format!("could not connect to {addr}: {e}")),
                },
            );
            return;
        }
    };

    let mut framed = Framed::new(stream, IrcCodec::new());
    for line in state.registration() {
        if let Err(e) = framed.send(line).await {
            warn!(%network, "registration write failed: {e}");
            return;
        }
    }

    // Profile lookups in flight; dropped (and aborted) with the task.
    let mut lookups: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            frame = framed.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!(%network, "read error: {e}");
                        emit(&ctx.relay, ServerEvent::ProtocolError {
                            network: network.clone(),
                            details: sanitize(&format!("connection lost: {e}")),
                        });
                        break;
                    }
                    None => {
                        info!(%network, "network closed the connection");
                        emit(&ctx.relay, ServerEvent::ProtocolError {
                            network: network.clone(),
                            details: "connection closed by server".into(),
                        });
                        break;
                    }
                };

                let was_registered = state.is_registered();
                let mut writes = Vec::new();
                for action in state.on_message(&msg) {
                    match action {
                        Inbound::Relay(event) => emit(&ctx.relay, event),
                        Inbound::Reply(line) => writes.push(line),
                        Inbound::Roster { channel, nicks } => {
                            lookups.spawn(relay_roster(ctx.clone(), network.clone(), channel, nicks));
                        }
                        Inbound::Joined { channel, nick } => {
                            lookups.spawn(relay_join(ctx.clone(), network.clone(), channel, nick));
                        }
                    }
                }
                if !was_registered && state.is_registered() {
                    info!(%network, nick = %state.nick(), "registered");
                    for cmd in state.take_pre_registration() {
                        writes.extend(state.on_command(cmd));
                    }
                }
                for line in writes {
                    if let Err(e) = framed.send(line).await {
                        warn!(%network, "write failed: {e}");
                        return;
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                let cmd = cmd.unwrap_or_else(|| ConnectionCommand::Disconnect {
                    message: "Connection to server closed.".into(),
                });
                let closing = matches!(cmd, ConnectionCommand::Disconnect { .. });
                if let Some(line) = state.on_command(cmd) {
                    if let Err(e) = framed.send(line).await {
                        warn!(%network, "write failed: {e}");
                        return;
                    }
                }
                if closing {
                    info!(%network, "disconnected");
                    return;
                }
            }

            Some(_) = lookups.join_next(), if !lookups.is_empty() => {}
        }
    }
}

fn roster_entries(network: &str, nicks: &[String], found: Vec<Profile>, default_picture: &str) -> Vec<RosterEntry> {
    let mut by_nick: HashMap<String, Profile> = found.into_iter().map(|p| (p.nick.clone(), p)).collect();
    nicks
        .iter()
        .map(|nick| {
            let profile = by_nick
                .remove(nick)
                .unwrap_or_else(|| Profile::placeholder(nick, default_picture));
            RosterEntry {
                nick: nick.clone(),
                bio: sanitize(&profile.bio),
                contact: sanitize(&profile.contact),
                picture: profile.picture,
                network: network.to_string(),
            }
        })
        .collect()
}

async fn relay_roster(ctx: ConnectionContext, network: String, channel: String, nicks: Vec<String>) {
    match ctx.profiles.profile_info(&nicks).await {
        Ok(found) => {
            let users = roster_entries(&network, &nicks, found, &ctx.default_picture);
            emit(&ctx.relay, ServerEvent::Roster { network, channel, users });
        }
        Err(e) => {
            warn!(%network, %channel, "profile lookup failed, dropping roster: {e}");
            metrics::profile_lookup_failed();
        }
    }
}

async fn relay_join(ctx: ConnectionContext, network: String, channel: String, nick: String) {
    match ctx.profiles.profile_info(std::slice::from_ref(&nick)).await {
        Ok(found) => {
            let picture = found
                .into_iter()
                .next()
                .map(|p| p.picture)
                .unwrap_or_else(|| ctx.default_picture.clone());
            emit(&ctx.relay, ServerEvent::UserJoined { network, channel, nick, picture });
        }
        Err(e) => {
            warn!(%network, %channel, %nick, "profile lookup failed, dropping join: {e}");
            metrics::profile_lookup_failed();
        }
    }
}
