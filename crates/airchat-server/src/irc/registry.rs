/// Session registry: maps session identifiers to their protocol
/// connections.
///
/// A session is created at login and owns at most one connection per
/// network. Client commands name their session and network; anything that
/// names an unknown session or network is dropped without a reply. Logout
/// tears every connection down before it returns.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::connection::{self, ConnectionCommand, ConnectionContext, ConnectionHandle, RelaySender};
use super::profile::ProfileProvider;
use super::wire::ClientCommand;
use crate::config::GatewayConfig;
use crate::metrics;

/// Characters a session identifier is drawn from.
const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
/// Session identifier length.
pub const SESSION_ID_LEN: usize = 128;
/// QUIT message sent when a session logs out.
pub const LOGOUT_MESSAGE: &str = "Connection to server closed.";

/// Opaque bearer token naming a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Fresh identifier from the OS random source.
    pub fn generate() -> Result<Self, RegistryError> {
        let mut bytes = [0u8; SESSION_ID_LEN];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| RegistryError::Entropy(e.to_string()))?;
        let id = bytes
            .iter()
            .map(|b| ALPHABET[*b as usize % ALPHABET.len()] as char)
            .collect();
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix safe to log; the full identifier is a credential.
    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(8).map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown session")]
    UnknownSession,
    #[error("random source unavailable: {0}")]
    Entropy(String),
}

#[derive(Debug)]
struct Session {
    username: String,
    connections: HashMap<String, ConnectionHandle>,
    /// Set by logout; a closed session accepts no new connections.
    closed: bool,
}

/// Settings every new connection inherits.
#[derive(Clone)]
struct ConnectionDefaults {
    profiles: Arc<dyn ProfileProvider>,
    default_picture: String,
    irc_port: u16,
    shutdown_grace: Duration,
}

/// Shared, cloneable registry of live sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>>,
    defaults: ConnectionDefaults,
}

impl SessionRegistry {
    pub fn new(config: &GatewayConfig, profiles: Arc<dyn ProfileProvider>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            defaults: ConnectionDefaults {
                profiles,
                default_picture: config.default_picture.clone(),
                irc_port: config.irc_port,
                shutdown_grace: config.shutdown_grace,
            },
        }
    }

    /// Register a new session for `username` and return its identifier.
    pub async fn create_session(&self, username: &str) -> Result<SessionId, RegistryError> {
        let mut sessions = self.sessions.write().await;
        let id = loop {
            let id = SessionId::generate()?;
            if !sessions.contains_key(&id) {
                break id;
            }
        };
        sessions.insert(
            id.clone(),
            Arc::new(Mutex::new(Session {
                username: username.to_string(),
                connections: HashMap::new(),
                closed: false,
            })),
        );
        metrics::sessions_active(sessions.len());
        info!(session = %id.short(), %username, "session created");
        Ok(id)
    }

    async fn session(&self, id: &SessionId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &SessionId) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Login name the session was created for.
    pub async fn username(&self, id: &SessionId) -> Option<String> {
        let session = self.session(id).await?;
        let username = session.lock().await.username.clone();
        Some(username)
    }

    /// Networks the session has a connection to, sorted.
    pub async fn networks(&self, id: &SessionId) -> Option<Vec<String>> {
        let session = self.session(id).await?;
        let mut networks: Vec<String> = session.lock().await.connections.keys().cloned().collect();
        networks.sort();
        Some(networks)
    }

    /// Open a connection to `network` for the session, relaying its events
    /// to `relay`. A session already connected to `network` keeps its
    /// existing connection.
    pub async fn join(&self, id: &SessionId, network: &str, nick: &str, first_channel: &str, relay: RelaySender) {
        let Some(session) = self.session(id).await else {
            debug!(session = %id.short(), %network, "connect for unknown session dropped");
            metrics::command_dropped("unknown_session");
            return;
        };
        let mut session = session.lock().await;
        if session.closed {
            metrics::command_dropped("unknown_session");
            return;
        }
        if session.connections.contains_key(network) {
            debug!(session = %id.short(), %network, "already connected");
            return;
        }

        info!(session = %id.short(), %network, %nick, "opening connection");
        let handle = connection::spawn(
            network,
            nick,
            first_channel,
            ConnectionContext {
                relay,
                profiles: self.defaults.profiles.clone(),
                default_picture: self.defaults.default_picture.clone(),
                irc_port: self.defaults.irc_port,
            },
        );
        session.connections.insert(network.to_string(), handle);
    }

    /// Forward a command to the session's connection on `network`.
    async fn route(&self, id: &SessionId, network: &str, cmd: ConnectionCommand) {
        let Some(session) = self.session(id).await else {
            debug!(session = %id.short(), %network, "command for unknown session dropped");
            metrics::command_dropped("unknown_session");
            return;
        };
        let session = session.lock().await;
        match session.connections.get(network) {
            Some(conn) => {
                if !conn.send(cmd) {
                    debug!(session = %id.short(), %network, "connection has ended, command dropped");
                    metrics::command_dropped("connection_closed");
                }
            }
            None => {
                debug!(session = %id.short(), %network, "command for unknown network dropped");
                metrics::command_dropped("unknown_network");
            }
        }
    }

    pub async fn join_channel(&self, id: &SessionId, network: &str, channel: &str) {
        self.route(id, network, ConnectionCommand::Join { channel: channel.to_string() })
            .await;
    }

    pub async fn part_channel(&self, id: &SessionId, network: &str, channel: &str, message: &str) {
        self.route(
            id,
            network,
            ConnectionCommand::Part {
                channel: channel.to_string(),
                message: message.to_string(),
            },
        )
        .await;
    }

    pub async fn send_message(&self, id: &SessionId, network: &str, destination: &str, message: &str) {
        self.route(
            id,
            network,
            ConnectionCommand::Say {
                target: destination.to_string(),
                text: message.to_string(),
            },
        )
        .await;
    }

    pub async fn change_nick(&self, id: &SessionId, network: &str, nick: &str) {
        self.route(id, network, ConnectionCommand::Nick { nick: nick.to_string() })
            .await;
    }

    pub async fn raw_command(&self, id: &SessionId, network: &str, args: Vec<String>) {
        self.route(id, network, ConnectionCommand::Raw { args }).await;
    }

    /// Execute one client command. `relay` receives the events of any
    /// connection the command opens.
    pub async fn dispatch(&self, cmd: ClientCommand, relay: &RelaySender) {
        match cmd {
            ClientCommand::ConnectNetwork { network, nick, first_channel, session_id } => {
                self.join(&session_id, &network, &nick, &first_channel, relay.clone())
                    .await
            }
            ClientCommand::JoinChannel { network, channel, session_id } => {
                self.join_channel(&session_id, &network, &channel).await
            }
            ClientCommand::PartChannel { network, channel, message, session_id } => {
                self.part_channel(&session_id, &network, &channel, &message).await
            }
            ClientCommand::SendMessage { network, destination, message, session_id } => {
                self.send_message(&session_id, &network, &destination, &message)
                    .await
            }
            ClientCommand::ChangeNick { network, nick, session_id } => {
                self.change_nick(&session_id, &network, &nick).await
            }
            ClientCommand::RawCommand { network, args, session_id } => {
                self.raw_command(&session_id, &network, args).await
            }
        }
    }

    /// Disconnect every connection of the session and discard it. When this
    /// returns no connection of the session is still running.
    pub async fn logout(&self, id: &SessionId) -> Result<(), RegistryError> {
        let session = {
            let mut sessions = self.sessions.write().await;
            let session = sessions.remove(id).ok_or(RegistryError::UnknownSession)?;
            metrics::sessions_active(sessions.len());
            session
        };

        let connections: Vec<ConnectionHandle> = {
            let mut session = session.lock().await;
            session.closed = true;
            session.connections.drain().map(|(_, conn)| conn).collect()
        };

        let count = connections.len();
        let grace = self.defaults.shutdown_grace;
        futures::future::join_all(
            connections
                .into_iter()
                .map(|conn| conn.shutdown(LOGOUT_MESSAGE, grace)),
        )
        .await;

        info!(session = %id.short(), connections = count, "session logged out");
        Ok(())
    }

    /// Log out every session; used at process shutdown.
    pub async fn shutdown_all(&self) {
        let ids: Vec<SessionId> = self.sessions.read().await.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.logout(&id).await {
                warn!(session = %id.short(), "logout during shutdown failed: {e}");
            }
        }
    }
}
