//! Relay wire protocol: JSON over WebSocket.
//!
//! Each WebSocket text frame carries one tagged JSON object. Commands flow
//! from the browser to the gateway; events flow back, each tagged with the
//! network it came from. The set of kinds in both directions is closed.

use serde::{Deserialize, Serialize};

use super::registry::SessionId;

/// Commands from a client to the gateway.
///
/// Every command names the session it acts for. A command for a session or
/// network the registry does not know is dropped without a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    ConnectNetwork {
        network: String,
        nick: String,
        first_channel: String,
        session_id: SessionId,
    },
    JoinChannel {
        network: String,
        channel: String,
        session_id: SessionId,
    },
    PartChannel {
        network: String,
        channel: String,
        message: String,
        session_id: SessionId,
    },
    SendMessage {
        network: String,
        destination: String,
        message: String,
        session_id: SessionId,
    },
    ChangeNick {
        network: String,
        nick: String,
        session_id: SessionId,
    },
    RawCommand {
        network: String,
        args: Vec<String>,
        session_id: SessionId,
    },
}

impl ClientCommand {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::ConnectNetwork { session_id, .. }
            | Self::JoinChannel { session_id, .. }
            | Self::PartChannel { session_id, .. }
            | Self::SendMessage { session_id, .. }
            | Self::ChangeNick { session_id, .. }
            | Self::RawCommand { session_id, .. } => session_id,
        }
    }

    pub fn network(&self) -> &str {
        match self {
            Self::ConnectNetwork { network, .. }
            | Self::JoinChannel { network, .. }
            | Self::PartChannel { network, .. }
            | Self::SendMessage { network, .. }
            | Self::ChangeNick { network, .. }
            | Self::RawCommand { network, .. } => network,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// One participant in a roster event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub nick: String,
    pub bio: String,
    pub contact: String,
    pub picture: String,
    pub network: String,
}

/// Events from the gateway to a client.
///
/// `message` and `reason` fields are already escaped for HTML; clients
/// render them as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// A message to a channel.
    LowPriorityMessage {
        network: String,
        channel: String,
        from: String,
        message: String,
    },
    /// A message addressed to the viewer directly.
    HighPriorityMessage {
        network: String,
        from: String,
        message: String,
    },
    /// Registration on the network completed as `nick`.
    Connected { network: String, nick: String },
    Roster {
        network: String,
        channel: String,
        users: Vec<RosterEntry>,
    },
    UserJoined {
        network: String,
        channel: String,
        nick: String,
        picture: String,
    },
    UserKicked {
        network: String,
        channel: String,
        nick: String,
        by: String,
        reason: String,
    },
    NickChanged {
        network: String,
        channel: String,
        old: String,
        new: String,
    },
    Invited {
        network: String,
        target_channel: String,
        by: String,
    },
    UserLeft {
        network: String,
        channel: String,
        nick: String,
        reason: String,
    },
    ProtocolError { network: String, details: String },
}

impl ServerEvent {
    pub fn network(&self) -> &str {
        match self {
            Self::LowPriorityMessage { network, .. }
            | Self::HighPriorityMessage { network, .. }
            | Self::Connected { network, .. }
            | Self::Roster { network, .. }
            | Self::UserJoined { network, .. }
            | Self::UserKicked { network, .. }
            | Self::NickChanged { network, .. }
            | Self::Invited { network, .. }
            | Self::UserLeft { network, .. }
            | Self::ProtocolError { network, .. } => network,
        }
    }

    /// Stable label for logs and metrics; matches the JSON `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LowPriorityMessage { .. } => "low-priority-message",
            Self::HighPriorityMessage { .. } => "high-priority-message",
            Self::Connected { .. } => "connected",
            Self::Roster { .. } => "roster",
            Self::UserJoined { .. } => "user-joined",
            Self::UserKicked { .. } => "user-kicked",
            Self::NickChanged { .. } => "nick-changed",
            Self::Invited { .. } => "invited",
            Self::UserLeft { .. } => "user-left",
            Self::ProtocolError { .. } => "protocol-error",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
