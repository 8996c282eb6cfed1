/// Client state machine.
///
/// Folds relay events into the chat models one at a time and produces the
/// commands for operations the viewer starts. Outbound operations update
/// local state optimistically and return the command to send; nothing
/// waits for an acknowledgement.
///
/// Events for chats that do not exist are ignored: the viewer may have
/// closed the chat while the event was in flight.
use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use airchat_server::irc::registry::SessionId;
use airchat_server::irc::sanitize::sanitize;
use airchat_server::irc::wire::{ClientCommand, RosterEntry, ServerEvent};

use crate::alert::TitleAlert;
use crate::chat::{Chat, ChatKey, Highlight, Line};
use crate::error::ClientError;
use crate::invite::PendingInvite;
use crate::notify::{self, Priority};
use crate::user::{SYSTEM_NICK, User};

/// Part message sent when the viewer closes a channel.
pub const PART_MESSAGE: &str = "aIRChat client parted.";

pub struct ClientState {
    session_id: SessionId,
    username: String,
    default_picture: String,
    /// The viewer's nick on each network.
    nicks: HashMap<String, String>,
    chats: HashMap<ChatKey, Chat>,
    /// Chat keys in the order their tabs were opened.
    tabs: Vec<ChatKey>,
    active: Option<ChatKey>,
    focused: bool,
    alert: TitleAlert,
    invites: VecDeque<PendingInvite>,
    errors: Vec<(String, String)>,
}

impl ClientState {
    pub fn new(session_id: SessionId, username: &str, default_picture: &str) -> Self {
        Self {
            session_id,
            username: username.to_string(),
            default_picture: default_picture.to_string(),
            nicks: HashMap::new(),
            chats: HashMap::new(),
            tabs: Vec::new(),
            active: None,
            focused: true,
            alert: TitleAlert::default(),
            invites: VecDeque::new(),
            errors: Vec::new(),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn nick(&self, network: &str) -> Option<&str> {
        self.nicks.get(network).map(String::as_str)
    }

    pub fn chat(&self, network: &str, name: &str) -> Option<&Chat> {
        self.chats.get(&ChatKey::new(network, name))
    }

    /// Chats in tab order.
    pub fn chats(&self) -> impl Iterator<Item = &Chat> {
        self.tabs.iter().filter_map(|k| self.chats.get(k))
    }

    pub fn active(&self) -> Option<&Chat> {
        self.active.as_ref().and_then(|k| self.chats.get(k))
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub fn alert(&self) -> &TitleAlert {
        &self.alert
    }

    /// Oldest invitation still waiting for a decision.
    pub fn pending_invite(&self) -> Option<&PendingInvite> {
        self.invites.front()
    }

    /// Protocol errors reported so far, as (network, details).
    pub fn errors(&self) -> &[(String, String)] {
        &self.errors
    }

    // ── Presentation hooks ───────────────────────────────────────────

    /// Make `key` the active chat and clear its counters. Returns false if
    /// no such chat exists.
    pub fn activate(&mut self, key: &ChatKey) -> bool {
        if !self.chats.contains_key(key) {
            return false;
        }
        for chat in self.chats.values_mut() {
            let active = &chat.key == key;
            chat.set_active(active);
        }
        self.active = Some(key.clone());
        true
    }

    pub fn focus(&mut self) {
        self.focused = true;
        self.alert.stop();
    }

    pub fn blur(&mut self) {
        self.focused = false;
    }

    /// Advance the title alert one period; returns the title to show.
    pub fn tick(&mut self) -> &'static str {
        self.alert.tick()
    }

    pub fn take_invite(&mut self) -> Option<PendingInvite> {
        self.invites.pop_front()
    }

    // ── Inbound events ───────────────────────────────────────────────

    pub fn apply(&mut self, event: ServerEvent) {
        self.apply_at(event, Utc::now());
    }

    /// Apply one relay event as if it arrived at `at`.
    pub fn apply_at(&mut self, event: ServerEvent, at: DateTime<Utc>) {
        match event {
            ServerEvent::Connected { network, nick } => {
                self.nicks.insert(network, nick);
            }
            ServerEvent::Roster { network, channel, users } => self.on_roster(&network, &channel, &users),
            ServerEvent::UserJoined { network, channel, nick, picture } => {
                self.on_joined(&network, &channel, &nick, &picture, at)
            }
            ServerEvent::UserLeft { network, channel, nick, .. } => {
                let key = ChatKey::new(&network, &channel);
                if let Some(chat) = self.chats.get_mut(&key) {
                    chat.roster.remove(&nick);
                    self.notice(&key, format!("{} has parted from this channel.", sanitize(&nick)), at);
                }
            }
            ServerEvent::NickChanged { network, channel, old, new } => {
                if self.nick(&network) == Some(old.as_str()) {
                    self.nicks.insert(network.clone(), new.clone());
                }
                let key = ChatKey::new(&network, &channel);
                if let Some(chat) = self.chats.get_mut(&key) {
                    chat.roster.rename(&old, &new);
                    self.notice(&key, format!("{} has changed their nick to {}.", sanitize(&old), sanitize(&new)), at);
                }
            }
            ServerEvent::LowPriorityMessage { network, channel, from, message } => {
                let key = ChatKey::new(&network, &channel);
                if !self.chats.contains_key(&key) {
                    debug!(%network, %channel, "message for unknown chat ignored");
                    return;
                }
                let priority = notify::channel_priority(&message, self.nick(&network));
                self.on_message(&key, &from, message, priority, at);
            }
            ServerEvent::HighPriorityMessage { network, from, message } => {
                let key = ChatKey::new(&network, &from);
                if !self.chats.contains_key(&key) {
                    self.open_chat(&key);
                    let peer = User::new(&from, &self.default_picture, &network);
                    if let Some(chat) = self.chats.get_mut(&key) {
                        chat.roster.insert(peer);
                    }
                }
                self.on_message(&key, &from, message, Priority::High, at);
            }
            ServerEvent::Invited { network, target_channel, by } => {
                self.invites.push_back(PendingInvite {
                    network,
                    channel: target_channel,
                    by,
                });
            }
            ServerEvent::UserKicked { network, channel, nick, by, reason } => {
                let key = ChatKey::new(&network, &channel);
                if !self.chats.contains_key(&key) {
                    return;
                }
                let by = sanitize(&by);
                let text = if self.nick(&network) == Some(nick.as_str()) {
                    format!("You were kicked by {by}. Reason provided: {reason}")
                } else {
                    format!("{} was kicked by {by}. Reason provided: {reason}", sanitize(&nick))
                };
                self.notice(&key, text, at);
            }
            ServerEvent::ProtocolError { network, details } => {
                warn!(%network, %details, "protocol error");
                self.errors.push((network, details));
            }
        }
    }

    fn open_chat(&mut self, key: &ChatKey) {
        if self.chats.contains_key(key) {
            return;
        }
        self.chats.insert(key.clone(), Chat::new(key.clone()));
        self.tabs.push(key.clone());
    }

    fn on_roster(&mut self, network: &str, channel: &str, users: &[RosterEntry]) {
        let key = ChatKey::new(network, channel);
        if !self.chats.contains_key(&key) {
            // The roster can overtake our own join; only trust it if it
            // lists us.
            let own = self.nick(network);
            if !users.iter().any(|u| Some(u.nick.as_str()) == own) {
                debug!(%network, %channel, "roster for unknown chat ignored");
                return;
            }
            self.open_chat(&key);
        }
        let system = User::system(network, &self.default_picture);
        if let Some(chat) = self.chats.get_mut(&key) {
            for entry in users {
                chat.roster.insert(User::from_roster(entry));
            }
            chat.roster.insert(system);
        }
    }

    fn on_joined(&mut self, network: &str, channel: &str, nick: &str, picture: &str, at: DateTime<Utc>) {
        let key = ChatKey::new(network, channel);
        if !self.chats.contains_key(&key) && self.nick(network).is_none() {
            // First word from this network: the joiner must be us.
            self.nicks.insert(network.to_string(), nick.to_string());
        }

        if self.nick(network) == Some(nick) {
            self.open_chat(&key);
            return;
        }

        let Some(chat) = self.chats.get_mut(&key) else {
            return;
        };
        chat.roster.insert(User::new(nick, picture, network));
        self.notice(&key, format!("{} has joined this channel.", sanitize(nick)), at);
    }

    fn on_message(&mut self, key: &ChatKey, from: &str, body: String, priority: Priority, at: DateTime<Utc>) {
        let own = self.nicks.get(&key.network).cloned();
        let highlight = notify::highlight(from, &body, own.as_deref());
        let Some(chat) = self.chats.get_mut(key) else {
            return;
        };

        if !chat.is_active() {
            match priority {
                Priority::High => chat.got_high_priority(),
                Priority::Low => chat.got_low_priority(),
            }
        }
        if let Some(user) = chat.roster.get_mut(from) {
            user.got_new_message(at);
        }
        chat.push_line(Line {
            from: from.to_string(),
            body,
            at,
            highlight,
        });

        if !self.focused {
            self.alert.start();
        }
    }

    /// Append a line from the System user. `text` must already be escaped.
    fn notice(&mut self, key: &ChatKey, text: String, at: DateTime<Utc>) {
        if let Some(chat) = self.chats.get_mut(key) {
            chat.push_line(Line {
                from: SYSTEM_NICK.to_string(),
                body: text,
                at,
                highlight: Highlight::None,
            });
        }
    }

    // ── Outbound operations ──────────────────────────────────────────

    fn active_key(&self) -> Result<ChatKey, ClientError> {
        self.active
            .clone()
            .filter(|k| self.chats.contains_key(k))
            .ok_or(ClientError::NoActiveChat)
    }

    fn own_line(&mut self, key: &ChatKey, text: &str, at: DateTime<Utc>) {
        let from = self
            .nicks
            .get(&key.network)
            .cloned()
            .unwrap_or_else(|| self.username.clone());
        if let Some(chat) = self.chats.get_mut(key) {
            chat.push_line(Line {
                from,
                body: sanitize(text),
                at,
                highlight: Highlight::SelfAuthored,
            });
        }
    }

    /// Connect to another network as the logged-in user.
    pub fn connect_network(&self, network: &str, first_channel: &str) -> Result<ClientCommand, ClientError> {
        if first_channel.trim().is_empty() {
            return Err(ClientError::EmptyChannel);
        }
        Ok(ClientCommand::ConnectNetwork {
            network: network.to_string(),
            nick: self.username.clone(),
            first_channel: first_channel.to_string(),
            session_id: self.session_id.clone(),
        })
    }

    /// Join a channel on the active chat's network.
    pub fn join_channel(&self, channel: &str) -> Result<ClientCommand, ClientError> {
        let key = self.active_key()?;
        if channel.trim().is_empty() {
            return Err(ClientError::EmptyChannel);
        }
        Ok(ClientCommand::JoinChannel {
            network: key.network,
            channel: channel.to_string(),
            session_id: self.session_id.clone(),
        })
    }

    /// Send `text` to the active chat.
    pub fn send_message(&mut self, text: &str) -> Result<ClientCommand, ClientError> {
        let key = self.active_key()?;
        if text.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        self.own_line(&key, text, Utc::now());
        Ok(ClientCommand::SendMessage {
            network: key.network,
            destination: key.name,
            message: text.to_string(),
            session_id: self.session_id.clone(),
        })
    }

    /// Start (or continue) a private chat with `nick` on the active chat's
    /// network.
    pub fn open_private(&mut self, nick: &str, text: &str) -> Result<ClientCommand, ClientError> {
        let network = self.active_key()?.network;
        if nick.trim().is_empty() {
            return Err(ClientError::EmptyNick);
        }
        if text.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let key = ChatKey::new(&network, nick);
        if !self.chats.contains_key(&key) {
            self.open_chat(&key);
            let peer = User::new(nick, &self.default_picture, &network);
            if let Some(chat) = self.chats.get_mut(&key) {
                chat.roster.insert(peer);
            }
        }
        self.own_line(&key, text, Utc::now());
        Ok(ClientCommand::SendMessage {
            network,
            destination: nick.to_string(),
            message: text.to_string(),
            session_id: self.session_id.clone(),
        })
    }

    /// Close the active chat. Channels are parted; closing a private chat
    /// sends nothing.
    pub fn part_active(&mut self) -> Result<Option<ClientCommand>, ClientError> {
        let key = self.active_key()?;
        self.chats.remove(&key);
        self.tabs.retain(|k| k != &key);
        self.active = None;

        if !key.is_channel() {
            return Ok(None);
        }
        Ok(Some(ClientCommand::PartChannel {
            network: key.network,
            channel: key.name,
            message: PART_MESSAGE.to_string(),
            session_id: self.session_id.clone(),
        }))
    }

    /// Change nick on the active chat's network. The new nick is assumed
    /// until the network says otherwise.
    pub fn change_nick(&mut self, nick: &str) -> Result<ClientCommand, ClientError> {
        if nick.trim().is_empty() {
            return Err(ClientError::EmptyNick);
        }
        let key = self.active_key()?;
        self.nicks.insert(key.network.clone(), nick.to_string());
        Ok(ClientCommand::ChangeNick {
            network: key.network,
            nick: nick.to_string(),
            session_id: self.session_id.clone(),
        })
    }

    /// Accept the oldest pending invitation.
    pub fn accept_invite(&mut self) -> Option<ClientCommand> {
        let invite = self.invites.pop_front()?;
        Some(invite.accept(&self.session_id))
    }

    pub fn decline_invite(&mut self) {
        if let Some(invite) = self.invites.pop_front() {
            invite.decline();
        }
    }
}
