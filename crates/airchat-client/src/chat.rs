/// One conversation: a channel, or a private exchange keyed by the peer's
/// nick. Owns its roster, notification counters and transcript.
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::user::User;

/// Identity of a chat within one client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChatKey {
    pub network: String,
    /// Channel name, or the peer's nick for a private chat.
    pub name: String,
}

impl ChatKey {
    pub fn new(network: &str, name: &str) -> Self {
        Self {
            network: network.to_string(),
            name: name.to_string(),
        }
    }

    pub fn is_channel(&self) -> bool {
        self.name.starts_with('#') || self.name.starts_with('&')
    }
}

/// How a transcript line is emphasised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Highlight {
    None,
    /// Written by the viewer.
    SelfAuthored,
    /// Mentions the viewer's nick.
    Mention,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub from: String,
    /// Escaped text, rendered as-is.
    pub body: String,
    pub at: DateTime<Utc>,
    pub highlight: Highlight,
}

/// Users keyed by nick, iterated in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    order: Vec<String>,
    users: HashMap<String, User>,
}

impl Roster {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, nick: &str) -> bool {
        self.users.contains_key(nick)
    }

    pub fn get(&self, nick: &str) -> Option<&User> {
        self.users.get(nick)
    }

    pub fn get_mut(&mut self, nick: &str) -> Option<&mut User> {
        self.users.get_mut(nick)
    }

    /// Add a user. A user already present keeps its place and counters and
    /// takes the new profile details.
    pub fn insert(&mut self, user: User) {
        match self.users.get_mut(&user.nick) {
            Some(existing) => {
                existing.bio = user.bio;
                existing.contact = user.contact;
                existing.picture = user.picture;
            }
            None => {
                self.order.push(user.nick.clone());
                self.users.insert(user.nick.clone(), user);
            }
        }
    }

    pub fn remove(&mut self, nick: &str) -> Option<User> {
        let user = self.users.remove(nick)?;
        self.order.retain(|n| n != nick);
        Some(user)
    }

    /// Rename `old` in place, keeping its position and counters. A user
    /// already holding `new` is replaced. Returns false if `old` is absent.
    pub fn rename(&mut self, old: &str, new: &str) -> bool {
        if old == new {
            return self.contains(old);
        }
        let Some(mut user) = self.users.remove(old) else {
            return false;
        };
        if self.users.remove(new).is_some() {
            self.order.retain(|n| n != new);
        }
        user.nick = new.to_string();
        if let Some(slot) = self.order.iter_mut().find(|n| n.as_str() == old) {
            *slot = new.to_string();
        }
        self.users.insert(new.to_string(), user);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &User> {
        self.order.iter().filter_map(|n| self.users.get(n))
    }

    pub fn nicks(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    pub key: ChatKey,
    pub roster: Roster,
    low_priority: u32,
    high_priority: u32,
    active: bool,
    transcript: Vec<Line>,
}

impl Chat {
    pub fn new(key: ChatKey) -> Self {
        Self {
            key,
            roster: Roster::default(),
            low_priority: 0,
            high_priority: 0,
            active: false,
            transcript: Vec::new(),
        }
    }

    pub fn low_priority(&self) -> u32 {
        self.low_priority
    }

    pub fn high_priority(&self) -> u32 {
        self.high_priority
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn transcript(&self) -> &[Line] {
        &self.transcript
    }

    pub fn got_low_priority(&mut self) {
        self.low_priority += 1;
    }

    pub fn got_high_priority(&mut self) {
        self.high_priority += 1;
    }

    pub fn clear_notifications(&mut self) {
        self.low_priority = 0;
        self.high_priority = 0;
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
        if active {
            self.clear_notifications();
        }
    }

    pub fn push_line(&mut self, line: Line) {
        self.transcript.push(line);
    }
}
