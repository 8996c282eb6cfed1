use chrono::{DateTime, Utc};

use airchat_server::irc::wire::RosterEntry;

/// Nick that authors locally generated notices.
pub const SYSTEM_NICK: &str = "System";

/// A participant as seen from one chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub nick: String,
    pub bio: String,
    pub contact: String,
    pub picture: String,
    pub network: String,
    pub last_message: Option<DateTime<Utc>>,
    pub message_count: u64,
}

impl User {
    pub fn new(nick: &str, picture: &str, network: &str) -> Self {
        Self {
            nick: nick.to_string(),
            bio: String::new(),
            contact: String::new(),
            picture: picture.to_string(),
            network: network.to_string(),
            last_message: None,
            message_count: 0,
        }
    }

    pub fn from_roster(entry: &RosterEntry) -> Self {
        Self {
            nick: entry.nick.clone(),
            bio: entry.bio.clone(),
            contact: entry.contact.clone(),
            picture: entry.picture.clone(),
            network: entry.network.clone(),
            last_message: None,
            message_count: 0,
        }
    }

    pub fn system(network: &str, picture: &str) -> Self {
        Self::new(SYSTEM_NICK, picture, network)
    }

    pub fn got_new_message(&mut self, at: DateTime<Utc>) {
        self.message_count += 1;
        self.last_message = Some(at);
    }
}
