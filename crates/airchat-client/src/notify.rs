//! Notification priority.
//!
//! Private messages are always high priority. A channel message is high
//! priority when its body contains the viewer's nick, compared
//! case-sensitively against the escaped form the relay delivers.

use airchat_server::irc::sanitize::sanitize;

use crate::chat::Highlight;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    High,
}

/// Whether `body` mentions `own_nick`. An unknown or empty nick mentions
/// nothing.
pub fn mentions(body: &str, own_nick: Option<&str>) -> bool {
    match own_nick {
        Some(nick) if !nick.is_empty() => body.contains(&sanitize(nick)),
        _ => false,
    }
}

pub fn channel_priority(body: &str, own_nick: Option<&str>) -> Priority {
    if mentions(body, own_nick) {
        Priority::High
    } else {
        Priority::Low
    }
}

/// Emphasis for a transcript line from `from`.
pub fn highlight(from: &str, body: &str, own_nick: Option<&str>) -> Highlight {
    if own_nick == Some(from) {
        Highlight::SelfAuthored
    } else if mentions(body, own_nick) {
        Highlight::Mention
    } else {
        Highlight::None
    }
}
