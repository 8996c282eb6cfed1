//! Prometheus metric names for the gateway.
//!
//! Call sites use these helpers rather than raw metric strings. With no
//! recorder installed (tests, library use) every call is a no-op.

use metrics::{counter, gauge};

/// Sessions currently registered (gauge).
pub const SESSIONS_ACTIVE: &str = "airchat_sessions_active";
/// Protocol connections currently running (gauge).
pub const CONNECTIONS_ACTIVE: &str = "airchat_connections_active";
/// Protocol connections opened since start.
pub const CONNECTIONS_OPENED: &str = "airchat_connections_opened_total";
/// Relay events emitted to clients, labelled by kind.
pub const RELAY_EVENTS: &str = "airchat_relay_events_total";
/// Client commands discarded, labelled by reason.
pub const COMMANDS_DROPPED: &str = "airchat_commands_dropped_total";
/// Roster/join events dropped because the profile lookup failed.
pub const PROFILE_LOOKUP_FAILURES: &str = "airchat_profile_lookup_failures_total";

pub fn sessions_active(n: usize) {
    gauge!(SESSIONS_ACTIVE).set(n as f64);
}

pub fn connection_opened() {
    counter!(CONNECTIONS_OPENED).increment(1);
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

pub fn connection_closed() {
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

pub fn relay_event(kind: &'static str) {
    counter!(RELAY_EVENTS, "kind" => kind).increment(1);
}

pub fn command_dropped(reason: &'static str) {
    counter!(COMMANDS_DROPPED, "reason" => reason).increment(1);
}

pub fn profile_lookup_failed() {
    counter!(PROFILE_LOOKUP_FAILURES).increment(1);
}
