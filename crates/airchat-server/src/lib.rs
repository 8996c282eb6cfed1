//! IRC side of the airchat gateway: the session registry, per-network
//! protocol connections, the relay wire format and profile lookups.

pub mod config;
pub mod irc;
pub mod metrics;
