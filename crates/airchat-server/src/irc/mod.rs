pub mod codec;
pub mod connection;
pub mod message;
pub mod profile;
pub mod registry;
pub mod sanitize;
pub mod wire;
