//! Client side of aIRChat: turns the relay event stream into per-chat
//! conversation state with notification counters, and builds the commands
//! the viewer's actions send back.

pub mod alert;
pub mod chat;
pub mod error;
pub mod invite;
pub mod notify;
pub mod state;
pub mod user;

pub use chat::{Chat, ChatKey, Highlight, Line, Roster};
pub use error::ClientError;
pub use state::ClientState;
pub use user::User;
