/// Failures of operations the viewer starts; shown to them directly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("You cannot send a message until you have joined and selected chat.")]
    NoActiveChat,
    #[error("You need to provide a new nickname to switch to!")]
    EmptyNick,
    #[error("You need to type a message to send.")]
    EmptyMessage,
    #[error("You need to provide the name of a channel.")]
    EmptyChannel,
}
