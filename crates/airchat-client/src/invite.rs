use airchat_server::irc::registry::SessionId;
use airchat_server::irc::wire::ClientCommand;

/// An invitation waiting for the viewer's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInvite {
    pub network: String,
    pub channel: String,
    pub by: String,
}

impl PendingInvite {
    pub fn prompt(&self) -> String {
        format!(
            "You have been invited to the channel {} on {} by {}\nWould you like to join this channel now?",
            self.channel, self.network, self.by
        )
    }

    /// Accept: the join command to send.
    pub fn accept(self, session_id: &SessionId) -> ClientCommand {
        ClientCommand::JoinChannel {
            network: self.network,
            channel: self.channel,
            session_id: session_id.clone(),
        }
    }

    /// Decline; nothing is sent.
    pub fn decline(self) {}
}
