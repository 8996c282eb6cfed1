/// IRC line model.
///
/// One line on the wire is `[:prefix SPACE] command [SPACE params] [SPACE :trailing]`
/// (RFC 2812). Parsing works on the line content; the `\r\n` terminator
/// belongs to the codec.
use std::fmt;

/// A single parsed IRC line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Source of the line: a server name or `nick!user@host`.
    pub prefix: Option<String>,
    /// Command word or three-digit numeric.
    pub command: String,
    /// Middle params followed by the trailing param, if any.
    pub params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("line has a prefix but no command")]
    MissingCommand,
}

impl Message {
    /// Build an outbound line with no prefix.
    pub fn new(command: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            prefix: None,
            command: command.into(),
            params,
        }
    }

    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let input = input.trim_end_matches(['\r', '\n']);
        if input.is_empty() {
            return Err(ParseError::Empty);
        }

        let (prefix, rest) = match input.strip_prefix(':') {
            Some(tail) => match tail.split_once(' ') {
                Some((prefix, rest)) => (Some(prefix.to_owned()), rest.trim_start_matches(' ')),
                None => return Err(ParseError::MissingCommand),
            },
            None => (None, input),
        };

        let (command, mut remaining) = match rest.split_once(' ') {
            Some((command, params)) => (command, params),
            None => (rest, ""),
        };
        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }

        let mut params = Vec::new();
        loop {
            remaining = remaining.trim_start_matches(' ');
            if remaining.is_empty() {
                break;
            }
            if let Some(trailing) = remaining.strip_prefix(':') {
                params.push(trailing.to_owned());
                break;
            }
            match remaining.split_once(' ') {
                Some((param, tail)) => {
                    params.push(param.to_owned());
                    remaining = tail;
                }
                None => {
                    params.push(remaining.to_owned());
                    break;
                }
            }
        }

        Ok(Message {
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// Wire form without the `\r\n` terminator.
    ///
    /// The last param is always written in trailing form so that text with
    /// spaces or a leading colon survives. CR, LF and NUL are written as
    /// spaces: one message is always exactly one line.
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        if let Some(prefix) = &self.prefix {
            out.push(':');
            push_flat(&mut out, prefix);
            out.push(' ');
        }
        push_flat(&mut out, &self.command);

        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            out.push(' ');
            if i == last {
                out.push(':');
            }
            push_flat(&mut out, param);
        }
        out
    }

    /// Nick portion of a `nick!user@host` prefix.
    pub fn source_nick(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .map(|p| p.split_once('!').map_or(p, |(nick, _)| nick))
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// Three-digit numeric replies, e.g. `433`.
    pub fn numeric(&self) -> Option<u16> {
        if self.command.len() == 3 && self.command.bytes().all(|b| b.is_ascii_digit()) {
            self.command.parse().ok()
        } else {
            None
        }
    }
}

fn push_flat(out: &mut String, part: &str) {
    out.extend(part.chars().map(|c| match c {
        '\r' | '\n' | '\0' => ' ',
        c => c,
    }));
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // ── Parsing ──────────────────────────────────────────────────

    #[test]
    fn parse_bare_command() {
        let msg = Message::parse("QUIT").unwrap();
        assert_eq!(msg.prefix, None);
        assert_eq!(msg.command, "QUIT");
        assert!(msg.params.is_empty());
    }

    #[test]
    fn parse_channel_message_with_source() {
        let msg = Message::parse(":bob!~bob@host.example PRIVMSG #room :hello there").unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("bob!~bob@host.example"));
        assert_eq!(msg.source_nick(), Some("bob"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#room", "hello there"]);
    }

    #[test]
    fn parse_names_reply() {
        let msg = Message::parse(":irc.example.net 353 alice = #room :@alice +bob carol").unwrap();
        assert_eq!(msg.numeric(), Some(353));
        assert_eq!(msg.param(2), Some("#room"));
        assert_eq!(msg.param(3), Some("@alice +bob carol"));
    }

    #[test]
    fn parse_lowercase_command_is_normalised() {
        let msg = Message::parse("nick alice").unwrap();
        assert_eq!(msg.command, "NICK");
    }

    #[test]
    fn parse_server_prefix_has_no_bang() {
        let msg = Message::parse(":irc.example.net PING :token").unwrap();
        assert_eq!(msg.source_nick(), Some("irc.example.net"));
        assert_eq!(msg.numeric(), None);
    }

    #[test]
    fn parse_collapses_repeated_spaces() {
        let msg = Message::parse("KICK  #room   bob :flooding").unwrap();
        assert_eq!(msg.params, vec!["#room", "bob", "flooding"]);
    }

    #[test]
    fn parse_keeps_empty_and_colon_trailing() {
        assert_eq!(Message::parse("PART #room :").unwrap().params, vec!["#room", ""]);
        assert_eq!(Message::parse("PRIVMSG #room ::D").unwrap().params, vec!["#room", ":D"]);
    }

    #[test]
    fn parse_rejects_empty_and_prefix_only() {
        assert_eq!(Message::parse(""), Err(ParseError::Empty));
        assert_eq!(Message::parse("\r\n"), Err(ParseError::Empty));
        assert_eq!(Message::parse(":irc.example.net"), Err(ParseError::MissingCommand));
    }

    // ── Serialization ────────────────────────────────────────────

    #[test]
    fn wire_form_uses_trailing_for_last_param() {
        let msg = Message::new("PRIVMSG", vec!["#room".into(), "hi all".into()]);
        assert_eq!(msg.to_wire(), "PRIVMSG #room :hi all");
    }

    #[test]
    fn wire_form_without_params() {
        assert_eq!(Message::new("QUIT", vec![]).to_wire(), "QUIT");
    }

    #[test]
    fn wire_form_reparses_to_same_message() {
        let line = ":alice!a@h NICK :alice_";
        let msg = Message::parse(line).unwrap();
        assert_eq!(msg.to_wire(), line);
        assert_eq!(Message::parse(&msg.to_wire()).unwrap(), msg);
    }

    #[test]
    fn line_breaks_are_flattened_to_spaces() {
        let msg = Message::new("PRIVMSG", vec!["bob".into(), "hi\r\nQUIT :bye\0".into()]);
        let wire = msg.to_wire();
        assert_eq!(wire, "PRIVMSG bob :hi  QUIT :bye ");
        assert!(!wire.contains(['\r', '\n', '\0']));
    }
}
