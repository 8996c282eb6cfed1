/// Line framing for IRC connections.
///
/// Splits the byte stream on `\r\n`, parses each line into a [`Message`],
/// and writes outgoing messages with the terminator appended. A few servers
/// terminate with a bare `\n`, so that is accepted as well.
///
/// Lines longer than [`MAX_LINE_LENGTH`] and lines that do not parse are
/// dropped and the connection keeps going. Lines that are not valid UTF-8
/// are decoded lossily.
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use super::message::Message;

/// Maximum accepted line length in bytes, tags included.
pub const MAX_LINE_LENGTH: usize = 8191;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default)]
pub struct IrcCodec {
    /// Set while discarding the tail of an oversized line.
    skipping: bool,
}

impl IrcCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for IrcCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(lf) = src.iter().position(|b| *b == b'\n') else {
                if src.len() > MAX_LINE_LENGTH {
                    warn!(bytes = src.len(), "codec: dropping oversized partial line");
                    src.clear();
                    self.skipping = true;
                }
                return Ok(None);
            };

            let line = src.split_to(lf + 1);
            if std::mem::take(&mut self.skipping) {
                warn!(bytes = line.len(), "codec: dropped tail of oversized line");
                continue;
            }
            if line.len() > MAX_LINE_LENGTH {
                warn!(bytes = line.len(), "codec: dropped oversized line");
                continue;
            }

            let mut content = &line[..lf];
            if content.last() == Some(&b'\r') {
                content = &content[..content.len() - 1];
            }
            // Blank keep-alive lines carry nothing.
            if content.is_empty() {
                continue;
            }

            let text = String::from_utf8_lossy(content);
            match Message::parse(&text) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => warn!("codec: skipping unparseable line: {e}"),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(msg) => Ok(Some(msg)),
            None => {
                // Unterminated tail at EOF is not a line.
                src.advance(src.len());
                Ok(None)
            }
        }
    }
}

impl Encoder<Message> for IrcCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let wire = item.to_wire();
        dst.reserve(wire.len() + 2);
        dst.put_slice(wire.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Decoder ──────────────────────────────────────────────────

    #[test]
    fn decode_waits_for_terminator() {
        let mut codec = IrcCodec::new();
        let mut buf = BytesMut::from("PING :irc.exa");
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"mple.net\r\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.params, vec!["irc.example.net"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_several_lines_from_one_read() {
        let mut codec = IrcCodec::new();
        let mut buf = BytesMut::from(":irc.example.net 001 alice :Welcome\r\n:alice!a@h JOIN #room\r\n");

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().command, "001");
        let join = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(join.command, "JOIN");
        assert_eq!(join.source_nick(), Some("alice"));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn decode_accepts_bare_newline_and_skips_blank_lines() {
        let mut codec = IrcCodec::new();
        let mut buf = BytesMut::from("\r\n\nNICK alice\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.command, "NICK");
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_drops_oversized_line_and_continues() {
        let mut codec = IrcCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&vec![b'x'; MAX_LINE_LENGTH + 10]);
        buf.extend_from_slice(b"\r\nPING :t\r\n");

        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.command, "PING");
    }

    #[test]
    fn decode_drops_oversized_partial_until_terminator() {
        let mut codec = IrcCodec::new();
        let mut buf = BytesMut::from(vec![b'x'; MAX_LINE_LENGTH + 10].as_slice());
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(codec.skipping);

        buf.extend_from_slice(b"still junk\r\nPING :t\r\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.command, "PING");
        assert!(!codec.skipping);
    }

    #[test]
    fn decode_skips_line_without_command() {
        let mut codec = IrcCodec::new();
        let mut buf = BytesMut::from(":irc.example.net\r\nPING :t\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().command, "PING");
    }

    #[test]
    fn decode_replaces_invalid_utf8() {
        let mut codec = IrcCodec::new();
        let mut buf = BytesMut::from(&b"PRIVMSG #room :caf\xe9\r\n"[..]);
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.param(1), Some("caf\u{fffd}"));
    }

    // ── Encoder ──────────────────────────────────────────────────

    #[test]
    fn encode_terminates_with_crlf() {
        let mut codec = IrcCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Message::new("JOIN", vec!["#room".into()]), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], b"JOIN :#room\r\n");
    }
}
