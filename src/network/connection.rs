// Message framing over a TCP stream
//
// Frame layout: 4-byte magic, 12-byte null-padded command, 4-byte LE
// payload length, 4-byte checksum (first four bytes of the payload's
// double SHA256), payload. Old network variants omitted the checksum on
// the version/verack handshake; both forms are accepted until the
// handshake completes, after which the checksum is required.

use super::message::{Message, ProtocolError};
use crate::core::hash256;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// Upper bound on a sane payload.
const MAX_PAYLOAD: u32 = 32 * 1024 * 1024;

/// Read-side failure: transport or framing.
#[derive(Debug)]
pub enum ConnectionError {
    Io(io::Error),
    Protocol(ProtocolError),
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ConnectionError::Io(e) => write!(f, "connection io error: {}", e),
            ConnectionError::Protocol(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ConnectionError {}

impl From<io::Error> for ConnectionError {
    fn from(e: io::Error) -> Self {
        ConnectionError::Io(e)
    }
}

fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = hash256(payload);
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest.as_bytes()[..4]);
    out
}

/// Sending half of a connection. Always writes checksummed frames.
pub struct MessageWriter {
    half: OwnedWriteHalf,
    magic: [u8; 4],
}

impl MessageWriter {
    pub fn new(half: OwnedWriteHalf, magic: [u8; 4]) -> Self {
        Self { half, magic }
    }

    pub async fn send(&mut self, message: &Message) -> io::Result<()> {
        let payload = message.serialize_payload();

        let mut frame = Vec::with_capacity(24 + payload.len());
        frame.extend_from_slice(&self.magic);

        let mut command = [0u8; 12];
        let name = message.command().as_bytes();
        command[..name.len().min(12)].copy_from_slice(&name[..name.len().min(12)]);
        frame.extend_from_slice(&command);

        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&checksum(&payload));
        frame.extend_from_slice(&payload);

        self.half.write_all(&frame).await?;
        self.half.flush().await
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.half.shutdown().await
    }
}

/// Receiving half of a connection.
pub struct MessageReader {
    half: OwnedReadHalf,
    magic: [u8; 4],
    /// During the handshake, version/verack frames without a checksum are
    /// tolerated.
    checksum_optional: bool,
}

impl MessageReader {
    pub fn new(half: OwnedReadHalf, magic: [u8; 4]) -> Self {
        Self {
            half,
            magic,
            checksum_optional: true,
        }
    }

    /// Called once the handshake completes; every later frame must carry a
    /// valid checksum.
    pub fn require_checksums(&mut self) {
        self.checksum_optional = false;
    }

    /// Read one framed message. Protocol errors leave the stream position
    /// past the offending frame's known extent; the next read rescans for
    /// the magic.
    pub async fn read(&mut self) -> Result<Message, ConnectionError> {
        self.seek_magic().await?;

        let mut command = [0u8; 12];
        self.half.read_exact(&mut command).await?;
        let command: String = command
            .iter()
            .take_while(|b| **b != 0)
            .map(|b| *b as char)
            .collect();

        let len = self.half.read_u32_le().await?;
        if len > MAX_PAYLOAD {
            return Err(ConnectionError::Protocol(ProtocolError::Oversized {
                command,
                len,
            }));
        }
        let len = len as usize;

        let handshake_form = command == "version" || command == "verack";
        if self.checksum_optional && handshake_form {
            // Old variant: the payload follows the length directly. Try
            // that reading first; if the bytes do not parse, assume the
            // checksummed layout (the first four bytes we read were the
            // checksum) and pull the remainder.
            let mut payload = vec![0u8; len];
            self.half.read_exact(&mut payload).await?;
            match Message::parse_payload(&command, &payload) {
                Ok(message) => return Ok(message),
                Err(_) if len >= 4 => {
                    let mut rest = [0u8; 4];
                    self.half.read_exact(&mut rest).await?;
                    let mut expected = [0u8; 4];
                    expected.copy_from_slice(&payload[..4]);
                    let mut body = payload[4..].to_vec();
                    body.extend_from_slice(&rest);
                    if checksum(&body) != expected {
                        return Err(ConnectionError::Protocol(ProtocolError::BadChecksum {
                            command,
                        }));
                    }
                    Message::parse_payload(&command, &body).map_err(ConnectionError::Protocol)
                }
                Err(e) => Err(ConnectionError::Protocol(e)),
            }
        } else {
            let mut expected = [0u8; 4];
            self.half.read_exact(&mut expected).await?;
            let mut payload = vec![0u8; len];
            self.half.read_exact(&mut payload).await?;
            if checksum(&payload) != expected {
                return Err(ConnectionError::Protocol(ProtocolError::BadChecksum {
                    command,
                }));
            }
            Message::parse_payload(&command, &payload).map_err(ConnectionError::Protocol)
        }
    }

    /// Scan forward until the magic sequence is found. Stray bytes (for
    /// instance the unread checksum of an old-style verack) are skipped.
    async fn seek_magic(&mut self) -> io::Result<()> {
        let mut window = [0u8; 4];
        self.half.read_exact(&mut window).await?;
        while window != self.magic {
            let next = self.half.read_u8().await?;
            window.rotate_left(1);
            window[3] = next;
        }
        Ok(())
    }
}
