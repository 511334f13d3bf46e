// Protocol messages and their payload codec
//
// Framing (magic, command, length, checksum) lives in the connection; this
// module serializes and parses payloads.

use crate::core::{
    read_u32, read_u64, read_hash, read_var_string, read_varint, write_var_string, write_varint,
    Block, Hash256, Serializable, Transaction,
};
use std::fmt;
use std::io::{Cursor, Read};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Protocol version we speak.
pub const PROTOCOL_VERSION: u32 = 31800;

/// Malformed wire data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A payload failed to parse; offset is where the cursor stood.
    Parse {
        command: String,
        offset: u64,
        what: String,
    },
    /// The frame checksum did not match the payload.
    BadChecksum { command: String },
    /// The frame announced an implausibly large payload.
    Oversized { command: String, len: u32 },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtocolError::Parse {
                command,
                offset,
                what,
            } => write!(f, "bad '{}' payload at offset {}: {}", command, offset, what),
            ProtocolError::BadChecksum { command } => {
                write!(f, "checksum mismatch on '{}' message", command)
            }
            ProtocolError::Oversized { command, len } => {
                write!(f, "'{}' payload of {} bytes exceeds the limit", command, len)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// What an inv / getdata entry announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvType {
    Transaction,
    Block,
    /// Unrecognized type code, carried through for logging.
    Other(u32),
}

impl InvType {
    fn code(self) -> u32 {
        match self {
            InvType::Transaction => 1,
            InvType::Block => 2,
            InvType::Other(code) => code,
        }
    }

    fn from_code(code: u32) -> Self {
        match code {
            1 => InvType::Transaction,
            2 => InvType::Block,
            other => InvType::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryItem {
    pub kind: InvType,
    pub hash: Hash256,
}

impl InventoryItem {
    pub fn block(hash: Hash256) -> Self {
        Self {
            kind: InvType::Block,
            hash,
        }
    }
}

/// A network endpoint as carried inside version and addr payloads:
/// services, IPv6-mapped address, big-endian port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetAddress {
    pub services: u64,
    pub addr: SocketAddr,
}

impl NetAddress {
    pub fn new(addr: SocketAddr) -> Self {
        Self { services: 0, addr }
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.services.to_le_bytes());
        let v6 = match self.addr.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        buf.extend_from_slice(&v6.octets());
        buf.extend_from_slice(&self.addr.port().to_be_bytes());
    }

    fn read(reader: &mut dyn Read) -> std::io::Result<Self> {
        let services = read_u64(reader)?;
        let mut octets = [0u8; 16];
        reader.read_exact(&mut octets)?;
        let mut port = [0u8; 2];
        reader.read_exact(&mut port)?;
        let port = u16::from_be_bytes(port);

        let v6 = Ipv6Addr::from(octets);
        let ip = match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        };
        Ok(Self {
            services,
            addr: SocketAddr::new(ip, port),
        })
    }
}

impl Default for NetAddress {
    fn default() -> Self {
        Self::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))
    }
}

/// A peer address announcement: last-seen timestamp plus endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddress {
    pub timestamp: u32,
    pub address: NetAddress,
}

/// The version handshake payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    pub version: u32,
    pub services: u64,
    pub timestamp: u64,
    pub addr_recv: NetAddress,
    pub addr_from: NetAddress,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: u32,
    pub relay: bool,
}

impl VersionMessage {
    pub fn new(addr_recv: SocketAddr, start_height: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            services: 0,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            addr_recv: NetAddress::new(addr_recv),
            addr_from: NetAddress::default(),
            nonce: rand::random(),
            user_agent: "/bitcoin-spv:0.1.0/".to_string(),
            start_height,
            relay: true,
        }
    }
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(VersionMessage),
    Verack,
    Inv(Vec<InventoryItem>),
    GetData(Vec<InventoryItem>),
    GetBlocks {
        version: u32,
        locator: Vec<Hash256>,
        /// Zero means "send as many as possible".
        stop_hash: Hash256,
    },
    Block(Block),
    Tx(Transaction),
    Addr(Vec<PeerAddress>),
    /// A command we do not speak; logged and skipped.
    Unknown { command: String },
}

impl Message {
    /// The 12-byte command string, unpadded.
    pub fn command(&self) -> &str {
        match self {
            Message::Version(_) => "version",
            Message::Verack => "verack",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::GetBlocks { .. } => "getblocks",
            Message::Block(_) => "block",
            Message::Tx(_) => "tx",
            Message::Addr(_) => "addr",
            Message::Unknown { command } => command,
        }
    }

    /// Serialize the payload (frame excluded).
    pub fn serialize_payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Message::Version(v) => {
                buf.extend_from_slice(&v.version.to_le_bytes());
                buf.extend_from_slice(&v.services.to_le_bytes());
                buf.extend_from_slice(&v.timestamp.to_le_bytes());
                v.addr_recv.write(&mut buf);
                v.addr_from.write(&mut buf);
                buf.extend_from_slice(&v.nonce.to_le_bytes());
                write_var_string(&mut buf, &v.user_agent).unwrap();
                buf.extend_from_slice(&v.start_height.to_le_bytes());
                buf.push(v.relay as u8);
            }
            Message::Verack | Message::Unknown { .. } => {}
            Message::Inv(items) | Message::GetData(items) => {
                write_varint(&mut buf, items.len() as u64).unwrap();
                for item in items {
                    buf.extend_from_slice(&item.kind.code().to_le_bytes());
                    buf.extend_from_slice(item.hash.as_bytes());
                }
            }
            Message::GetBlocks {
                version,
                locator,
                stop_hash,
            } => {
                buf.extend_from_slice(&version.to_le_bytes());
                write_varint(&mut buf, locator.len() as u64).unwrap();
                for hash in locator {
                    buf.extend_from_slice(hash.as_bytes());
                }
                buf.extend_from_slice(stop_hash.as_bytes());
            }
            Message::Block(block) => buf = block.serialize(),
            Message::Tx(tx) => buf = tx.serialize(),
            Message::Addr(addresses) => {
                write_varint(&mut buf, addresses.len() as u64).unwrap();
                for peer in addresses {
                    buf.extend_from_slice(&peer.timestamp.to_le_bytes());
                    peer.address.write(&mut buf);
                }
            }
        }
        buf
    }

    /// Parse a payload for the given command. Unknown commands yield
    /// `Message::Unknown` with the payload dropped.
    pub fn parse_payload(command: &str, payload: &[u8]) -> Result<Message, ProtocolError> {
        let mut cursor = Cursor::new(payload);
        let result = Self::parse_inner(command, &mut cursor, payload.len());
        match result {
            Ok(message) => Ok(message),
            Err(what) => Err(ProtocolError::Parse {
                command: command.to_string(),
                offset: cursor.position(),
                what,
            }),
        }
    }

    fn parse_inner(
        command: &str,
        cursor: &mut Cursor<&[u8]>,
        payload_len: usize,
    ) -> Result<Message, String> {
        let io = |e: std::io::Error| e.to_string();
        let message = match command {
            "version" => {
                let version = read_u32(cursor).map_err(io)?;
                let services = read_u64(cursor).map_err(io)?;
                let timestamp = read_u64(cursor).map_err(io)?;
                let addr_recv = NetAddress::read(cursor).map_err(io)?;
                let addr_from = NetAddress::read(cursor).map_err(io)?;
                let nonce = read_u64(cursor).map_err(io)?;
                let user_agent = read_var_string(cursor).map_err(io)?;
                let start_height = read_u32(cursor).map_err(io)?;
                // The relay flag is absent in some variants.
                let relay = if (cursor.position() as usize) < payload_len {
                    let mut flag = [0u8; 1];
                    cursor.read_exact(&mut flag).map_err(io)?;
                    flag[0] != 0
                } else {
                    true
                };
                Message::Version(VersionMessage {
                    version,
                    services,
                    timestamp,
                    addr_recv,
                    addr_from,
                    nonce,
                    user_agent,
                    start_height,
                    relay,
                })
            }
            "verack" => Message::Verack,
            "inv" => Message::Inv(Self::read_inventory(cursor)?),
            "getdata" => Message::GetData(Self::read_inventory(cursor)?),
            "getblocks" => {
                let version = read_u32(cursor).map_err(io)?;
                let count = read_varint(cursor).map_err(io)? as usize;
                let mut locator = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    locator.push(read_hash(cursor).map_err(io)?);
                }
                let stop_hash = read_hash(cursor).map_err(io)?;
                Message::GetBlocks {
                    version,
                    locator,
                    stop_hash,
                }
            }
            "block" => Message::Block(Block::deserialize(cursor.get_ref())?),
            "tx" => Message::Tx(Transaction::from_reader(cursor)?),
            "addr" => {
                let count = read_varint(cursor).map_err(io)? as usize;
                let mut addresses = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let timestamp = read_u32(cursor).map_err(io)?;
                    let address = NetAddress::read(cursor).map_err(io)?;
                    addresses.push(PeerAddress { timestamp, address });
                }
                Message::Addr(addresses)
            }
            other => {
                return Ok(Message::Unknown {
                    command: other.to_string(),
                })
            }
        };

        // A block message's cursor is not advanced by Block::deserialize;
        // skip the consumption check for it.
        if !matches!(message, Message::Block(_) | Message::Unknown { .. })
            && cursor.position() as usize != payload_len
        {
            return Err(format!(
                "{} trailing bytes",
                payload_len - cursor.position() as usize
            ));
        }
        Ok(message)
    }

    fn read_inventory(cursor: &mut Cursor<&[u8]>) -> Result<Vec<InventoryItem>, String> {
        let io = |e: std::io::Error| e.to_string();
        let count = read_varint(cursor).map_err(io)? as usize;
        let mut items = Vec::with_capacity(count.min(50_000));
        for _ in 0..count {
            let kind = InvType::from_code(read_u32(cursor).map_err(io)?);
            let hash = read_hash(cursor).map_err(io)?;
            items.push(InventoryItem { kind, hash });
        }
        Ok(items)
    }
}
