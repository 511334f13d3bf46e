// P2P networking

mod connection;
mod message;
mod peer;

pub use connection::{ConnectionError, MessageReader, MessageWriter};
pub use message::{
    InvType, InventoryItem, Message, NetAddress, PeerAddress, ProtocolError, VersionMessage,
    PROTOCOL_VERSION,
};
pub use peer::{BlockFuture, Peer, PeerError, PeerInfo, PeerState};
