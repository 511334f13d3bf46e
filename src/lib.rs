// Simplified Payment Verification client: chain synchronization and
// wallet reconciliation against a single untrusted peer.

mod uint_types {
    use uint::construct_uint;

    construct_uint! {
        /// Unsigned 256-bit integer for targets and cumulative chain work.
        pub struct U256(4);
    }

    construct_uint! {
        /// Wide intermediate for difficulty retarget arithmetic.
        pub struct U512(8);
    }
}

pub use uint_types::{U256, U512};

pub mod core;
pub mod consensus;
pub mod params;
pub mod storage;
pub mod blockchain;
pub mod network;
pub mod wallet;
pub mod util;

#[cfg(test)]
pub mod testutil;

// Re-exports for convenience
pub use crate::core::{Block, BlockHeader, Hash256, Script, Transaction, TxInput, TxOutput};
pub use consensus::{BlockVerifier, Target, VerificationError};
pub use params::NetworkParams;
pub use storage::{BlockStore, MemoryBlockStore, SledBlockStore, StoreError, StoredBlock};
pub use blockchain::{BlockChain, BlockChainError};
pub use network::{Message, Peer, PeerError, PeerInfo};
pub use util::CountDownLatch;
pub use wallet::{Address, BlockType, KeyPair, Wallet, WalletError};
