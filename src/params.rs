// Network parameters
//
// Everything that differs between the production network, the public test
// network and the unit-test network: magic bytes, genesis block, proof of
// work limit, difficulty retarget schedule, address prefix, port and seed
// peers.

use crate::consensus::pow::Target;
use crate::core::{Block, BlockHeader, Hash256, Script, Transaction, TxOutput};
use crate::U256;

/// The scriptSig of the genesis coinbase: difficulty bits, push of 4, and
/// the Times headline.
const GENESIS_SCRIPT_SIG: &str = "04ffff001d0104455468652054696d65732030332f4a616e2f32303039204368616e63656c6c6f72206f6e206272696e6b206f66207365636f6e64206261696c6f757420666f722062616e6b73";

/// The uncompressed public key the genesis coinbase pays.
const GENESIS_PUBKEY: &str = "04678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5f";

/// Historical seed nodes for the production network.
const PROD_SEED_PEERS: &[&str] = &[
    "98.143.152.14:8333",
    "72.14.191.182:8333",
    "62.75.216.13:8333",
    "173.255.204.124:8333",
];

/// Parameters of one network, selected at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkParams {
    /// Message-frame magic bytes, in wire order.
    pub magic: [u8; 4],
    /// Version byte prepended to addresses.
    pub address_prefix: u8,
    /// Default TCP port.
    pub port: u16,
    /// Blocks per difficulty epoch.
    pub interval: u32,
    /// Expected seconds per difficulty epoch.
    pub target_timespan: u32,
    /// Proof-of-work limit (easiest allowed target), compact form.
    pub pow_limit_bits: u32,
    /// Literal seed peer addresses; empty outside the production network.
    pub seed_peers: &'static [&'static str],
    genesis_time: u32,
    genesis_bits: u32,
    genesis_nonce: u32,
}

impl NetworkParams {
    /// The production network.
    pub fn prod() -> Self {
        Self {
            magic: [0xf9, 0xbe, 0xb4, 0xd9],
            address_prefix: 0,
            port: 8333,
            interval: 2016,
            target_timespan: 14 * 24 * 60 * 60,
            pow_limit_bits: 0x1d00ffff,
            seed_peers: PROD_SEED_PEERS,
            genesis_time: 1231006505,
            genesis_bits: 0x1d00ffff,
            genesis_nonce: 2083236893,
        }
    }

    /// The public test network.
    pub fn test_net() -> Self {
        Self {
            magic: [0xfa, 0xbf, 0xb5, 0xda],
            address_prefix: 111,
            port: 18333,
            interval: 2016,
            target_timespan: 14 * 24 * 60 * 60,
            pow_limit_bits: 0x1d0fffff,
            seed_peers: &[],
            genesis_time: 1296688602,
            genesis_bits: 0x1d07fff8,
            genesis_nonce: 384568319,
        }
    }

    /// Parameters for unit tests: a two-block retarget epoch and a target
    /// so easy that a handful of nonce attempts solves a block.
    pub fn unit_tests() -> Self {
        Self {
            magic: [0x0b, 0x11, 0x09, 0x07],
            address_prefix: 111,
            port: 18444,
            interval: 2,
            target_timespan: 1200,
            pow_limit_bits: 0x207fffff,
            seed_peers: &[],
            genesis_time: 1296688602,
            genesis_bits: 0x207fffff,
            genesis_nonce: 2,
        }
    }

    /// The proof-of-work limit as a full 256-bit target.
    pub fn pow_limit(&self) -> U256 {
        Target::from_compact(self.pow_limit_bits).to_u256()
    }

    /// Build this network's genesis block.
    ///
    /// All networks share the same coinbase; time, target and nonce differ.
    pub fn genesis_block(&self) -> Block {
        let script_sig = hex::decode(GENESIS_SCRIPT_SIG).expect("genesis scriptSig literal");
        let pubkey = hex::decode(GENESIS_PUBKEY).expect("genesis pubkey literal");
        let output = TxOutput::new(5_000_000_000, Script::p2pk_script_pubkey(&pubkey));
        let coinbase = Transaction::coinbase(script_sig, output);

        let header = BlockHeader::new(
            1,
            Hash256::zero(),
            Block::calculate_merkle_root(std::slice::from_ref(&coinbase)),
            self.genesis_time,
            self.genesis_bits,
            self.genesis_nonce,
        );

        Block::new(header, vec![coinbase])
    }
}
