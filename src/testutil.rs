// Test helpers: block fabrication
//
// The unit-test network's proof-of-work limit is easy enough that a
// handful of nonce attempts solves any block, so tests mine for real.

use crate::consensus::pow::Target;
use crate::core::{Block, BlockHeader, Script, Transaction, TxOutput};

/// Grind the nonce until the header satisfies its own compact target.
pub fn solve(header: &mut BlockHeader) {
    let target = Target::from_compact(header.bits);
    while !target.is_met_by(&header.hash()) {
        header.nonce = header.nonce.wrapping_add(1);
    }
}

/// Build and solve a block on `prev` with the given target.
///
/// Blocks are spaced exactly one unit-test target timespan apart so the
/// difficulty never needs to move at epoch boundaries. The tag makes each
/// block's coinbase, and therefore its hash, unique.
pub fn make_block(prev: &BlockHeader, tag: u8, bits: u32, extra: Vec<Transaction>) -> Block {
    let coinbase = Transaction::coinbase(
        vec![1, tag],
        TxOutput::new(5_000_000_000, Script::p2pk_script_pubkey(&[0x02; 33])),
    );
    let mut transactions = vec![coinbase];
    transactions.extend(extra);

    let mut header = BlockHeader::new(
        1,
        prev.hash(),
        Block::calculate_merkle_root(&transactions),
        prev.time + 1200,
        bits,
        0,
    );
    solve(&mut header);
    Block::new(header, transactions)
}

/// An empty (coinbase-only) block extending `prev` at the same target.
pub fn next_block(prev: &Block, tag: u8) -> Block {
    make_block(&prev.header, tag, prev.header.bits, vec![])
}
