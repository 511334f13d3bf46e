// The block chain engine
//
// Accepts blocks, verifies difficulty transitions, connects them to the
// tree of known blocks, parks orphans until their parent shows up, and
// drives reorganizations when a side branch accumulates more work than
// the current best chain.

use crate::consensus::pow::Target;
use crate::consensus::{BlockVerifier, VerificationError};
use crate::core::{Block, BlockHeader, Hash256};
use crate::params::NetworkParams;
use crate::storage::{BlockStore, MemoryBlockStore, StoreError, StoredBlock};
use crate::wallet::{BlockType, Wallet};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Chain-engine failure: either the block broke a rule or the store did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockChainError {
    Verification(VerificationError),
    Store(StoreError),
}

impl fmt::Display for BlockChainError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BlockChainError::Verification(e) => write!(f, "{}", e),
            BlockChainError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for BlockChainError {}

impl From<VerificationError> for BlockChainError {
    fn from(e: VerificationError) -> Self {
        BlockChainError::Verification(e)
    }
}

impl From<StoreError> for BlockChainError {
    fn from(e: StoreError) -> Self {
        BlockChainError::Store(e)
    }
}

/// The chain engine. Not internally synchronized: callers wrap it in a
/// mutex held across each entire `add`, wallet callbacks included, and
/// always take the chain lock before the wallet lock.
pub struct BlockChain {
    params: NetworkParams,
    store: Box<dyn BlockStore>,
    wallet: Arc<Mutex<Wallet>>,
    verifier: BlockVerifier,
    chain_head: StoredBlock,
    genesis_hash: Hash256,
    /// Blocks whose parent is not yet known, in arrival order. Retried
    /// after every successful connect.
    orphans: Vec<Block>,
}

impl BlockChain {
    pub fn new(
        params: NetworkParams,
        store: Box<dyn BlockStore>,
        wallet: Arc<Mutex<Wallet>>,
    ) -> Result<Self, BlockChainError> {
        let chain_head = store.chain_head()?;
        let verifier = BlockVerifier::new(params.pow_limit());
        let genesis_hash = params.genesis_block().hash();
        Ok(Self {
            params,
            store,
            wallet,
            verifier,
            chain_head,
            genesis_hash,
            orphans: Vec::new(),
        })
    }

    /// Engine backed by the in-memory reference store.
    pub fn with_memory_store(
        params: NetworkParams,
        wallet: Arc<Mutex<Wallet>>,
    ) -> Result<Self, BlockChainError> {
        let store = MemoryBlockStore::new(&params)?;
        Self::new(params, Box::new(store), wallet)
    }

    pub fn chain_head(&self) -> &StoredBlock {
        &self.chain_head
    }

    pub fn height(&self) -> u32 {
        self.chain_head.height
    }

    /// Hash of the most recently parked orphan, if any. The peer uses this
    /// to recognize the server's "continue download" inventory signal.
    pub fn unconnected_block_hash(&self) -> Option<Hash256> {
        self.orphans.last().map(Block::hash)
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    /// Block locator for a getblocks request: the best-chain head plus
    /// genesis.
    pub fn block_locator(&self) -> Vec<Hash256> {
        let head = self.chain_head.hash();
        if head == self.genesis_hash {
            vec![head]
        } else {
            vec![head, self.genesis_hash]
        }
    }

    /// Accept a block.
    ///
    /// Returns true when the block connected to the best chain or a known
    /// side branch, false when it was parked as an orphan. Verification
    /// failures and store failures are errors.
    pub fn add(&mut self, block: &Block) -> Result<bool, BlockChainError> {
        if block.hash() == self.chain_head.hash() {
            // Duplicate of the head; harmless.
            return Ok(true);
        }

        self.verifier.verify_block(block)?;

        let prev = match self.store.get(&block.header.prev_block_hash)? {
            Some(prev) => prev,
            None => {
                log::debug!(
                    "block {} has unknown parent {}, parking as orphan",
                    block.hash(),
                    block.header.prev_block_hash
                );
                self.orphans.push(block.clone());
                return Ok(false);
            }
        };

        self.accept(block, prev)?;
        self.try_connect_orphans()?;
        Ok(true)
    }

    /// Connect a block whose parent is known.
    fn accept(&mut self, block: &Block, prev: StoredBlock) -> Result<(), BlockChainError> {
        self.check_difficulty_transition(&prev, &block.header)?;
        let next = prev.build(block.header.clone());
        self.store.put(&next)?;

        if next.header.prev_block_hash == self.chain_head.hash() {
            // Extends the best chain.
            self.scan_into_wallet(block, BlockType::BestChain);
            self.store.set_chain_head(&next)?;
            log::info!("chain head is now {} at height {}", next.hash(), next.height);
            self.chain_head = next;
        } else {
            // Attaches to a side branch. First-seen wins on equal work, so
            // only strictly more work displaces the head.
            self.scan_into_wallet(block, BlockType::SideChain);
            if next.more_work_than(&self.chain_head) {
                self.reorganize(next)?;
            } else {
                log::info!(
                    "block {} extends a side branch to height {}",
                    next.hash(),
                    next.height
                );
            }
        }
        Ok(())
    }

    /// Retry parked orphans until a full pass connects none.
    fn try_connect_orphans(&mut self) -> Result<(), BlockChainError> {
        loop {
            let mut connected_any = false;
            let mut remaining = Vec::new();
            for orphan in std::mem::take(&mut self.orphans) {
                match self.store.get(&orphan.header.prev_block_hash)? {
                    Some(prev) => {
                        log::debug!("orphan {} found its parent", orphan.hash());
                        self.accept(&orphan, prev)?;
                        connected_any = true;
                    }
                    None => remaining.push(orphan),
                }
            }
            self.orphans = remaining;
            if !connected_any {
                return Ok(());
            }
        }
    }

    /// Hand a block's transactions to the wallet, skipping irrelevant ones
    /// and ones whose scripts the wallet cannot read.
    fn scan_into_wallet(&self, block: &Block, block_type: BlockType) {
        if !block.has_transactions() {
            return;
        }
        let block_hash = block.hash();
        let mut wallet = self.wallet.lock().unwrap();
        for tx in &block.transactions {
            match wallet.is_relevant(tx) {
                Ok(true) => {
                    if let Err(e) = wallet.receive(tx, block_hash, block_type) {
                        log::warn!("skipping tx {} in block {}: {}", tx.txid(), block_hash, e);
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    log::warn!("unreadable script in tx {}, skipped: {}", tx.txid(), e);
                }
            }
        }
    }

    /// Enforce the difficulty schedule for a block building on `prev`.
    ///
    /// Off epoch boundaries the target must not change. On a boundary the
    /// target is recomputed from the epoch's actual duration and compared
    /// in compact form, which is what bounds the comparison to the wire
    /// encoding's precision.
    fn check_difficulty_transition(
        &self,
        prev: &StoredBlock,
        next: &BlockHeader,
    ) -> Result<(), BlockChainError> {
        let interval = self.params.interval;
        if (prev.height + 1) % interval != 0 {
            if next.bits != prev.header.bits {
                return Err(VerificationError::DifficultyMismatch {
                    hash: next.hash(),
                    expected_bits: prev.header.bits,
                    got_bits: next.bits,
                }
                .into());
            }
            return Ok(());
        }

        // Walk back to the first block of the closing epoch.
        let mut epoch_start = prev.clone();
        for _ in 0..interval - 1 {
            epoch_start = self.parent_of(&epoch_start)?;
        }

        let target_timespan = self.params.target_timespan;
        let actual_timespan = prev
            .header
            .time
            .saturating_sub(epoch_start.header.time)
            .clamp(target_timespan / 4, target_timespan * 4);

        let expected =
            Target::from_compact(prev.header.bits).retarget(actual_timespan, target_timespan, self.params.pow_limit());
        if expected.compact() != next.bits {
            return Err(VerificationError::DifficultyMismatch {
                hash: next.hash(),
                expected_bits: expected.compact(),
                got_bits: next.bits,
            }
            .into());
        }
        Ok(())
    }

    /// Replace the best-chain suffix with the branch ending at `new_head`.
    fn reorganize(&mut self, new_head: StoredBlock) -> Result<(), BlockChainError> {
        let ancestor = self.common_ancestor(&new_head)?;
        // Losing branch newest-first, winning branch oldest-first, both
        // exclusive of the ancestor.
        let old_chain = self.branch_back_to(&self.chain_head.clone(), &ancestor)?;
        let mut new_chain = self.branch_back_to(&new_head, &ancestor)?;
        new_chain.reverse();

        log::info!(
            "reorganize at ancestor {}: {} blocks out, {} blocks in, new head {}",
            ancestor.hash(),
            old_chain.len(),
            new_chain.len(),
            new_head.hash()
        );

        {
            let mut wallet = self.wallet.lock().unwrap();
            wallet.reorganize(&old_chain, &new_chain);
        }

        self.store.set_chain_head(&new_head)?;
        self.chain_head = new_head;
        Ok(())
    }

    /// Walk both cursors back, always advancing the higher one, until they
    /// meet.
    fn common_ancestor(&self, new_head: &StoredBlock) -> Result<StoredBlock, BlockChainError> {
        let mut a = self.chain_head.clone();
        let mut b = new_head.clone();
        while a.hash() != b.hash() {
            if a.height >= b.height {
                a = self.parent_of(&a)?;
            } else {
                b = self.parent_of(&b)?;
            }
        }
        Ok(a)
    }

    /// Blocks from `tip` back to (but excluding) `ancestor`, newest first.
    fn branch_back_to(
        &self,
        tip: &StoredBlock,
        ancestor: &StoredBlock,
    ) -> Result<Vec<StoredBlock>, BlockChainError> {
        let mut blocks = Vec::new();
        let mut cursor = tip.clone();
        while cursor.hash() != ancestor.hash() {
            blocks.push(cursor.clone());
            cursor = self.parent_of(&cursor)?;
        }
        Ok(blocks)
    }

    fn parent_of(&self, block: &StoredBlock) -> Result<StoredBlock, BlockChainError> {
        self.store
            .get(&block.header.prev_block_hash)?
            .ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "missing parent {} of stored block {}",
                    block.header.prev_block_hash,
                    block.hash()
                ))
                .into()
            })
    }
}
