// Wallet: key ring, transaction pools and reconciliation rules
//
// Transactions relevant to the wallet live in exactly one of four pools:
//
//   unspent - on the best chain, at least one output of ours unspent
//   spent   - on the best chain, relevant outputs consumed by confirmed spends
//   pending - created and confirmed-sent by us, not yet seen in a block
//   dead    - overridden by a double spend that reached the best chain
//
// Block arrivals and reorganizations drive transitions between them.
// Transactions seen only on side chains wait in a separate index so a
// later reorganization can replay them.

use crate::core::{
    read_varint, write_varint, Hash256, PayTo, Script, ScriptError, Serializable, Transaction,
    TxInput, TxOutput,
};
use crate::params::NetworkParams;
use crate::storage::StoredBlock;
use crate::wallet::keystore::{Address, KeyPair};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

const WALLET_MAGIC: [u8; 4] = *b"spvw";
const WALLET_VERSION: u32 = 1;

/// How a block relates to the best chain when its transactions are handed
/// to the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    /// The block extends the best chain; balances change.
    BestChain,
    /// The block sits on a side branch; remembered but balance-neutral.
    SideChain,
}

/// Which pool a transaction currently occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolName {
    Unspent,
    Spent,
    Pending,
    Dead,
}

/// Wallet operation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Coin selection could not cover the requested amount.
    InsufficientFunds { available: u64, requested: u64 },
    /// The wallet holds no keys, so there is no change address.
    NoKeys,
    /// Signing an input failed.
    Signing(String),
    Io(String),
    /// A saved wallet failed to parse.
    Format(String),
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WalletError::InsufficientFunds { available, requested } => write!(
                f,
                "insufficient funds: {} nanocoins available, {} requested",
                available, requested
            ),
            WalletError::NoKeys => write!(f, "wallet has no keys"),
            WalletError::Signing(what) => write!(f, "failed to sign input: {}", what),
            WalletError::Io(what) => write!(f, "wallet io error: {}", what),
            WalletError::Format(what) => write!(f, "bad wallet data: {}", what),
        }
    }
}

impl std::error::Error for WalletError {}

/// Observer for wallet events.
pub trait WalletEventListener {
    /// A pending transaction was overridden by `replacement` reaching the
    /// best chain (a double spend of one of its inputs).
    fn dead_transaction(&self, dead: &Transaction, replacement: &Transaction) {
        let _ = (dead, replacement);
    }

    /// A best-chain transaction paid this wallet.
    fn coins_received(&self, tx: &Transaction, available: u64) {
        let _ = (tx, available);
    }
}

/// Insertion-ordered transaction pool.
///
/// Coin selection iterates in insertion order, so ordering is part of the
/// contract; a plain HashMap will not do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Pool {
    entries: Vec<(Hash256, Transaction)>,
}

impl Pool {
    fn insert(&mut self, txid: Hash256, tx: Transaction) {
        match self.entries.iter_mut().find(|(id, _)| *id == txid) {
            Some(entry) => entry.1 = tx,
            None => self.entries.push((txid, tx)),
        }
    }

    fn remove(&mut self, txid: &Hash256) -> Option<Transaction> {
        let index = self.entries.iter().position(|(id, _)| id == txid)?;
        Some(self.entries.remove(index).1)
    }

    fn get(&self, txid: &Hash256) -> Option<&Transaction> {
        self.entries.iter().find(|(id, _)| id == txid).map(|(_, tx)| tx)
    }

    fn contains(&self, txid: &Hash256) -> bool {
        self.get(txid).is_some()
    }

    fn iter(&self) -> impl Iterator<Item = &(Hash256, Transaction)> {
        self.entries.iter()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A personal wallet: key ring plus reconciled transaction pools.
pub struct Wallet {
    params: NetworkParams,
    keychain: Vec<KeyPair>,
    unspent: Pool,
    spent: Pool,
    pending: Pool,
    dead: Pool,
    /// Transactions seen only in side-chain blocks, kept for replay.
    side_chain: Pool,
    /// block hash -> txids of wallet-relevant transactions, in block order.
    block_appearances: HashMap<Hash256, Vec<Hash256>>,
    /// dead txid -> txid of the replacement that killed it.
    dead_by: HashMap<Hash256, Hash256>,
    listeners: Vec<Box<dyn WalletEventListener + Send>>,
}

impl Wallet {
    pub fn new(params: NetworkParams) -> Self {
        Self {
            params,
            keychain: Vec::new(),
            unspent: Pool::default(),
            spent: Pool::default(),
            pending: Pool::default(),
            dead: Pool::default(),
            side_chain: Pool::default(),
            block_appearances: HashMap::new(),
            dead_by: HashMap::new(),
            listeners: Vec::new(),
        }
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    /// Add a key to the ring. Keys are never removed.
    ///
    /// Not safe to race against an in-flight sync: transactions scanned
    /// before the key landed are not re-examined.
    pub fn add_key(&mut self, key: KeyPair) {
        self.keychain.push(key);
    }

    pub fn keychain(&self) -> &[KeyPair] {
        &self.keychain
    }

    pub fn add_event_listener(&mut self, listener: Box<dyn WalletEventListener + Send>) {
        self.listeners.push(listener);
    }

    // ---- classification ----------------------------------------------

    pub fn is_pubkey_mine(&self, pubkey: &[u8]) -> bool {
        self.keychain.iter().any(|k| k.pubkey_bytes() == pubkey)
    }

    pub fn is_pubkey_hash_mine(&self, hash: &[u8; 20]) -> bool {
        self.keychain.iter().any(|k| &k.pubkey_hash() == hash)
    }

    /// True when the output pays a key in the ring, by pubkey or hash160.
    pub fn is_mine(&self, output: &TxOutput) -> Result<bool, ScriptError> {
        match Script::classify(&output.script_pubkey)? {
            PayTo::PubKeyHash(hash) => Ok(self.is_pubkey_hash_mine(&hash)),
            PayTo::PubKey(pubkey) => Ok(self.is_pubkey_mine(&pubkey)),
        }
    }

    /// Should the chain hand this transaction to the wallet at all?
    ///
    /// True when it pays us, spends a transaction we track, or carries a
    /// scriptSig signed by one of our keys.
    pub fn is_relevant(&self, tx: &Transaction) -> Result<bool, ScriptError> {
        let txid = tx.txid();
        if self.pool_of(&txid).is_some() || self.side_chain.contains(&txid) {
            return Ok(true);
        }
        for output in &tx.outputs {
            if self.is_mine(output)? {
                return Ok(true);
            }
        }
        for input in &tx.inputs {
            if self.lookup_any(&input.prev_tx_hash).is_some() {
                return Ok(true);
            }
            // Coinbase scriptSigs are arbitrary bytes; parse failures here
            // are not script errors.
            if let Ok((_, Some(pubkey))) = Script::parse_script_sig(&input.script_sig) {
                if self.is_pubkey_mine(&pubkey) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    pub fn pool_of(&self, txid: &Hash256) -> Option<PoolName> {
        if self.unspent.contains(txid) {
            Some(PoolName::Unspent)
        } else if self.spent.contains(txid) {
            Some(PoolName::Spent)
        } else if self.pending.contains(txid) {
            Some(PoolName::Pending)
        } else if self.dead.contains(txid) {
            Some(PoolName::Dead)
        } else {
            None
        }
    }

    pub fn get_transaction(&self, txid: &Hash256) -> Option<&Transaction> {
        self.unspent
            .get(txid)
            .or_else(|| self.spent.get(txid))
            .or_else(|| self.pending.get(txid))
            .or_else(|| self.dead.get(txid))
    }

    fn lookup_any(&self, txid: &Hash256) -> Option<Transaction> {
        self.get_transaction(txid)
            .or_else(|| self.side_chain.get(txid))
            .cloned()
    }

    // ---- block arrival -----------------------------------------------

    /// Apply a relevant transaction observed in a block.
    pub fn receive(
        &mut self,
        tx: &Transaction,
        block_hash: Hash256,
        block_type: BlockType,
    ) -> Result<(), ScriptError> {
        let txid = tx.txid();
        self.record_appearance(txid, block_hash);

        match block_type {
            BlockType::SideChain => {
                // Balance-neutral; remember the transaction so a future
                // reorganization can replay it.
                if self.pool_of(&txid).is_none() && !self.side_chain.contains(&txid) {
                    self.side_chain.insert(txid, tx.clone());
                }
                Ok(())
            }
            BlockType::BestChain => self.receive_best_chain(tx, txid),
        }
    }

    fn receive_best_chain(&mut self, tx: &Transaction, txid: Hash256) -> Result<(), ScriptError> {
        self.side_chain.remove(&txid);

        if let Some(our_tx) = self.pending.remove(&txid) {
            // A send of ours confirmed.
            log::info!("wallet: pending tx {} entered the best chain", txid);
            self.mark_predecessors_spent(&our_tx);
            if self.has_unspent_output_to_me(&our_tx) {
                self.unspent.insert(txid, our_tx);
            } else {
                self.spent.insert(txid, our_tx);
            }
            return Ok(());
        }

        if self.unspent.contains(&txid) || self.spent.contains(&txid) {
            // Duplicate delivery; the appearance record is already updated.
            return Ok(());
        }

        // Double-spend detection: an incoming confirmed transaction that
        // consumes an outpoint some pending transaction also consumes kills
        // that pending transaction (the Finney attack case).
        let outpoints: HashSet<(Hash256, u32)> = tx.inputs.iter().map(TxInput::outpoint).collect();
        let doomed: Vec<Hash256> = self
            .pending
            .iter()
            .filter(|(_, p)| p.inputs.iter().any(|i| outpoints.contains(&i.outpoint())))
            .map(|(id, _)| *id)
            .collect();
        let mut killed = Vec::new();
        for dead_id in doomed {
            let Some(dead_tx) = self.pending.remove(&dead_id) else {
                continue;
            };
            log::warn!(
                "wallet: pending tx {} double-spent by confirmed tx {}, marking dead",
                dead_id,
                txid
            );
            self.dead.insert(dead_id, dead_tx.clone());
            self.dead_by.insert(dead_id, txid);
            killed.push(dead_tx);
        }

        // A transaction we once declared dead has in fact confirmed.
        if self.dead.remove(&txid).is_some() {
            self.dead_by.remove(&txid);
        }

        let pays_me = self.value_to_me(tx) > 0;
        self.mark_predecessors_spent(tx);
        if pays_me {
            // Pays us: track it. A spend that only takes is discarded once
            // its predecessors are marked.
            self.unspent.insert(txid, tx.clone());
        }

        for dead_tx in &killed {
            for listener in &self.listeners {
                listener.dead_transaction(dead_tx, tx);
            }
        }
        if pays_me {
            let available = self.available_balance();
            for listener in &self.listeners {
                listener.coins_received(tx, available);
            }
        }
        Ok(())
    }

    fn record_appearance(&mut self, txid: Hash256, block_hash: Hash256) {
        let entry = self.block_appearances.entry(block_hash).or_default();
        if !entry.contains(&txid) {
            entry.push(txid);
        }
    }

    /// Move every unspent transaction one of `tx`'s inputs consumes into
    /// the spent pool. Returns true when anything moved.
    fn mark_predecessors_spent(&mut self, tx: &Transaction) -> bool {
        let mut moved = false;
        for input in &tx.inputs {
            if let Some(pred) = self.unspent.remove(&input.prev_tx_hash) {
                self.spent.insert(input.prev_tx_hash, pred);
                moved = true;
            }
        }
        moved
    }

    /// Does `tx` still have an output of ours no tracked transaction spends?
    fn has_unspent_output_to_me(&self, tx: &Transaction) -> bool {
        let txid = tx.txid();
        tx.outputs.iter().enumerate().any(|(index, output)| {
            self.is_mine(output).unwrap_or(false)
                && !self.output_spent_by_tracked(&txid, index as u32)
        })
    }

    fn output_spent_by_tracked(&self, txid: &Hash256, index: u32) -> bool {
        let spenders = self
            .unspent
            .iter()
            .chain(self.spent.iter())
            .chain(self.pending.iter());
        for (_, tx) in spenders {
            if tx.inputs.iter().any(|i| i.outpoint() == (*txid, index)) {
                return true;
            }
        }
        false
    }

    fn output_spent_by_pending(&self, txid: &Hash256, index: u32) -> bool {
        self.pending
            .iter()
            .any(|(_, tx)| tx.inputs.iter().any(|i| i.outpoint() == (*txid, index)))
    }

    fn value_to_me(&self, tx: &Transaction) -> u64 {
        tx.outputs
            .iter()
            .filter(|o| self.is_mine(o).unwrap_or(false))
            .map(|o| o.value)
            .sum()
    }

    /// Every input consumes an output of ours (so the transaction was sent
    /// from this wallet).
    fn is_sent_from_me(&self, tx: &Transaction) -> bool {
        if tx.is_coinbase() {
            return false;
        }
        tx.inputs.iter().all(|input| {
            self.lookup_any(&input.prev_tx_hash)
                .and_then(|pred| pred.outputs.get(input.prev_index as usize).cloned())
                .map(|out| self.is_mine(&out).unwrap_or(false))
                .unwrap_or(false)
        })
    }

    // ---- reorganization ----------------------------------------------

    /// Apply a chain reorganization.
    ///
    /// `old_blocks` is the losing branch newest-first, `new_blocks` the
    /// winning branch oldest-first, both exclusive of the common ancestor.
    /// Old-branch transactions are rewound, then new-branch transactions
    /// replayed through the normal arrival rules.
    pub fn reorganize(&mut self, old_blocks: &[StoredBlock], new_blocks: &[StoredBlock]) {
        log::info!(
            "wallet: reorganizing, {} blocks rewound, {} blocks replayed",
            old_blocks.len(),
            new_blocks.len()
        );

        for block in old_blocks {
            let txids = self
                .block_appearances
                .get(&block.hash())
                .cloned()
                .unwrap_or_default();
            for txid in txids.iter().rev() {
                self.rewind(*txid);
            }
        }

        for block in new_blocks {
            let txids = self
                .block_appearances
                .get(&block.hash())
                .cloned()
                .unwrap_or_default();
            for txid in txids {
                if let Some(tx) = self.lookup_any(&txid) {
                    if let Err(e) = self.receive_best_chain(&tx, txid) {
                        log::warn!("wallet: skipping tx {} during replay: {}", txid, e);
                    }
                }
            }
        }
    }

    /// Undo the best-chain effects of one transaction.
    fn rewind(&mut self, txid: Hash256) {
        // Pending transactions this one had killed come back to life.
        let resurrect: Vec<Hash256> = self
            .dead_by
            .iter()
            .filter(|(_, replacement)| **replacement == txid)
            .map(|(dead, _)| *dead)
            .collect();
        for dead_id in resurrect {
            self.dead_by.remove(&dead_id);
            if let Some(tx) = self.dead.remove(&dead_id) {
                log::info!("wallet: resurrecting tx {} to pending", dead_id);
                self.pending.insert(dead_id, tx);
            }
        }

        let tx = match self
            .unspent
            .remove(&txid)
            .or_else(|| self.spent.remove(&txid))
        {
            Some(tx) => tx,
            // Pending-only or side-chain-only: nothing to unwind.
            None => return,
        };

        // Predecessors it spent return to unspent unless some other
        // confirmed transaction still spends them.
        for input in &tx.inputs {
            let prev = input.prev_tx_hash;
            if self.spent.contains(&prev) && !self.confirmed_spender_exists(&prev) {
                if let Some(pred) = self.spent.remove(&prev) {
                    self.unspent.insert(prev, pred);
                }
            }
        }

        if self.is_sent_from_me(&tx) {
            self.pending.insert(txid, tx);
        } else {
            self.side_chain.insert(txid, tx);
        }
    }

    fn confirmed_spender_exists(&self, prev_txid: &Hash256) -> bool {
        self.unspent
            .iter()
            .chain(self.spent.iter())
            .any(|(_, tx)| tx.inputs.iter().any(|i| i.prev_tx_hash == *prev_txid))
    }

    // ---- balances ----------------------------------------------------

    /// Spendable right now: our outputs in unspent transactions whose
    /// spend we have not already initiated locally.
    pub fn available_balance(&self) -> u64 {
        let mut total = 0u64;
        for (txid, tx) in self.unspent.iter() {
            for (index, output) in tx.outputs.iter().enumerate() {
                if self.is_mine(output).unwrap_or(false)
                    && !self.output_spent_by_pending(txid, index as u32)
                {
                    total += output.value;
                }
            }
        }
        total
    }

    /// Available plus what pending sends will return to us.
    pub fn estimated_balance(&self) -> u64 {
        let mut total = self.available_balance();
        for (_, tx) in self.pending.iter() {
            total += self.value_to_me(tx);
        }
        total
    }

    // ---- sending -----------------------------------------------------

    /// Build and sign a payment, change to the wallet's first key.
    ///
    /// Stateless with respect to the pools: the result is not tracked
    /// until `confirm_send`, and selection deliberately ignores pending
    /// spends (which is how a wallet can produce a double spend of its
    /// own coins).
    pub fn create_send(&self, to: &Address, amount: u64) -> Result<Transaction, WalletError> {
        let change_key = self.keychain.first().ok_or(WalletError::NoKeys)?;
        let change = change_key.address(&self.params);
        self.create_send_with_change(to, amount, &change)
    }

    pub fn create_send_with_change(
        &self,
        to: &Address,
        amount: u64,
        change_addr: &Address,
    ) -> Result<Transaction, WalletError> {
        // Greedy selection in pool insertion order.
        let mut selected: Vec<(Hash256, u32, TxOutput)> = Vec::new();
        let mut gathered = 0u64;
        'outer: for (txid, tx) in self.unspent.iter() {
            for (index, output) in tx.outputs.iter().enumerate() {
                if self.is_mine(output).unwrap_or(false) {
                    gathered += output.value;
                    selected.push((*txid, index as u32, output.clone()));
                    if gathered >= amount {
                        break 'outer;
                    }
                }
            }
        }
        if gathered < amount {
            return Err(WalletError::InsufficientFunds {
                available: gathered,
                requested: amount,
            });
        }

        let inputs: Vec<TxInput> = selected
            .iter()
            .map(|(txid, index, _)| TxInput::new(*txid, *index, vec![]))
            .collect();

        let mut outputs = vec![TxOutput::new(amount, to.script_pubkey())];
        let change = gathered - amount;
        if change > 0 {
            outputs.push(TxOutput::new(change, change_addr.script_pubkey()));
        }

        let mut tx = Transaction::new(inputs, outputs);
        self.sign_inputs(&mut tx, &selected)?;
        Ok(tx)
    }

    /// Sign every input of `tx` against the scriptPubKey of the output it
    /// spends. The signed digest is the id of the unsigned transaction.
    fn sign_inputs(
        &self,
        tx: &mut Transaction,
        selected: &[(Hash256, u32, TxOutput)],
    ) -> Result<(), WalletError> {
        let digest = *tx.txid().as_bytes();

        for (i, (_, _, spent_output)) in selected.iter().enumerate() {
            let form = Script::classify(&spent_output.script_pubkey)
                .map_err(|e| WalletError::Signing(e.to_string()))?;
            let key = match &form {
                PayTo::PubKeyHash(hash) => self.keychain.iter().find(|k| &k.pubkey_hash() == hash),
                PayTo::PubKey(pubkey) => {
                    self.keychain.iter().find(|k| k.pubkey_bytes() == *pubkey)
                }
            }
            .ok_or_else(|| WalletError::Signing("no key for selected output".to_string()))?;

            let signature = key.sign(&digest).map_err(WalletError::Signing)?;
            tx.inputs[i].script_sig = match form {
                PayTo::PubKeyHash(_) => Script::p2pkh_script_sig(&signature, &key.pubkey_bytes()),
                PayTo::PubKey(_) => Script::p2pk_script_sig(&signature),
            };
        }
        Ok(())
    }

    /// Commit a created send: from here on it counts against the estimated
    /// balance and can be killed by a confirmed double spend.
    pub fn confirm_send(&mut self, tx: Transaction) {
        let txid = tx.txid();
        log::info!("wallet: confirmed send {}", txid);
        self.pending.insert(txid, tx);
    }

    // ---- persistence -------------------------------------------------

    /// Serialize: magic, version, keys (secret scalar + optional label),
    /// then the four pools as varint count + wire transactions.
    pub fn save_to<W: Write>(&self, writer: &mut W) -> Result<(), WalletError> {
        let io = |e: std::io::Error| WalletError::Io(e.to_string());

        writer.write_all(&WALLET_MAGIC).map_err(io)?;
        writer.write_all(&WALLET_VERSION.to_le_bytes()).map_err(io)?;

        write_varint(writer, self.keychain.len() as u64).map_err(io)?;
        for key in &self.keychain {
            writer.write_all(&key.secret_key.secret_bytes()).map_err(io)?;
            match &key.label {
                Some(label) => {
                    writer.write_all(&[1]).map_err(io)?;
                    crate::core::write_var_string(writer, label).map_err(io)?;
                }
                None => writer.write_all(&[0]).map_err(io)?,
            }
        }

        for pool in [&self.unspent, &self.spent, &self.pending, &self.dead] {
            write_varint(writer, pool.len() as u64).map_err(io)?;
            for (_, tx) in pool.iter() {
                writer.write_all(&tx.serialize()).map_err(io)?;
            }
        }
        Ok(())
    }

    pub fn load_from<R: Read>(params: NetworkParams, reader: &mut R) -> Result<Self, WalletError> {
        let io = |e: std::io::Error| WalletError::Io(e.to_string());

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(io)?;
        if magic != WALLET_MAGIC {
            return Err(WalletError::Format(format!(
                "bad wallet magic {:02x?}",
                magic
            )));
        }
        let mut version = [0u8; 4];
        reader.read_exact(&mut version).map_err(io)?;
        let version = u32::from_le_bytes(version);
        if version != WALLET_VERSION {
            return Err(WalletError::Format(format!(
                "unsupported wallet version {}",
                version
            )));
        }

        let mut wallet = Wallet::new(params);

        let key_count = read_varint(reader).map_err(io)?;
        for _ in 0..key_count {
            let mut secret = [0u8; 32];
            reader.read_exact(&mut secret).map_err(io)?;
            let mut flag = [0u8; 1];
            reader.read_exact(&mut flag).map_err(io)?;
            let label = if flag[0] == 1 {
                Some(crate::core::read_var_string(reader).map_err(io)?)
            } else {
                None
            };
            let key = KeyPair::from_secret_bytes(&secret, label).map_err(WalletError::Format)?;
            wallet.keychain.push(key);
        }

        for pool_name in [PoolName::Unspent, PoolName::Spent, PoolName::Pending, PoolName::Dead] {
            let count = read_varint(reader).map_err(io)?;
            for _ in 0..count {
                let tx = Transaction::from_reader(reader).map_err(WalletError::Format)?;
                let txid = tx.txid();
                match pool_name {
                    PoolName::Unspent => wallet.unspent.insert(txid, tx),
                    PoolName::Spent => wallet.spent.insert(txid, tx),
                    PoolName::Pending => wallet.pending.insert(txid, tx),
                    PoolName::Dead => wallet.dead.insert(txid, tx),
                }
            }
        }

        Ok(wallet)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), WalletError> {
        let mut file =
            std::fs::File::create(path).map_err(|e| WalletError::Io(e.to_string()))?;
        self.save_to(&mut file)
    }

    pub fn load<P: AsRef<Path>>(params: NetworkParams, path: P) -> Result<Self, WalletError> {
        let mut file = std::fs::File::open(path).map_err(|e| WalletError::Io(e.to_string()))?;
        Self::load_from(params, &mut file)
    }
}

impl PartialEq for Wallet {
    /// Persistent state only: keys (scalar + label) and the four pools.
    fn eq(&self, other: &Self) -> bool {
        self.keychain.len() == other.keychain.len()
            && self
                .keychain
                .iter()
                .zip(other.keychain.iter())
                .all(|(a, b)| a.secret_key == b.secret_key && a.label == b.label)
            && self.unspent == other.unspent
            && self.spent == other.spent
            && self.pending == other.pending
            && self.dead == other.dead
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("keys", &self.keychain.len())
            .field("unspent", &self.unspent.len())
            .field("spent", &self.spent.len())
            .field("pending", &self.pending.len())
            .field("dead", &self.dead.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BlockHeader;
    use std::sync::{Arc, Mutex};

    const COIN: u64 = 100_000_000;

    fn wallet_with_key() -> (Wallet, KeyPair) {
        let mut wallet = Wallet::new(NetworkParams::unit_tests());
        let key = KeyPair::generate();
        wallet.add_key(key.clone());
        (wallet, key)
    }

    /// A transaction paying `value` to `key` from an untracked source.
    fn fake_payment(tag: u8, value: u64, key: &KeyPair) -> Transaction {
        Transaction::new(
            vec![TxInput::new(Hash256::new([tag; 32]), 0, vec![])],
            vec![TxOutput::new(value, key.script_pubkey())],
        )
    }

    fn block_hash(tag: u8) -> Hash256 {
        Hash256::new([tag; 32])
    }

    fn stored(tag: u8) -> StoredBlock {
        // Only the hash matters to the wallet; give each tag a distinct
        // header.
        StoredBlock {
            header: BlockHeader::new(1, Hash256::new([tag; 32]), Hash256::zero(), 1, 0x207fffff, tag as u32),
            chain_work: crate::U256::zero(),
            height: tag as u32,
        }
    }

    fn pools(wallet: &Wallet) -> (Vec<Hash256>, Vec<Hash256>, Vec<Hash256>, Vec<Hash256>) {
        let ids = |p: &Pool| p.iter().map(|(id, _)| *id).collect::<Vec<_>>();
        (
            ids(&wallet.unspent),
            ids(&wallet.spent),
            ids(&wallet.pending),
            ids(&wallet.dead),
        )
    }

    fn assert_partition(wallet: &Wallet) {
        let (u, s, p, d) = pools(wallet);
        let mut all: Vec<Hash256> = Vec::new();
        all.extend(&u);
        all.extend(&s);
        all.extend(&p);
        all.extend(&d);
        let unique: HashSet<Hash256> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len(), "txid present in more than one pool");
        assert!(wallet.available_balance() <= wallet.estimated_balance());
    }

    #[test]
    fn test_basic_spend() {
        let (mut wallet, key) = wallet_with_key();
        let payment = fake_payment(1, COIN, &key);
        wallet.receive(&payment, block_hash(0x10), BlockType::BestChain).unwrap();

        assert_eq!(wallet.available_balance(), COIN);
        assert_eq!(wallet.estimated_balance(), COIN);

        let to = KeyPair::generate().address(wallet.params());
        let send = wallet.create_send(&to, COIN / 2).unwrap();

        assert_eq!(send.inputs.len(), 1);
        assert_eq!(send.inputs[0].outpoint(), (payment.txid(), 0));
        assert_eq!(send.outputs.len(), 2);
        assert_eq!(send.outputs[0].value, COIN / 2);
        assert_eq!(send.outputs[0].script_pubkey, to.script_pubkey());
        // Change returns to the receiving key.
        assert_eq!(send.outputs[1].value, COIN / 2);
        assert_eq!(send.outputs[1].script_pubkey, key.script_pubkey());
        // Stateless: nothing entered any pool.
        assert_eq!(wallet.pool_of(&send.txid()), None);
        assert_partition(&wallet);
    }

    #[test]
    fn test_send_inputs_verify() {
        let (mut wallet, key) = wallet_with_key();
        let payment = fake_payment(1, COIN, &key);
        wallet.receive(&payment, block_hash(0x10), BlockType::BestChain).unwrap();

        let to = KeyPair::generate().address(wallet.params());
        let send = wallet.create_send(&to, COIN / 4).unwrap();

        // The digest is the unsigned form's id.
        let mut unsigned = send.clone();
        for input in &mut unsigned.inputs {
            input.script_sig.clear();
        }
        let digest = unsigned.txid();
        assert_eq!(
            Script::verify_spend(
                &send.inputs[0].script_sig,
                &payment.outputs[0].script_pubkey,
                digest.as_bytes()
            ),
            Ok(true)
        );
    }

    #[test]
    fn test_side_chain_isolation() {
        let (mut wallet, key) = wallet_with_key();
        wallet
            .receive(&fake_payment(1, COIN, &key), block_hash(0x10), BlockType::BestChain)
            .unwrap();
        wallet
            .receive(&fake_payment(2, COIN / 2, &key), block_hash(0x20), BlockType::SideChain)
            .unwrap();

        assert_eq!(wallet.available_balance(), COIN);
        assert_eq!(wallet.estimated_balance(), COIN);
        assert_partition(&wallet);
    }

    #[test]
    fn test_spend_then_confirm() {
        let (mut wallet, key) = wallet_with_key();
        let five = fake_payment(1, 5 * COIN, &key);
        let half = fake_payment(2, COIN / 2, &key);
        wallet.receive(&five, block_hash(0x10), BlockType::BestChain).unwrap();
        wallet.receive(&half, block_hash(0x20), BlockType::BestChain).unwrap();
        assert_eq!(wallet.available_balance(), 5 * COIN + COIN / 2);

        let to = KeyPair::generate().address(wallet.params());
        let send = wallet.create_send(&to, COIN).unwrap();
        wallet.confirm_send(send.clone());

        // The send consumed the 5.00 output; 4.00 change is pending.
        assert_eq!(wallet.estimated_balance(), 4 * COIN + COIN / 2);
        assert_eq!(wallet.available_balance(), COIN / 2);
        assert_ne!(wallet.available_balance(), wallet.estimated_balance());
        assert_partition(&wallet);

        // Confirmation in a third block makes the change spendable.
        wallet.receive(&send, block_hash(0x30), BlockType::BestChain).unwrap();
        assert_eq!(wallet.available_balance(), 4 * COIN + COIN / 2);
        assert_eq!(wallet.estimated_balance(), wallet.available_balance());
        assert_eq!(wallet.pool_of(&send.txid()), Some(PoolName::Unspent));
        assert_eq!(wallet.pool_of(&five.txid()), Some(PoolName::Spent));
        assert_partition(&wallet);
    }

    #[derive(Default)]
    struct DeadRecorder {
        seen: Arc<Mutex<Vec<(Hash256, Hash256)>>>,
    }

    impl WalletEventListener for DeadRecorder {
        fn dead_transaction(&self, dead: &Transaction, replacement: &Transaction) {
            self.seen.lock().unwrap().push((dead.txid(), replacement.txid()));
        }
    }

    #[test]
    fn test_finney_attack() {
        let (mut wallet, key) = wallet_with_key();
        let recorder = DeadRecorder::default();
        let seen = recorder.seen.clone();
        wallet.add_event_listener(Box::new(recorder));

        wallet
            .receive(&fake_payment(1, COIN, &key), block_hash(0x10), BlockType::BestChain)
            .unwrap();

        let merchant = KeyPair::generate().address(wallet.params());
        let other = KeyPair::generate().address(wallet.params());

        let send1 = wallet.create_send(&merchant, COIN / 2).unwrap();
        wallet.confirm_send(send1.clone());
        // Selection ignores pending spends, so this reuses the same coin.
        let send2 = wallet.create_send(&other, COIN / 2).unwrap();
        assert_eq!(send1.inputs[0].outpoint(), send2.inputs[0].outpoint());

        // The competing spend confirms instead of ours.
        wallet.receive(&send2, block_hash(0x20), BlockType::BestChain).unwrap();

        assert_eq!(wallet.pool_of(&send1.txid()), Some(PoolName::Dead));
        assert_eq!(wallet.pool_of(&send2.txid()), Some(PoolName::Unspent));
        assert_eq!(seen.lock().unwrap().as_slice(), &[(send1.txid(), send2.txid())]);
        // Only send2's change remains ours.
        assert_eq!(wallet.available_balance(), COIN / 2);
        assert_partition(&wallet);
    }

    #[test]
    fn test_reorganize_moves_transactions() {
        let (mut wallet, key) = wallet_with_key();
        let to = KeyPair::generate().address(wallet.params());

        // Chain: block A pays us, block B confirms our send.
        let payment = fake_payment(1, COIN, &key);
        wallet.receive(&payment, stored(0xa).hash(), BlockType::BestChain).unwrap();
        let send = wallet.create_send(&to, COIN / 2).unwrap();
        wallet.confirm_send(send.clone());
        wallet.receive(&send, stored(0xb).hash(), BlockType::BestChain).unwrap();
        assert_eq!(wallet.pool_of(&send.txid()), Some(PoolName::Unspent));

        // A competing branch replaces block B and does not include the send.
        wallet.reorganize(&[stored(0xb)], &[stored(0xc), stored(0xd)]);

        // Our send returns to pending, the payment becomes spendable again.
        assert_eq!(wallet.pool_of(&send.txid()), Some(PoolName::Pending));
        assert_eq!(wallet.pool_of(&payment.txid()), Some(PoolName::Unspent));
        assert_eq!(wallet.available_balance(), 0); // pending send consumes it
        assert_eq!(wallet.estimated_balance(), COIN / 2);
        assert_partition(&wallet);
    }

    #[test]
    fn test_reorg_idempotence() {
        let (mut wallet, key) = wallet_with_key();

        let payment = fake_payment(1, COIN, &key);
        wallet.receive(&payment, stored(0xa).hash(), BlockType::BestChain).unwrap();
        let side = fake_payment(2, 2 * COIN, &key);
        wallet.receive(&side, stored(0xc).hash(), BlockType::SideChain).unwrap();

        let before = pools(&wallet);
        let before_available = wallet.available_balance();

        // Side branch wins, then loses again.
        wallet.reorganize(&[stored(0xa)], &[stored(0xc)]);
        assert_eq!(wallet.pool_of(&side.txid()), Some(PoolName::Unspent));
        assert_eq!(wallet.available_balance(), 2 * COIN);
        wallet.reorganize(&[stored(0xc)], &[stored(0xa)]);

        assert_eq!(pools(&wallet), before);
        assert_eq!(wallet.available_balance(), before_available);
        assert_partition(&wallet);
    }

    #[test]
    fn test_insufficient_funds() {
        let (mut wallet, key) = wallet_with_key();
        wallet
            .receive(&fake_payment(1, 1000, &key), block_hash(0x10), BlockType::BestChain)
            .unwrap();

        let to = KeyPair::generate().address(wallet.params());
        match wallet.create_send(&to, 5000) {
            Err(WalletError::InsufficientFunds { available, requested }) => {
                assert_eq!(available, 1000);
                assert_eq!(requested, 5000);
            }
            other => panic!("expected insufficient funds, got {:?}", other),
        }
    }

    #[test]
    fn test_is_relevant() {
        let (mut wallet, key) = wallet_with_key();
        let payment = fake_payment(1, COIN, &key);
        assert!(wallet.is_relevant(&payment).unwrap());

        let unrelated = fake_payment(2, COIN, &KeyPair::generate());
        assert!(!wallet.is_relevant(&unrelated).unwrap());

        // A transaction spending one we track is relevant even if it pays
        // someone else.
        wallet.receive(&payment, block_hash(0x10), BlockType::BestChain).unwrap();
        let taking = Transaction::new(
            vec![TxInput::new(payment.txid(), 0, vec![])],
            vec![TxOutput::new(COIN, KeyPair::generate().script_pubkey())],
        );
        assert!(wallet.is_relevant(&taking).unwrap());
    }

    #[test]
    fn test_incoming_spend_discarded_but_predecessor_moves() {
        let (mut wallet, key) = wallet_with_key();
        let payment = fake_payment(1, COIN, &key);
        wallet.receive(&payment, block_hash(0x10), BlockType::BestChain).unwrap();

        // Someone spends our output away entirely (e.g. an imported key's
        // coin swept elsewhere).
        let taking = Transaction::new(
            vec![TxInput::new(payment.txid(), 0, vec![])],
            vec![TxOutput::new(COIN, KeyPair::generate().script_pubkey())],
        );
        wallet.receive(&taking, block_hash(0x20), BlockType::BestChain).unwrap();

        assert_eq!(wallet.pool_of(&payment.txid()), Some(PoolName::Spent));
        assert_eq!(wallet.pool_of(&taking.txid()), None);
        assert_eq!(wallet.available_balance(), 0);
        assert_partition(&wallet);
    }

    #[test]
    fn test_save_load_round_trip() {
        let (mut wallet, key) = wallet_with_key();
        wallet.add_key(KeyPair::generate_labeled("petty cash"));
        let payment = fake_payment(1, COIN, &key);
        wallet.receive(&payment, block_hash(0x10), BlockType::BestChain).unwrap();
        let send = wallet
            .create_send(&KeyPair::generate().address(wallet.params()), COIN / 2)
            .unwrap();
        wallet.confirm_send(send);

        let mut buf = Vec::new();
        wallet.save_to(&mut buf).unwrap();
        let loaded = Wallet::load_from(NetworkParams::unit_tests(), &mut buf.as_slice()).unwrap();

        assert_eq!(loaded, wallet);
        assert_eq!(loaded.estimated_balance(), wallet.estimated_balance());
    }

    #[test]
    fn test_load_rejects_bad_magic() {
        let err = Wallet::load_from(NetworkParams::unit_tests(), &mut &b"nope-definitely-not"[..]);
        assert!(matches!(err, Err(WalletError::Format(_))));
    }
}
