//! Shared test doubles and block builders for the chain core tests

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use ed25519_dalek::SigningKey;

use delos_common::{codec, crypto, Block, BlockId, Transaction, TxId};

use crate::interfaces::{
    ChainObserver, ForkCase, RoundsTracker, TransactionPipeline, TransactionResponse,
    TransactionStatus,
};
use crate::stores::Store;

pub fn keypair(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn make_tx(seed: u8, tx_type: u8, amount: u64, fee: u64) -> Transaction {
    let bytes = vec![seed, tx_type, 7, 7];
    Transaction {
        id: codec::tx_id(&bytes),
        tx_type,
        amount,
        fee,
        bytes,
    }
}

pub fn build_block(
    key: &SigningKey,
    height: u64,
    previous: Option<&Block>,
    timestamp: u32,
    txs: Vec<Transaction>,
) -> Block {
    let mut block = Block {
        version: 2,
        height,
        timestamp,
        previous_block_id: previous.map(|b| b.id),
        generator_public_key: crypto::public_key(key),
        payload_hash: codec::payload_hash(&txs),
        payload_length: codec::payload_length(&txs),
        number_of_transactions: txs.len() as u32,
        total_amount: txs.iter().map(|t| t.amount).sum(),
        total_fee: txs.iter().map(|t| t.fee).sum(),
        reward: 0,
        transactions: txs,
        ..Default::default()
    };
    block.generator_signature = crypto::sign_block(key, &block);
    block.id = codec::block_id(&block);
    block
}

/// A fully valid chain of `n` blocks: heights 1..=n, one slot apart, one
/// transaction per non-genesis block, all signed by the same generator
pub fn chain_of(n: u64) -> Vec<Block> {
    let key = keypair(1);
    let mut blocks: Vec<Block> = Vec::new();
    for height in 1..=n {
        let previous = blocks.last();
        let txs = if height == 1 {
            vec![]
        } else {
            vec![make_tx(height as u8, 0, height * 10, 1)]
        };
        let block = build_block(&key, height, previous, (height as u32 - 1) * 10, txs);
        blocks.push(block);
    }
    blocks
}

#[derive(Default)]
struct MemInner {
    blocks: BTreeMap<u64, Block>,
    temp: BTreeMap<u64, Block>,
}

/// In-memory store with injectable failures
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<MemInner>,
    fail_commits: AtomicBool,
    fail_queries: AtomicBool,
}

impl MemStore {
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Insert a block without going through `commit_block` failure injection
    pub fn seed_block(&self, block: &Block) {
        self.inner.lock().unwrap().blocks.insert(block.height, block.clone());
    }

    pub fn block_count(&self) -> usize {
        self.inner.lock().unwrap().blocks.len()
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.inner.lock().unwrap().blocks.values().any(|b| b.id == id)
    }

    pub fn temp_block(&self, height: u64) -> Option<Block> {
        self.inner.lock().unwrap().temp.get(&height).cloned()
    }

    fn check_commit(&self) -> Result<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            Err(anyhow!("injected commit failure"))
        } else {
            Ok(())
        }
    }

    fn check_query(&self) -> Result<()> {
        if self.fail_queries.load(Ordering::SeqCst) {
            Err(anyhow!("injected query failure"))
        } else {
            Ok(())
        }
    }
}

impl Store for MemStore {
    fn commit_block(&self, block: &Block) -> Result<()> {
        self.check_commit()?;
        self.seed_block(block);
        Ok(())
    }

    fn delete_block(&self, block: &Block, store_temp: bool) -> Result<()> {
        self.check_commit()?;
        let mut inner = self.inner.lock().unwrap();
        inner.blocks.remove(&block.height);
        if store_temp {
            inner.temp.insert(block.height, block.clone());
        }
        Ok(())
    }

    fn get_block_by_id(&self, id: BlockId) -> Result<Option<Block>> {
        self.check_query()?;
        Ok(self.inner.lock().unwrap().blocks.values().find(|b| b.id == id).cloned())
    }

    fn get_block_by_height(&self, height: u64) -> Result<Option<Block>> {
        self.check_query()?;
        Ok(self.inner.lock().unwrap().blocks.get(&height).cloned())
    }

    fn get_blocks_in_range(&self, min_height: u64, max_height: u64) -> Result<Vec<Block>> {
        self.check_query()?;
        Ok(self
            .inner
            .lock()
            .unwrap()
            .blocks
            .range(min_height..=max_height)
            .map(|(_, b)| b.clone())
            .collect())
    }

    fn get_last_block(&self) -> Result<Option<Block>> {
        self.check_query()?;
        Ok(self.inner.lock().unwrap().blocks.values().next_back().cloned())
    }

    fn is_persisted(&self, id: BlockId) -> Result<bool> {
        self.check_query()?;
        Ok(self.contains(id))
    }

    fn highest_common_block(&self, ids: &[BlockId]) -> Result<Option<Block>> {
        self.check_query()?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .blocks
            .values()
            .filter(|b| ids.contains(&b.id))
            .max_by_key(|b| b.height)
            .cloned())
    }

    fn get_temp_block(&self, height: u64) -> Result<Option<Block>> {
        self.check_query()?;
        Ok(self.temp_block(height))
    }

    fn delete_temp_block(&self, height: u64) -> Result<()> {
        self.check_commit()?;
        self.inner.lock().unwrap().temp.remove(&height);
        Ok(())
    }

    fn reset_derived_state(&self) -> Result<()> {
        self.check_commit()?;
        self.inner.lock().unwrap().temp.clear();
        Ok(())
    }
}

/// Pipeline that fails the transactions whose ids it was given and passes
/// everything else
#[derive(Default)]
pub struct FailingPipeline {
    failing: HashSet<TxId>,
}

impl FailingPipeline {
    pub fn failing_on(ids: impl IntoIterator<Item = TxId>) -> Self {
        Self {
            failing: ids.into_iter().collect(),
        }
    }

    fn respond(&self, transactions: &[Transaction]) -> Vec<TransactionResponse> {
        transactions
            .iter()
            .map(|tx| {
                if self.failing.contains(&tx.id) {
                    TransactionResponse {
                        id: tx.id,
                        status: TransactionStatus::Fail,
                        errors: vec!["rejected by test pipeline".to_string()],
                    }
                } else {
                    TransactionResponse::ok(tx.id)
                }
            })
            .collect()
    }
}

impl TransactionPipeline for FailingPipeline {
    fn verify_transactions(&self, transactions: &[Transaction]) -> Result<Vec<TransactionResponse>> {
        Ok(self.respond(transactions))
    }

    fn check_allowed_transactions(
        &self,
        transactions: &[Transaction],
        _timestamp: u32,
    ) -> Result<Vec<TransactionResponse>> {
        Ok(self.respond(transactions))
    }

    fn apply_transactions(&self, block: &Block) -> Result<Vec<TransactionResponse>> {
        Ok(self.respond(&block.transactions))
    }

    fn undo_transactions(&self, block: &Block) -> Result<Vec<TransactionResponse>> {
        Ok(self.respond(&block.transactions))
    }
}

/// Rounds tracker counting calls, optionally rejecting slot ownership
#[derive(Default)]
pub struct CountingRounds {
    ticks: AtomicUsize,
    backward_ticks: AtomicUsize,
    forks: Mutex<Vec<(BlockId, ForkCase)>>,
    reject_slots: AtomicBool,
}

impl CountingRounds {
    pub fn reject_slots(&self, reject: bool) {
        self.reject_slots.store(reject, Ordering::SeqCst);
    }

    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn backward_ticks(&self) -> usize {
        self.backward_ticks.load(Ordering::SeqCst)
    }

    pub fn forks(&self) -> Vec<(BlockId, ForkCase)> {
        self.forks.lock().unwrap().clone()
    }
}

impl RoundsTracker for CountingRounds {
    fn validate_block_slot(&self, _block: &Block) -> Result<bool> {
        Ok(!self.reject_slots.load(Ordering::SeqCst))
    }

    fn tick(&self, _block: &Block) -> Result<()> {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn backward_tick(&self, _block: &Block, _previous: &Block) -> Result<()> {
        self.backward_ticks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn fork(&self, block: &Block, case: ForkCase) {
        self.forks.lock().unwrap().push((block.id, case));
    }
}

/// Observer recording every outward event
#[derive(Default)]
pub struct RecordingObserver {
    applied: Mutex<Vec<BlockId>>,
    broadcast: Mutex<Vec<BlockId>>,
    sync: Mutex<Vec<BlockId>>,
    forks: Mutex<Vec<(BlockId, ForkCase)>>,
}

impl RecordingObserver {
    pub fn applied_ids(&self) -> Vec<BlockId> {
        self.applied.lock().unwrap().clone()
    }

    pub fn broadcast_ids(&self) -> Vec<BlockId> {
        self.broadcast.lock().unwrap().clone()
    }

    pub fn sync_ids(&self) -> Vec<BlockId> {
        self.sync.lock().unwrap().clone()
    }

    pub fn fork_cases(&self) -> Vec<(BlockId, ForkCase)> {
        self.forks.lock().unwrap().clone()
    }
}

impl ChainObserver for RecordingObserver {
    fn block_applied(&self, block: &Block) {
        self.applied.lock().unwrap().push(block.id);
    }

    fn block_broadcast(&self, block: &Block) {
        self.broadcast.lock().unwrap().push(block.id);
    }

    fn sync_required(&self, block: &Block) {
        self.sync.lock().unwrap().push(block.id);
    }

    fn fork_detected(&self, block: &Block, case: ForkCase) {
        self.forks.lock().unwrap().push((block.id, case));
    }
}
