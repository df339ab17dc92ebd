//! Chain mutation engine
//!
//! Sequences transaction application, round bookkeeping and storage commits
//! for a single block: apply before tick-forward, undo before tick-backward.
//! A failure at any step surfaces before anything is committed, so the
//! caller's view of the tip is only advanced on full success.

use std::sync::Arc;

use tracing::debug;

use delos_common::Block;

use crate::error::{ChainError, ChainResult};
use crate::interfaces::{RoundsTracker, TransactionPipeline, TransactionResponse, TransactionStatus};
use crate::stores::Store;

pub struct ChainMutator {
    store: Arc<dyn Store>,
    pipeline: Arc<dyn TransactionPipeline>,
    rounds: Arc<dyn RoundsTracker>,
}

impl ChainMutator {
    pub fn new(
        store: Arc<dyn Store>,
        pipeline: Arc<dyn TransactionPipeline>,
        rounds: Arc<dyn RoundsTracker>,
    ) -> Self {
        Self {
            store,
            pipeline,
            rounds,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Persist the genesis block if it is not already there. Idempotent.
    pub fn save_genesis_block(&self, genesis: &Block) -> ChainResult<()> {
        if self.store.is_persisted(genesis.id).map_err(ChainError::Storage)? {
            debug!(id = %genesis.id, "Genesis block already persisted");
            return Ok(());
        }
        self.store.commit_block(genesis).map_err(ChainError::Storage)
    }

    /// Apply a block's effects: transactions through the pipeline, a round
    /// tick, and (iff `persist`) one atomic commit of the block row. Every
    /// transaction response must be Ok or nothing lands.
    pub fn apply_block(&self, block: &Block, persist: bool) -> ChainResult<()> {
        let responses = self.pipeline.apply_transactions(block)?;
        Self::require_all_ok(block, responses)?;
        self.rounds.tick(block)?;
        if persist {
            self.store.commit_block(block).map_err(ChainError::Storage)?;
        }
        Ok(())
    }

    /// Pop the tip: undo its transactions in reverse, reverse the round
    /// tick, delete the row (retaining a temp copy when `store_temp`), and
    /// return the restored previous block. The genesis block is never
    /// deletable.
    pub fn delete_last_block(&self, tip: &Block, store_temp: bool) -> ChainResult<Block> {
        if tip.height == 1 {
            return Err(ChainError::DeleteGenesis);
        }
        let previous_id = tip.previous_block_id.ok_or_else(|| {
            ChainError::Irrecoverable(format!("block {} above genesis has no parent id", tip.id))
        })?;
        let previous = self
            .store
            .get_block_by_id(previous_id)
            .map_err(ChainError::Storage)?
            .ok_or_else(|| {
                ChainError::Irrecoverable(format!(
                    "parent {previous_id} of block {} is not stored",
                    tip.id
                ))
            })?;

        let responses = self.pipeline.undo_transactions(tip)?;
        Self::require_all_ok(tip, responses)?;
        self.rounds.backward_tick(tip, &previous)?;
        self.store.delete_block(tip, store_temp).map_err(ChainError::Storage)?;
        Ok(previous)
    }

    fn require_all_ok(block: &Block, responses: Vec<TransactionResponse>) -> ChainResult<()> {
        if responses.iter().all(|r| r.status == TransactionStatus::Ok) {
            Ok(())
        } else {
            Err(ChainError::TransactionsRejected {
                id: block.id,
                responses,
            })
        }
    }
}
