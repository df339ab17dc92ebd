//! Chain controller
//!
//! Top-level state machine holding the current tip. Every received block
//! goes through exactly one pipeline run at a time: the caryatid module task
//! owns the controller, and the fork-choice path additionally refuses
//! re-entry outright. The tip, the receipt bookkeeping and the recent-id
//! window are only ever touched after a fully committed apply.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use delos_common::{Block, BlockId, BlockReceipt, ChainParams, SlotCalculator};
use delos_module_block_verifier::verifier::Verifier;

use crate::error::{ChainError, ChainResult};
use crate::fork_choice::{self, ForkChoice};
use crate::interfaces::{ChainObserver, ForkCase, RoundsTracker, TransactionPipeline};
use crate::processor::BlockProcessor;
use crate::stores::Store;

const CLEANUP_POLL: Duration = Duration::from_millis(500);
const CLEANUP_LOG_EVERY: u32 = 20; // ~10 s at the poll interval
const CLEANUP_MAX_POLLS: u32 = 600;

/// Mutable chain state, owned by the controller and mutated only after a
/// block fully applies
struct ChainState {
    last_block: Block,
    last_receipt: Option<u32>,
    last_applied: Option<BlockReceipt>,
    recent_block_ids: Vec<BlockId>,
    processing: Arc<AtomicBool>,
}

pub struct ChainController {
    params: ChainParams,
    slots: SlotCalculator,
    store: Arc<dyn Store>,
    rounds: Arc<dyn RoundsTracker>,
    observer: Arc<dyn ChainObserver>,
    processor: BlockProcessor,
    state: ChainState,
}

impl ChainController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        params: ChainParams,
        verifier: Arc<Verifier>,
        store: Arc<dyn Store>,
        pipeline: Arc<dyn TransactionPipeline>,
        rounds: Arc<dyn RoundsTracker>,
        observer: Arc<dyn ChainObserver>,
        initial_tip: Block,
    ) -> Self {
        let slots = SlotCalculator::new(&params);
        let processor = BlockProcessor::new(
            params.clone(),
            verifier,
            store.clone(),
            pipeline,
            rounds.clone(),
        );
        Self {
            params,
            slots,
            store,
            rounds,
            observer,
            processor,
            state: ChainState {
                last_block: initial_tip,
                last_receipt: None,
                last_applied: None,
                recent_block_ids: Vec::new(),
                processing: Arc::new(AtomicBool::new(false)),
            },
        }
    }

    pub fn last_block(&self) -> &Block {
        &self.state.last_block
    }

    pub fn processor(&self) -> &BlockProcessor {
        &self.processor
    }

    /// Entry point for blocks delivered by the network layer.
    /// `received_at` is epoch-relative and doubles as "now" for the
    /// time-sensitive checks.
    pub fn receive_block_from_network(&mut self, block: Block, received_at: u32) -> ChainResult<()> {
        info!(id = %block.id, height = block.height, "Received block from network");

        if block.id != self.state.last_block.id {
            let result = self.processor.verifier().verify_receive(
                &block,
                &self.state.recent_block_ids,
                received_at,
            );
            if !result.verified() {
                for error in &result.errors {
                    warn!(id = %block.id, "Block rejected on receipt: {error}");
                }
                return Err(ChainError::Validation {
                    id: block.id,
                    errors: result.errors,
                });
            }
        }

        if block.version >= self.params.fork_choice_version {
            self.receive_fork_choice(block, received_at)
        } else {
            self.receive_legacy(block, received_at)
        }
    }

    /// Highest stored block among a peer-supplied candidate id list
    pub fn get_highest_common_block(&self, ids: &[BlockId]) -> ChainResult<Option<Block>> {
        self.store.highest_common_block(ids).map_err(|e| {
            error!("Failed to get highest common block: {e}");
            ChainError::Storage(e)
        })
    }

    /// Whether the chain has stopped receiving blocks. `now` is
    /// epoch-relative.
    pub fn is_stale(&self, now: u32) -> bool {
        match self.state.last_receipt {
            None => true,
            Some(receipt) => now.saturating_sub(receipt) > self.params.block_receipt_timeout,
        }
    }

    /// Cooperative shutdown: wait until no block is mid-processing, logging
    /// periodically, bounded so shutdown cannot hang forever
    pub async fn cleanup(&self) {
        let processing = self.state.processing.clone();
        let mut polls = 0u32;
        while processing.load(Ordering::SeqCst) {
            if polls >= CLEANUP_MAX_POLLS {
                warn!("Giving up waiting for block processing to finish");
                return;
            }
            if polls % CLEANUP_LOG_EVERY == 0 {
                info!("Waiting for block processing to finish...");
            }
            polls += 1;
            tokio::time::sleep(CLEANUP_POLL).await;
        }
    }

    fn receive_fork_choice(&mut self, block: Block, received_at: u32) -> ChainResult<()> {
        if self.state.processing.swap(true, Ordering::SeqCst) {
            return Err(ChainError::ParallelProcessing);
        }
        let result = self.dispatch_fork_choice(block, received_at);
        self.state.processing.store(false, Ordering::SeqCst);
        result
    }

    fn dispatch_fork_choice(&mut self, block: Block, received_at: u32) -> ChainResult<()> {
        let choice = fork_choice::classify(
            &self.state.last_block,
            self.state.last_applied.as_ref(),
            &block,
            received_at,
            &self.slots,
        );
        match choice {
            ForkChoice::Identical => {
                debug!(id = %block.id, "Block already processed");
                Ok(())
            }
            ForkChoice::ValidExtension => self.apply_valid(block, received_at, false),
            ForkChoice::DoubleForging => {
                warn!(
                    id = %block.id,
                    generator = %block.generator_public_key,
                    "Double forging detected; keeping the earlier block"
                );
                self.rounds.fork(&block, ForkCase::DoubleForging);
                self.observer.fork_detected(&block, ForkCase::DoubleForging);
                Ok(())
            }
            ForkChoice::TieBreak => self.handle_tie_break(block, received_at),
            ForkChoice::DifferentChain => {
                info!(id = %block.id, height = block.height, "Competing chain detected");
                self.rounds.fork(&block, ForkCase::DifferentChain);
                self.observer.fork_detected(&block, ForkCase::DifferentChain);
                self.observer.sync_required(&block);
                Ok(())
            }
            ForkChoice::Discard => {
                debug!(id = %block.id, height = block.height, "Discarding block");
                Ok(())
            }
        }
    }

    /// Legacy linear pipeline for pre-fork-choice block versions, with the
    /// fork case 1/5 checks inline
    fn receive_legacy(&mut self, block: Block, received_at: u32) -> ChainResult<()> {
        let tip = self.state.last_block.clone();

        if block.previous_block_id == Some(tip.id) && block.height == tip.height + 1 {
            return self.apply_valid(block, received_at, true);
        }

        if block.previous_block_id != Some(tip.id) && block.height == tip.height + 1 {
            // Fork case 1: the peer chain diverged below our tip
            self.rounds.fork(&block, ForkCase::PreviousIdMismatch);
            self.observer.fork_detected(&block, ForkCase::PreviousIdMismatch);
            if wins_timestamp_tie(&block, &tip) {
                // Our two newest blocks are suspect; drop them so the
                // synchronization procedure can refill from peers
                warn!(id = %block.id, "Fork below tip; discarding our two newest blocks");
                // Roll the tip after every delete so an error between the
                // two never leaves it pointing at a removed block
                let previous = self.processor.mutator().delete_last_block(&tip, false)?;
                self.state.last_block = previous.clone();
                self.state.last_applied = None;
                if previous.height > 1 {
                    let restored = self.processor.mutator().delete_last_block(&previous, false)?;
                    self.state.last_block = restored;
                }
                self.observer.sync_required(&block);
            } else {
                debug!(id = %block.id, "Discarding fork block that lost the timestamp tie");
            }
            return Ok(());
        }

        if block.previous_block_id == tip.previous_block_id
            && block.height == tip.height
            && block.id != tip.id
        {
            // Fork case 5: a competing block at our own height
            self.rounds.fork(&block, ForkCase::SameHeightAndParent);
            self.observer.fork_detected(&block, ForkCase::SameHeightAndParent);
            if wins_timestamp_tie(&block, &tip) {
                warn!(id = %block.id, "Competing block wins the timestamp tie; switching");
                let previous = self.processor.mutator().delete_last_block(&tip, false)?;
                self.state.last_block = previous;
                self.state.last_applied = None;
                return self.apply_valid(block, received_at, true);
            }
            debug!(id = %block.id, "Discarding competing block that lost the timestamp tie");
            return Ok(());
        }

        if block.id == tip.id {
            debug!(id = %block.id, "Block already processed");
        } else {
            warn!(id = %block.id, height = block.height, "Discarding block that does not fit");
        }
        Ok(())
    }

    /// Process and persist a block extending the tip, then roll the
    /// controller state forward
    fn apply_valid(&mut self, block: Block, received_at: u32, legacy: bool) -> ChainResult<()> {
        let tip = self.state.last_block.clone();
        let observer = self.observer.clone();
        let broadcast = |b: &Block| observer.block_broadcast(b);
        self.processor.process_block(&block, &tip, received_at, legacy, Some(&broadcast))?;
        self.after_apply(block, received_at);
        Ok(())
    }

    fn after_apply(&mut self, block: Block, received_at: u32) {
        self.state.recent_block_ids.push(block.id);
        let window = self.params.block_slot_window as usize;
        if self.state.recent_block_ids.len() > window {
            let excess = self.state.recent_block_ids.len() - window;
            self.state.recent_block_ids.drain(..excess);
        }
        self.state.last_applied = Some(BlockReceipt {
            id: block.id,
            received_at,
        });
        self.state.last_receipt = Some(received_at);
        self.observer.block_applied(&block);
        info!(id = %block.id, height = block.height, "New chain tip");
        self.state.last_block = block;
    }

    /// Resolve double forging in favour of the earlier slot: the tip moves
    /// to temp storage and the challenger is applied in its place. On
    /// failure the popped tip is restored, so the final tip equals the
    /// original one.
    fn handle_tie_break(&mut self, block: Block, received_at: u32) -> ChainResult<()> {
        warn!(id = %block.id, "Resolving double forging by tie-break");
        self.rounds.fork(&block, ForkCase::TieBreak);
        self.observer.fork_detected(&block, ForkCase::TieBreak);

        let tip = self.state.last_block.clone();
        let saved_receipt = self.state.last_applied;

        // The challenger must verify against the tip's own parent before
        // anything is rolled back
        let parent_id = tip.previous_block_id.ok_or(ChainError::DeleteGenesis)?;
        let parent = self
            .store
            .get_block_by_id(parent_id)
            .map_err(ChainError::Storage)?
            .ok_or_else(|| {
                ChainError::Irrecoverable(format!(
                    "parent {parent_id} of tip {} is not stored",
                    tip.id
                ))
            })?;
        let link = self.processor.verifier().verify_chain_link(&block, &parent);
        if !link.verified() {
            return Err(ChainError::Validation {
                id: block.id,
                errors: link.errors,
            });
        }

        let previous = self.processor.mutator().delete_last_block(&tip, true)?;
        self.state.last_block = previous;
        self.state.last_applied = None;

        match self.apply_valid(block.clone(), received_at, false) {
            Ok(()) => {
                self.store.delete_temp_block(tip.height).map_err(ChainError::Storage)?;
                Ok(())
            }
            Err(apply_err) => {
                error!(
                    failed = %block.id,
                    restored = %tip.id,
                    "Tie-break challenger failed to apply; restoring previous tip"
                );
                let restore = self
                    .processor
                    .mutator()
                    .apply_block(&tip, true)
                    .and_then(|_| self.store.delete_temp_block(tip.height).map_err(ChainError::Storage));
                match restore {
                    Ok(()) => {
                        self.state.last_block = tip.clone();
                        self.state.last_applied = saved_receipt;
                        Err(ChainError::TieBreakFailed {
                            failed: block.id,
                            restored: tip.id,
                            source: Box::new(apply_err),
                        })
                    }
                    Err(restore_err) => Err(ChainError::Irrecoverable(format!(
                        "failed to restore tip {} after tie-break: {restore_err}",
                        tip.id
                    ))),
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn set_processing(&self, active: bool) {
        self.state.processing.store(active, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn processing_flag(&self) -> Arc<AtomicBool> {
        self.state.processing.clone()
    }
}

/// The legacy winner-selection tie: earlier timestamp wins, id breaks exact
/// timestamp ties
fn wins_timestamp_tie(block: &Block, tip: &Block) -> bool {
    block.timestamp < tip.timestamp || (block.timestamp == tip.timestamp && block.id < tip.id)
}
