//! Block processor
//!
//! Orchestrates verification and mutation for one block at a time: the full
//! battery for network blocks, a lighter path for blocks of known
//! provenance, deterministic local block generation, and the two bulk
//! procedures (recovery rollback and batch rebuild).

use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;

use ed25519_dalek::SigningKey;
use tracing::{info, warn};

use delos_common::{codec, crypto, Block, ChainParams, Transaction, TxId};
use delos_module_block_verifier::verifier::Verifier;

use crate::error::{ChainError, ChainResult};
use crate::interfaces::{RoundsTracker, TransactionPipeline, TransactionResponse, TransactionStatus};
use crate::mutator::ChainMutator;
use crate::stores::Store;

pub struct BlockProcessor {
    params: ChainParams,
    verifier: Arc<Verifier>,
    store: Arc<dyn Store>,
    pipeline: Arc<dyn TransactionPipeline>,
    rounds: Arc<dyn RoundsTracker>,
    mutator: ChainMutator,
}

impl BlockProcessor {
    pub fn new(
        params: ChainParams,
        verifier: Arc<Verifier>,
        store: Arc<dyn Store>,
        pipeline: Arc<dyn TransactionPipeline>,
        rounds: Arc<dyn RoundsTracker>,
    ) -> Self {
        let mutator = ChainMutator::new(store.clone(), pipeline.clone(), rounds.clone());
        Self {
            params,
            verifier,
            store,
            pipeline,
            rounds,
            mutator,
        }
    }

    pub fn mutator(&self) -> &ChainMutator {
        &self.mutator
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// Full battery, optional broadcast, then a persisted apply. Violations
    /// are terminal for the block; nothing is ever partially applied.
    pub fn process_block(
        &self,
        block: &Block,
        last_block: &Block,
        current_time: u32,
        legacy: bool,
        broadcast: Option<&dyn Fn(&Block)>,
    ) -> ChainResult<()> {
        let outcome = self.verifier.verify_apply(block, last_block, current_time, legacy);
        if !outcome.result.verified() {
            return Err(ChainError::Validation {
                id: block.id,
                errors: outcome.result.errors,
            });
        }
        if let Some(broadcast) = broadcast {
            broadcast(block);
        }
        self.mutator.apply_block(block, true)
    }

    /// Lighter path for a block of known provenance (e.g. just generated
    /// locally): producer-slot and pipeline admissibility only, applied
    /// speculatively without persisting the row.
    pub fn apply_block_known_valid(&self, block: &Block) -> ChainResult<()> {
        if !self.rounds.validate_block_slot(block)? {
            return Err(ChainError::InvalidSlotOwner {
                slot: self.verifier.slots().slot_number(block.timestamp),
            });
        }
        let responses = self.pipeline.verify_transactions(&block.transactions)?;
        if !responses.iter().all(|r| r.status == TransactionStatus::Ok) {
            return Err(ChainError::TransactionsRejected {
                id: block.id,
                responses,
            });
        }
        self.mutator.apply_block(block, false)
    }

    /// Assemble and sign a block on top of `tip` from candidate
    /// transactions. Candidates failing admissibility or speculative
    /// verification are dropped; the survivors keep the historical ordering
    /// (type ascending, multisignature type last, same type by descending
    /// amount) for block-version compatibility.
    pub fn generate_block(
        &self,
        tip: &Block,
        key: &SigningKey,
        timestamp: u32,
        candidates: Vec<Transaction>,
    ) -> ChainResult<Block> {
        let allowed = ok_ids(&self.pipeline.check_allowed_transactions(&candidates, timestamp)?);
        let admissible: Vec<Transaction> =
            candidates.into_iter().filter(|tx| allowed.contains(&tx.id)).collect();

        let verified = ok_ids(&self.pipeline.verify_transactions(&admissible)?);
        let mut ready: Vec<Transaction> =
            admissible.into_iter().filter(|tx| verified.contains(&tx.id)).collect();

        let multisignature_type = self.params.multisignature_tx_type;
        ready.sort_by_key(|tx| {
            (
                tx.tx_type == multisignature_type,
                tx.tx_type,
                Reverse(tx.amount),
            )
        });

        let height = tip.height + 1;
        let mut block = Block {
            version: self.params.block_version,
            height,
            timestamp,
            previous_block_id: Some(tip.id),
            generator_public_key: crypto::public_key(key),
            payload_hash: codec::payload_hash(&ready),
            payload_length: codec::payload_length(&ready),
            number_of_transactions: ready.len() as u32,
            total_amount: ready.iter().map(|tx| tx.amount).sum(),
            total_fee: ready.iter().map(|tx| tx.fee).sum(),
            reward: self.verifier.rewards().reward(height),
            transactions: ready,
            ..Default::default()
        };
        block.generator_signature = crypto::sign_block(key, &block);
        block.id = codec::block_id(&block);
        Ok(block)
    }

    /// Roll back from a corrupt tip until a block verifies against its own
    /// predecessor, reporting every popped/restored pair. The genesis block
    /// is accepted as a verifiable base.
    pub fn recover_invalid_own_chain(
        &self,
        tip: Block,
        mut on_rollback: impl FnMut(&Block, &Block),
    ) -> ChainResult<Block> {
        let mut current = tip;
        loop {
            warn!(id = %current.id, height = current.height, "Rolling back unverifiable tip");
            let previous = self.mutator.delete_last_block(&current, false)?;
            on_rollback(&current, &previous);

            if previous.height == 1 {
                return Ok(previous);
            }
            let parent = self
                .store
                .get_block_by_height(previous.height - 1)
                .map_err(ChainError::Storage)?
                .ok_or_else(|| {
                    ChainError::Irrecoverable(format!(
                        "no stored block below height {}",
                        previous.height
                    ))
                })?;
            if self.verifier.verify_chain_link(&previous, &parent).verified() {
                return Ok(previous);
            }
            current = previous;
        }
    }

    /// Replay stored blocks from genesis up to `target_height` in fixed-size
    /// batches, rebuilding derived state. Cancellation is polled between
    /// batches only; an in-flight block always completes or fails whole.
    pub fn rebuild(
        &self,
        target_height: u64,
        mut is_cancelled: impl FnMut() -> bool,
        mut on_progress: impl FnMut(u64),
    ) -> ChainResult<Block> {
        if target_height < self.params.active_delegates {
            return Err(ChainError::RebuildBelowRound);
        }
        self.store.reset_derived_state().map_err(ChainError::Storage)?;

        let mut tip: Option<Block> = None;
        let mut height = 1u64;
        while height <= target_height {
            if is_cancelled() {
                info!(height, "Rebuild cancelled");
                break;
            }
            let batch_end = (height + self.params.rebuild_batch_size - 1).min(target_height);
            let blocks =
                self.store.get_blocks_in_range(height, batch_end).map_err(ChainError::Storage)?;
            if blocks.is_empty() {
                break;
            }
            for block in blocks {
                if block.height > 1 {
                    self.mutator.apply_block(&block, false)?;
                }
                tip = Some(block);
            }
            if let Some(tip) = &tip {
                on_progress(tip.height);
            }
            height = batch_end + 1;
        }

        tip.ok_or_else(|| ChainError::Irrecoverable("no stored blocks to rebuild from".to_string()))
    }
}

fn ok_ids(responses: &[TransactionResponse]) -> HashSet<TxId> {
    responses
        .iter()
        .filter(|r| r.status == TransactionStatus::Ok)
        .map(|r| r.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{build_block, chain_of, keypair, make_tx, CountingRounds, FailingPipeline, MemStore};
    use delos_common::{Exceptions, RewardSchedule};
    use std::sync::Arc;

    struct Fixture {
        store: Arc<MemStore>,
        rounds: Arc<CountingRounds>,
        processor: BlockProcessor,
    }

    fn fixture(params: ChainParams, pipeline: FailingPipeline) -> Fixture {
        let store = Arc::new(MemStore::default());
        let rounds = Arc::new(CountingRounds::default());
        let verifier = Arc::new(Verifier::new(
            params.clone(),
            Exceptions::default(),
            RewardSchedule::default(),
        ));
        let processor = BlockProcessor::new(
            params,
            verifier,
            store.clone(),
            Arc::new(pipeline),
            rounds.clone(),
        );
        Fixture {
            store,
            rounds,
            processor,
        }
    }

    fn small_params() -> ChainParams {
        ChainParams {
            epoch_time: 0,
            active_delegates: 3,
            rebuild_batch_size: 2,
            ..Default::default()
        }
    }

    #[test]
    fn process_block_applies_and_persists() {
        let f = fixture(small_params(), FailingPipeline::default());
        let chain = chain_of(2);
        f.store.seed_block(&chain[0]);

        let broadcasted = std::cell::Cell::new(false);
        f.processor
            .process_block(&chain[1], &chain[0], 15, false, Some(&|_b: &Block| broadcasted.set(true)))
            .unwrap();

        assert!(broadcasted.get());
        assert!(f.store.contains(chain[1].id));
        assert_eq!(f.rounds.ticks(), 1);
    }

    #[test]
    fn process_block_rejects_invalid_without_applying() {
        let f = fixture(small_params(), FailingPipeline::default());
        let chain = chain_of(2);
        let mut bad = chain[1].clone();
        bad.generator_signature.0[0] ^= 1;

        let err = f.processor.process_block(&bad, &chain[0], 15, false, None).unwrap_err();
        assert!(matches!(err, ChainError::Validation { .. }));
        assert_eq!(f.store.block_count(), 0);
        assert_eq!(f.rounds.ticks(), 0);
    }

    #[test]
    fn known_valid_apply_checks_slot_ownership() {
        let f = fixture(small_params(), FailingPipeline::default());
        f.rounds.reject_slots(true);
        let chain = chain_of(2);

        let err = f.processor.apply_block_known_valid(&chain[1]).unwrap_err();
        assert!(matches!(err, ChainError::InvalidSlotOwner { slot: 1 }));
    }

    #[test]
    fn known_valid_apply_is_speculative() {
        let f = fixture(small_params(), FailingPipeline::default());
        let chain = chain_of(2);
        f.processor.apply_block_known_valid(&chain[1]).unwrap();
        // Applied but not persisted
        assert_eq!(f.rounds.ticks(), 1);
        assert_eq!(f.store.block_count(), 0);
    }

    #[test]
    fn generated_block_keeps_the_historical_transaction_order() {
        let f = fixture(small_params(), FailingPipeline::default());
        let key = keypair(1);
        let tip = build_block(&key, 1, None, 0, vec![]);

        let low = make_tx(1, 0, 10, 1);
        let high = make_tx(2, 0, 99, 1);
        let mid = make_tx(3, 2, 77, 1);
        let multisig = make_tx(4, 4, 500, 1);
        let block = f
            .processor
            .generate_block(&tip, &key, 10, vec![multisig.clone(), low.clone(), high.clone(), mid.clone()])
            .unwrap();

        let order: Vec<_> = block.transactions.iter().map(|tx| tx.id).collect();
        assert_eq!(order, vec![high.id, low.id, mid.id, multisig.id]);
    }

    #[test]
    fn generated_block_verifies_against_its_parent() {
        let f = fixture(small_params(), FailingPipeline::default());
        let key = keypair(1);
        let tip = build_block(&key, 1, None, 0, vec![]);

        let block =
            f.processor.generate_block(&tip, &key, 10, vec![make_tx(1, 0, 10, 1)]).unwrap();
        let result = f.processor.verifier().verify_chain_link(&block, &tip);
        assert!(result.verified(), "unexpected errors: {:?}", result.errors);
        assert_eq!(block.height, 2);
        assert_eq!(block.total_amount, 10);
    }

    #[test]
    fn generation_drops_rejected_candidates() {
        let rejected = make_tx(9, 0, 42, 1);
        let accepted = make_tx(1, 0, 10, 1);
        let f = fixture(
            small_params(),
            FailingPipeline::failing_on([rejected.id]),
        );
        let key = keypair(1);
        let tip = build_block(&key, 1, None, 0, vec![]);

        let block = f
            .processor
            .generate_block(&tip, &key, 10, vec![rejected.clone(), accepted.clone()])
            .unwrap();
        let ids: Vec<_> = block.transactions.iter().map(|tx| tx.id).collect();
        assert_eq!(ids, vec![accepted.id]);
    }

    #[test]
    fn recovery_pops_until_a_verifiable_tip() {
        let f = fixture(small_params(), FailingPipeline::default());
        let chain = chain_of(4);
        for block in &chain {
            f.store.seed_block(block);
        }

        let mut rollbacks = Vec::new();
        let restored = f
            .processor
            .recover_invalid_own_chain(chain[3].clone(), |popped, restored| {
                rollbacks.push((popped.id, restored.id));
            })
            .unwrap();

        assert_eq!(restored.id, chain[2].id);
        assert_eq!(rollbacks, vec![(chain[3].id, chain[2].id)]);
        assert!(!f.store.contains(chain[3].id));
    }

    #[test]
    fn recovery_accepts_genesis_as_the_base() {
        let f = fixture(small_params(), FailingPipeline::default());
        let chain = chain_of(2);
        for block in &chain {
            f.store.seed_block(block);
        }

        let restored =
            f.processor.recover_invalid_own_chain(chain[1].clone(), |_, _| {}).unwrap();
        assert_eq!(restored.id, chain[0].id);
    }

    #[test]
    fn rebuild_requires_one_full_round_of_history() {
        let f = fixture(small_params(), FailingPipeline::default());
        let err = f.processor.rebuild(2, || false, |_| {}).unwrap_err();
        assert!(err.to_string().contains("should contain at least one round of blocks"));
    }

    #[test]
    fn rebuild_replays_stored_blocks_in_batches() {
        let f = fixture(small_params(), FailingPipeline::default());
        let chain = chain_of(5);
        for block in &chain {
            f.store.seed_block(block);
        }

        let mut progress = Vec::new();
        let tip = f.processor.rebuild(5, || false, |height| progress.push(height)).unwrap();

        assert_eq!(tip.height, 5);
        // Genesis is not re-applied
        assert_eq!(f.rounds.ticks(), 4);
        assert_eq!(progress, vec![2, 4, 5]);
    }

    #[test]
    fn rebuild_cancellation_stops_between_batches() {
        let f = fixture(small_params(), FailingPipeline::default());
        let chain = chain_of(5);
        for block in &chain {
            f.store.seed_block(block);
        }

        let mut polls = 0;
        let tip = f
            .processor
            .rebuild(
                5,
                move || {
                    polls += 1;
                    polls > 1
                },
                |_| {},
            )
            .unwrap();
        // Only the first batch ran
        assert_eq!(tip.height, 2);
    }
}
