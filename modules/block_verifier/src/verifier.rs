//! Block verification battery
//!
//! Pure checks over a block against the chain parameters, the reward
//! schedule and (where a check needs it) the current tip. Checks never
//! short-circuit: every violated invariant is reported at once so peers
//! and operators see the complete picture.

use std::collections::HashSet;
use std::sync::Arc;

use config::Config;

use delos_common::{
    codec, crypto, Block, BlockId, ChainParams, Exceptions, RewardSchedule, SlotCalculator,
    VerificationError, VerifyResult,
};

/// Outcome of the pre-apply battery
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub result: VerifyResult,

    /// The block carries a parent id that is not the current tip (legacy
    /// pipeline only); the caller must roll back before retrying
    pub fork_one: bool,
}

/// The verification battery, configured once at module start
pub struct Verifier {
    params: ChainParams,
    exceptions: Exceptions,
    rewards: RewardSchedule,
    slots: SlotCalculator,
}

impl Verifier {
    pub fn new(params: ChainParams, exceptions: Exceptions, rewards: RewardSchedule) -> Self {
        let slots = SlotCalculator::new(&params);
        Self {
            params,
            exceptions,
            rewards,
            slots,
        }
    }

    pub fn from_config(config: &Arc<Config>) -> Self {
        Self::new(
            ChainParams::from_config(config),
            Exceptions::default(),
            RewardSchedule::from_config(config),
        )
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn slots(&self) -> &SlotCalculator {
        &self.slots
    }

    pub fn rewards(&self) -> &RewardSchedule {
        &self.rewards
    }

    /// Reception battery: everything checkable the moment a block arrives
    /// from the network. `current_time` is epoch-relative.
    pub fn verify_receive(
        &self,
        block: &Block,
        recent_block_ids: &[BlockId],
        current_time: u32,
    ) -> VerifyResult {
        let mut errors = Vec::new();
        self.check_signature(block, &mut errors);
        self.check_previous_block(block, &mut errors);
        self.check_recent_ids(block, recent_block_ids, &mut errors);
        self.check_slot_window(block, current_time, &mut errors);
        self.check_version(block, &mut errors);
        self.check_reward(block, &mut errors);
        self.check_id(block, &mut errors);
        self.check_payload(block, &mut errors);
        VerifyResult { errors }
    }

    /// Pre-apply battery: run just before the block is applied to the tip.
    ///
    /// With `legacy` set the parent-mismatch check runs here and flags fork
    /// case 1; the fork-choice pipeline handles that situation itself.
    pub fn verify_apply(
        &self,
        block: &Block,
        last_block: &Block,
        current_time: u32,
        legacy: bool,
    ) -> VerifyOutcome {
        let mut errors = Vec::new();
        self.check_signature(block, &mut errors);
        self.check_previous_block(block, &mut errors);
        self.check_version(block, &mut errors);
        self.check_reward(block, &mut errors);
        self.check_id(block, &mut errors);
        self.check_payload(block, &mut errors);
        let fork_one = if legacy {
            self.check_fork_one(block, last_block, &mut errors)
        } else {
            false
        };
        self.check_block_slot(block, last_block, current_time, &mut errors);
        VerifyOutcome {
            result: VerifyResult { errors },
            fork_one,
        }
    }

    /// The subset of checks needing no chain state at all. Used on the bus
    /// to vet announced blocks before the chain core sees them.
    pub fn verify_stateless(&self, block: &Block) -> VerifyResult {
        let mut errors = Vec::new();
        self.check_signature(block, &mut errors);
        self.check_previous_block(block, &mut errors);
        self.check_version(block, &mut errors);
        self.check_reward(block, &mut errors);
        self.check_id(block, &mut errors);
        self.check_payload(block, &mut errors);
        VerifyResult { errors }
    }

    /// Verify a block against its actual parent: linkage, battery and slot
    /// ordering. Used when replaying or restoring stored blocks.
    pub fn verify_chain_link(&self, block: &Block, previous: &Block) -> VerifyResult {
        let mut errors = Vec::new();
        self.check_signature(block, &mut errors);
        match block.previous_block_id {
            Some(prev) if prev == previous.id => {
                if block.height != previous.height + 1 {
                    errors.push(VerificationError::MissingPreviousBlock);
                }
            }
            Some(prev) => errors.push(VerificationError::PreviousBlockMismatch {
                actual: prev,
                expected: previous.id,
            }),
            None => errors.push(VerificationError::MissingPreviousBlock),
        }
        self.check_version(block, &mut errors);
        self.check_reward(block, &mut errors);
        self.check_id(block, &mut errors);
        self.check_payload(block, &mut errors);
        if self.slots.slot_number(block.timestamp) <= self.slots.slot_number(previous.timestamp) {
            errors.push(VerificationError::InvalidTimestamp);
        }
        VerifyResult { errors }
    }

    fn check_signature(&self, block: &Block, errors: &mut Vec<VerificationError>) {
        match crypto::verify_block_signature(block) {
            Ok(true) => {}
            _ => errors.push(VerificationError::InvalidSignature),
        }
    }

    // Only the genesis block may omit its parent id
    fn check_previous_block(&self, block: &Block, errors: &mut Vec<VerificationError>) {
        if block.previous_block_id.is_none() && block.height != 1 {
            errors.push(VerificationError::MissingPreviousBlock);
        }
    }

    fn check_recent_ids(
        &self,
        block: &Block,
        recent_block_ids: &[BlockId],
        errors: &mut Vec<VerificationError>,
    ) {
        if recent_block_ids.contains(&block.id) {
            errors.push(VerificationError::AlreadyInChain);
        }
    }

    fn check_slot_window(
        &self,
        block: &Block,
        current_time: u32,
        errors: &mut Vec<VerificationError>,
    ) {
        let current_slot = self.slots.slot_number(current_time);
        let block_slot = self.slots.slot_number(block.timestamp);
        if block_slot < current_slot.saturating_sub(self.params.block_slot_window) {
            errors.push(VerificationError::SlotTooOld);
        } else if block_slot > current_slot {
            errors.push(VerificationError::SlotInFuture);
        }
    }

    fn check_version(&self, block: &Block, errors: &mut Vec<VerificationError>) {
        if block.version != self.params.block_version
            && !self.exceptions.is_version_allowed(block.version, block.height)
        {
            errors.push(VerificationError::InvalidVersion);
        }
    }

    fn check_reward(&self, block: &Block, errors: &mut Vec<VerificationError>) {
        if block.height == 1 || self.exceptions.is_reward_exempt(block.id) {
            return;
        }
        let expected = self.rewards.reward(block.height);
        if block.reward != expected {
            errors.push(VerificationError::InvalidReward {
                actual: block.reward,
                expected,
            });
        }
    }

    fn check_id(&self, block: &Block, errors: &mut Vec<VerificationError>) {
        let expected = codec::block_id(block);
        if block.id != expected {
            errors.push(VerificationError::IdMismatch {
                actual: block.id,
                expected,
            });
        }
    }

    fn check_payload(&self, block: &Block, errors: &mut Vec<VerificationError>) {
        if block.payload_length > self.params.max_payload_length {
            errors.push(VerificationError::PayloadTooLong);
        }
        if block.transactions.len() != block.number_of_transactions as usize {
            errors.push(VerificationError::TransactionCountMismatch);
        }
        if block.transactions.len() > self.params.max_transactions_per_block as usize {
            errors.push(VerificationError::TooManyTransactions);
        }

        let mut seen = HashSet::new();
        let mut total_amount: u64 = 0;
        let mut total_fee: u64 = 0;
        for tx in &block.transactions {
            if !seen.insert(tx.id) {
                errors.push(VerificationError::DuplicateTransaction(tx.id));
            }
            total_amount = total_amount.saturating_add(tx.amount);
            total_fee = total_fee.saturating_add(tx.fee);
        }
        if codec::payload_hash(&block.transactions) != block.payload_hash {
            errors.push(VerificationError::InvalidPayloadHash);
        }
        if total_amount != block.total_amount {
            errors.push(VerificationError::InvalidTotalAmount);
        }
        if total_fee != block.total_fee {
            errors.push(VerificationError::InvalidTotalFee);
        }
    }

    /// Legacy fork case 1: parent id present but not the tip
    fn check_fork_one(
        &self,
        block: &Block,
        last_block: &Block,
        errors: &mut Vec<VerificationError>,
    ) -> bool {
        match block.previous_block_id {
            Some(prev) if prev != last_block.id => {
                errors.push(VerificationError::PreviousBlockMismatch {
                    actual: prev,
                    expected: last_block.id,
                });
                true
            }
            _ => false,
        }
    }

    // A block's slot must strictly follow the tip's and not lie in the future
    fn check_block_slot(
        &self,
        block: &Block,
        last_block: &Block,
        current_time: u32,
        errors: &mut Vec<VerificationError>,
    ) {
        let block_slot = self.slots.slot_number(block.timestamp);
        let last_slot = self.slots.slot_number(last_block.timestamp);
        let current_slot = self.slots.slot_number(current_time);
        if block_slot > current_slot || block_slot <= last_slot {
            errors.push(VerificationError::InvalidTimestamp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delos_common::{Hash256, Transaction};
    use ed25519_dalek::SigningKey;

    fn keypair(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn tx(seed: u8, amount: u64, fee: u64) -> Transaction {
        let bytes = vec![seed; 16];
        Transaction {
            id: codec::tx_id(&bytes),
            tx_type: 0,
            amount,
            fee,
            bytes,
        }
    }

    fn build_block(
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

    // Re-sign and re-derive the id after mutating header fields
    fn resign(mut block: Block, key: &SigningKey) -> Block {
        block.generator_signature = crypto::sign_block(key, &block);
        block.id = codec::block_id(&block);
        block
    }

    fn verifier() -> Verifier {
        Verifier::new(
            ChainParams::default(),
            Exceptions::default(),
            RewardSchedule::default(),
        )
    }

    fn tip_and_next() -> (Block, Block, SigningKey) {
        let key = keypair(1);
        let genesis = build_block(&key, 1, None, 0, vec![]);
        let next = build_block(&key, 2, Some(&genesis), 10, vec![]);
        (genesis, next, key)
    }

    #[test]
    fn valid_block_passes_reception_battery() {
        let (_, next, _) = tip_and_next();
        let result = verifier().verify_receive(&next, &[], 15);
        assert!(result.verified(), "unexpected errors: {:?}", result.errors);
    }

    #[test]
    fn tampered_signature_is_flagged() {
        let (_, mut next, _) = tip_and_next();
        next.generator_signature.0[0] ^= 1;
        next.id = codec::block_id(&next);
        let result = verifier().verify_receive(&next, &[], 15);
        assert!(result.errors.contains(&VerificationError::InvalidSignature));
    }

    #[test]
    fn missing_parent_is_flagged_above_genesis() {
        let key = keypair(1);
        let orphan = build_block(&key, 2, None, 10, vec![]);
        let result = verifier().verify_receive(&orphan, &[], 15);
        assert!(result.errors.contains(&VerificationError::MissingPreviousBlock));
    }

    #[test]
    fn recently_seen_block_is_rejected() {
        let (_, next, _) = tip_and_next();
        let result = verifier().verify_receive(&next, &[next.id], 15);
        assert!(result.errors.contains(&VerificationError::AlreadyInChain));
    }

    #[test]
    fn stale_and_future_slots_are_flagged() {
        let (_, next, _) = tip_and_next();
        // Block is in slot 1; push "now" far beyond the window
        let result = verifier().verify_receive(&next, &[], 10 * 10);
        assert!(result.errors.contains(&VerificationError::SlotTooOld));

        // Now before the block's slot
        let result = verifier().verify_receive(&next, &[], 5);
        assert!(result.errors.contains(&VerificationError::SlotInFuture));
    }

    #[test]
    fn wrong_version_is_flagged_unless_grandfathered() {
        let (genesis, _, key) = tip_and_next();
        let mut old = build_block(&key, 2, Some(&genesis), 10, vec![]);
        old.version = 1;
        let old = resign(old, &key);

        let result = verifier().verify_receive(&old, &[], 15);
        assert!(result.errors.contains(&VerificationError::InvalidVersion));

        let lenient = Verifier::new(
            ChainParams::default(),
            Exceptions::default().allow_version(1, 1..100),
            RewardSchedule::default(),
        );
        let result = lenient.verify_receive(&old, &[], 15);
        assert!(result.verified(), "unexpected errors: {:?}", result.errors);
    }

    #[test]
    fn wrong_reward_is_flagged() {
        let (genesis, _, key) = tip_and_next();
        let mut greedy = build_block(&key, 2, Some(&genesis), 10, vec![]);
        greedy.reward = 500_000_000;
        let greedy = resign(greedy, &key);

        let result = verifier().verify_receive(&greedy, &[], 15);
        assert!(result.errors.contains(&VerificationError::InvalidReward {
            actual: 500_000_000,
            expected: 0
        }));
    }

    #[test]
    fn reward_exemption_by_block_id() {
        let (genesis, _, key) = tip_and_next();
        let mut greedy = build_block(&key, 2, Some(&genesis), 10, vec![]);
        greedy.reward = 500_000_000;
        let greedy = resign(greedy, &key);

        let lenient = Verifier::new(
            ChainParams::default(),
            Exceptions {
                block_rewards: vec![greedy.id],
                ..Default::default()
            },
            RewardSchedule::default(),
        );
        let result = lenient.verify_receive(&greedy, &[], 15);
        assert!(result.verified(), "unexpected errors: {:?}", result.errors);
    }

    #[test]
    fn forged_id_is_flagged() {
        let (_, mut next, _) = tip_and_next();
        let expected = next.id;
        next.id = BlockId(12345);
        let result = verifier().verify_receive(&next, &[], 15);
        assert!(result.errors.contains(&VerificationError::IdMismatch {
            actual: BlockId(12345),
            expected
        }));
    }

    #[test]
    fn payload_violations_are_flagged() {
        let (genesis, _, key) = tip_and_next();
        let t = tx(9, 100, 10);
        let block = build_block(
            &key,
            2,
            Some(&genesis),
            10,
            vec![t.clone(), t.clone()],
        );
        let result = verifier().verify_receive(&block, &[], 15);
        assert!(result.errors.contains(&VerificationError::DuplicateTransaction(t.id)));

        let mut lying = build_block(&key, 2, Some(&genesis), 10, vec![tx(9, 100, 10)]);
        lying.total_amount = 1;
        lying.total_fee = 1;
        lying.payload_hash = Hash256::default();
        let lying = resign(lying, &key);
        let result = verifier().verify_receive(&lying, &[], 15);
        assert!(result.errors.contains(&VerificationError::InvalidTotalAmount));
        assert!(result.errors.contains(&VerificationError::InvalidTotalFee));
        assert!(result.errors.contains(&VerificationError::InvalidPayloadHash));

        let mut short = build_block(&key, 2, Some(&genesis), 10, vec![tx(9, 100, 10)]);
        short.number_of_transactions = 3;
        let short = resign(short, &key);
        let result = verifier().verify_receive(&short, &[], 15);
        assert!(result.errors.contains(&VerificationError::TransactionCountMismatch));
    }

    #[test]
    fn transaction_count_cap_is_enforced() {
        let (genesis, _, key) = tip_and_next();
        let txs: Vec<_> = (0..26).map(|i| tx(i as u8, 1, 1)).collect();
        let block = build_block(&key, 2, Some(&genesis), 10, txs);
        let result = verifier().verify_receive(&block, &[], 15);
        assert!(result.errors.contains(&VerificationError::TooManyTransactions));
    }

    #[test]
    fn payload_length_cap_is_enforced() {
        let (genesis, _, key) = tip_and_next();
        let tight = Verifier::new(
            ChainParams {
                max_payload_length: 8,
                ..Default::default()
            },
            Exceptions::default(),
            RewardSchedule::default(),
        );
        let block = build_block(&key, 2, Some(&genesis), 10, vec![tx(9, 1, 1)]);
        let result = tight.verify_receive(&block, &[], 15);
        assert!(result.errors.contains(&VerificationError::PayloadTooLong));
    }

    #[test]
    fn battery_reports_every_violation_at_once() {
        let (_, mut next, _) = tip_and_next();
        next.version = 99;
        next.reward = 7;
        next.generator_signature.0[0] ^= 1;
        // Id no longer matches either
        let result = verifier().verify_receive(&next, &[], 15);
        assert!(result.errors.contains(&VerificationError::InvalidSignature));
        assert!(result.errors.contains(&VerificationError::InvalidVersion));
        assert!(result.errors.len() >= 4);
    }

    #[test]
    fn legacy_apply_flags_fork_one() {
        let (genesis, next, key) = tip_and_next();
        let stranger = build_block(&key, 3, Some(&next), 20, vec![]);

        let outcome = verifier().verify_apply(&stranger, &genesis, 25, true);
        assert!(outcome.fork_one);
        assert!(outcome.result.errors.contains(&VerificationError::PreviousBlockMismatch {
            actual: next.id,
            expected: genesis.id
        }));

        // The fork-choice pipeline resolves parent mismatches itself
        let outcome = verifier().verify_apply(&stranger, &genesis, 25, false);
        assert!(!outcome.fork_one);
        assert!(outcome.result.verified());
    }

    #[test]
    fn apply_rejects_out_of_order_slots() {
        let (genesis, _, key) = tip_and_next();
        // Same slot as the tip
        let stale = build_block(&key, 2, Some(&genesis), 5, vec![]);
        let outcome = verifier().verify_apply(&stale, &genesis, 15, false);
        assert!(outcome.result.errors.contains(&VerificationError::InvalidTimestamp));

        // Slot after "now"
        let eager = build_block(&key, 2, Some(&genesis), 30, vec![]);
        let outcome = verifier().verify_apply(&eager, &genesis, 15, false);
        assert!(outcome.result.errors.contains(&VerificationError::InvalidTimestamp));
    }

    #[test]
    fn chain_link_accepts_true_parent() {
        let (genesis, next, _) = tip_and_next();
        let result = verifier().verify_chain_link(&next, &genesis);
        assert!(result.verified(), "unexpected errors: {:?}", result.errors);
    }

    #[test]
    fn chain_link_rejects_wrong_parent() {
        let (genesis, next, key) = tip_and_next();
        let grandchild = build_block(&key, 3, Some(&next), 20, vec![]);
        let result = verifier().verify_chain_link(&grandchild, &genesis);
        assert!(result.errors.contains(&VerificationError::PreviousBlockMismatch {
            actual: next.id,
            expected: genesis.id
        }));
    }

    #[test]
    fn chain_link_rejects_height_gap() {
        let (genesis, _, key) = tip_and_next();
        let mut skipper = build_block(&key, 5, Some(&genesis), 10, vec![]);
        skipper = resign(skipper, &key);
        let result = verifier().verify_chain_link(&skipper, &genesis);
        assert!(result.errors.contains(&VerificationError::MissingPreviousBlock));
    }
}
