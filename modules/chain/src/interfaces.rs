//! Collaborator contracts consumed by the chain core
//!
//! Transaction semantics, delegate-round bookkeeping and outward event
//! delivery all live behind traits so the core stays a pure sequencing
//! machine over blocks.

use anyhow::Result;

use delos_common::{Block, Transaction, TxId};

/// Per-transaction outcome reported by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Ok,
    Fail,
    Pending,
}

#[derive(Debug, Clone)]
pub struct TransactionResponse {
    pub id: TxId,
    pub status: TransactionStatus,
    pub errors: Vec<String>,
}

impl TransactionResponse {
    pub fn ok(id: TxId) -> Self {
        Self {
            id,
            status: TransactionStatus::Ok,
            errors: Vec::new(),
        }
    }
}

/// Which fork situation was taken, reported to the rounds tracker and
/// observers for bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkCase {
    /// The block's parent id is not the current tip
    PreviousIdMismatch,

    /// Same height and parent as the tip, different block
    SameHeightAndParent,

    /// One producer signed two blocks at the same height
    DoubleForging,

    /// Double forging resolved in favour of the earlier slot
    TieBreak,

    /// A competing heavier chain
    DifferentChain,
}

/// Transaction semantics, applied against external account state.
///
/// `apply_transactions` and `undo_transactions` must be all-or-nothing: when
/// any response is not Ok, no durable state may have changed.
pub trait TransactionPipeline: Send + Sync {
    /// Speculatively check candidate transactions against current state
    fn verify_transactions(&self, transactions: &[Transaction]) -> Result<Vec<TransactionResponse>>;

    /// Filter candidates admissible at a timestamp (block generation)
    fn check_allowed_transactions(
        &self,
        transactions: &[Transaction],
        timestamp: u32,
    ) -> Result<Vec<TransactionResponse>>;

    /// Apply the block's transactions in order
    fn apply_transactions(&self, block: &Block) -> Result<Vec<TransactionResponse>>;

    /// Undo the block's transactions in reverse order
    fn undo_transactions(&self, block: &Block) -> Result<Vec<TransactionResponse>>;
}

/// Delegate-round accounting. The core only sequences the calls: apply
/// before tick, undo before backward tick.
pub trait RoundsTracker: Send + Sync {
    /// Whether the block's generator owns the block's slot
    fn validate_block_slot(&self, block: &Block) -> Result<bool>;

    /// Advance round state past an applied block
    fn tick(&self, block: &Block) -> Result<()>;

    /// Reverse round state when a block is deleted
    fn backward_tick(&self, block: &Block, previous: &Block) -> Result<()>;

    /// Record a fork event
    fn fork(&self, block: &Block, case: ForkCase);
}

/// Outward events from the chain core
pub trait ChainObserver: Send + Sync {
    /// A block was applied and is the new tip
    fn block_applied(&self, block: &Block);

    /// The block should be rebroadcast to peers
    fn block_broadcast(&self, block: &Block);

    /// A competing chain was detected; synchronization should take over
    fn sync_required(&self, block: &Block);

    /// A fork event was observed
    fn fork_detected(&self, block: &Block, case: ForkCase);
}

/// Pipeline for deployments with no transaction semantics wired in yet:
/// every transaction is admissible and application is a no-op.
pub struct PassthroughPipeline;

impl TransactionPipeline for PassthroughPipeline {
    fn verify_transactions(&self, transactions: &[Transaction]) -> Result<Vec<TransactionResponse>> {
        Ok(transactions.iter().map(|tx| TransactionResponse::ok(tx.id)).collect())
    }

    fn check_allowed_transactions(
        &self,
        transactions: &[Transaction],
        _timestamp: u32,
    ) -> Result<Vec<TransactionResponse>> {
        Ok(transactions.iter().map(|tx| TransactionResponse::ok(tx.id)).collect())
    }

    fn apply_transactions(&self, block: &Block) -> Result<Vec<TransactionResponse>> {
        Ok(block.transactions.iter().map(|tx| TransactionResponse::ok(tx.id)).collect())
    }

    fn undo_transactions(&self, block: &Block) -> Result<Vec<TransactionResponse>> {
        Ok(block.transactions.iter().map(|tx| TransactionResponse::ok(tx.id)).collect())
    }
}

/// Rounds tracker that accepts every producer and keeps no state
pub struct OpenSchedule;

impl RoundsTracker for OpenSchedule {
    fn validate_block_slot(&self, _block: &Block) -> Result<bool> {
        Ok(true)
    }

    fn tick(&self, _block: &Block) -> Result<()> {
        Ok(())
    }

    fn backward_tick(&self, _block: &Block, _previous: &Block) -> Result<()> {
        Ok(())
    }

    fn fork(&self, block: &Block, case: ForkCase) {
        tracing::warn!(id = %block.id, height = block.height, "Fork observed: {case:?}");
    }
}
