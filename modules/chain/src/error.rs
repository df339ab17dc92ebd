//! Chain-core error taxonomy
//!
//! Verification failures and fork events are expected protocol outcomes and
//! carry enough context for the caller to decide peer penalties or logging.
//! Storage failures are fatal for the single block attempt and never leave a
//! partial commit behind.

use thiserror::Error;

use delos_common::{BlockId, VerificationError};

use crate::interfaces::TransactionResponse;

pub type ChainResult<T> = Result<T, ChainError>;

#[derive(Debug, Error)]
pub enum ChainError {
    /// The verification battery rejected the block; all violations included
    #[error("Block {id} failed verification: {errors:?}")]
    Validation {
        id: BlockId,
        errors: Vec<VerificationError>,
    },

    #[error("Failed to access storage layer")]
    Storage(#[source] anyhow::Error),

    /// The transaction pipeline refused one or more of the block's
    /// transactions; nothing was committed
    #[error("Transactions failed to apply for block {id}")]
    TransactionsRejected {
        id: BlockId,
        responses: Vec<TransactionResponse>,
    },

    /// The generator does not own the block's slot
    #[error("Failed to verify slot: {slot}")]
    InvalidSlotOwner { slot: u32 },

    /// A block is already mid-processing; retry later
    #[error("Block process cannot be executed in parallel")]
    ParallelProcessing,

    #[error("Cannot delete genesis block")]
    DeleteGenesis,

    #[error("Chain should contain at least one round of blocks")]
    RebuildBelowRound,

    /// The tie-break challenger failed to apply; the original tip was
    /// restored before this error surfaced
    #[error("Fork tie-break failed for block {failed}; restored tip {restored}")]
    TieBreakFailed {
        failed: BlockId,
        restored: BlockId,
        #[source]
        source: Box<ChainError>,
    },

    /// Recovery could not reach a verifiable tip; operator intervention
    /// required, the core does not guess a fix
    #[error("Chain state is irrecoverable: {0}")]
    Irrecoverable(String),

    /// Failure in an external collaborator (rounds, transaction pipeline)
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}
