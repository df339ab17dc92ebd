//! Block verification violations and the Go/NoGo status carried on the bus

use thiserror::Error;

use crate::types::{BlockId, TxId};

/// A single violated invariant found by the verification battery.
///
/// Messages are part of the protocol surface (peers and operators match on
/// them) and must not be reworded.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Error)]
pub enum VerificationError {
    #[error("Failed to verify block signature")]
    InvalidSignature,

    #[error("Invalid previous block")]
    MissingPreviousBlock,

    #[error("Block already exists in chain")]
    AlreadyInChain,

    #[error("Invalid block version")]
    InvalidVersion,

    #[error("Invalid block reward: {actual} expected: {expected}")]
    InvalidReward { actual: u64, expected: u64 },

    #[error("Invalid block id: {actual} expected: {expected}")]
    IdMismatch { actual: BlockId, expected: BlockId },

    #[error("Payload length is too long")]
    PayloadTooLong,

    #[error("Included transactions do not match block transactions count")]
    TransactionCountMismatch,

    #[error("Number of transactions exceeds maximum per block")]
    TooManyTransactions,

    #[error("Encountered duplicate transaction: {0}")]
    DuplicateTransaction(TxId),

    #[error("Invalid payload hash")]
    InvalidPayloadHash,

    #[error("Invalid total amount")]
    InvalidTotalAmount,

    #[error("Invalid total fee")]
    InvalidTotalFee,

    /// Fork case 1: the block does not chain onto the current tip
    #[error("Invalid previous block: {actual} expected: {expected}")]
    PreviousBlockMismatch { actual: BlockId, expected: BlockId },

    #[error("Invalid block timestamp")]
    InvalidTimestamp,

    #[error("Block slot is too old")]
    SlotTooOld,

    #[error("Block slot is in the future")]
    SlotInFuture,
}

/// Accumulated outcome of a verification battery run.
///
/// Checks never short-circuit: the caller sees every violation at once.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct VerifyResult {
    pub errors: Vec<VerificationError>,
}

impl VerifyResult {
    pub fn verified(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validation status published on the bus
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ValidationStatus {
    /// All good
    Go,

    /// One or more violations
    NoGo(Vec<VerificationError>),
}

impl From<VerifyResult> for ValidationStatus {
    fn from(result: VerifyResult) -> Self {
        if result.verified() {
            Self::Go
        } else {
            Self::NoGo(result.errors)
        }
    }
}
