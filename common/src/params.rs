//! Chain parameters and the historical exceptions table

use std::ops::Range;
use std::sync::Arc;

use config::Config;

use crate::types::BlockId;

const DEFAULT_EPOCH_TIME: u64 = 1_464_109_200; // unix seconds of slot 0
const DEFAULT_SLOT_INTERVAL: u32 = 10;
const DEFAULT_ACTIVE_DELEGATES: u64 = 101;
const DEFAULT_BLOCK_VERSION: u32 = 2;
const DEFAULT_FORK_CHOICE_VERSION: u32 = 2;
const DEFAULT_MAX_PAYLOAD_LENGTH: u32 = 1024 * 1024;
const DEFAULT_MAX_TRANSACTIONS_PER_BLOCK: u32 = 25;
const DEFAULT_BLOCK_RECEIPT_TIMEOUT: u32 = 20; // two slots
const DEFAULT_BLOCK_SLOT_WINDOW: u32 = 5;
const DEFAULT_MULTISIGNATURE_TX_TYPE: u8 = 4;
const DEFAULT_REBUILD_BATCH_SIZE: u64 = 1000;

/// Protocol constants, read once at module start.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChainParams {
    /// Unix time of the chain epoch start (slot 0)
    pub epoch_time: u64,

    /// Seconds per slot
    pub slot_interval: u32,

    /// Blocks per delegate round
    pub active_delegates: u64,

    /// Version expected of newly produced blocks
    pub block_version: u32,

    /// First version processed by the fork-choice pipeline; lower versions
    /// go through the legacy sequential pipeline
    pub fork_choice_version: u32,

    /// Maximum transaction payload bytes per block
    pub max_payload_length: u32,

    /// Maximum transaction count per block
    pub max_transactions_per_block: u32,

    /// Seconds without a received block before the chain is considered stale
    pub block_receipt_timeout: u32,

    /// Slot window for receipt freshness and the recent-id dedup window
    pub block_slot_window: u32,

    /// Transaction type ordered last by the legacy block-generation sort
    pub multisignature_tx_type: u8,

    /// Blocks applied per rebuild batch
    pub rebuild_batch_size: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            epoch_time: DEFAULT_EPOCH_TIME,
            slot_interval: DEFAULT_SLOT_INTERVAL,
            active_delegates: DEFAULT_ACTIVE_DELEGATES,
            block_version: DEFAULT_BLOCK_VERSION,
            fork_choice_version: DEFAULT_FORK_CHOICE_VERSION,
            max_payload_length: DEFAULT_MAX_PAYLOAD_LENGTH,
            max_transactions_per_block: DEFAULT_MAX_TRANSACTIONS_PER_BLOCK,
            block_receipt_timeout: DEFAULT_BLOCK_RECEIPT_TIMEOUT,
            block_slot_window: DEFAULT_BLOCK_SLOT_WINDOW,
            multisignature_tx_type: DEFAULT_MULTISIGNATURE_TX_TYPE,
            rebuild_batch_size: DEFAULT_REBUILD_BATCH_SIZE,
        }
    }
}

impl ChainParams {
    /// Read parameters from module configuration, falling back to defaults
    pub fn from_config(config: &Arc<Config>) -> Self {
        let defaults = Self::default();
        Self {
            epoch_time: config.get_int("epoch-time").map(|v| v as u64).unwrap_or(defaults.epoch_time),
            slot_interval: config
                .get_int("slot-interval")
                .map(|v| v as u32)
                .unwrap_or(defaults.slot_interval),
            active_delegates: config
                .get_int("active-delegates")
                .map(|v| v as u64)
                .unwrap_or(defaults.active_delegates),
            block_version: config
                .get_int("block-version")
                .map(|v| v as u32)
                .unwrap_or(defaults.block_version),
            fork_choice_version: config
                .get_int("fork-choice-version")
                .map(|v| v as u32)
                .unwrap_or(defaults.fork_choice_version),
            max_payload_length: config
                .get_int("max-payload-length")
                .map(|v| v as u32)
                .unwrap_or(defaults.max_payload_length),
            max_transactions_per_block: config
                .get_int("max-transactions-per-block")
                .map(|v| v as u32)
                .unwrap_or(defaults.max_transactions_per_block),
            block_receipt_timeout: config
                .get_int("block-receipt-timeout")
                .map(|v| v as u32)
                .unwrap_or(defaults.block_receipt_timeout),
            block_slot_window: config
                .get_int("block-slot-window")
                .map(|v| v as u32)
                .unwrap_or(defaults.block_slot_window),
            multisignature_tx_type: config
                .get_int("multisignature-tx-type")
                .map(|v| v as u8)
                .unwrap_or(defaults.multisignature_tx_type),
            rebuild_batch_size: config
                .get_int("rebuild-batch-size")
                .map(|v| v as u64)
                .unwrap_or(defaults.rebuild_batch_size),
        }
    }
}

/// A block version permitted over a historical height range
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct VersionException {
    pub version: u32,
    pub start_height: u64,
    pub end_height: u64,
}

/// Static allow-list overriding otherwise-fatal verification failures for
/// historically grandfathered blocks. Read-only at runtime; passed explicitly
/// into verification so checks stay pure functions of their inputs.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct Exceptions {
    /// Versions allowed outside the current protocol version, by height range
    pub block_versions: Vec<VersionException>,

    /// Blocks exempt from the reward-schedule check
    pub block_rewards: Vec<BlockId>,
}

impl Exceptions {
    /// Whether `version` is grandfathered at `height`
    pub fn is_version_allowed(&self, version: u32, height: u64) -> bool {
        self.block_versions
            .iter()
            .any(|e| e.version == version && (e.start_height..e.end_height).contains(&height))
    }

    /// Whether `id` is exempt from the reward check
    pub fn is_reward_exempt(&self, id: BlockId) -> bool {
        self.block_rewards.contains(&id)
    }

    /// Allow-list a version over `range` of heights
    pub fn allow_version(mut self, version: u32, range: Range<u64>) -> Self {
        self.block_versions.push(VersionException {
            version,
            start_height: range.start,
            end_height: range.end,
        });
        self
    }
}
