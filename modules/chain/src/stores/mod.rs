//! Persistent block storage behind the chain mutator

use anyhow::Result;

use delos_common::{Block, BlockId};

mod fjall;

pub use fjall::FjallStore;

/// Block persistence. Every mutation is internally atomic: either the whole
/// operation lands or none of it does, so a failure mid-call never leaves a
/// partially written block behind.
pub trait Store: Send + Sync {
    /// Persist a block's header and transactions in one batch
    fn commit_block(&self, block: &Block) -> Result<()>;

    /// Remove a block; with `store_temp` a temp copy is written in the same
    /// batch so a reorg can restore it
    fn delete_block(&self, block: &Block, store_temp: bool) -> Result<()>;

    fn get_block_by_id(&self, id: BlockId) -> Result<Option<Block>>;

    fn get_block_by_height(&self, height: u64) -> Result<Option<Block>>;

    /// Stored blocks with heights in `min_height..=max_height`, ascending
    fn get_blocks_in_range(&self, min_height: u64, max_height: u64) -> Result<Vec<Block>>;

    fn get_last_block(&self) -> Result<Option<Block>>;

    fn is_persisted(&self, id: BlockId) -> Result<bool>;

    /// Highest stored block among a candidate id list
    fn highest_common_block(&self, ids: &[BlockId]) -> Result<Option<Block>>;

    fn get_temp_block(&self, height: u64) -> Result<Option<Block>>;

    fn delete_temp_block(&self, height: u64) -> Result<()>;

    /// Drop state derived from block replay, ahead of a rebuild
    fn reset_derived_state(&self) -> Result<()>;
}
