use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Result};
use config::Config;
use fjall::{Database, Keyspace};

use delos_common::{Block, BlockId, Hash256, PublicKey, Signature, Transaction, TxId};

use super::Store;

const DEFAULT_DATABASE_PATH: &str = "fjall-chain";
const DEFAULT_CLEAR_ON_START: bool = false;
const BLOCKS_KEYSPACE: &str = "blocks";
const BLOCK_IDS_BY_HEIGHT_KEYSPACE: &str = "block-ids-by-height";
const TEMP_BLOCKS_KEYSPACE: &str = "temp-blocks";

/// Fjall-backed block store. Blocks are keyed by id; a height index maps
/// big-endian heights to ids so range scans walk the chain in order. Temp
/// blocks (reorg scratch space) live in their own keyspace keyed by height.
pub struct FjallStore {
    database: Database,
    blocks: Keyspace,
    ids_by_height: Keyspace,
    temp_blocks: Keyspace,
}

impl FjallStore {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let path =
            config.get_string("database-path").unwrap_or(DEFAULT_DATABASE_PATH.to_string());
        let clear = config.get_bool("clear-on-start").unwrap_or(DEFAULT_CLEAR_ON_START);
        let path = PathBuf::from(path);
        if clear && path.exists() {
            fs::remove_dir_all(&path)?;
        }
        Self::open(path)
    }

    pub fn open(path: PathBuf) -> Result<Self> {
        let database = Database::builder(&path).open()?;
        let blocks = database.keyspace(BLOCKS_KEYSPACE, fjall::KeyspaceCreateOptions::default)?;
        let ids_by_height =
            database.keyspace(BLOCK_IDS_BY_HEIGHT_KEYSPACE, fjall::KeyspaceCreateOptions::default)?;
        let temp_blocks =
            database.keyspace(TEMP_BLOCKS_KEYSPACE, fjall::KeyspaceCreateOptions::default)?;

        Ok(Self {
            database,
            blocks,
            ids_by_height,
            temp_blocks,
        })
    }

    fn get_by_id_bytes(&self, id: &[u8]) -> Result<Option<Block>> {
        let Some(row) = self.blocks.get(id)? else {
            return Ok(None);
        };
        let stored: StoredBlock = minicbor::decode(&row)?;
        Ok(Some(stored.into_block()?))
    }
}

impl Store for FjallStore {
    fn commit_block(&self, block: &Block) -> Result<()> {
        let encoded = minicbor::to_vec(StoredBlock::from(block)).expect("infallible");
        let mut batch = self.database.batch();
        batch.insert(&self.blocks, block.id.0.to_be_bytes(), encoded);
        batch.insert(
            &self.ids_by_height,
            block.height.to_be_bytes(),
            block.id.0.to_be_bytes(),
        );
        batch.commit()?;
        Ok(())
    }

    fn delete_block(&self, block: &Block, store_temp: bool) -> Result<()> {
        let mut batch = self.database.batch();
        if store_temp {
            let encoded = minicbor::to_vec(StoredBlock::from(block)).expect("infallible");
            batch.insert(&self.temp_blocks, block.height.to_be_bytes(), encoded);
        }
        batch.remove(&self.blocks, block.id.0.to_be_bytes());
        batch.remove(&self.ids_by_height, block.height.to_be_bytes());
        batch.commit()?;
        Ok(())
    }

    fn get_block_by_id(&self, id: BlockId) -> Result<Option<Block>> {
        self.get_by_id_bytes(&id.0.to_be_bytes())
    }

    fn get_block_by_height(&self, height: u64) -> Result<Option<Block>> {
        let Some(id) = self.ids_by_height.get(height.to_be_bytes())? else {
            return Ok(None);
        };
        self.get_by_id_bytes(&id)
    }

    fn get_blocks_in_range(&self, min_height: u64, max_height: u64) -> Result<Vec<Block>> {
        if max_height < min_height {
            return Err(anyhow!("Invalid height range min={min_height}, max={max_height}"));
        }
        let mut blocks = Vec::new();
        for res in self.ids_by_height.range(min_height.to_be_bytes()..=max_height.to_be_bytes()) {
            let id = res.value()?;
            if let Some(block) = self.get_by_id_bytes(&id)? {
                blocks.push(block);
            }
        }
        Ok(blocks)
    }

    fn get_last_block(&self) -> Result<Option<Block>> {
        let Some(res) = self.ids_by_height.last_key_value() else {
            return Ok(None);
        };
        let id = res.value()?;
        self.get_by_id_bytes(&id)
    }

    fn is_persisted(&self, id: BlockId) -> Result<bool> {
        Ok(self.blocks.get(id.0.to_be_bytes())?.is_some())
    }

    fn highest_common_block(&self, ids: &[BlockId]) -> Result<Option<Block>> {
        let mut highest: Option<Block> = None;
        for id in ids {
            if let Some(block) = self.get_block_by_id(*id)? {
                if highest.as_ref().map_or(true, |h| block.height > h.height) {
                    highest = Some(block);
                }
            }
        }
        Ok(highest)
    }

    fn get_temp_block(&self, height: u64) -> Result<Option<Block>> {
        let Some(row) = self.temp_blocks.get(height.to_be_bytes())? else {
            return Ok(None);
        };
        let stored: StoredBlock = minicbor::decode(&row)?;
        Ok(Some(stored.into_block()?))
    }

    fn delete_temp_block(&self, height: u64) -> Result<()> {
        let mut batch = self.database.batch();
        batch.remove(&self.temp_blocks, height.to_be_bytes());
        batch.commit()?;
        Ok(())
    }

    fn reset_derived_state(&self) -> Result<()> {
        // Derived account/round state lives with collaborators; here only
        // leftover reorg scratch space is cleared
        let mut batch = self.database.batch();
        for res in self.temp_blocks.iter() {
            let key = res.key()?;
            batch.remove(&self.temp_blocks, key.as_ref());
        }
        batch.commit()?;
        Ok(())
    }
}

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
struct StoredBlock {
    #[n(0)]
    id: u64,
    #[n(1)]
    version: u32,
    #[n(2)]
    height: u64,
    #[n(3)]
    timestamp: u32,
    #[n(4)]
    previous_block_id: Option<u64>,
    #[n(5)]
    generator_public_key: Vec<u8>,
    #[n(6)]
    generator_signature: Vec<u8>,
    #[n(7)]
    payload_hash: Vec<u8>,
    #[n(8)]
    payload_length: u32,
    #[n(9)]
    number_of_transactions: u32,
    #[n(10)]
    total_amount: u64,
    #[n(11)]
    total_fee: u64,
    #[n(12)]
    reward: u64,
    #[n(13)]
    transactions: Vec<StoredTransaction>,
}

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
struct StoredTransaction {
    #[n(0)]
    id: u64,
    #[n(1)]
    tx_type: u8,
    #[n(2)]
    amount: u64,
    #[n(3)]
    fee: u64,
    #[n(4)]
    bytes: Vec<u8>,
}

impl From<&Block> for StoredBlock {
    fn from(block: &Block) -> Self {
        Self {
            id: block.id.0,
            version: block.version,
            height: block.height,
            timestamp: block.timestamp,
            previous_block_id: block.previous_block_id.map(|id| id.0),
            generator_public_key: block.generator_public_key.0.to_vec(),
            generator_signature: block.generator_signature.0.to_vec(),
            payload_hash: block.payload_hash.0.to_vec(),
            payload_length: block.payload_length,
            number_of_transactions: block.number_of_transactions,
            total_amount: block.total_amount,
            total_fee: block.total_fee,
            reward: block.reward,
            transactions: block.transactions.iter().map(StoredTransaction::from).collect(),
        }
    }
}

impl StoredBlock {
    fn into_block(self) -> Result<Block> {
        Ok(Block {
            id: BlockId(self.id),
            version: self.version,
            height: self.height,
            timestamp: self.timestamp,
            previous_block_id: self.previous_block_id.map(BlockId),
            generator_public_key: PublicKey(
                self.generator_public_key
                    .try_into()
                    .map_err(|_| anyhow!("stored generator key is not 32 bytes"))?,
            ),
            generator_signature: Signature(
                self.generator_signature
                    .try_into()
                    .map_err(|_| anyhow!("stored signature is not 64 bytes"))?,
            ),
            payload_hash: Hash256(
                self.payload_hash
                    .try_into()
                    .map_err(|_| anyhow!("stored payload hash is not 32 bytes"))?,
            ),
            payload_length: self.payload_length,
            number_of_transactions: self.number_of_transactions,
            total_amount: self.total_amount,
            total_fee: self.total_fee,
            reward: self.reward,
            transactions: self
                .transactions
                .into_iter()
                .map(StoredTransaction::into_transaction)
                .collect(),
        })
    }
}

impl From<&Transaction> for StoredTransaction {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id.0,
            tx_type: tx.tx_type,
            amount: tx.amount,
            fee: tx.fee,
            bytes: tx.bytes.clone(),
        }
    }
}

impl StoredTransaction {
    fn into_transaction(self) -> Transaction {
        Transaction {
            id: TxId(self.id),
            tx_type: self.tx_type,
            amount: self.amount,
            fee: self.fee,
            bytes: self.bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, FjallStore) {
        let dir = TempDir::new().unwrap();
        let store = FjallStore::open(dir.path().join("db")).unwrap();
        (dir, store)
    }

    fn block(id: u64, height: u64) -> Block {
        Block {
            id: BlockId(id),
            version: 2,
            height,
            timestamp: height as u32 * 10,
            previous_block_id: (height > 1).then_some(BlockId(id - 1)),
            total_amount: 100,
            total_fee: 3,
            reward: 500_000_000,
            number_of_transactions: 1,
            transactions: vec![Transaction {
                id: TxId(id * 1000),
                tx_type: 0,
                amount: 100,
                fee: 3,
                bytes: vec![1, 2, 3],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn commits_and_reads_back_by_id_and_height() {
        let (_dir, store) = store();
        let b = block(7, 3);
        store.commit_block(&b).unwrap();

        assert_eq!(store.get_block_by_id(BlockId(7)).unwrap(), Some(b.clone()));
        assert_eq!(store.get_block_by_height(3).unwrap(), Some(b));
        assert!(store.is_persisted(BlockId(7)).unwrap());
        assert!(!store.is_persisted(BlockId(8)).unwrap());
    }

    #[test]
    fn last_block_is_the_highest_height() {
        let (_dir, store) = store();
        for height in 1..=5 {
            store.commit_block(&block(height, height)).unwrap();
        }
        assert_eq!(store.get_last_block().unwrap().unwrap().height, 5);
    }

    #[test]
    fn range_scan_walks_heights_in_order() {
        let (_dir, store) = store();
        for height in 1..=5 {
            store.commit_block(&block(height, height)).unwrap();
        }
        let blocks = store.get_blocks_in_range(2, 4).unwrap();
        assert_eq!(blocks.iter().map(|b| b.height).collect::<Vec<_>>(), vec![2, 3, 4]);
        assert!(store.get_blocks_in_range(4, 2).is_err());
    }

    #[test]
    fn delete_removes_block_and_height_index() {
        let (_dir, store) = store();
        let b = block(7, 3);
        store.commit_block(&b).unwrap();
        store.delete_block(&b, false).unwrap();

        assert_eq!(store.get_block_by_id(BlockId(7)).unwrap(), None);
        assert_eq!(store.get_block_by_height(3).unwrap(), None);
        assert_eq!(store.get_temp_block(3).unwrap(), None);
    }

    #[test]
    fn delete_with_temp_retains_a_restorable_copy() {
        let (_dir, store) = store();
        let b = block(7, 3);
        store.commit_block(&b).unwrap();
        store.delete_block(&b, true).unwrap();

        assert_eq!(store.get_block_by_id(BlockId(7)).unwrap(), None);
        assert_eq!(store.get_temp_block(3).unwrap(), Some(b));

        store.delete_temp_block(3).unwrap();
        assert_eq!(store.get_temp_block(3).unwrap(), None);
    }

    #[test]
    fn highest_common_block_picks_the_max_known_height() {
        let (_dir, store) = store();
        for height in 1..=5 {
            store.commit_block(&block(height, height)).unwrap();
        }
        let found = store
            .highest_common_block(&[BlockId(2), BlockId(4), BlockId(99)])
            .unwrap()
            .unwrap();
        assert_eq!(found.height, 4);
        assert_eq!(store.highest_common_block(&[BlockId(99)]).unwrap(), None);
    }

    #[test]
    fn reset_derived_state_clears_temp_blocks() {
        let (_dir, store) = store();
        let b = block(7, 3);
        store.commit_block(&b).unwrap();
        store.delete_block(&b, true).unwrap();
        store.reset_derived_state().unwrap();
        assert_eq!(store.get_temp_block(3).unwrap(), None);
    }
}
