//! Canonical block header serialization
//!
//! The byte layout below is the legacy wire format used for signing, hashing
//! and id derivation. It is deterministic and order-sensitive: any change
//! breaks signature verification and id stability across the network.

use crate::crypto::sha256;
use crate::types::{Block, BlockId, Hash256, Transaction, TxId};

/// Canonical header bytes excluding the generator signature (signing input)
pub fn signing_bytes(block: &Block) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(4 + 4 + 8 + 4 + 8 + 8 + 8 + 4 + 32 + 32);
    bytes.extend_from_slice(&block.version.to_le_bytes());
    bytes.extend_from_slice(&block.timestamp.to_le_bytes());
    // Parent id in big-endian, zero when absent (genesis only)
    let previous = block.previous_block_id.map(|id| id.0).unwrap_or(0);
    bytes.extend_from_slice(&previous.to_be_bytes());
    bytes.extend_from_slice(&block.number_of_transactions.to_le_bytes());
    bytes.extend_from_slice(&block.total_amount.to_le_bytes());
    bytes.extend_from_slice(&block.total_fee.to_le_bytes());
    bytes.extend_from_slice(&block.reward.to_le_bytes());
    bytes.extend_from_slice(&block.payload_length.to_le_bytes());
    bytes.extend_from_slice(&block.payload_hash.0);
    bytes.extend_from_slice(&block.generator_public_key.0);
    bytes
}

/// Canonical header bytes including the signature (hashing/id input)
pub fn full_bytes(block: &Block) -> Vec<u8> {
    let mut bytes = signing_bytes(block);
    bytes.extend_from_slice(&block.generator_signature.0);
    bytes
}

/// Id from a SHA-256 digest: first eight bytes reversed, read big-endian
fn id_from_digest(digest: [u8; 32]) -> u64 {
    let mut first: [u8; 8] = digest[..8].try_into().expect("digest is 32 bytes");
    first.reverse();
    u64::from_be_bytes(first)
}

/// Derive the block id from the canonical signed header bytes
pub fn block_id(block: &Block) -> BlockId {
    BlockId(id_from_digest(sha256(&full_bytes(block))))
}

/// Derive a transaction id from its canonical bytes
pub fn tx_id(bytes: &[u8]) -> TxId {
    TxId(id_from_digest(sha256(bytes)))
}

/// Digest over the concatenated canonical transaction bytes
pub fn payload_hash(transactions: &[Transaction]) -> Hash256 {
    let mut payload = Vec::new();
    for tx in transactions {
        payload.extend_from_slice(&tx.bytes);
    }
    Hash256(sha256(&payload))
}

/// Total byte length of the transaction payload
pub fn payload_length(transactions: &[Transaction]) -> u32 {
    transactions.iter().map(|tx| tx.bytes.len() as u32).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PublicKey, Signature};

    fn block() -> Block {
        Block {
            id: BlockId(0),
            version: 2,
            height: 7,
            timestamp: 12345,
            previous_block_id: Some(BlockId(0xdead_beef)),
            generator_public_key: PublicKey([7; 32]),
            generator_signature: Signature([9; 64]),
            payload_hash: Hash256([1; 32]),
            payload_length: 0,
            number_of_transactions: 0,
            total_amount: 100,
            total_fee: 10,
            reward: 500_000_000,
            transactions: vec![],
        }
    }

    #[test]
    fn signing_bytes_have_fixed_layout() {
        let bytes = signing_bytes(&block());
        assert_eq!(bytes.len(), 4 + 4 + 8 + 4 + 8 + 8 + 8 + 4 + 32 + 32);
        // version LE at the front
        assert_eq!(&bytes[0..4], &2u32.to_le_bytes());
        // previous id BE after version and timestamp
        assert_eq!(&bytes[8..16], &0xdead_beefu64.to_be_bytes());
    }

    #[test]
    fn full_bytes_append_signature() {
        let b = block();
        let bytes = full_bytes(&b);
        assert_eq!(bytes.len(), signing_bytes(&b).len() + 64);
        assert_eq!(&bytes[bytes.len() - 64..], &b.generator_signature.0[..]);
    }

    #[test]
    fn id_is_stable_under_rederivation() {
        let b = block();
        assert_eq!(block_id(&b), block_id(&b.clone()));
    }

    #[test]
    fn id_changes_with_any_header_field() {
        let b = block();
        let mut other = b.clone();
        other.timestamp += 1;
        assert_ne!(block_id(&b), block_id(&other));

        let mut other = b.clone();
        other.reward += 1;
        assert_ne!(block_id(&b), block_id(&other));
    }

    #[test]
    fn genesis_previous_encodes_as_zero() {
        let mut b = block();
        b.previous_block_id = None;
        let bytes = signing_bytes(&b);
        assert_eq!(&bytes[8..16], &[0u8; 8]);
    }

    #[test]
    fn payload_hash_over_concatenated_bytes() {
        let txs = vec![
            Transaction {
                id: TxId(1),
                tx_type: 0,
                amount: 1,
                fee: 1,
                bytes: vec![1, 2, 3],
            },
            Transaction {
                id: TxId(2),
                tx_type: 0,
                amount: 1,
                fee: 1,
                bytes: vec![4, 5],
            },
        ];
        assert_eq!(payload_hash(&txs).0, sha256(&[1, 2, 3, 4, 5]));
        assert_eq!(payload_length(&txs), 5);
    }
}
