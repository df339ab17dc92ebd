//! Common cryptography helper functions for Delos

use anyhow::{anyhow, Result};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::codec;
use crate::types::{Block, PublicKey, Signature};

/// SHA-256 digest of a byte slice
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Public key for a signing key
pub fn public_key(key: &SigningKey) -> PublicKey {
    PublicKey(key.verifying_key().to_bytes())
}

/// Sign a block header: Ed25519 over the SHA-256 of the signing bytes
pub fn sign_block(key: &SigningKey, block: &Block) -> Signature {
    let digest = sha256(&codec::signing_bytes(block));
    Signature(key.sign(&digest).to_bytes())
}

/// Verify a block's generator signature against its header fields.
///
/// Returns `Ok(false)` for a well-formed but wrong signature and `Err` when
/// the public key itself cannot be interpreted.
pub fn verify_block_signature(block: &Block) -> Result<bool> {
    let verifying_key = VerifyingKey::from_bytes(&block.generator_public_key.0)
        .map_err(|e| anyhow!("malformed generator public key: {e}"))?;
    let signature = ed25519_dalek::Signature::from_bytes(&block.generator_signature.0);
    let digest = sha256(&codec::signing_bytes(block));
    Ok(verifying_key.verify_strict(&digest, &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Block, BlockId};

    fn signed_block(seed: u8) -> Block {
        let key = SigningKey::from_bytes(&[seed; 32]);
        let mut block = Block {
            version: 2,
            height: 2,
            timestamp: 50,
            previous_block_id: Some(BlockId(1)),
            generator_public_key: public_key(&key),
            ..Default::default()
        };
        block.generator_signature = sign_block(&key, &block);
        block.id = codec::block_id(&block);
        block
    }

    #[test]
    fn valid_signature_verifies() {
        assert!(verify_block_signature(&signed_block(3)).unwrap());
    }

    #[test]
    fn tampered_header_fails_verification() {
        let mut block = signed_block(3);
        block.total_amount += 1;
        assert!(!verify_block_signature(&block).unwrap());
    }

    #[test]
    fn foreign_signature_fails_verification() {
        let mut block = signed_block(3);
        block.generator_signature = signed_block(4).generator_signature;
        assert!(!verify_block_signature(&block).unwrap());
    }
}
