//! Core type definitions for Delos

use std::fmt;

use serde::de::Error as _;

/// Block identifier.
///
/// Derived from the first eight bytes (reversed) of the SHA-256 digest of the
/// canonical signed header bytes, read as an unsigned 64-bit integer. Stable
/// once computed; a block whose id does not match re-derivation is invalid.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct BlockId(pub u64);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction identifier, same derivation as [`BlockId`] over the
/// transaction's canonical bytes.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct TxId(pub u64);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ed25519 public key of a block producer
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; 32]);

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl serde::Serialize for PublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> serde::Deserialize<'de> for PublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(D::Error::custom)?;
        let bytes: [u8; 32] =
            bytes.try_into().map_err(|_| D::Error::custom("expected 32 bytes"))?;
        Ok(Self(bytes))
    }
}

/// Ed25519 signature over the canonical header bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl Default for Signature {
    fn default() -> Self {
        Self([0; 64])
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl serde::Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> serde::Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(D::Error::custom)?;
        let bytes: [u8; 64] =
            bytes.try_into().map_err(|_| D::Error::custom("expected 64 bytes"))?;
        Ok(Self(bytes))
    }
}

/// SHA-256 digest (payload hashes)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash256(pub [u8; 32]);

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl serde::Serialize for Hash256 {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> serde::Deserialize<'de> for Hash256 {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(D::Error::custom)?;
        let bytes: [u8; 32] =
            bytes.try_into().map_err(|_| D::Error::custom("expected 32 bytes"))?;
        Ok(Self(bytes))
    }
}

/// A transaction as seen by the chain core.
///
/// Opaque beyond id, type, fee and amount; semantic apply/undo/verify is
/// delegated to the transaction pipeline. `bytes` is the canonical serialized
/// form produced at the interface-adapter boundary, used for payload hashing.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Transaction {
    /// Transaction id
    pub id: TxId,

    /// Transaction type tag
    pub tx_type: u8,

    /// Transferred amount
    pub amount: u64,

    /// Fee paid
    pub fee: u64,

    /// Canonical serialized bytes
    pub bytes: Vec<u8>,
}

/// A block header plus its ordered transaction set.
///
/// Timestamps are seconds since the chain epoch start, not unix time.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    /// Block id, derived from the canonical signed header bytes
    pub id: BlockId,

    /// Protocol-era version tag; selects the processing pipeline
    pub version: u32,

    /// Height; 1 is the genesis block
    pub height: u64,

    /// Seconds since chain epoch start; must map to a valid slot
    pub timestamp: u32,

    /// Parent block id; `None` only at height 1
    pub previous_block_id: Option<BlockId>,

    /// Producer identity
    pub generator_public_key: PublicKey,

    /// Signature over all other header fields
    pub generator_signature: Signature,

    /// Digest over the concatenated transaction bytes
    pub payload_hash: Hash256,

    /// Total byte length of the transaction payload
    pub payload_length: u32,

    /// Declared transaction count; must equal `transactions.len()`
    pub number_of_transactions: u32,

    /// Aggregate transferred amount
    pub total_amount: u64,

    /// Aggregate fees
    pub total_fee: u64,

    /// Block reward; must match the reward schedule unless exempted
    pub reward: u64,

    /// Ordered transaction set (order is significant)
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Whether two blocks were produced by the same generator key
    pub fn same_generator(&self, other: &Block) -> bool {
        self.generator_public_key == other.generator_public_key
    }
}

/// Receipt of the most recently applied block, used to break timestamp ties
/// during fork choice. Overwritten on every successful apply.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlockReceipt {
    /// Id of the applied block
    pub id: BlockId,

    /// Arrival time, seconds since chain epoch start
    pub received_at: u32,
}
