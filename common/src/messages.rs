//! Definition of Delos messages

use crate::types::*;
use crate::validation::ValidationStatus;

// Caryatid core messages
use caryatid_module_clock::messages::ClockTickMessage;

/// A block delivered by the network layer
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct BlockReceivedMessage {
    /// The block as deserialized from the wire
    pub block: Block,

    /// Arrival time, seconds since chain epoch start
    pub received_at: u32,
}

/// A block was applied and is the new chain tip
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct NewBlockMessage {
    pub block: Block,
}

/// A block should be rebroadcast to peers
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct BroadcastBlockMessage {
    pub block: Block,
}

/// Verification outcome for a proposed block
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BlockValidationMessage {
    pub block_id: BlockId,
    pub status: ValidationStatus,
}

/// A competing heavier chain was detected; the synchronization procedure
/// should take over
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct SyncRequiredMessage {
    /// The block that revealed the competing chain
    pub block: Block,
}

/// Chain-core messages
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum ChainMessage {
    BlockReceived(BlockReceivedMessage),   // Network handed us a block
    NewBlock(NewBlockMessage),             // Tip advanced
    BroadcastBlock(BroadcastBlockMessage), // Rebroadcast after local apply
    BlockValidation(BlockValidationMessage), // Verifier Go/NoGo
    SyncRequired(SyncRequiredMessage),     // Competing chain detected
}

// === Global message enum ===
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Message {
    None(()), // Just so we have a simple default

    // Generic messages, get of jail free cards
    String(String),          // Simple string
    JSON(serde_json::Value), // JSON object

    // Caryatid standard messages
    Clock(ClockTickMessage), // Clock tick

    // Chain messages
    Chain(ChainMessage),
}

impl Default for Message {
    fn default() -> Self {
        Self::None(())
    }
}

// Casts from specific messages
impl From<ClockTickMessage> for Message {
    fn from(msg: ClockTickMessage) -> Self {
        Message::Clock(msg)
    }
}

impl From<ChainMessage> for Message {
    fn from(msg: ChainMessage) -> Self {
        Message::Chain(msg)
    }
}

impl From<BlockReceivedMessage> for Message {
    fn from(msg: BlockReceivedMessage) -> Self {
        Message::Chain(ChainMessage::BlockReceived(msg))
    }
}

impl From<NewBlockMessage> for Message {
    fn from(msg: NewBlockMessage) -> Self {
        Message::Chain(ChainMessage::NewBlock(msg))
    }
}

impl From<BroadcastBlockMessage> for Message {
    fn from(msg: BroadcastBlockMessage) -> Self {
        Message::Chain(ChainMessage::BroadcastBlock(msg))
    }
}

impl From<BlockValidationMessage> for Message {
    fn from(msg: BlockValidationMessage) -> Self {
        Message::Chain(ChainMessage::BlockValidation(msg))
    }
}

impl From<SyncRequiredMessage> for Message {
    fn from(msg: SyncRequiredMessage) -> Self {
        Message::Chain(ChainMessage::SyncRequired(msg))
    }
}
