//! Fork-choice rule
//!
//! A pure classifier over (tip, received block, receipt times) producing one
//! of five mutually exclusive outcomes, evaluated in precedence order: a
//! legitimate extension is cheap to verify and short-circuits before the
//! tie-break arithmetic, and double-forging detection guards against one
//! producer flooding two conflicting blocks at a height.

use delos_common::{Block, BlockReceipt, SlotCalculator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkChoice {
    /// Same block as the tip; already processed
    Identical,

    /// Chains directly onto the tip; apply immediately
    ValidExtension,

    /// Same producer forged a second block at the tip's height; the
    /// earlier-received block (our tip) wins
    DoubleForging,

    /// Double forging where the received block's slot is earlier and it
    /// arrived punctually while the tip did not; roll the tip back and
    /// apply the received block
    TieBreak,

    /// A competing heavier chain; synchronization takes over
    DifferentChain,

    /// Nothing to do
    Discard,
}

/// Classify a received block against the current tip.
///
/// `tip_receipt` is the receipt of the most recently applied block, if any;
/// without one the tip is assumed to have arrived within its own slot. The
/// slot/receipt comparator is inherited protocol behaviour and preserved as
/// documented, clock skew and all.
pub fn classify(
    tip: &Block,
    tip_receipt: Option<&BlockReceipt>,
    block: &Block,
    received_at: u32,
    slots: &SlotCalculator,
) -> ForkChoice {
    if block.id == tip.id {
        return ForkChoice::Identical;
    }

    if block.previous_block_id == Some(tip.id) && block.height == tip.height + 1 {
        return ForkChoice::ValidExtension;
    }

    // Generator identity is the sole double-forging discriminant; height
    // alone never is
    if block.height == tip.height && block.same_generator(tip) {
        let block_slot = slots.slot_number(block.timestamp);
        let tip_slot = slots.slot_number(tip.timestamp);
        let block_punctual = slots.is_within_slot(block_slot, received_at);
        let tip_punctual = tip_receipt
            .filter(|receipt| receipt.id == tip.id)
            .map(|receipt| slots.is_within_slot(tip_slot, receipt.received_at))
            .unwrap_or(true);

        if block_slot < tip_slot && block_punctual && !tip_punctual {
            return ForkChoice::TieBreak;
        }
        return ForkChoice::DoubleForging;
    }

    if block.height > tip.height || (block.height == tip.height && !block.same_generator(tip)) {
        return ForkChoice::DifferentChain;
    }

    ForkChoice::Discard
}
