//! Slot and round arithmetic
//!
//! Maps wall-clock time onto the chain's discrete slots: one producer is
//! entitled to forge per slot, and `active_delegates` consecutive heights
//! form a round.

use crate::params::ChainParams;

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct SlotCalculator {
    /// Unix time of slot 0
    pub epoch_time: u64,

    /// Seconds per slot
    pub interval: u32,

    /// Heights per delegate round
    pub active_delegates: u64,
}

impl SlotCalculator {
    pub fn new(params: &ChainParams) -> Self {
        Self {
            epoch_time: params.epoch_time,
            interval: params.slot_interval,
            active_delegates: params.active_delegates,
        }
    }

    /// Seconds since the chain epoch start for a unix time
    pub fn epoch_time(&self, unix: u64) -> u32 {
        unix.saturating_sub(self.epoch_time) as u32
    }

    /// Unix time for an epoch-relative time
    pub fn real_time(&self, epoch_time: u32) -> u64 {
        self.epoch_time + epoch_time as u64
    }

    /// Slot containing an epoch-relative time
    pub fn slot_number(&self, epoch_time: u32) -> u32 {
        epoch_time / self.interval
    }

    /// Epoch-relative start time of a slot
    pub fn slot_time(&self, slot: u32) -> u32 {
        slot * self.interval
    }

    /// Slot containing the current unix time
    pub fn current_slot(&self, now_unix: u64) -> u32 {
        self.slot_number(self.epoch_time(now_unix))
    }

    /// Whether an epoch-relative time falls inside the given slot
    pub fn is_within_slot(&self, slot: u32, epoch_time: u32) -> bool {
        self.slot_number(epoch_time) == slot
    }

    /// Delegate round containing a height (rounds are 1-based)
    pub fn round(&self, height: u64) -> u64 {
        height.div_ceil(self.active_delegates)
    }
}
