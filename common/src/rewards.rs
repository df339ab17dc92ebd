//! Block reward schedule
//!
//! Piecewise milestone schedule: rewards start at `offset` and step down to
//! the next milestone every `distance` blocks, saturating at the last one.

use std::sync::Arc;

use config::Config;

const DEFAULT_MILESTONES: [u64; 5] =
    [500_000_000, 400_000_000, 300_000_000, 200_000_000, 100_000_000];
const DEFAULT_OFFSET: u64 = 1_451_520;
const DEFAULT_DISTANCE: u64 = 3_000_000;
const DEFAULT_INITIAL_SUPPLY: u64 = 10_000_000_000_000_000;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RewardSchedule {
    /// Reward per block within each milestone, in order
    pub milestones: Vec<u64>,

    /// Height at which rewards start
    pub offset: u64,

    /// Heights between milestone steps
    pub distance: u64,

    /// Token supply before any rewards
    pub initial_supply: u64,
}

impl Default for RewardSchedule {
    fn default() -> Self {
        Self {
            milestones: DEFAULT_MILESTONES.to_vec(),
            offset: DEFAULT_OFFSET,
            distance: DEFAULT_DISTANCE,
            initial_supply: DEFAULT_INITIAL_SUPPLY,
        }
    }
}

impl RewardSchedule {
    /// Read schedule parameters from module configuration
    pub fn from_config(config: &Arc<Config>) -> Self {
        let defaults = Self::default();
        Self {
            milestones: config
                .get::<Vec<u64>>("reward-milestones")
                .unwrap_or(defaults.milestones),
            offset: config
                .get_int("reward-offset")
                .map(|v| v as u64)
                .unwrap_or(defaults.offset),
            distance: config
                .get_int("reward-distance")
                .map(|v| v as u64)
                .unwrap_or(defaults.distance),
            initial_supply: config
                .get_int("initial-supply")
                .map(|v| v as u64)
                .unwrap_or(defaults.initial_supply),
        }
    }

    /// Milestone index active at `height`, saturating at the last milestone
    pub fn milestone(&self, height: u64) -> usize {
        if height < self.offset || self.milestones.is_empty() {
            return 0;
        }
        let location = ((height - self.offset) / self.distance) as usize;
        location.min(self.milestones.len() - 1)
    }

    /// Block reward at `height`; zero before the offset or with no
    /// milestones configured
    pub fn reward(&self, height: u64) -> u64 {
        if height < self.offset {
            0
        } else {
            self.milestones.get(self.milestone(height)).copied().unwrap_or(0)
        }
    }

    /// Total token supply at `height`: the initial supply plus every reward
    /// paid up to and including `height`
    pub fn supply(&self, height: u64) -> u64 {
        let mut supply = self.initial_supply;
        if height < self.offset || self.milestones.is_empty() {
            return supply;
        }

        let last = self.milestones.len() - 1;
        let mut remaining = height - self.offset + 1;
        for (index, milestone) in self.milestones.iter().enumerate() {
            let span = if index == last {
                remaining
            } else {
                remaining.min(self.distance)
            };
            supply += span * milestone;
            remaining -= span;
            if remaining == 0 {
                break;
            }
        }
        supply
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> RewardSchedule {
        RewardSchedule {
            milestones: vec![500_000_000, 400_000_000, 300_000_000, 200_000_000, 100_000_000],
            offset: 1_451_520,
            distance: 3_000_000,
            initial_supply: 10_000_000_000_000_000,
        }
    }

    #[test]
    fn no_reward_before_offset() {
        assert_eq!(schedule().reward(1), 0);
        assert_eq!(schedule().reward(1_451_519), 0);
    }

    #[test]
    fn first_reward_at_offset() {
        assert_eq!(schedule().reward(1_451_520), 500_000_000);
    }

    #[test]
    fn milestone_steps_every_distance() {
        let s = schedule();
        assert_eq!(s.milestone(1_451_520), 0);
        assert_eq!(s.milestone(1_451_520 + 3_000_000), 1);
        assert_eq!(s.milestone(1_451_520 + 4 * 3_000_000), 4);
    }

    #[test]
    fn milestone_saturates_at_last() {
        // Far beyond the schedule the last milestone still applies
        assert_eq!(schedule().milestone(1_345_152_000_000_000), 4);
        assert_eq!(schedule().reward(1_345_152_000_000_000), 100_000_000);
    }

    #[test]
    fn empty_milestone_list_pays_nothing() {
        let s = RewardSchedule {
            milestones: vec![],
            ..schedule()
        };
        assert_eq!(s.milestone(2_000_000), 0);
        assert_eq!(s.reward(2_000_000), 0);
        assert_eq!(s.supply(2_000_000), s.initial_supply);
    }

    #[test]
    fn supply_before_offset_is_initial() {
        let s = schedule();
        assert_eq!(s.supply(100), s.initial_supply);
    }

    #[test]
    fn supply_at_offset_includes_one_reward() {
        let s = schedule();
        assert_eq!(s.supply(1_451_520), s.initial_supply + 500_000_000);
    }

    #[test]
    fn supply_across_milestone_boundary() {
        let s = schedule();
        // One full milestone span plus one block of the next
        let height = s.offset + s.distance;
        let expected = s.initial_supply + s.distance * 500_000_000 + 400_000_000;
        assert_eq!(s.supply(height), expected);
    }
}
