// Delos common library - main library exports

pub mod codec;
pub mod crypto;
pub mod messages;
pub mod params;
pub mod rewards;
pub mod slots;
pub mod types;
pub mod validation;

// Flattened re-exports
pub use self::params::{ChainParams, Exceptions};
pub use self::rewards::RewardSchedule;
pub use self::slots::SlotCalculator;
pub use self::types::*;
pub use self::validation::{ValidationStatus, VerificationError, VerifyResult};
