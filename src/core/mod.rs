//! Core deterministic primitives.
//!
//! Everything the engine needs to be replayable: canonical hashing,
//! committed randomness, dice formulas and injected time.

pub mod clock;
pub mod dice;
pub mod hash;
pub mod rng;

// Re-export core types
pub use clock::{Clock, FixedClock, LogicalClock, SystemClock};
pub use dice::{DiceFormula, DiceParseError};
pub use hash::{StateHash, StateHasher};
pub use rng::{hash_server_seed, roll, HmacRollProvider, RngError, RollOutcome, RollProvider, ServerSeed};
