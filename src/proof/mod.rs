//! Proof Module
//!
//! Everything needed to convince a third party that a scene was run fairly:
//!
//! - `commitment`: server seed commitment, reveal, and roll verification
//! - `ledger`: per-roll audit records with nonce discipline
//! - `replay`: golden fixtures, hash-chain checks, forensic log replay

pub mod commitment;
pub mod ledger;
pub mod replay;

// Re-export key types
pub use commitment::{verify_roll, verify_rolls, CommitmentError, SceneSeeds, SeedCommitment};
pub use ledger::{RollLedger, RollRecord};
pub use replay::{
    bless, replay, replay_log, verify_chain, verify_fixture, GoldenFixture, ReplayError, ReplayReport,
    ReplayStep,
};
