//! Crate error taxonomy.
//!
//! Only contract violations and persistence failures are errors. Illegal
//! game actions and duplicate submissions are logged outcomes instead.

use thiserror::Error;

use crate::config::ConfigError;
use crate::core::dice::DiceParseError;
use crate::core::rng::RngError;
use crate::game::ids::SceneId;
use crate::game::state::StateError;
use crate::log::LogError;
use crate::proof::commitment::CommitmentError;
use crate::proof::replay::ReplayError;

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A required collaborator was not supplied to the builder.
    #[error("missing dependency: {0}")]
    MissingDependency(&'static str),

    /// The log rejected or failed to store an entry; state was not advanced.
    #[error(transparent)]
    Log(#[from] LogError),

    /// Roll inputs were invalid.
    #[error(transparent)]
    Rng(#[from] RngError),

    /// Dice formula did not parse.
    #[error(transparent)]
    Dice(#[from] DiceParseError),

    /// Seed commitment problem.
    #[error(transparent)]
    Commitment(#[from] CommitmentError),

    /// Replay diverged or failed.
    #[error(transparent)]
    Replay(#[from] ReplayError),

    /// Bad configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Supplied state violates its invariants.
    #[error(transparent)]
    State(#[from] StateError),

    /// The scene is not open in the registry.
    #[error("scene {0} is not open")]
    SceneNotFound(SceneId),

    /// The scene is already open in the registry.
    #[error("scene {0} is already open")]
    SceneExists(SceneId),
}

/// Engine result alias.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;
