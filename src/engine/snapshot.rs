//! Primitive scene projections for change detection.
//!
//! Observers are only notified when the projection differs by field
//! equality from the previous one, never on reference identity. Rejected
//! inputs and duplicate notices leave the projection unchanged, so they
//! never echo back out as updates.

use serde::{Deserialize, Serialize};

use crate::game::state::SceneState;

/// Flat, comparable summary of a scene.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneDigest {
    /// Scene id.
    pub scene_id: String,
    /// Combat round, 0 outside combat.
    pub round: u32,
    /// Initiative index.
    pub turn_index: usize,
    /// Whose turn it is.
    pub active_actor: Option<String>,
    /// Participant count.
    pub participants: usize,
    /// Sum of all wounds.
    pub total_wounds: u64,
    /// Hex state hash.
    pub state_hash: String,
}

impl SceneDigest {
    /// Project a state.
    pub fn of(state: &SceneState) -> Self {
        Self {
            scene_id: state.id.to_string(),
            round: state.round,
            turn_index: state.turn_index,
            active_actor: state.active_actor().map(ToString::to_string),
            participants: state.participants.len(),
            total_wounds: state.wounds.values().map(|w| u64::from(*w)).sum(),
            state_hash: state.compute_hash().to_hex(),
        }
    }
}

/// Remembers the last published digest.
#[derive(Clone, Debug, Default)]
pub struct DigestTracker {
    previous: Option<SceneDigest>,
}

impl DigestTracker {
    /// Tracker with nothing published yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `state`; returns the new digest only if it changed.
    pub fn observe(&mut self, state: &SceneState) -> Option<SceneDigest> {
        let digest = SceneDigest::of(state);
        if self.previous.as_ref() == Some(&digest) {
            return None;
        }
        self.previous = Some(digest.clone());
        Some(digest)
    }

    /// Last published digest.
    pub fn previous(&self) -> Option<&SceneDigest> {
        self.previous.as_ref()
    }
}
