//! Scene State Definitions
//!
//! The authoritative snapshot of one encounter. Uses BTreeSet/BTreeMap for
//! everything semantically unordered, so iteration (and therefore hashing)
//! is deterministic regardless of insertion order. `initiative` is the only
//! ordered collection, because turn order is meaningful.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::hash::{StateHash, StateHasher};
use crate::game::ids::{ActorId, ClockId, HazardId, LocationId, SceneId};
use crate::game::intent::{Destination, GridPos, RangeBand};

// =============================================================================
// CLOCKS AND HAZARDS
// =============================================================================

/// Named countdown clock ("the ritual completes", "guards arrive").
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneClock {
    /// Clock id.
    pub id: ClockId,
    /// Display name.
    pub name: String,
    /// Number of segments.
    pub max: u32,
    /// Filled segments, never above `max`.
    pub current: u32,
}

impl SceneClock {
    /// Create an empty clock.
    pub fn new(id: impl Into<ClockId>, name: impl Into<String>, max: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            max,
            current: 0,
        }
    }

    /// Whether every segment is filled.
    pub fn is_full(&self) -> bool {
        self.current >= self.max
    }
}

/// Environmental hazard present in the scene.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hazard {
    /// Hazard id.
    pub id: HazardId,
    /// Display name.
    pub name: String,
    /// Description for narration.
    pub description: String,
}

impl Hazard {
    /// Create a hazard.
    pub fn new(id: impl Into<HazardId>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Where a participant stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Position {
    /// Grid square.
    Grid(GridPos),
    /// Range band relative to the scene's focus.
    Band(RangeBand),
}

impl From<Destination> for Position {
    fn from(dest: Destination) -> Self {
        match dest {
            Destination::Grid(pos) => Position::Grid(pos),
            Destination::Band { band } => Position::Band(band),
        }
    }
}

// =============================================================================
// SCENE STATE
// =============================================================================

/// Violations of the scene state invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// `turn_index` does not point into a non-empty initiative.
    #[error("turn index {index} out of range for initiative of length {len}")]
    TurnIndexOutOfRange {
        /// Offending index.
        index: usize,
        /// Initiative length.
        len: usize,
    },

    /// Initiative names someone who is not a participant.
    #[error("initiative references non-participant {0}")]
    UnknownInitiativeActor(ActorId),

    /// A clock is filled beyond its maximum.
    #[error("clock {0} exceeds its maximum")]
    ClockOverflow(ClockId),

    /// Snapshot encoding failed.
    #[error("snapshot encoding failed: {0}")]
    Encoding(String),
}

/// Authoritative snapshot of one encounter.
///
/// Never mutated in place by the engine: reducers take `&SceneState` and
/// return a new value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneState {
    /// Scene id.
    pub id: SceneId,
    /// Current location.
    pub location: Option<LocationId>,
    /// Wall-clock instant the scene snapshot refers to.
    pub timestamp: DateTime<Utc>,
    /// Everyone present.
    pub participants: BTreeSet<ActorId>,
    /// Turn order; empty when not in combat.
    pub initiative: Vec<ActorId>,
    /// Index into `initiative` of the actor whose turn it is.
    pub turn_index: usize,
    /// Combat round, starting at 1 when an encounter begins.
    pub round: u32,
    /// Countdown clocks.
    pub clocks: BTreeMap<ClockId, SceneClock>,
    /// Environmental hazards.
    pub hazards: BTreeMap<HazardId, Hazard>,
    /// Per-scene seed string.
    pub seed: String,
    /// Known participant positions.
    pub positions: BTreeMap<ActorId, Position>,
    /// Accumulated damage per participant.
    pub wounds: BTreeMap<ActorId, u32>,
}

impl SceneState {
    /// Create an empty, out-of-combat scene.
    pub fn new(id: impl Into<SceneId>, seed: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            location: None,
            timestamp,
            participants: BTreeSet::new(),
            initiative: Vec::new(),
            turn_index: 0,
            round: 0,
            clocks: BTreeMap::new(),
            hazards: BTreeMap::new(),
            seed: seed.into(),
            positions: BTreeMap::new(),
            wounds: BTreeMap::new(),
        }
    }

    /// Add participants.
    pub fn with_participants<I, A>(mut self, actors: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<ActorId>,
    {
        self.participants.extend(actors.into_iter().map(Into::into));
        self
    }

    /// Set initiative order and start round 1.
    ///
    /// Every actor in the order is also added as a participant.
    pub fn with_initiative<I, A>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<ActorId>,
    {
        self.initiative = order.into_iter().map(Into::into).collect();
        self.participants.extend(self.initiative.iter().cloned());
        self.turn_index = 0;
        self.round = if self.initiative.is_empty() { 0 } else { 1 };
        self
    }

    /// Set the location.
    pub fn with_location(mut self, location: impl Into<LocationId>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Add a clock.
    pub fn with_clock(mut self, clock: SceneClock) -> Self {
        self.clocks.insert(clock.id.clone(), clock);
        self
    }

    /// Add a hazard.
    pub fn with_hazard(mut self, hazard: Hazard) -> Self {
        self.hazards.insert(hazard.id.clone(), hazard);
        self
    }

    /// Whether the scene is in turn-based combat.
    pub fn in_combat(&self) -> bool {
        !self.initiative.is_empty()
    }

    /// Actor whose turn it is, if in combat.
    pub fn active_actor(&self) -> Option<&ActorId> {
        self.initiative.get(self.turn_index)
    }

    /// Whether `actor` is present in the scene.
    pub fn is_participant(&self, actor: &ActorId) -> bool {
        self.participants.contains(actor)
    }

    /// Damage taken so far by `actor`.
    pub fn wounds_of(&self, actor: &ActorId) -> u32 {
        self.wounds.get(actor).copied().unwrap_or(0)
    }

    /// Participant standing on a grid square, if any.
    pub fn occupant_of(&self, pos: GridPos) -> Option<&ActorId> {
        self.positions
            .iter()
            .find(|(_, p)| **p == Position::Grid(pos))
            .map(|(actor, _)| actor)
    }

    /// Check the structural invariants.
    pub fn check_invariants(&self) -> Result<(), StateError> {
        if self.in_combat() && self.turn_index >= self.initiative.len() {
            return Err(StateError::TurnIndexOutOfRange {
                index: self.turn_index,
                len: self.initiative.len(),
            });
        }
        if !self.in_combat() && self.turn_index != 0 {
            return Err(StateError::TurnIndexOutOfRange {
                index: self.turn_index,
                len: 0,
            });
        }
        if let Some(stranger) = self.initiative.iter().find(|a| !self.participants.contains(*a)) {
            return Err(StateError::UnknownInitiativeActor(stranger.clone()));
        }
        if let Some(clock) = self.clocks.values().find(|c| c.current > c.max) {
            return Err(StateError::ClockOverflow(clock.id.clone()));
        }
        Ok(())
    }

    /// Canonical hash of the full state.
    ///
    /// Field order is fixed; sets and maps hash in key order, so two states
    /// with identical content hash identically across processes.
    pub fn compute_hash(&self) -> StateHash {
        let mut hasher = StateHasher::for_scene_state();

        hasher.update_str(self.id.as_str());
        hasher.update_opt_str(self.location.as_ref().map(|l| l.as_str()));
        hasher.update_i64(self.timestamp.timestamp_millis());

        hasher.update_len(self.participants.len());
        for actor in &self.participants {
            hasher.update_str(actor.as_str());
        }

        hasher.update_len(self.initiative.len());
        for actor in &self.initiative {
            hasher.update_str(actor.as_str());
        }
        hasher.update_u64(self.turn_index as u64);
        hasher.update_u32(self.round);

        hasher.update_len(self.clocks.len());
        for clock in self.clocks.values() {
            hasher.update_str(clock.id.as_str());
            hasher.update_str(&clock.name);
            hasher.update_u32(clock.max);
            hasher.update_u32(clock.current);
        }

        hasher.update_len(self.hazards.len());
        for hazard in self.hazards.values() {
            hasher.update_str(hazard.id.as_str());
            hasher.update_str(&hazard.name);
            hasher.update_str(&hazard.description);
        }

        hasher.update_str(&self.seed);

        hasher.update_len(self.positions.len());
        for (actor, position) in &self.positions {
            hasher.update_str(actor.as_str());
            match position {
                Position::Grid(pos) => {
                    hasher.update_u8(0);
                    hasher.update_i32(pos.x);
                    hasher.update_i32(pos.y);
                }
                Position::Band(band) => {
                    hasher.update_u8(1);
                    hasher.update_u8(*band as u8);
                }
            }
        }

        hasher.update_len(self.wounds.len());
        for (actor, wounds) in &self.wounds {
            hasher.update_str(actor.as_str());
            hasher.update_u32(*wounds);
        }

        hasher.finalize()
    }

    /// Compact binary snapshot.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StateError> {
        bincode::serialize(self).map_err(|e| StateError::Encoding(e.to_string()))
    }

    /// Restore a binary snapshot.
    pub fn from_bytes(data: &[u8]) -> Result<Self, StateError> {
        bincode::deserialize(data).map_err(|e| StateError::Encoding(e.to_string()))
    }
}

// =============================================================================
// TESTS
// =============================================================================
