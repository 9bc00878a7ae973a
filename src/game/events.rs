//! DM Actions and Rules Events
//!
//! DM actions are narrator directives produced by the upstream narrative
//! layer. Rules events are system-derived facts; they are the only values
//! allowed to carry RNG output, and every roll points back at its
//! committed [`RollRecord`](crate::proof::ledger::RollRecord) by id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::ids::{ActorId, ClockId, HazardId};
use crate::game::state::{Hazard, SceneClock};

/// Narrator-originated directive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DmAction {
    /// Ask an actor for a check.
    CallForCheck {
        /// Who rolls.
        actor: ActorId,
        /// Skill tag.
        skill: String,
        /// Difficulty class.
        difficulty: u32,
        /// Why the check is called.
        reason: String,
    },
    /// Deal damage to a participant.
    ApplyDamage {
        /// Who takes the damage.
        target: ActorId,
        /// Hit points lost.
        amount: u32,
        /// What dealt it.
        source: String,
    },
    /// Tick a countdown clock.
    AdvanceClock {
        /// Clock to advance.
        clock: ClockId,
        /// Number of segments.
        ticks: u32,
        /// Why it advanced.
        reason: String,
    },
    /// Free narration.
    Narrate {
        /// Narrated text.
        text: String,
    },
    /// Begin combat with the given initiative order.
    StartEncounter {
        /// Turn order, first actor acts first.
        initiative: Vec<ActorId>,
    },
    /// Leave combat.
    EndEncounter,
    /// Register a new countdown clock.
    AddClock {
        /// The clock.
        clock: SceneClock,
    },
    /// Register an environmental hazard.
    AddHazard {
        /// The hazard.
        hazard: Hazard,
    },
    /// Remove an environmental hazard.
    RemoveHazard {
        /// Hazard to remove.
        hazard: HazardId,
    },
    /// Bring a new participant into the scene.
    AddParticipant {
        /// New participant.
        actor: ActorId,
    },
}

impl DmAction {
    /// Stable variant tag.
    pub fn tag(&self) -> &'static str {
        match self {
            DmAction::CallForCheck { .. } => "call_for_check",
            DmAction::ApplyDamage { .. } => "apply_damage",
            DmAction::AdvanceClock { .. } => "advance_clock",
            DmAction::Narrate { .. } => "narrate",
            DmAction::StartEncounter { .. } => "start_encounter",
            DmAction::EndEncounter => "end_encounter",
            DmAction::AddClock { .. } => "add_clock",
            DmAction::AddHazard { .. } => "add_hazard",
            DmAction::RemoveHazard { .. } => "remove_hazard",
            DmAction::AddParticipant { .. } => "add_participant",
        }
    }

    /// Convenience narration constructor.
    pub fn narrate(text: impl Into<String>) -> Self {
        DmAction::Narrate { text: text.into() }
    }
}

/// What a roll was for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollKind {
    /// Ability or skill check.
    Check,
    /// Saving throw.
    Save,
    /// Attack roll.
    Attack,
    /// Damage roll.
    Damage,
    /// Initiative roll.
    Initiative,
}

/// Advantage state of a roll.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Advantage {
    /// One die.
    #[default]
    Normal,
    /// Two dice, keep the higher.
    Advantage,
    /// Two dice, keep the lower.
    Disadvantage,
}

impl Advantage {
    /// Build from the pair of flags clients send. Both set cancel out.
    pub fn from_flags(advantage: bool, disadvantage: bool) -> Self {
        match (advantage, disadvantage) {
            (true, false) => Advantage::Advantage,
            (false, true) => Advantage::Disadvantage,
            _ => Advantage::Normal,
        }
    }

    /// Number of dice rolled.
    pub fn dice(self) -> usize {
        match self {
            Advantage::Normal => 1,
            Advantage::Advantage | Advantage::Disadvantage => 2,
        }
    }

    /// Whether `candidate` replaces `kept`. Ties keep the earlier die.
    pub fn prefers(self, candidate: u32, kept: u32) -> bool {
        match self {
            Advantage::Normal => false,
            Advantage::Advantage => candidate > kept,
            Advantage::Disadvantage => candidate < kept,
        }
    }
}

/// System-derived fact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RulesEvent {
    /// A committed die roll.
    Roll {
        /// Id of the backing roll record.
        roll_id: String,
        /// Who rolled.
        actor: ActorId,
        /// Purpose of the roll.
        kind: RollKind,
        /// Die size.
        sides: u32,
        /// Flat modifier.
        modifier: i32,
        /// Natural die value plus modifier.
        result: i64,
        /// Why the roll was made.
        rationale: Option<String>,
    },
    /// An actor's turn begins.
    TurnStart {
        /// Whose turn.
        actor: ActorId,
    },
    /// An actor's turn ends.
    TurnEnd {
        /// Whose turn.
        actor: ActorId,
    },
    /// A reaction window opened for an actor.
    ReactionWindowOpened {
        /// Who may react.
        actor: ActorId,
        /// What triggered it.
        reason: String,
        /// When the window closes.
        expires_at: DateTime<Utc>,
    },
}

impl RulesEvent {
    /// Stable variant tag.
    pub fn tag(&self) -> &'static str {
        match self {
            RulesEvent::Roll { .. } => "roll",
            RulesEvent::TurnStart { .. } => "turn_start",
            RulesEvent::TurnEnd { .. } => "turn_end",
            RulesEvent::ReactionWindowOpened { .. } => "reaction_window_opened",
        }
    }

    /// Actor the event concerns.
    pub fn actor(&self) -> &ActorId {
        match self {
            RulesEvent::Roll { actor, .. }
            | RulesEvent::TurnStart { actor }
            | RulesEvent::TurnEnd { actor }
            | RulesEvent::ReactionWindowOpened { actor, .. } => actor,
        }
    }
}
