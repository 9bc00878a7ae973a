//! Player Intents
//!
//! A player's requested action, not yet validated or applied. Intents arrive
//! from the conversational front end already parsed into one of these
//! variants; legality is decided by the reducer.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::game::ids::{ActorId, IdempotencyKey};

/// Square on the battle grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GridPos {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
}

impl GridPos {
    /// Create a grid position.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Abstract distance band for theatre-of-the-mind play.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RangeBand {
    /// In melee.
    Engaged = 0,
    /// A few steps away.
    Near = 1,
    /// Across the room.
    Far = 2,
    /// Barely in view.
    Distant = 3,
}

/// Where a move intent goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Destination {
    /// Concrete grid square.
    Grid(GridPos),
    /// Abstract range band.
    Band {
        /// Target band.
        band: RangeBand,
    },
}

/// What the player is trying to do.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntentKind {
    /// Move to a destination.
    Move {
        /// Destination.
        to: Destination,
    },
    /// Attack a participant.
    Attack {
        /// Who is attacked.
        target: ActorId,
        /// Weapon, if named.
        weapon: Option<String>,
    },
    /// Attempt a skill.
    SkillCheck {
        /// Skill tag, e.g. `stealth`.
        skill: String,
        /// Free-text approach.
        approach: Option<String>,
    },
    /// Cast a spell.
    Cast {
        /// Spell identifier.
        spell: String,
        /// Slot level, if a leveled spell.
        slot_level: Option<u8>,
    },
    /// Out-of-character table talk.
    #[serde(rename = "ooc")]
    OutOfCharacter {
        /// Message text.
        text: String,
    },
}

impl IntentKind {
    /// Stable variant tag, used in hashing and log lines.
    pub fn tag(&self) -> &'static str {
        match self {
            IntentKind::Move { .. } => "move",
            IntentKind::Attack { .. } => "attack",
            IntentKind::SkillCheck { .. } => "skill_check",
            IntentKind::Cast { .. } => "cast",
            IntentKind::OutOfCharacter { .. } => "ooc",
        }
    }

    /// Whether this intent acts on the shared scene and therefore needs the turn.
    pub fn needs_turn(&self) -> bool {
        !matches!(self, IntentKind::OutOfCharacter { .. })
    }
}

/// A player-submitted request to act.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    /// Acting participant.
    pub actor: ActorId,
    /// Client-generated key; resubmission with the same key is a no-op.
    pub idempotency_key: IdempotencyKey,
    /// Taken inside a reaction window rather than on the actor's turn.
    #[serde(default)]
    pub reaction: bool,
    /// The requested action.
    #[serde(flatten)]
    pub kind: IntentKind,
}

impl Intent {
    /// Create an on-turn intent.
    pub fn new(actor: impl Into<ActorId>, key: impl Into<IdempotencyKey>, kind: IntentKind) -> Self {
        Self {
            actor: actor.into(),
            idempotency_key: key.into(),
            reaction: false,
            kind,
        }
    }

    /// Mark this intent as a reaction.
    pub fn as_reaction(mut self) -> Self {
        self.reaction = true;
        self
    }

    /// Move to a grid square.
    pub fn move_to(actor: &str, key: &str, x: i32, y: i32) -> Self {
        Self::new(actor, key, IntentKind::Move {
            to: Destination::Grid(GridPos::new(x, y)),
        })
    }

    /// Attack a target.
    pub fn attack(actor: &str, key: &str, target: &str) -> Self {
        Self::new(actor, key, IntentKind::Attack {
            target: ActorId::from(target),
            weapon: None,
        })
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}[{}]", self.actor, self.kind.tag(), self.idempotency_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_json_shape() {
        let intent = Intent::move_to("pc1", "k1", 1, 1);
        let json = serde_json::to_value(&intent).unwrap();
        assert_eq!(json["type"], "move");
        assert_eq!(json["actor"], "pc1");
        assert_eq!(json["idempotency_key"], "k1");
        assert_eq!(json["to"]["type"], "grid");
        assert_eq!(json["to"]["x"], 1);

        let back: Intent = serde_json::from_value(json).unwrap();
        assert_eq!(back, intent);
    }

    #[test]
    fn test_reaction_defaults_false() {
        let json = r#"{"actor":"pc1","idempotency_key":"k","type":"ooc","text":"brb"}"#;
        let intent: Intent = serde_json::from_str(json).unwrap();
        assert!(!intent.reaction);
        assert!(!intent.kind.needs_turn());
    }

    #[test]
    fn test_wire_type_matches_tag() {
        let kinds = [
            Intent::move_to("pc1", "k", 0, 0).kind,
            Intent::attack("pc1", "k", "npc1").kind,
            IntentKind::SkillCheck {
                skill: "stealth".into(),
                approach: None,
            },
            IntentKind::Cast {
                spell: "shield".into(),
                slot_level: Some(1),
            },
            IntentKind::OutOfCharacter { text: "brb".into() },
        ];
        for kind in kinds {
            let json = serde_json::to_value(&kind).unwrap();
            assert_eq!(json["type"], kind.tag());
        }
    }

    #[test]
    fn test_display() {
        let intent = Intent::attack("pc1", "k9", "npc1").as_reaction();
        assert_eq!(intent.to_string(), "pc1:attack[k9]");
        assert!(intent.reaction);
    }
}
