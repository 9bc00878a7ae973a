//! Event Log Entries
//!
//! One entry per processed input, carrying the state hash before and after.
//! Entries for a scene form a hash chain: `before(n) == after(n - 1)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::hash::{StateHash, StateHasher};
use crate::game::events::{DmAction, RulesEvent};
use crate::game::ids::{ActorId, IdempotencyKey, SceneId};
use crate::game::intent::Intent;

/// Domain separator for entry ids.
const ENTRY_ID_DOMAIN: &[u8] = b"SCENE_ENGINE_ENTRY_ID_V1";

/// What was processed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogPayload {
    /// Player intent.
    Intent(Intent),
    /// Narrator directive.
    DmAction(DmAction),
    /// System-derived fact.
    RulesEvent(RulesEvent),
}

impl LogPayload {
    /// Short label for log lines, e.g. `intent:move`.
    pub fn label(&self) -> String {
        match self {
            LogPayload::Intent(i) => format!("intent:{}", i.kind.tag()),
            LogPayload::DmAction(a) => format!("dm:{}", a.tag()),
            LogPayload::RulesEvent(e) => format!("rules:{}", e.tag()),
        }
    }
}

/// How the input was handled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Accepted; state may have changed.
    Applied,
    /// Rejected by the rules; state unchanged.
    Advisory(String),
    /// Idempotency key already consumed; state unchanged.
    DuplicateIgnored {
        /// The repeated key.
        key: IdempotencyKey,
    },
}

impl Outcome {
    /// Whether the state could have changed.
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied)
    }

    /// Whether this records an ignored resubmission.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Outcome::DuplicateIgnored { .. })
    }
}

/// Append-only audit record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogEntry {
    /// Deterministic id derived from scene and sequence.
    pub id: Uuid,
    /// Owning scene.
    pub scene_id: SceneId,
    /// Position in the scene's chain, starting at 0.
    pub sequence: u64,
    /// Server-supplied time.
    pub timestamp: DateTime<Utc>,
    /// Submitting actor, when there is one.
    pub actor: Option<ActorId>,
    /// Key consumed by this entry. Duplicate notices carry none.
    pub idempotency_key: Option<IdempotencyKey>,
    /// The processed input.
    pub payload: LogPayload,
    /// Handling result.
    pub outcome: Outcome,
    /// Scene hash before processing.
    pub state_hash_before: StateHash,
    /// Scene hash after processing.
    pub state_hash_after: StateHash,
}

impl EventLogEntry {
    /// Whether state was left untouched.
    pub fn is_noop(&self) -> bool {
        self.state_hash_before == self.state_hash_after
    }
}

/// Deterministic entry id: first 16 bytes of a domain-separated hash of
/// `(scene, sequence)`.
pub fn entry_id(scene: &SceneId, sequence: u64) -> Uuid {
    let mut hasher = StateHasher::new(ENTRY_ID_DOMAIN);
    hasher.update_str(scene.as_str());
    hasher.update_u64(sequence);
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest.as_bytes()[..16]);
    Uuid::from_bytes(bytes)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_id_deterministic() {
        let scene = SceneId::from("scene-1");
        assert_eq!(entry_id(&scene, 3), entry_id(&scene, 3));
        assert_ne!(entry_id(&scene, 3), entry_id(&scene, 4));
        assert_ne!(entry_id(&scene, 3), entry_id(&SceneId::from("scene-2"), 3));
    }

    #[test]
    fn test_payload_json_shape() {
        let payload = LogPayload::Intent(Intent::move_to("pc1", "k1", 1, 1));
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["intent"]["type"], "move");
        assert_eq!(json["intent"]["idempotency_key"], "k1");
        assert_eq!(payload.label(), "intent:move");

        let back: LogPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_outcome_flags() {
        assert!(Outcome::Applied.is_applied());
        assert!(!Outcome::Advisory("no".into()).is_applied());
        assert!(Outcome::DuplicateIgnored {
            key: IdempotencyKey::from("k1")
        }
        .is_duplicate());
    }
}
