//! Identifier newtypes.
//!
//! All identifiers are strings supplied by the surrounding application.
//! They implement `Ord` so that every map keyed by them iterates in a
//! deterministic order.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create from anything string-like.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Scene (encounter) identifier.
    SceneId
);
string_id!(
    /// Participant identifier (player character or NPC).
    ActorId
);
string_id!(
    /// Countdown clock identifier.
    ClockId
);
string_id!(
    /// Environmental hazard identifier.
    HazardId
);
string_id!(
    /// Location reference.
    LocationId
);
string_id!(
    /// Client-generated token making a logical action apply at most once.
    IdempotencyKey
);

impl SceneId {
    /// Fresh random scene id (UUID v4). Never used inside replays.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_actor_id_ordering() {
        let ids: BTreeSet<ActorId> = ["npc1", "pc1", "npc0"].into_iter().map(ActorId::from).collect();
        let ordered: Vec<&str> = ids.iter().map(|a| a.as_str()).collect();
        assert_eq!(ordered, vec!["npc0", "npc1", "pc1"]);
    }

    #[test]
    fn test_transparent_serde() {
        let id = ActorId::new("pc1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"pc1\"");
        assert_eq!(id.to_string(), "pc1");
    }

    #[test]
    fn test_generated_scene_ids_unique() {
        assert_ne!(SceneId::generate(), SceneId::generate());
    }
}
