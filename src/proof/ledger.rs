//! Roll Ledger
//!
//! Every die roll is recorded with its full inputs so anyone holding the
//! revealed server seed can recompute it. Nonces strictly increase per
//! (scene, actor); a reused nonce would let a roll be replayed for a
//! different purpose.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::core::hash::StateHash;
use crate::core::rng::RngError;
use crate::game::ids::{ActorId, SceneId};

/// Full audit record for one die.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollRecord {
    /// `{scene}:{actor}:{nonce}`.
    pub roll_id: String,
    /// Scene rolled in.
    pub scene_id: SceneId,
    /// Who rolled.
    pub actor: ActorId,
    /// Public client seed.
    pub client_seed: String,
    /// Per-actor counter.
    pub nonce: u64,
    /// Die size.
    pub sides: u32,
    /// Face value.
    pub value: u32,
    /// Hex HMAC digest.
    pub proof: String,
    /// Provider that produced the roll.
    pub provider: String,
    /// Commitment to the scene's server seed.
    pub commitment_hash: StateHash,
}

impl RollRecord {
    /// Canonical roll id.
    pub fn make_id(scene: &SceneId, actor: &ActorId, nonce: u64) -> String {
        format!("{scene}:{actor}:{nonce}")
    }
}

#[derive(Debug, Default)]
struct SceneRolls {
    records: Vec<RollRecord>,
    last_nonce: BTreeMap<ActorId, u64>,
}

/// Thread-safe roll store.
#[derive(Debug, Default)]
pub struct RollLedger {
    scenes: Mutex<BTreeMap<SceneId, SceneRolls>>,
}

impl RollLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    fn scenes(&self) -> MutexGuard<'_, BTreeMap<SceneId, SceneRolls>> {
        self.scenes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Next unused nonce for `actor`.
    pub fn next_nonce(&self, scene: &SceneId, actor: &ActorId) -> u64 {
        self.scenes()
            .get(scene)
            .and_then(|s| s.last_nonce.get(actor))
            .map_or(0, |last| last + 1)
    }

    /// Store a record.
    ///
    /// # Errors
    ///
    /// [`RngError::NonceReuse`] if the nonce does not exceed the actor's last.
    pub fn record(&self, record: RollRecord) -> Result<(), RngError> {
        let mut scenes = self.scenes();
        let rolls = scenes.entry(record.scene_id.clone()).or_default();

        if let Some(&last) = rolls.last_nonce.get(&record.actor) {
            if record.nonce <= last {
                return Err(RngError::NonceReuse {
                    actor: record.actor.to_string(),
                    nonce: record.nonce,
                    last,
                });
            }
        }
        rolls.last_nonce.insert(record.actor.clone(), record.nonce);
        rolls.records.push(record);
        Ok(())
    }

    /// All rolls in a scene, in roll order.
    pub fn for_scene(&self, scene: &SceneId) -> Vec<RollRecord> {
        self.scenes()
            .get(scene)
            .map(|s| s.records.clone())
            .unwrap_or_default()
    }

    /// Look up one roll.
    pub fn get(&self, scene: &SceneId, roll_id: &str) -> Option<RollRecord> {
        self.scenes()
            .get(scene)?
            .records
            .iter()
            .find(|r| r.roll_id == roll_id)
            .cloned()
    }

    /// Drop a closed scene's rolls.
    pub fn forget_scene(&self, scene: &SceneId) {
        self.scenes().remove(scene);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(actor: &str, nonce: u64) -> RollRecord {
        let scene = SceneId::from("scene-1");
        let actor = ActorId::from(actor);
        RollRecord {
            roll_id: RollRecord::make_id(&scene, &actor, nonce),
            scene_id: scene,
            actor,
            client_seed: "client".into(),
            nonce,
            sides: 20,
            value: 11,
            proof: "00".into(),
            provider: "hmac-sha256".into(),
            commitment_hash: StateHash::ZERO,
        }
    }

    #[test]
    fn test_nonces_per_actor() {
        let ledger = RollLedger::new();
        let scene = SceneId::from("scene-1");
        let pc1 = ActorId::from("pc1");

        assert_eq!(ledger.next_nonce(&scene, &pc1), 0);
        ledger.record(record("pc1", 0)).unwrap();
        ledger.record(record("pc1", 1)).unwrap();
        assert_eq!(ledger.next_nonce(&scene, &pc1), 2);
        assert_eq!(ledger.next_nonce(&scene, &ActorId::from("npc1")), 0);
    }

    #[test]
    fn test_nonce_reuse_rejected() {
        let ledger = RollLedger::new();
        ledger.record(record("pc1", 3)).unwrap();
        let err = ledger.record(record("pc1", 3)).unwrap_err();
        assert_eq!(err, RngError::NonceReuse {
            actor: "pc1".into(),
            nonce: 3,
            last: 3,
        });
        assert_eq!(ledger.for_scene(&SceneId::from("scene-1")).len(), 1);
    }

    #[test]
    fn test_lookup_and_forget() {
        let ledger = RollLedger::new();
        let scene = SceneId::from("scene-1");
        ledger.record(record("pc1", 0)).unwrap();

        assert!(ledger.get(&scene, "scene-1:pc1:0").is_some());
        assert!(ledger.get(&scene, "scene-1:pc1:1").is_none());

        ledger.forget_scene(&scene);
        assert!(ledger.for_scene(&scene).is_empty());
    }
}
