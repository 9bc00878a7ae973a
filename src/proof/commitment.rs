//! Scene Seed Commitment Protocol
//!
//! Commit to a scene's server seed before the first roll.
//! Reveal at scene close so every roll can be recomputed and checked.
//!
//! ```text
//!   open scene ──▶ publish H(seed) ──▶ rolls ... ──▶ close ──▶ reveal seed
//!                                                              │
//!          verify_roll(provider, seed, record) ◀──────────────┘
//! ```
//!
//! Verification goes through the same [`RollProvider`] that produced the
//! roll, so a swapped-in provider verifies its own outcomes.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::core::hash::StateHash;
use crate::core::rng::{hash_server_seed, RngError, RollOutcome, RollProvider, ServerSeed};
use crate::game::ids::SceneId;
use crate::proof::ledger::RollRecord;

/// Published commitment to a scene's server seed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedCommitment {
    /// Scene the seed belongs to.
    pub scene_id: SceneId,
    /// `hash_server_seed(seed)`.
    pub commitment_hash: StateHash,
}

impl SeedCommitment {
    /// Commit to `seed`.
    pub fn new(scene_id: SceneId, seed: &ServerSeed) -> Self {
        Self {
            scene_id,
            commitment_hash: hash_server_seed(seed),
        }
    }

    /// Whether a revealed seed matches.
    pub fn matches(&self, seed: &ServerSeed) -> bool {
        hash_server_seed(seed) == self.commitment_hash
    }
}

/// Errors from commitment bookkeeping and roll verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitmentError {
    /// No seed is held for the scene.
    #[error("no server seed for scene {0}")]
    UnknownScene(SceneId),

    /// The scene already has a seed.
    #[error("scene {0} already has a server seed")]
    AlreadyCommitted(SceneId),

    /// The seed was revealed and may no longer be used for rolls.
    #[error("server seed for scene {0} already revealed")]
    AlreadyRevealed(SceneId),

    /// The revealed seed does not hash to the record's commitment.
    #[error("revealed seed does not match commitment for roll {roll_id}")]
    CommitmentMismatch {
        /// Roll checked.
        roll_id: String,
    },

    /// The roll was produced by a different provider than the verifier.
    #[error("roll {roll_id} came from provider {recorded}, verifier is {verifier}")]
    ProviderMismatch {
        /// Roll checked.
        roll_id: String,
        /// Provider named in the record.
        recorded: String,
        /// Provider doing the check.
        verifier: String,
    },

    /// The provider rejected the recorded value or proof.
    #[error("roll {roll_id} does not verify (recorded {recorded})")]
    RollMismatch {
        /// Roll checked.
        roll_id: String,
        /// Value in the record.
        recorded: u32,
    },

    /// Roll inputs were invalid.
    #[error(transparent)]
    Rng(#[from] RngError),
}

#[derive(Debug)]
struct SeedSlot {
    seed: ServerSeed,
    revealed: bool,
}

/// Per-scene server seed vault.
///
/// Seeds never leave the vault until [`SceneSeeds::reveal`].
#[derive(Debug, Default)]
pub struct SceneSeeds {
    slots: Mutex<BTreeMap<SceneId, SeedSlot>>,
}

impl SceneSeeds {
    /// Create an empty vault.
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, BTreeMap<SceneId, SeedSlot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store a seed and return its commitment.
    pub fn commit(&self, scene: &SceneId, seed: ServerSeed) -> Result<SeedCommitment, CommitmentError> {
        let mut slots = self.slots();
        if slots.contains_key(scene) {
            return Err(CommitmentError::AlreadyCommitted(scene.clone()));
        }
        let commitment = SeedCommitment::new(scene.clone(), &seed);
        info!(scene = %scene, commitment = %commitment.commitment_hash.short(), "server seed committed");
        slots.insert(scene.clone(), SeedSlot {
            seed,
            revealed: false,
        });
        Ok(commitment)
    }

    /// Published commitment for a scene.
    pub fn commitment(&self, scene: &SceneId) -> Option<SeedCommitment> {
        self.slots()
            .get(scene)
            .map(|slot| SeedCommitment::new(scene.clone(), &slot.seed))
    }

    /// Seed for rolling. Fails once revealed.
    pub(crate) fn seed_for_roll(&self, scene: &SceneId) -> Result<ServerSeed, CommitmentError> {
        match self.slots().get(scene) {
            None => Err(CommitmentError::UnknownScene(scene.clone())),
            Some(slot) if slot.revealed => Err(CommitmentError::AlreadyRevealed(scene.clone())),
            Some(slot) => Ok(slot.seed.clone()),
        }
    }

    /// Reveal the seed. Further rolls in the scene are refused.
    pub fn reveal(&self, scene: &SceneId) -> Result<ServerSeed, CommitmentError> {
        let mut slots = self.slots();
        let slot = slots
            .get_mut(scene)
            .ok_or_else(|| CommitmentError::UnknownScene(scene.clone()))?;
        slot.revealed = true;
        info!(scene = %scene, "server seed revealed");
        Ok(slot.seed.clone())
    }

    /// Drop a scene's seed.
    pub fn forget_scene(&self, scene: &SceneId) {
        self.slots().remove(scene);
    }
}

/// Check one roll against a revealed seed with the provider that made it.
pub fn verify_roll(
    provider: &dyn RollProvider,
    seed: &ServerSeed,
    record: &RollRecord,
) -> Result<(), CommitmentError> {
    if hash_server_seed(seed) != record.commitment_hash {
        return Err(CommitmentError::CommitmentMismatch {
            roll_id: record.roll_id.clone(),
        });
    }
    if record.provider != provider.name() {
        return Err(CommitmentError::ProviderMismatch {
            roll_id: record.roll_id.clone(),
            recorded: record.provider.clone(),
            verifier: provider.name().to_owned(),
        });
    }

    let outcome = RollOutcome {
        value: record.value,
        proof: record.proof.clone(),
    };
    if !provider.verify(seed, &record.client_seed, record.nonce, record.sides, &outcome)? {
        return Err(CommitmentError::RollMismatch {
            roll_id: record.roll_id.clone(),
            recorded: record.value,
        });
    }
    Ok(())
}

/// Check every roll; returns how many were verified.
pub fn verify_rolls(
    provider: &dyn RollProvider,
    seed: &ServerSeed,
    records: &[RollRecord],
) -> Result<usize, CommitmentError> {
    for record in records {
        verify_roll(provider, seed, record)?;
    }
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rng::{roll, HmacRollProvider};
    use crate::game::ids::ActorId;

    fn honest_record(seed: &ServerSeed, nonce: u64) -> RollRecord {
        let scene = SceneId::from("scene-1");
        let actor = ActorId::from("pc1");
        let outcome = roll(seed, "client", nonce, 20).unwrap();
        RollRecord {
            roll_id: RollRecord::make_id(&scene, &actor, nonce),
            scene_id: scene,
            actor,
            client_seed: "client".into(),
            nonce,
            sides: 20,
            value: outcome.value,
            proof: outcome.proof,
            provider: "hmac-sha256".into(),
            commitment_hash: hash_server_seed(seed),
        }
    }

    #[test]
    fn test_commit_reveal_cycle() {
        let seeds = SceneSeeds::new();
        let scene = SceneId::from("scene-1");
        let seed = ServerSeed::from_scene_seed("seed-abc");

        let commitment = seeds.commit(&scene, seed.clone()).unwrap();
        assert!(seeds.commit(&scene, seed.clone()).is_err());
        assert_eq!(seeds.commitment(&scene), Some(commitment.clone()));
        assert!(seeds.seed_for_roll(&scene).is_ok());

        let revealed = seeds.reveal(&scene).unwrap();
        assert!(commitment.matches(&revealed));
        assert_eq!(
            seeds.seed_for_roll(&scene),
            Err(CommitmentError::AlreadyRevealed(scene.clone()))
        );
    }

    #[test]
    fn test_unknown_scene() {
        let seeds = SceneSeeds::new();
        let scene = SceneId::from("nope");
        assert_eq!(seeds.reveal(&scene), Err(CommitmentError::UnknownScene(scene.clone())));
        assert!(seeds.commitment(&scene).is_none());
    }

    #[test]
    fn test_verify_honest_rolls() {
        let seed = ServerSeed::from_bytes([7u8; 32]);
        let records: Vec<_> = (0..5).map(|n| honest_record(&seed, n)).collect();
        assert_eq!(verify_rolls(&HmacRollProvider, &seed, &records), Ok(5));
    }

    #[test]
    fn test_detects_tampered_value() {
        let seed = ServerSeed::from_bytes([7u8; 32]);
        let mut record = honest_record(&seed, 0);
        record.value = record.value % 20 + 1;
        assert!(matches!(
            verify_roll(&HmacRollProvider, &seed, &record),
            Err(CommitmentError::RollMismatch { .. })
        ));
    }

    #[test]
    fn test_detects_wrong_seed() {
        let seed = ServerSeed::from_bytes([7u8; 32]);
        let record = honest_record(&seed, 0);
        let other = ServerSeed::from_bytes([8u8; 32]);
        assert!(matches!(
            verify_roll(&HmacRollProvider, &other, &record),
            Err(CommitmentError::CommitmentMismatch { .. })
        ));
    }

    #[test]
    fn test_detects_foreign_provider() {
        struct Other;
        impl RollProvider for Other {
            fn name(&self) -> &'static str {
                "other"
            }
            fn roll(&self, seed: &ServerSeed, client: &str, nonce: u64, sides: u32) -> Result<RollOutcome, RngError> {
                roll(seed, client, nonce, sides)
            }
        }

        let seed = ServerSeed::from_bytes([7u8; 32]);
        let record = honest_record(&seed, 0);
        assert!(matches!(
            verify_roll(&Other, &seed, &record),
            Err(CommitmentError::ProviderMismatch { .. })
        ));
    }
}
