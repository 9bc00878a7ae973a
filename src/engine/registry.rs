//! Scene Registry
//!
//! Owns live scenes and serializes every read-modify-append per scene.
//! Each scene sits behind its own async mutex, so one scene never waits
//! on another.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{info, instrument, warn};

use crate::core::dice::DiceFormula;
use crate::core::rng::ServerSeed;
use crate::engine::orchestrator::{FormulaRoll, RollRequest, RollResult, SceneEngine};
use crate::engine::snapshot::{DigestTracker, SceneDigest};
use crate::error::{EngineError, Result};
use crate::game::events::{DmAction, RollKind, RulesEvent};
use crate::game::ids::{ActorId, SceneId};
use crate::game::intent::Intent;
use crate::game::state::SceneState;
use crate::log::EventLogEntry;
use crate::proof::commitment::SeedCommitment;
use crate::proof::ledger::RollRecord;

/// Broadcast when a scene's digest changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneUpdate {
    /// New digest.
    pub digest: SceneDigest,
    /// Sequence of the entry that caused it, if any.
    pub sequence: Option<u64>,
}

/// Everything published when a scene closes.
#[derive(Clone, Debug)]
pub struct ClosedScene {
    /// Final state.
    pub state: SceneState,
    /// Revealed server seed.
    pub server_seed: ServerSeed,
    /// Every roll made in the scene.
    pub rolls: Vec<RollRecord>,
    /// Number of rolls recomputed and matched against the commitment.
    pub rolls_verified: usize,
}

#[derive(Debug)]
struct SceneSlot {
    state: SceneState,
    tracker: DigestTracker,
}

/// Live scene registry.
pub struct SceneRegistry {
    engine: Arc<SceneEngine>,
    scenes: RwLock<BTreeMap<SceneId, Arc<Mutex<SceneSlot>>>>,
    updates: broadcast::Sender<SceneUpdate>,
}

impl SceneRegistry {
    /// Create a registry around an engine.
    pub fn new(engine: Arc<SceneEngine>) -> Self {
        let (updates, _) = broadcast::channel(engine.config().update_channel_capacity);
        Self {
            engine,
            scenes: RwLock::new(BTreeMap::new()),
            updates,
        }
    }

    /// The engine.
    pub fn engine(&self) -> &Arc<SceneEngine> {
        &self.engine
    }

    /// Receive digest updates for every scene.
    pub fn subscribe(&self) -> broadcast::Receiver<SceneUpdate> {
        self.updates.subscribe()
    }

    /// Open a scene and commit its server seed (fresh if `seed` is `None`).
    #[instrument(skip(self, state, seed), fields(scene = %state.id))]
    pub async fn open_scene(&self, state: SceneState, seed: Option<ServerSeed>) -> Result<SeedCommitment> {
        state.check_invariants()?;
        let scene = state.id.clone();

        let mut scenes = self.scenes.write().await;
        if scenes.contains_key(&scene) {
            return Err(EngineError::SceneExists(scene));
        }
        let commitment = self
            .engine
            .commit_scene(&scene, seed.unwrap_or_else(ServerSeed::generate))?;

        let mut slot = SceneSlot {
            state,
            tracker: DigestTracker::new(),
        };
        if let Some(digest) = slot.tracker.observe(&slot.state) {
            self.publish(digest, None);
        }
        scenes.insert(scene.clone(), Arc::new(Mutex::new(slot)));

        info!(commitment = %commitment.commitment_hash.short(), "scene opened");
        Ok(commitment)
    }

    /// Ids of open scenes.
    pub async fn scene_ids(&self) -> Vec<SceneId> {
        self.scenes.read().await.keys().cloned().collect()
    }

    /// Current state of a scene.
    pub async fn snapshot(&self, scene: &SceneId) -> Result<SceneState> {
        let slot = self.slot(scene).await?;
        let guard = slot.lock().await;
        Ok(guard.state.clone())
    }

    /// Submit a player intent.
    #[instrument(skip(self, intent), fields(actor = %intent.actor, key = %intent.idempotency_key))]
    pub async fn submit_intent(&self, scene: &SceneId, intent: Intent) -> Result<(SceneState, EventLogEntry)> {
        self.with_scene(scene, |engine, state| engine.apply_player_intent(state, &intent))
            .await
    }

    /// Submit a narrator directive.
    #[instrument(skip(self, action), fields(action = action.tag()))]
    pub async fn submit_dm_action(&self, scene: &SceneId, action: DmAction) -> Result<(SceneState, EventLogEntry)> {
        self.with_scene(scene, |engine, state| engine.apply_dm_action(state, &action))
            .await
    }

    /// Submit a rules event.
    #[instrument(skip(self, event), fields(event = event.tag()))]
    pub async fn submit_rules_event(
        &self,
        scene: &SceneId,
        event: RulesEvent,
    ) -> Result<(SceneState, EventLogEntry)> {
        self.with_scene(scene, |engine, state| engine.apply_rules_event(state, &event))
            .await
    }

    /// Open a reaction window.
    #[instrument(skip(self, reason))]
    pub async fn open_reaction_window(
        &self,
        scene: &SceneId,
        actor: &ActorId,
        reason: &str,
    ) -> Result<(SceneState, EventLogEntry)> {
        self.with_scene(scene, |engine, state| engine.open_reaction_window(state, actor, reason))
            .await
    }

    /// Roll one die.
    #[instrument(skip(self, request), fields(actor = %request.actor, sides = request.sides))]
    pub async fn roll(&self, scene: &SceneId, request: RollRequest) -> Result<RollResult> {
        let slot = self.slot(scene).await?;
        let mut guard = slot.lock().await;
        let rolled = self.engine.roll(&guard.state, &request)?;
        self.advance(&mut guard, rolled.state.clone(), &rolled.entry);
        Ok(rolled)
    }

    /// Roll a formula such as `2d6+3`.
    #[instrument(skip(self))]
    pub async fn roll_formula(
        &self,
        scene: &SceneId,
        actor: &ActorId,
        kind: RollKind,
        formula: &str,
    ) -> Result<FormulaRoll> {
        let formula = DiceFormula::parse(formula)?;
        let slot = self.slot(scene).await?;
        let mut guard = slot.lock().await;
        let rolled = self
            .engine
            .roll_formula(&guard.state, actor, kind, &formula, None)?;
        if let Some(last) = rolled.entries.last() {
            self.advance(&mut guard, rolled.state.clone(), last);
        }
        Ok(rolled)
    }

    /// Close a scene: reveal its seed and verify every roll.
    #[instrument(skip(self))]
    pub async fn close_scene(&self, scene: &SceneId) -> Result<ClosedScene> {
        let slot = self
            .scenes
            .write()
            .await
            .remove(scene)
            .ok_or_else(|| EngineError::SceneNotFound(scene.clone()))?;
        // Wait for any in-flight submission to finish.
        let guard = slot.lock().await;

        let server_seed = self.engine.reveal_scene(scene)?;
        let rolls = self.engine.get_rolls(scene)?;
        let rolls_verified = self.engine.verify_rolls(&server_seed, &rolls)?;
        self.engine.forget_scene(scene);

        info!(rolls = rolls_verified, "scene closed");
        Ok(ClosedScene {
            state: guard.state.clone(),
            server_seed,
            rolls,
            rolls_verified,
        })
    }

    async fn slot(&self, scene: &SceneId) -> Result<Arc<Mutex<SceneSlot>>> {
        self.scenes
            .read()
            .await
            .get(scene)
            .cloned()
            .ok_or_else(|| EngineError::SceneNotFound(scene.clone()))
    }

    async fn with_scene<F>(&self, scene: &SceneId, apply: F) -> Result<(SceneState, EventLogEntry)>
    where
        F: FnOnce(&SceneEngine, &SceneState) -> Result<(SceneState, EventLogEntry)>,
    {
        let slot = self.slot(scene).await?;
        let mut guard = slot.lock().await;
        let (next, entry) = apply(&self.engine, &guard.state)?;
        self.advance(&mut guard, next.clone(), &entry);
        Ok((next, entry))
    }

    fn advance(&self, slot: &mut SceneSlot, next: SceneState, entry: &EventLogEntry) {
        slot.state = next;
        if let Some(digest) = slot.tracker.observe(&slot.state) {
            self.publish(digest, Some(entry.sequence));
        }
    }

    fn publish(&self, digest: SceneDigest, sequence: Option<u64>) {
        // No subscribers is not an error.
        if self.updates.receiver_count() > 0 && self.updates.send(SceneUpdate { digest, sequence }).is_err() {
            warn!("scene update dropped");
        }
    }
}
