//! Scene Orchestrator
//!
//! Single entry point turning inputs into state transitions and log entries.
//!
//! ```text
//!   intent ──▶ key consumed? ──yes──▶ duplicate notice (before == after)
//!                 │ no
//!                 ▼
//!      turn lock / reaction window ──▶ reducer ──▶ hash ──▶ append ──▶ (next, entry)
//! ```
//!
//! The orchestrator never judges game legality; the reducer does, and
//! reports it as an advisory entry. Errors are reserved for contract
//! violations and persistence failures, and leave the caller's state
//! where it was.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::core::clock::Clock;
use crate::core::dice::DiceFormula;
use crate::core::rng::{HmacRollProvider, RngError, RollProvider, ServerSeed};
use crate::error::{EngineError, Result};
use crate::game::events::{Advantage, DmAction, RollKind, RulesEvent};
use crate::game::ids::{ActorId, IdempotencyKey, SceneId};
use crate::game::intent::Intent;
use crate::game::reducer::{apply_dm_action, apply_intent, apply_rules_event, IntentContext, Reduction};
use crate::game::state::SceneState;
use crate::game::turn::{ReactionWindow, TurnControl};
use crate::game::validation::RollTarget;
use crate::log::{entry_id, EventLog, EventLogEntry, LogError, LogPayload, Outcome};
use crate::proof::commitment::{verify_rolls, SceneSeeds, SeedCommitment};
use crate::proof::ledger::{RollLedger, RollRecord};

/// A request for one die.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollRequest {
    /// Who rolls.
    pub actor: ActorId,
    /// Purpose.
    pub kind: RollKind,
    /// Die size.
    pub sides: u32,
    /// Flat modifier added to the face.
    pub modifier: i32,
    /// Why the roll is made.
    pub rationale: Option<String>,
    /// Client seed; derived from config and actor when absent.
    pub client_seed: Option<String>,
    /// Roll twice and keep one.
    #[serde(default)]
    pub advantage: Advantage,
    /// DC or AC the total is judged against.
    #[serde(default)]
    pub target: Option<RollTarget>,
}

impl RollRequest {
    /// Plain roll with no modifier.
    pub fn new(actor: impl Into<ActorId>, kind: RollKind, sides: u32) -> Self {
        Self {
            actor: actor.into(),
            kind,
            sides,
            modifier: 0,
            rationale: None,
            client_seed: None,
            advantage: Advantage::Normal,
            target: None,
        }
    }

    /// A d20 with a modifier.
    pub fn d20(actor: impl Into<ActorId>, kind: RollKind, modifier: i32) -> Self {
        Self::new(actor, kind, 20).with_modifier(modifier)
    }

    /// Set the modifier.
    pub fn with_modifier(mut self, modifier: i32) -> Self {
        self.modifier = modifier;
        self
    }

    /// Set the rationale.
    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }

    /// Roll with advantage or disadvantage.
    pub fn with_advantage(mut self, advantage: Advantage) -> Self {
        self.advantage = advantage;
        self
    }

    /// Judge the total against a difficulty class.
    pub fn against_dc(mut self, dc: i32) -> Self {
        self.target = Some(RollTarget::Dc(dc));
        self
    }

    /// Judge the total against an armor class.
    pub fn against_ac(mut self, armor_class: i32) -> Self {
        self.target = Some(RollTarget::ArmorClass(armor_class));
        self
    }

    /// Set an explicit client seed.
    pub fn with_client_seed(mut self, seed: impl Into<String>) -> Self {
        self.client_seed = Some(seed.into());
        self
    }
}

/// A committed roll, one die or a kept pair.
#[derive(Clone, Debug)]
pub struct RollResult {
    /// State after the last roll event.
    pub state: SceneState,
    /// Log entry for the last die rolled.
    pub entry: EventLogEntry,
    /// Ledger record of the kept die.
    pub record: RollRecord,
    /// The other die under advantage or disadvantage.
    pub discarded: Option<RollRecord>,
    /// Kept face plus modifier.
    pub total: i64,
    /// Whether the target was met, when one was given.
    pub success: Option<bool>,
}

struct DieRoll {
    state: SceneState,
    entry: EventLogEntry,
    record: RollRecord,
}

/// A rolled dice formula.
#[derive(Clone, Debug)]
pub struct FormulaRoll {
    /// State after the last die.
    pub state: SceneState,
    /// One entry per die.
    pub entries: Vec<EventLogEntry>,
    /// One record per die.
    pub records: Vec<RollRecord>,
    /// Sum of faces plus the formula modifier.
    pub total: i64,
}

/// Builder for [`SceneEngine`].
#[derive(Default)]
pub struct EngineBuilder {
    clock: Option<Arc<dyn Clock>>,
    log: Option<Arc<dyn EventLog>>,
    roller: Option<Arc<dyn RollProvider>>,
    turns: Option<Arc<TurnControl>>,
    ledger: Option<Arc<RollLedger>>,
    seeds: Option<Arc<SceneSeeds>>,
    config: EngineConfig,
}

impl EngineBuilder {
    /// Start a builder with default config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wall time source (required).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Event log backend (required).
    pub fn log(mut self, log: Arc<dyn EventLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Roll provider; HMAC by default.
    pub fn roll_provider(mut self, roller: Arc<dyn RollProvider>) -> Self {
        self.roller = Some(roller);
        self
    }

    /// Share turn control with another engine.
    pub fn turn_control(mut self, turns: Arc<TurnControl>) -> Self {
        self.turns = Some(turns);
        self
    }

    /// Share a roll ledger.
    pub fn ledger(mut self, ledger: Arc<RollLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Share a seed vault.
    pub fn seeds(mut self, seeds: Arc<SceneSeeds>) -> Self {
        self.seeds = Some(seeds);
        self
    }

    /// Engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the engine.
    ///
    /// # Errors
    ///
    /// [`EngineError::MissingDependency`] without a clock or a log.
    pub fn build(self) -> Result<SceneEngine> {
        Ok(SceneEngine {
            clock: self.clock.ok_or(EngineError::MissingDependency("clock"))?,
            log: self.log.ok_or(EngineError::MissingDependency("log"))?,
            roller: self.roller.unwrap_or_else(|| Arc::new(HmacRollProvider)),
            turns: self.turns.unwrap_or_default(),
            ledger: self.ledger.unwrap_or_default(),
            seeds: self.seeds.unwrap_or_default(),
            config: self.config,
        })
    }
}

/// The orchestrator.
pub struct SceneEngine {
    clock: Arc<dyn Clock>,
    log: Arc<dyn EventLog>,
    roller: Arc<dyn RollProvider>,
    turns: Arc<TurnControl>,
    ledger: Arc<RollLedger>,
    seeds: Arc<SceneSeeds>,
    config: EngineConfig,
}

impl std::fmt::Debug for SceneEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneEngine")
            .field("roller", &self.roller.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SceneEngine {
    /// Start building an engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    // =========================================================================
    // INPUTS
    // =========================================================================

    /// Apply a player intent.
    ///
    /// A key already consumed in the scene yields the unchanged state and a
    /// narrate-type notice whose outcome is [`Outcome::DuplicateIgnored`].
    pub fn apply_player_intent(
        &self,
        state: &SceneState,
        intent: &Intent,
    ) -> Result<(SceneState, EventLogEntry)> {
        let scene = &state.id;
        let key = &intent.idempotency_key;

        if self.log.has_processed(scene, key)? {
            return self.duplicate_notice(state, intent);
        }

        let now = self.clock.now();
        let ctx = self.intent_context(state, intent, now);
        let reduction = apply_intent(state, intent, &ctx);
        let applied = reduction.is_applied();

        let result = self.commit(
            state,
            now,
            LogPayload::Intent(intent.clone()),
            Some(intent.actor.clone()),
            Some(key.clone()),
            reduction,
        );
        let (next, entry) = match result {
            Err(EngineError::Log(LogError::DuplicateKey { .. })) => {
                // Lost a race with a concurrent submission of the same key.
                return self.duplicate_notice(state, intent);
            }
            other => other?,
        };

        if applied && intent.reaction {
            self.turns.clear_reaction_window(scene, &intent.actor);
        }
        Ok((next, entry))
    }

    /// Apply a narrator directive.
    pub fn apply_dm_action(
        &self,
        state: &SceneState,
        action: &DmAction,
    ) -> Result<(SceneState, EventLogEntry)> {
        let now = self.clock.now();
        let reduction = apply_dm_action(state, action);
        let applied = reduction.is_applied();
        let out = self.commit(state, now, LogPayload::DmAction(action.clone()), None, None, reduction)?;

        if applied && matches!(action, DmAction::StartEncounter { .. } | DmAction::EndEncounter) {
            self.release_any(&state.id);
        }
        Ok(out)
    }

    /// Apply a system-derived fact.
    pub fn apply_rules_event(
        &self,
        state: &SceneState,
        event: &RulesEvent,
    ) -> Result<(SceneState, EventLogEntry)> {
        let now = self.clock.now();
        self.apply_rules_event_at(state, event, now)
    }

    fn apply_rules_event_at(
        &self,
        state: &SceneState,
        event: &RulesEvent,
        now: DateTime<Utc>,
    ) -> Result<(SceneState, EventLogEntry)> {
        let reduction = apply_rules_event(state, event);
        let applied = reduction.is_applied();
        let actor = Some(event.actor().clone());
        let out = self.commit(state, now, LogPayload::RulesEvent(event.clone()), actor, None, reduction)?;

        if applied {
            match event {
                RulesEvent::TurnEnd { actor } => self.turns.release(&state.id, actor),
                RulesEvent::TurnStart { actor } => {
                    if let Some(holder) = self.turns.holder(&state.id).filter(|h| h != actor) {
                        self.turns.release(&state.id, &holder);
                    }
                }
                _ => {}
            }
        }
        Ok(out)
    }

    /// Open a reaction window for `actor` and log it.
    ///
    /// The window is only registered if the event was accepted.
    pub fn open_reaction_window(
        &self,
        state: &SceneState,
        actor: &ActorId,
        reason: impl Into<String>,
    ) -> Result<(SceneState, EventLogEntry)> {
        let now = self.clock.now();
        let window = ReactionWindow {
            scene_id: state.id.clone(),
            for_actor: actor.clone(),
            reason: reason.into(),
            expires_at: now + self.config.reaction_window_chrono(),
        };
        let event = RulesEvent::ReactionWindowOpened {
            actor: actor.clone(),
            reason: window.reason.clone(),
            expires_at: window.expires_at,
        };

        let (next, entry) = self.apply_rules_event_at(state, &event, now)?;
        if entry.outcome.is_applied() {
            self.turns.open_reaction_window(window);
        }
        Ok((next, entry))
    }

    // =========================================================================
    // ROLLS
    // =========================================================================

    /// Roll and log it as rules events.
    ///
    /// Under advantage or disadvantage two dice are rolled on consecutive
    /// nonces, both are logged, and the higher or lower face is kept.
    ///
    /// # Errors
    ///
    /// Zero sides, no committed seed, or a ledger nonce conflict.
    pub fn roll(&self, state: &SceneState, request: &RollRequest) -> Result<RollResult> {
        if request.sides == 0 {
            return Err(RngError::InvalidSides { sides: 0 }.into());
        }

        let first = self.roll_die(state, request)?;
        let (state, entry, record, discarded) = if request.advantage.dice() == 2 {
            let second = self.roll_die(&first.state, request)?;
            let (kept, other) = if request.advantage.prefers(second.record.value, first.record.value) {
                (second.record, first.record)
            } else {
                (first.record, second.record)
            };
            (second.state, second.entry, kept, Some(other))
        } else {
            (first.state, first.entry, first.record, None)
        };

        let total = i64::from(record.value) + i64::from(request.modifier);
        let success = request
            .target
            .map(|target| target.is_met(record.value, request.modifier));
        if request.advantage != Advantage::Normal || success.is_some() {
            debug!(
                scene = %state.id,
                actor = %request.actor,
                advantage = ?request.advantage,
                kept = %record.roll_id,
                total,
                success = ?success,
                "roll resolved"
            );
        }

        Ok(RollResult {
            state,
            entry,
            record,
            discarded,
            total,
            success,
        })
    }

    fn roll_die(&self, state: &SceneState, request: &RollRequest) -> Result<DieRoll> {
        let scene = &state.id;
        let seed = self.seeds.seed_for_roll(scene)?;
        let client_seed = request
            .client_seed
            .clone()
            .unwrap_or_else(|| self.default_client_seed(scene, &request.actor));
        let nonce = self.ledger.next_nonce(scene, &request.actor);

        let outcome = self.roller.roll(&seed, &client_seed, nonce, request.sides)?;
        let roll_id = RollRecord::make_id(scene, &request.actor, nonce);
        let record = RollRecord {
            roll_id: roll_id.clone(),
            scene_id: scene.clone(),
            actor: request.actor.clone(),
            client_seed,
            nonce,
            sides: request.sides,
            value: outcome.value,
            proof: outcome.proof,
            provider: self.roller.name().to_owned(),
            commitment_hash: seed.commitment(),
        };
        // Claim the nonce before logging so it can never be handed out twice.
        self.ledger.record(record.clone())?;

        let result = i64::from(outcome.value) + i64::from(request.modifier);
        debug!(
            scene = %scene,
            actor = %request.actor,
            roll_id = %roll_id,
            sides = request.sides,
            value = outcome.value,
            result,
            "die rolled"
        );

        let event = RulesEvent::Roll {
            roll_id,
            actor: request.actor.clone(),
            kind: request.kind,
            sides: request.sides,
            modifier: request.modifier,
            result,
            rationale: request.rationale.clone(),
        };
        let (state, entry) = self.apply_rules_event(state, &event)?;
        Ok(DieRoll { state, entry, record })
    }

    /// Roll a formula die by die. The modifier rides on the last die.
    pub fn roll_formula(
        &self,
        state: &SceneState,
        actor: &ActorId,
        kind: RollKind,
        formula: &DiceFormula,
        rationale: Option<String>,
    ) -> Result<FormulaRoll> {
        let mut current = state.clone();
        let mut entries = Vec::with_capacity(formula.count as usize);
        let mut records = Vec::with_capacity(formula.count as usize);
        let mut total = 0i64;

        for i in 0..formula.count {
            let last = i + 1 == formula.count;
            let mut request = RollRequest::new(actor.clone(), kind, formula.sides);
            request.modifier = if last { formula.modifier } else { 0 };
            request.rationale = rationale.as_ref().map(|r| format!("{r} ({formula}, die {})", i + 1));

            let rolled = self.roll(&current, &request)?;
            total += rolled.total;
            current = rolled.state;
            entries.push(rolled.entry);
            records.push(rolled.record);
        }

        Ok(FormulaRoll {
            state: current,
            entries,
            records,
            total,
        })
    }

    /// Every roll in a scene whose `Roll` event reached the log.
    ///
    /// A nonce burned by a failed append stays claimed in the ledger but is
    /// not part of the transcript.
    pub fn get_rolls(&self, scene: &SceneId) -> Result<Vec<RollRecord>> {
        let logged: BTreeSet<String> = self
            .log
            .for_scene(scene)?
            .into_iter()
            .filter_map(|entry| match entry.payload {
                LogPayload::RulesEvent(RulesEvent::Roll { roll_id, .. }) => Some(roll_id),
                _ => None,
            })
            .collect();
        Ok(self
            .ledger
            .for_scene(scene)
            .into_iter()
            .filter(|record| logged.contains(&record.roll_id))
            .collect())
    }

    /// Commit a server seed for a scene before any roll.
    pub fn commit_scene(&self, scene: &SceneId, seed: ServerSeed) -> Result<SeedCommitment> {
        Ok(self.seeds.commit(scene, seed)?)
    }

    /// Published commitment for a scene.
    pub fn commitment(&self, scene: &SceneId) -> Option<SeedCommitment> {
        self.seeds.commitment(scene)
    }

    /// Reveal a scene's seed; no further rolls are accepted.
    pub fn reveal_scene(&self, scene: &SceneId) -> Result<ServerSeed> {
        Ok(self.seeds.reveal(scene)?)
    }

    /// Check rolls against a revealed seed with this engine's provider.
    pub fn verify_rolls(&self, seed: &ServerSeed, records: &[RollRecord]) -> Result<usize> {
        Ok(verify_rolls(self.roller.as_ref(), seed, records)?)
    }

    /// Drop per-scene turn, roll and seed bookkeeping.
    pub fn forget_scene(&self, scene: &SceneId) {
        self.turns.forget_scene(scene);
        self.ledger.forget_scene(scene);
        self.seeds.forget_scene(scene);
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Event log.
    pub fn log(&self) -> &Arc<dyn EventLog> {
        &self.log
    }

    /// Turn control.
    pub fn turns(&self) -> &Arc<TurnControl> {
        &self.turns
    }

    /// Clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =========================================================================
    // PIPELINE
    // =========================================================================

    fn intent_context(&self, state: &SceneState, intent: &Intent, now: DateTime<Utc>) -> IntentContext {
        let scene = &state.id;
        let actor = &intent.actor;

        if intent.reaction {
            return IntentContext {
                now,
                holds_turn: false,
                reaction_window: self.turns.get_reaction_window(scene, actor, now),
            };
        }

        let holds_turn = if intent.kind.needs_turn() && state.active_actor() == Some(actor) {
            self.turns.try_lock(scene, actor)
        } else {
            self.turns.holder(scene).as_ref() == Some(actor)
        };
        IntentContext {
            now,
            holds_turn,
            reaction_window: None,
        }
    }

    fn default_client_seed(&self, scene: &SceneId, actor: &ActorId) -> String {
        match &self.config.default_client_seed {
            Some(base) => format!("{base}:{actor}"),
            None => format!("{scene}:{actor}"),
        }
    }

    fn release_any(&self, scene: &SceneId) {
        if let Some(holder) = self.turns.holder(scene) {
            self.turns.release(scene, &holder);
        }
    }

    fn duplicate_notice(&self, state: &SceneState, intent: &Intent) -> Result<(SceneState, EventLogEntry)> {
        let key = intent.idempotency_key.clone();
        let hash = state.compute_hash();
        let head = self.log.head(&state.id)?;

        let entry = EventLogEntry {
            id: entry_id(&state.id, head.next_sequence),
            scene_id: state.id.clone(),
            sequence: head.next_sequence,
            timestamp: self.clock.now(),
            actor: Some(intent.actor.clone()),
            idempotency_key: None,
            payload: LogPayload::DmAction(DmAction::narrate(format!("Duplicate intent ignored ({key})."))),
            outcome: Outcome::DuplicateIgnored { key: key.clone() },
            state_hash_before: hash,
            state_hash_after: hash,
        };
        self.log.append(&entry)?;

        info!(scene = %state.id, actor = %intent.actor, key = %key, "duplicate intent ignored");
        Ok((state.clone(), entry))
    }

    /// Hash, log and return a reduction. The state is only returned once the
    /// entry documenting it has been appended.
    fn commit(
        &self,
        state: &SceneState,
        now: DateTime<Utc>,
        payload: LogPayload,
        actor: Option<ActorId>,
        key: Option<IdempotencyKey>,
        reduction: Reduction,
    ) -> Result<(SceneState, EventLogEntry)> {
        let head = self.log.head(&state.id)?;
        let before = state.compute_hash();

        let Reduction { state: next, advisory } = reduction.stamped(state, now);
        debug_assert!(next.check_invariants().is_ok());
        let after = next.compute_hash();

        let outcome = match advisory {
            Some(text) => Outcome::Advisory(text),
            None => Outcome::Applied,
        };
        let entry = EventLogEntry {
            id: entry_id(&state.id, head.next_sequence),
            scene_id: state.id.clone(),
            sequence: head.next_sequence,
            timestamp: now,
            actor,
            idempotency_key: key,
            payload,
            outcome,
            state_hash_before: before,
            state_hash_after: after,
        };
        self.log.append(&entry)?;

        match &entry.outcome {
            Outcome::Advisory(text) => {
                info!(scene = %state.id, seq = entry.sequence, input = %entry.payload.label(), advisory = %text, "input rejected");
            }
            _ => {
                debug!(scene = %state.id, seq = entry.sequence, input = %entry.payload.label(), after = %after.short(), "input applied");
            }
        }
        #[cfg(feature = "debug-tracing")]
        tracing::trace!(scene = %state.id, seq = entry.sequence, before = %before, after = %after, "transition");

        if head.next_sequence + 1 == self.config.max_log_entries_per_scene {
            warn!(scene = %state.id, entries = head.next_sequence + 1, "scene log reached soft cap");
        }
        Ok((next, entry))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::{FixedClock, LogicalClock};
    use crate::game::intent::{GridPos, IntentKind};
    use crate::game::state::Position;
    use crate::log::MemoryEventLog;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn engine() -> SceneEngine {
        SceneEngine::builder()
            .clock(Arc::new(LogicalClock::new(t0(), Duration::seconds(1))))
            .log(Arc::new(MemoryEventLog::new()))
            .build()
            .unwrap()
    }

    fn scene() -> SceneState {
        SceneState::new("scene-1", "seed-abc", t0()).with_initiative(["pc1", "npc1"])
    }

    fn a(id: &str) -> ActorId {
        ActorId::from(id)
    }

    #[test]
    fn test_missing_dependencies() {
        let err = SceneEngine::builder()
            .log(Arc::new(MemoryEventLog::new()))
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingDependency("clock")));

        let err = SceneEngine::builder()
            .clock(Arc::new(FixedClock(t0())))
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingDependency("log")));
    }

    /// pc1 moves, then resubmits the same key.
    #[test]
    fn test_duplicate_intent_scenario() {
        let engine = engine();
        let s0 = scene();
        let intent = Intent::move_to("pc1", "k1", 1, 1);

        let (s1, e1) = engine.apply_player_intent(&s0, &intent).unwrap();
        assert_eq!(e1.outcome, Outcome::Applied);
        assert_eq!(s1.positions.get(&a("pc1")), Some(&Position::Grid(GridPos::new(1, 1))));
        assert_eq!(e1.state_hash_before, s0.compute_hash());
        assert_eq!(e1.state_hash_after, s1.compute_hash());

        let (s2, e2) = engine.apply_player_intent(&s1, &intent).unwrap();
        assert_eq!(s2, s1);
        assert_eq!(e2.outcome, Outcome::DuplicateIgnored {
            key: IdempotencyKey::from("k1")
        });
        assert!(matches!(e2.payload, LogPayload::DmAction(DmAction::Narrate { .. })));
        assert_eq!(e2.state_hash_before, e2.state_hash_after);
        assert_eq!(e2.state_hash_before, e1.state_hash_after);

        assert_eq!(engine.log().for_scene(&s0.id).unwrap().len(), 2);
    }

    #[test]
    fn test_advisory_distinct_from_duplicate() {
        let engine = engine();
        let s0 = scene();

        let (s1, entry) = engine
            .apply_player_intent(&s0, &Intent::move_to("npc1", "k1", 2, 2))
            .unwrap();
        assert_eq!(s1, s0);
        assert_eq!(entry.outcome, Outcome::Advisory("It is not npc1's turn.".into()));
        assert_eq!(entry.idempotency_key, Some(IdempotencyKey::from("k1")));
        assert!(entry.is_noop());
    }

    #[test]
    fn test_turn_lock_follows_initiative() {
        let engine = engine();
        let s0 = scene();
        let (s1, _) = engine
            .apply_player_intent(&s0, &Intent::move_to("pc1", "k1", 0, 1))
            .unwrap();
        assert_eq!(engine.turns().holder(&s0.id), Some(a("pc1")));

        let (s2, _) = engine
            .apply_rules_event(&s1, &RulesEvent::TurnEnd { actor: a("pc1") })
            .unwrap();
        assert_eq!(engine.turns().holder(&s0.id), None);
        assert_eq!(s2.active_actor(), Some(&a("npc1")));

        let (s3, entry) = engine
            .apply_player_intent(&s2, &Intent::move_to("npc1", "k2", 5, 5))
            .unwrap();
        assert!(entry.outcome.is_applied());
        assert_eq!(engine.turns().holder(&s0.id), Some(a("npc1")));
        assert_ne!(s3, s2);
    }

    #[test]
    fn test_reaction_window_flow() {
        let clock = Arc::new(LogicalClock::new(t0(), Duration::seconds(1)));
        let engine = SceneEngine::builder()
            .clock(clock.clone())
            .log(Arc::new(MemoryEventLog::new()))
            .build()
            .unwrap();
        let s0 = scene();

        let (s1, opened) = engine.open_reaction_window(&s0, &a("npc1"), "pc1 moved away").unwrap();
        assert!(opened.outcome.is_applied());

        let reaction = Intent::attack("npc1", "r1", "pc1").as_reaction();
        let (s2, entry) = engine.apply_player_intent(&s1, &reaction).unwrap();
        assert!(entry.outcome.is_applied());
        // Used up.
        assert!(engine.turns().get_reaction_window(&s0.id, &a("npc1"), t0()).is_none());

        let (s3, _) = engine.open_reaction_window(&s2, &a("npc1"), "again").unwrap();
        clock.advance(Duration::seconds(60));
        let late = Intent::attack("npc1", "r2", "pc1").as_reaction();
        let (_, entry) = engine.apply_player_intent(&s3, &late).unwrap();
        assert!(matches!(entry.outcome, Outcome::Advisory(_)));
    }

    #[test]
    fn test_ooc_out_of_turn() {
        let engine = engine();
        let intent = Intent::new("npc1", "chat", IntentKind::OutOfCharacter {
            text: "one sec".into(),
        });
        let (_, entry) = engine.apply_player_intent(&scene(), &intent).unwrap();
        assert!(entry.outcome.is_applied());
        assert!(entry.is_noop());
    }

    #[test]
    fn test_stale_state_is_rejected() {
        let engine = engine();
        let s0 = scene();
        engine
            .apply_player_intent(&s0, &Intent::move_to("pc1", "k1", 1, 1))
            .unwrap();

        // Submitting against the old state breaks the chain.
        let err = engine
            .apply_dm_action(&s0, &DmAction::narrate("late"))
            .unwrap_err();
        assert!(matches!(err, EngineError::Log(LogError::ChainBroken { .. })));
    }

    #[test]
    fn test_roll_logged_and_verifiable() {
        let engine = engine();
        let s0 = scene();
        engine
            .commit_scene(&s0.id, ServerSeed::from_scene_seed(&s0.seed))
            .unwrap();

        let r1 = engine
            .roll(&s0, &RollRequest::d20("pc1", RollKind::Attack, 5).with_rationale("longsword"))
            .unwrap();
        assert!((6..=25).contains(&r1.total));
        assert_eq!(r1.record.nonce, 0);
        assert!(matches!(r1.entry.payload, LogPayload::RulesEvent(RulesEvent::Roll { .. })));

        let r2 = engine.roll(&r1.state, &RollRequest::new("pc1", RollKind::Damage, 8)).unwrap();
        assert_eq!(r2.record.nonce, 1);

        let rolls = engine.get_rolls(&s0.id).unwrap();
        assert_eq!(rolls.len(), 2);

        let seed = engine.reveal_scene(&s0.id).unwrap();
        assert_eq!(engine.verify_rolls(&seed, &rolls).unwrap(), 2);
        assert!(engine.roll(&r2.state, &RollRequest::new("pc1", RollKind::Check, 20)).is_err());
    }

    #[test]
    fn test_zero_sided_die_fails_fast() {
        let engine = engine();
        let s0 = scene();
        engine.commit_scene(&s0.id, ServerSeed::from_bytes([1; 32])).unwrap();
        let err = engine.roll(&s0, &RollRequest::new("pc1", RollKind::Check, 0)).unwrap_err();
        assert!(matches!(err, EngineError::Rng(RngError::InvalidSides { sides: 0 })));
        assert!(engine.log().for_scene(&s0.id).unwrap().is_empty());
    }

    #[test]
    fn test_roll_without_commitment() {
        let engine = engine();
        let err = engine
            .roll(&scene(), &RollRequest::new("pc1", RollKind::Check, 20))
            .unwrap_err();
        assert!(matches!(err, EngineError::Commitment(_)));
    }

    #[test]
    fn test_roll_formula() {
        let engine = engine();
        let s0 = scene();
        engine.commit_scene(&s0.id, ServerSeed::from_bytes([3; 32])).unwrap();

        let formula = DiceFormula::parse("3d6+2").unwrap();
        let rolled = engine
            .roll_formula(&s0, &a("pc1"), RollKind::Damage, &formula, Some("fireball".into()))
            .unwrap();
        assert_eq!(rolled.entries.len(), 3);
        let faces: i64 = rolled.records.iter().map(|r| i64::from(r.value)).sum();
        assert_eq!(rolled.total, faces + 2);
        assert!((5..=20).contains(&rolled.total));
    }

    fn roll_twice(advantage: Advantage) -> (SceneEngine, RollResult) {
        let engine = engine();
        let s0 = scene();
        engine.commit_scene(&s0.id, ServerSeed::from_bytes([5; 32])).unwrap();
        let request = RollRequest::d20("pc1", RollKind::Attack, 3).with_advantage(advantage);
        let rolled = engine.roll(&s0, &request).unwrap();
        (engine, rolled)
    }

    #[test]
    fn test_advantage_keeps_higher() {
        let (engine, rolled) = roll_twice(Advantage::Advantage);
        let other = rolled.discarded.clone().unwrap();
        assert!(rolled.record.value >= other.value);
        assert_eq!(rolled.total, i64::from(rolled.record.value) + 3);

        let mut nonces = [rolled.record.nonce, other.nonce];
        nonces.sort_unstable();
        assert_eq!(nonces, [0, 1]);

        let entries = engine.log().for_scene(&scene().id).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries
            .iter()
            .all(|e| matches!(e.payload, LogPayload::RulesEvent(RulesEvent::Roll { .. }))));
        assert_eq!(rolled.entry, entries[1]);
    }

    #[test]
    fn test_disadvantage_keeps_lower() {
        let (engine, rolled) = roll_twice(Advantage::Disadvantage);
        let other = rolled.discarded.clone().unwrap();
        assert!(rolled.record.value <= other.value);
        assert_eq!(rolled.total, i64::from(rolled.record.value) + 3);
        assert_eq!(engine.get_rolls(&scene().id).unwrap().len(), 2);
    }

    #[test]
    fn test_advantage_pair_matches_plain_rolls() {
        let (_, plain_first) = roll_twice(Advantage::Normal);
        let (_, high) = roll_twice(Advantage::Advantage);
        let (_, low) = roll_twice(Advantage::Disadvantage);
        let faces = [high.record.value, high.discarded.unwrap().value];
        assert!(faces.contains(&plain_first.record.value));
        assert_eq!(high.record.value, *faces.iter().max().unwrap());
        assert_eq!(low.record.value, *faces.iter().min().unwrap());
    }

    #[test]
    fn test_dc_met_at_equal_total() {
        let seed = ServerSeed::from_scene_seed("seed-abc");
        let face = crate::core::rng::roll(&seed, "scene-1:pc1", 0, 20).unwrap().value as i32;

        for (dc, expected) in [(face + 3, true), (face + 4, false)] {
            let engine = engine();
            let s0 = scene();
            engine.commit_scene(&s0.id, seed.clone()).unwrap();
            let request = RollRequest::d20("pc1", RollKind::Save, 3).against_dc(dc);
            let rolled = engine.roll(&s0, &request).unwrap();
            assert_eq!(rolled.total, i64::from(face + 3));
            assert_eq!(rolled.success, Some(expected));
        }
    }

    #[test]
    fn test_no_target_no_verdict() {
        let (_, rolled) = roll_twice(Advantage::Normal);
        assert_eq!(rolled.success, None);
        assert!(rolled.discarded.is_none());
    }

    /// Memory log whose appends can be switched off.
    #[derive(Default)]
    struct FlakyLog {
        inner: MemoryEventLog,
        failing: std::sync::atomic::AtomicBool,
    }

    impl FlakyLog {
        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, std::sync::atomic::Ordering::SeqCst);
        }
    }

    impl EventLog for FlakyLog {
        fn has_processed(&self, scene: &SceneId, key: &IdempotencyKey) -> std::result::Result<bool, LogError> {
            self.inner.has_processed(scene, key)
        }

        fn mark_processed(&self, scene: &SceneId, key: &IdempotencyKey) -> std::result::Result<bool, LogError> {
            self.inner.mark_processed(scene, key)
        }

        fn append(&self, entry: &EventLogEntry) -> std::result::Result<(), LogError> {
            if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(LogError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")));
            }
            self.inner.append(entry)
        }

        fn all(&self) -> std::result::Result<Vec<EventLogEntry>, LogError> {
            self.inner.all()
        }

        fn for_scene(&self, scene: &SceneId) -> std::result::Result<Vec<EventLogEntry>, LogError> {
            self.inner.for_scene(scene)
        }

        fn head(&self, scene: &SceneId) -> std::result::Result<crate::log::LogHead, LogError> {
            self.inner.head(scene)
        }
    }

    #[test]
    fn test_burned_nonce_not_in_transcript() {
        let log = Arc::new(FlakyLog::default());
        let ledger = Arc::new(RollLedger::new());
        let engine = SceneEngine::builder()
            .clock(Arc::new(LogicalClock::new(t0(), Duration::seconds(1))))
            .log(log.clone())
            .ledger(ledger.clone())
            .build()
            .unwrap();
        let s0 = scene();
        engine.commit_scene(&s0.id, ServerSeed::from_bytes([9; 32])).unwrap();
        let request = RollRequest::d20("pc1", RollKind::Check, 0);

        let r0 = engine.roll(&s0, &request).unwrap();
        log.set_failing(true);
        assert!(matches!(engine.roll(&r0.state, &request), Err(EngineError::Log(_))));
        log.set_failing(false);
        let r2 = engine.roll(&r0.state, &request).unwrap();
        assert_eq!(r2.record.nonce, 2);

        assert_eq!(ledger.for_scene(&s0.id).len(), 3);
        let nonces: Vec<u64> = engine.get_rolls(&s0.id).unwrap().iter().map(|r| r.nonce).collect();
        assert_eq!(nonces, vec![0, 2]);
    }

    #[test]
    fn test_two_engines_agree() {
        let run = || {
            let engine = engine();
            let mut state = scene();
            engine
                .commit_scene(&state.id, ServerSeed::from_scene_seed("seed-abc"))
                .unwrap();
            for intent in [
                Intent::move_to("pc1", "k1", 1, 1),
                Intent::move_to("pc1", "k1", 1, 1),
                Intent::attack("pc1", "k2", "npc1"),
            ] {
                state = engine.apply_player_intent(&state, &intent).unwrap().0;
            }
            state = engine
                .roll(&state, &RollRequest::d20("pc1", RollKind::Attack, 3))
                .unwrap()
                .state;
            (state, engine.log().for_scene(&SceneId::from("scene-1")).unwrap())
        };

        let (state_a, log_a) = run();
        let (state_b, log_b) = run();
        assert_eq!(state_a.to_bytes().unwrap(), state_b.to_bytes().unwrap());
        assert_eq!(log_a, log_b);
    }
}
