//! Replay Harness
//!
//! Re-run recorded scenes and compare hashes.
//!
//! Two entry points:
//! - [`replay`] / [`verify_fixture`]: run a golden fixture through a fresh
//!   engine (memory log, logical clock, fixture seed) for regression tests.
//! - [`replay_log`]: re-execute a live scene's log entry by entry with the
//!   pure reducers, checking every before/after hash. Used for forensics
//!   and dispute resolution.
//!
//! Nothing here reads the system clock or the OS RNG.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::clock::LogicalClock;
use crate::core::hash::StateHash;
use crate::core::rng::ServerSeed;
use crate::engine::orchestrator::{RollRequest, SceneEngine};
use crate::error::EngineError;
use crate::game::events::{DmAction, RulesEvent};
use crate::game::ids::{ActorId, SceneId};
use crate::game::intent::Intent;
use crate::game::reducer::{apply_dm_action, apply_intent, apply_rules_event, IntentContext};
use crate::game::state::SceneState;
use crate::game::turn::ReactionWindow;
use crate::log::{EventLog, EventLogEntry, LogPayload, MemoryEventLog, Outcome};
use crate::proof::ledger::RollRecord;

/// One scripted input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", content = "input", rename_all = "snake_case")]
pub enum ReplayStep {
    /// Player intent.
    Intent(Intent),
    /// Narrator directive.
    DmAction(DmAction),
    /// Rules event.
    RulesEvent(RulesEvent),
    /// Committed die roll.
    Roll(RollRequest),
    /// Reaction window for an actor.
    OpenReactionWindow {
        /// Who may react.
        actor: ActorId,
        /// Trigger.
        reason: String,
    },
    /// Move the logical clock forward.
    Wait {
        /// Milliseconds to skip.
        millis: i64,
    },
}

/// A recorded scene script with its expected final hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoldenFixture {
    /// Fixture name.
    pub name: String,
    /// Starting state.
    pub initial_state: SceneState,
    /// Server seed for rolls.
    pub server_seed: ServerSeed,
    /// Logical clock start.
    pub start_time: DateTime<Utc>,
    /// Logical clock step per read, in milliseconds.
    pub step_millis: i64,
    /// Ordered inputs.
    pub steps: Vec<ReplayStep>,
    /// Final state hash recorded when the fixture was blessed.
    pub expected_hash: Option<StateHash>,
}

impl GoldenFixture {
    /// Fixture whose seed and clock derive from the initial state.
    pub fn new(name: impl Into<String>, initial_state: SceneState) -> Self {
        Self {
            name: name.into(),
            server_seed: ServerSeed::from_scene_seed(&initial_state.seed),
            start_time: initial_state.timestamp,
            step_millis: 1000,
            initial_state,
            steps: Vec::new(),
            expected_hash: None,
        }
    }

    /// Append a step.
    pub fn step(mut self, step: ReplayStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Append an intent step.
    pub fn intent(self, intent: Intent) -> Self {
        self.step(ReplayStep::Intent(intent))
    }

    /// Append a DM action step.
    pub fn dm(self, action: DmAction) -> Self {
        self.step(ReplayStep::DmAction(action))
    }

    /// Encode as pretty JSON.
    pub fn to_json(&self) -> Result<String, ReplayError> {
        serde_json::to_string_pretty(self).map_err(|e| ReplayError::Fixture(e.to_string()))
    }

    /// Decode from JSON.
    pub fn from_json(json: &str) -> Result<Self, ReplayError> {
        serde_json::from_str(json).map_err(|e| ReplayError::Fixture(e.to_string()))
    }
}

/// Replay output.
#[derive(Clone, Debug)]
pub struct ReplayReport {
    /// Final state.
    pub final_state: SceneState,
    /// Final state hash.
    pub final_hash: StateHash,
    /// Every entry produced.
    pub entries: Vec<EventLogEntry>,
    /// Every roll produced.
    pub rolls: Vec<RollRecord>,
}

/// Errors that can occur during replay.
#[derive(Debug)]
pub enum ReplayError {
    /// Fixture has no recorded hash to compare with.
    NoExpectedHash,

    /// Final hash differs from the recorded one.
    HashMismatch {
        /// Recorded hash.
        expected: StateHash,
        /// Replayed hash.
        computed: StateHash,
    },

    /// An entry's before-hash does not match its predecessor's after-hash.
    ChainBroken {
        /// Scene.
        scene: SceneId,
        /// Offending sequence.
        sequence: u64,
    },

    /// Sequences are not consecutive.
    SequenceGap {
        /// Scene.
        scene: SceneId,
        /// Expected sequence.
        expected: u64,
        /// Found sequence.
        got: u64,
    },

    /// Re-execution produced a different hash than the log recorded.
    Divergence {
        /// Entry sequence.
        sequence: u64,
        /// Hash in the log.
        expected: StateHash,
        /// Hash recomputed.
        computed: StateHash,
    },

    /// The engine failed on a step.
    Engine {
        /// Step index.
        step: usize,
        /// Underlying failure.
        source: Box<EngineError>,
    },

    /// Fixture could not be encoded or decoded.
    Fixture(String),
}

impl std::fmt::Display for ReplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoExpectedHash => write!(f, "Fixture has no expected hash"),
            Self::HashMismatch { expected, computed } => {
                write!(f, "Final hash mismatch: expected {}, got {}", expected.short(), computed.short())
            }
            Self::ChainBroken { scene, sequence } => {
                write!(f, "Hash chain broken in scene {} at sequence {}", scene, sequence)
            }
            Self::SequenceGap { scene, expected, got } => {
                write!(f, "Scene {} expected sequence {}, got {}", scene, expected, got)
            }
            Self::Divergence { sequence, expected, computed } => write!(
                f,
                "Replay diverged at sequence {}: log has {}, replay computed {}",
                sequence,
                expected.short(),
                computed.short()
            ),
            Self::Engine { step, source } => write!(f, "Engine failed at step {}: {}", step, source),
            Self::Fixture(msg) => write!(f, "Fixture encoding error: {}", msg),
        }
    }
}

impl std::error::Error for ReplayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Engine { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

// =============================================================================
// FIXTURE REPLAY
// =============================================================================

/// Run a fixture through a fresh engine.
pub fn replay(fixture: &GoldenFixture) -> Result<ReplayReport, ReplayError> {
    let clock = Arc::new(LogicalClock::new(
        fixture.start_time,
        Duration::milliseconds(fixture.step_millis),
    ));
    let log = Arc::new(MemoryEventLog::new());
    let engine = SceneEngine::builder()
        .clock(clock.clone())
        .log(log.clone())
        .build()
        .map_err(|e| engine_error(0, e))?;

    let scene = fixture.initial_state.id.clone();
    engine
        .commit_scene(&scene, fixture.server_seed.clone())
        .map_err(|e| engine_error(0, e))?;

    let mut state = fixture.initial_state.clone();
    for (i, step) in fixture.steps.iter().enumerate() {
        let result = match step {
            ReplayStep::Intent(intent) => engine.apply_player_intent(&state, intent).map(|(s, _)| s),
            ReplayStep::DmAction(action) => engine.apply_dm_action(&state, action).map(|(s, _)| s),
            ReplayStep::RulesEvent(event) => engine.apply_rules_event(&state, event).map(|(s, _)| s),
            ReplayStep::Roll(request) => engine.roll(&state, request).map(|r| r.state),
            ReplayStep::OpenReactionWindow { actor, reason } => engine
                .open_reaction_window(&state, actor, reason.as_str())
                .map(|(s, _)| s),
            ReplayStep::Wait { millis } => {
                clock.advance(Duration::milliseconds(*millis));
                Ok(state.clone())
            }
        };
        state = result.map_err(|e| engine_error(i, e))?;
    }

    let final_hash = state.compute_hash();
    debug!(fixture = %fixture.name, steps = fixture.steps.len(), hash = %final_hash.short(), "fixture replayed");
    Ok(ReplayReport {
        final_state: state,
        final_hash,
        entries: log.for_scene(&scene).map_err(|e| engine_error(fixture.steps.len(), e.into()))?,
        rolls: engine
            .get_rolls(&scene)
            .map_err(|e| engine_error(fixture.steps.len(), e))?,
    })
}

/// Replay a fixture and fill in its expected hash.
pub fn bless(mut fixture: GoldenFixture) -> Result<GoldenFixture, ReplayError> {
    let report = replay(&fixture)?;
    fixture.expected_hash = Some(report.final_hash);
    Ok(fixture)
}

/// Replay a fixture and check its hash and chain.
pub fn verify_fixture(fixture: &GoldenFixture) -> Result<ReplayReport, ReplayError> {
    let expected = fixture.expected_hash.ok_or(ReplayError::NoExpectedHash)?;
    let report = replay(fixture)?;
    verify_chain(&report.entries)?;

    if report.final_hash != expected {
        warn!(fixture = %fixture.name, expected = %expected.short(), computed = %report.final_hash.short(), "fixture diverged");
        return Err(ReplayError::HashMismatch {
            expected,
            computed: report.final_hash,
        });
    }
    info!(fixture = %fixture.name, "fixture verified");
    Ok(report)
}

fn engine_error(step: usize, err: EngineError) -> ReplayError {
    ReplayError::Engine {
        step,
        source: Box::new(err),
    }
}

// =============================================================================
// LOG VERIFICATION
// =============================================================================

/// Check sequence continuity and hash linkage, per scene.
pub fn verify_chain(entries: &[EventLogEntry]) -> Result<(), ReplayError> {
    let mut heads: BTreeMap<&SceneId, (u64, StateHash)> = BTreeMap::new();

    for entry in entries {
        if let Some(&(last_seq, last_hash)) = heads.get(&entry.scene_id) {
            if entry.sequence != last_seq + 1 {
                return Err(ReplayError::SequenceGap {
                    scene: entry.scene_id.clone(),
                    expected: last_seq + 1,
                    got: entry.sequence,
                });
            }
            if entry.state_hash_before != last_hash {
                return Err(ReplayError::ChainBroken {
                    scene: entry.scene_id.clone(),
                    sequence: entry.sequence,
                });
            }
        }
        heads.insert(&entry.scene_id, (entry.sequence, entry.state_hash_after));
    }
    Ok(())
}

/// Re-execute a scene's log against its initial state.
///
/// Turn ownership is reconstructed from initiative and reaction windows from
/// logged `ReactionWindowOpened` events, exactly as the live engine saw them.
/// Entries for other scenes are ignored.
pub fn replay_log(initial: &SceneState, entries: &[EventLogEntry]) -> Result<SceneState, ReplayError> {
    let mut state = initial.clone();
    let mut windows: BTreeMap<ActorId, ReactionWindow> = BTreeMap::new();

    for entry in entries.iter().filter(|e| e.scene_id == initial.id) {
        let current = state.compute_hash();
        if entry.state_hash_before != current {
            return Err(ReplayError::Divergence {
                sequence: entry.sequence,
                expected: entry.state_hash_before,
                computed: current,
            });
        }
        if entry.outcome.is_duplicate() {
            continue;
        }

        let now = entry.timestamp;
        let reduction = match &entry.payload {
            LogPayload::Intent(intent) => {
                let ctx = IntentContext {
                    now,
                    holds_turn: !intent.reaction && state.active_actor() == Some(&intent.actor),
                    reaction_window: if intent.reaction {
                        windows.get(&intent.actor).filter(|w| w.is_open_at(now)).cloned()
                    } else {
                        None
                    },
                };
                let reduction = apply_intent(&state, intent, &ctx);
                if intent.reaction && reduction.is_applied() {
                    windows.remove(&intent.actor);
                }
                reduction
            }
            LogPayload::DmAction(action) => apply_dm_action(&state, action),
            LogPayload::RulesEvent(event) => {
                let reduction = apply_rules_event(&state, event);
                if let RulesEvent::ReactionWindowOpened { actor, reason, expires_at } = event {
                    if reduction.is_applied() {
                        windows.insert(actor.clone(), ReactionWindow {
                            scene_id: state.id.clone(),
                            for_actor: actor.clone(),
                            reason: reason.clone(),
                            expires_at: *expires_at,
                        });
                    }
                }
                reduction
            }
        };

        let next = reduction.stamped(&state, now).state;
        let computed = next.compute_hash();
        if computed != entry.state_hash_after {
            return Err(ReplayError::Divergence {
                sequence: entry.sequence,
                expected: entry.state_hash_after,
                computed,
            });
        }
        if let Outcome::Advisory(text) = &entry.outcome {
            debug!(sequence = entry.sequence, advisory = %text, "advisory replayed");
        }
        state = next;
    }
    Ok(state)
}

// =============================================================================
// TESTS
// =============================================================================
