//! Pure State Reducers
//!
//! `(SceneState, Intent | DmAction | RulesEvent) -> SceneState`.
//!
//! # Determinism
//!
//! These functions are 100% deterministic:
//! - No I/O, no system time (the caller supplies `now` in [`IntentContext`])
//! - No randomness (dice arrive as already-committed rules events)
//! - BTreeMap/BTreeSet iteration only
//!
//! They are also total: every well-typed input produces a [`Reduction`].
//! An illegal action leaves the state unchanged and carries an in-fiction
//! advisory instead of raising an error, so a transition can never abort
//! half-way through the pipeline.
//!
//! All game-rule logic lives here; the orchestrator, log and RNG stay
//! rules-agnostic.

use chrono::{DateTime, Utc};

use crate::game::events::{DmAction, RulesEvent};
use crate::game::ids::ActorId;
use crate::game::intent::{Destination, Intent, IntentKind};
use crate::game::state::{Position, SceneState};
use crate::game::turn::ReactionWindow;

/// Highest spell slot level.
pub const MAX_SLOT_LEVEL: u8 = 9;

/// Facts about the submitting actor that live outside the scene state.
#[derive(Clone, Debug)]
pub struct IntentContext {
    /// Instant the intent is being applied.
    pub now: DateTime<Utc>,
    /// Whether the actor holds the scene's turn lock.
    pub holds_turn: bool,
    /// The actor's reaction window, if one was found.
    pub reaction_window: Option<ReactionWindow>,
}

impl IntentContext {
    /// Context for an actor holding the turn with no reaction window.
    pub fn on_turn(now: DateTime<Utc>) -> Self {
        Self {
            now,
            holds_turn: true,
            reaction_window: None,
        }
    }
}

/// Result of applying one input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reduction {
    /// The next state (equal to the input when rejected).
    pub state: SceneState,
    /// In-fiction explanation when the input was not legal.
    pub advisory: Option<String>,
}

impl Reduction {
    fn applied(state: SceneState) -> Self {
        Self {
            state,
            advisory: None,
        }
    }

    fn unchanged(state: &SceneState) -> Self {
        Self::applied(state.clone())
    }

    fn rejected(state: &SceneState, advisory: impl Into<String>) -> Self {
        Self {
            state: state.clone(),
            advisory: Some(advisory.into()),
        }
    }

    /// Whether the input was accepted.
    pub fn is_applied(&self) -> bool {
        self.advisory.is_none()
    }

    /// Stamp `now` onto the state if it differs from `prev`.
    ///
    /// No-op outcomes keep the old timestamp so their hash stays put.
    pub fn stamped(mut self, prev: &SceneState, now: DateTime<Utc>) -> Self {
        if self.state != *prev {
            self.state.timestamp = now;
        }
        self
    }
}

// =============================================================================
// INTENTS
// =============================================================================

/// Apply a player intent.
pub fn apply_intent(state: &SceneState, intent: &Intent, ctx: &IntentContext) -> Reduction {
    let actor = &intent.actor;

    if !state.is_participant(actor) {
        return Reduction::rejected(state, format!("{actor} is not part of this scene."));
    }

    if intent.kind.needs_turn() {
        if let Some(advisory) = admission_advisory(state, intent, ctx) {
            return Reduction::rejected(state, advisory);
        }
    }

    match &intent.kind {
        IntentKind::Move { to } => apply_move(state, actor, *to),
        IntentKind::Attack { target, .. } => {
            if target == actor {
                Reduction::rejected(state, format!("{actor} cannot attack themselves."))
            } else if !state.is_participant(target) {
                Reduction::rejected(state, format!("{target} is not here to attack."))
            } else {
                // Resolution arrives as attack/damage rolls and DM damage.
                Reduction::unchanged(state)
            }
        }
        IntentKind::SkillCheck { skill, .. } => {
            if skill.trim().is_empty() {
                Reduction::rejected(state, "No skill was named for the check.")
            } else {
                Reduction::unchanged(state)
            }
        }
        IntentKind::Cast { spell, slot_level } => {
            if spell.trim().is_empty() {
                Reduction::rejected(state, "No spell was named.")
            } else if let Some(level) = slot_level.filter(|l| !(1..=MAX_SLOT_LEVEL).contains(l)) {
                Reduction::rejected(state, format!("There is no level {level} spell slot."))
            } else {
                Reduction::unchanged(state)
            }
        }
        IntentKind::OutOfCharacter { .. } => Reduction::unchanged(state),
    }
}

/// Why the actor may not act right now, if they may not.
fn admission_advisory(state: &SceneState, intent: &Intent, ctx: &IntentContext) -> Option<String> {
    let actor = &intent.actor;

    if intent.reaction {
        let open = ctx
            .reaction_window
            .as_ref()
            .is_some_and(|w| &w.for_actor == actor && w.is_open_at(ctx.now));
        return (!open).then(|| format!("{actor} tries to react, but the moment has passed."));
    }

    if state.in_combat() && (state.active_actor() != Some(actor) || !ctx.holds_turn) {
        return Some(format!("It is not {actor}'s turn."));
    }

    None
}

fn apply_move(state: &SceneState, actor: &ActorId, to: Destination) -> Reduction {
    if let Destination::Grid(pos) = to {
        if let Some(other) = state.occupant_of(pos).filter(|o| *o != actor) {
            return Reduction::rejected(
                state,
                format!("{actor} cannot move there; {other} is in the way."),
            );
        }
    }

    let mut next = state.clone();
    next.positions.insert(actor.clone(), Position::from(to));
    Reduction::applied(next)
}

// =============================================================================
// DM ACTIONS
// =============================================================================

/// Apply a narrator directive.
pub fn apply_dm_action(state: &SceneState, action: &DmAction) -> Reduction {
    match action {
        DmAction::CallForCheck { actor, .. } => {
            if state.is_participant(actor) {
                Reduction::unchanged(state)
            } else {
                Reduction::rejected(state, format!("{actor} is not here to make a check."))
            }
        }
        DmAction::ApplyDamage { target, amount, .. } => {
            if !state.is_participant(target) {
                return Reduction::rejected(state, format!("{target} is not here to be harmed."));
            }
            let mut next = state.clone();
            let wounds = next.wounds.entry(target.clone()).or_insert(0);
            *wounds = wounds.saturating_add(*amount);
            Reduction::applied(next)
        }
        DmAction::AdvanceClock { clock, ticks, .. } => {
            let mut next = state.clone();
            match next.clocks.get_mut(clock) {
                Some(c) => {
                    c.current = c.current.saturating_add(*ticks).min(c.max);
                    Reduction::applied(next)
                }
                None => Reduction::rejected(state, format!("There is no clock called {clock}.")),
            }
        }
        DmAction::Narrate { .. } => Reduction::unchanged(state),
        DmAction::StartEncounter { initiative } => start_encounter(state, initiative),
        DmAction::EndEncounter => {
            let mut next = state.clone();
            next.initiative.clear();
            next.turn_index = 0;
            next.round = 0;
            Reduction::applied(next)
        }
        DmAction::AddClock { clock } => {
            if state.clocks.contains_key(&clock.id) {
                return Reduction::rejected(state, format!("Clock {} already exists.", clock.id));
            }
            let mut next = state.clone();
            let mut clock = clock.clone();
            clock.current = clock.current.min(clock.max);
            next.clocks.insert(clock.id.clone(), clock);
            Reduction::applied(next)
        }
        DmAction::AddHazard { hazard } => {
            let mut next = state.clone();
            next.hazards.insert(hazard.id.clone(), hazard.clone());
            Reduction::applied(next)
        }
        DmAction::RemoveHazard { hazard } => {
            let mut next = state.clone();
            match next.hazards.remove(hazard) {
                Some(_) => Reduction::applied(next),
                None => Reduction::rejected(state, format!("There is no hazard called {hazard}.")),
            }
        }
        DmAction::AddParticipant { actor } => {
            if state.is_participant(actor) {
                return Reduction::rejected(state, format!("{actor} is already here."));
            }
            let mut next = state.clone();
            next.participants.insert(actor.clone());
            Reduction::applied(next)
        }
    }
}

fn start_encounter(state: &SceneState, initiative: &[ActorId]) -> Reduction {
    if initiative.is_empty() {
        return Reduction::rejected(state, "An encounter needs at least one combatant.");
    }
    if let Some(stranger) = initiative.iter().find(|a| !state.is_participant(a)) {
        return Reduction::rejected(state, format!("{stranger} is not part of this scene."));
    }
    for (i, actor) in initiative.iter().enumerate() {
        if initiative[..i].contains(actor) {
            return Reduction::rejected(state, format!("{actor} cannot act twice per round."));
        }
    }

    let mut next = state.clone();
    next.initiative = initiative.to_vec();
    next.turn_index = 0;
    next.round = 1;
    Reduction::applied(next)
}

// =============================================================================
// RULES EVENTS
// =============================================================================

/// Apply a system-derived fact.
pub fn apply_rules_event(state: &SceneState, event: &RulesEvent) -> Reduction {
    match event {
        RulesEvent::Roll { actor, .. } | RulesEvent::ReactionWindowOpened { actor, .. } => {
            if state.is_participant(actor) {
                Reduction::unchanged(state)
            } else {
                Reduction::rejected(state, format!("{actor} is not part of this scene."))
            }
        }
        RulesEvent::TurnStart { actor } => {
            if !state.in_combat() {
                return Reduction::rejected(state, "No encounter is under way.");
            }
            match state.initiative.iter().position(|a| a == actor) {
                Some(index) => {
                    let mut next = state.clone();
                    next.turn_index = index;
                    Reduction::applied(next)
                }
                None => Reduction::rejected(state, format!("{actor} is not in the initiative order.")),
            }
        }
        RulesEvent::TurnEnd { actor } => {
            if state.active_actor() != Some(actor) {
                return Reduction::rejected(state, format!("It is not {actor}'s turn to end."));
            }
            let mut next = state.clone();
            next.turn_index += 1;
            if next.turn_index >= next.initiative.len() {
                next.turn_index = 0;
                next.round = next.round.saturating_add(1);
            }
            Reduction::applied(next)
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
