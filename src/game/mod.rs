//! Game Logic Module
//!
//! The scene data model and every game rule. 100% deterministic.
//!
//! ## Module Structure
//!
//! - `ids`: Identifier newtypes
//! - `state`: Scene state, clocks, hazards, canonical hashing
//! - `intent`: Player intents
//! - `events`: DM actions and rules events
//! - `reducer`: Pure state transitions
//! - `turn`: Turn lock and reaction windows
//! - `validation`: Closed rule-category checks

pub mod events;
pub mod ids;
pub mod intent;
pub mod reducer;
pub mod state;
pub mod turn;
pub mod validation;

// Re-export key types
pub use events::{Advantage, DmAction, RollKind, RulesEvent};
pub use ids::{ActorId, ClockId, HazardId, IdempotencyKey, LocationId, SceneId};
pub use intent::{Destination, GridPos, Intent, IntentKind, RangeBand};
pub use reducer::{apply_dm_action, apply_intent, apply_rules_event, IntentContext, Reduction};
pub use state::{Hazard, Position, SceneClock, SceneState, StateError};
pub use turn::{ReactionWindow, TurnControl, TurnLock};
pub use validation::{RollTarget, RuleCheck, RuleVerdict};
