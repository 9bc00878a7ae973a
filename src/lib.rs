//! # Scene Engine
//!
//! Authoritative, replayable scene and turn engine for narrated tabletop
//! sessions.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       SCENE ENGINE                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                 │
//! │  ├── hash.rs     - Canonical state hashing                  │
//! │  ├── rng.rs      - HMAC commitment dice                     │
//! │  ├── dice.rs     - Dice formulas (2d6+3)                    │
//! │  └── clock.rs    - Injected wall time                       │
//! │                                                             │
//! │  game/           - Scene model and rules (deterministic)    │
//! │  ├── state.rs    - Scene state                              │
//! │  ├── intent.rs   - Player intents                           │
//! │  ├── events.rs   - DM actions and rules events              │
//! │  ├── reducer.rs  - Pure state transitions                   │
//! │  ├── turn.rs     - Turn lock and reaction windows           │
//! │  └── validation.rs - Rule category checks                   │
//! │                                                             │
//! │  log/            - Hash-chained event log                   │
//! │  proof/          - Seed commitment, roll ledger, replay     │
//! │  engine/         - Orchestrator and scene registry          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! `core/` and `game/` are **100% deterministic**:
//! - No HashMap (BTreeMap/BTreeSet for sorted iteration)
//! - No system time (a [`Clock`] is always injected)
//! - All randomness from committed, recomputable HMAC rolls
//!
//! Given the same starting state and the same ordered inputs, two engines
//! produce byte-identical states and byte-identical hash chains.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod game;
pub mod log;
pub mod proof;

// Re-export commonly used types
pub use crate::config::EngineConfig;
pub use crate::core::clock::{Clock, FixedClock, LogicalClock, SystemClock};
pub use crate::core::hash::StateHash;
pub use crate::core::rng::ServerSeed;
pub use crate::engine::{RollRequest, SceneEngine, SceneRegistry};
pub use crate::error::EngineError;
pub use crate::game::{DmAction, Intent, RulesEvent, SceneState};
pub use crate::log::{EventLog, EventLogEntry, FileEventLog, MemoryEventLog, Outcome};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
