//! Engine Module
//!
//! The stateful shell around the pure game core.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  SceneRegistry   one async mutex per scene           │
//! │      │                                               │
//! │      ▼                                               │
//! │  SceneEngine     idempotency, turn lock, hashing     │
//! │      │                                               │
//! │      ├──▶ game::reducer   (pure rules)               │
//! │      ├──▶ log::EventLog   (hash-chained append)      │
//! │      └──▶ proof::*        (seed commitment, ledger)  │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod orchestrator;
pub mod registry;
pub mod snapshot;

// Re-export key types
pub use orchestrator::{EngineBuilder, FormulaRoll, RollRequest, RollResult, SceneEngine};
pub use registry::{ClosedScene, SceneRegistry, SceneUpdate};
pub use snapshot::{DigestTracker, SceneDigest};
