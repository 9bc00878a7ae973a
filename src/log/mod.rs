//! Event Log Module
//!
//! Append-only, per-scene hash-chained record of every processed input.
//!
//! ```text
//!   append(entry)
//!      │
//!      ├─ key already consumed?     ──▶ Err(DuplicateKey)
//!      ├─ sequence != head.next?    ──▶ Err(SequenceGap)
//!      ├─ before != head.last_hash? ──▶ Err(ChainBroken)
//!      └─ write entry + mark key (all-or-nothing)
//! ```
//!
//! Backends:
//! - [`MemoryEventLog`]: tests and replay
//! - [`FileEventLog`]: durable JSON lines

pub mod entry;
pub mod file;
mod index;
pub mod memory;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::hash::StateHash;
use crate::game::ids::{IdempotencyKey, SceneId};

pub use entry::{entry_id, EventLogEntry, LogPayload, Outcome};
pub use file::FileEventLog;
pub use memory::MemoryEventLog;

/// Errors raised by log backends.
#[derive(Debug, Error)]
pub enum LogError {
    /// The entry's key was consumed by a concurrent submission.
    #[error("idempotency key {key} already processed in scene {scene}")]
    DuplicateKey {
        /// Scene.
        scene: SceneId,
        /// Key.
        key: IdempotencyKey,
    },

    /// The entry does not directly follow the scene's last entry.
    #[error("scene {scene} expected sequence {expected}, got {got}")]
    SequenceGap {
        /// Scene.
        scene: SceneId,
        /// Next valid sequence.
        expected: u64,
        /// Sequence supplied.
        got: u64,
    },

    /// The entry's before-hash does not match the chain head.
    #[error("scene {scene} hash chain broken at sequence {sequence}")]
    ChainBroken {
        /// Scene.
        scene: SceneId,
        /// Offending sequence.
        sequence: u64,
    },

    /// A stored line could not be decoded.
    #[error("log corrupt at line {line}: {reason}")]
    Corrupt {
        /// 1-based line number.
        line: usize,
        /// Decoder message.
        reason: String,
    },

    /// Storage I/O failed.
    #[error("log I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding failed.
    #[error("log encoding error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Tip of a scene's chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogHead {
    /// Sequence the next entry must carry.
    pub next_sequence: u64,
    /// `state_hash_after` of the last entry, if any.
    pub last_hash: Option<StateHash>,
}

/// Pluggable event log storage.
///
/// The only hard contract is that `append` plus key marking is atomic and
/// that per-scene retrieval is ordered by sequence.
pub trait EventLog: Send + Sync {
    /// Whether `key` has been consumed in `scene`.
    fn has_processed(&self, scene: &SceneId, key: &IdempotencyKey) -> Result<bool, LogError>;

    /// Mark a key consumed without an entry. Returns `false` if it already was.
    fn mark_processed(&self, scene: &SceneId, key: &IdempotencyKey) -> Result<bool, LogError>;

    /// Append an entry, marking its idempotency key in the same step.
    fn append(&self, entry: &EventLogEntry) -> Result<(), LogError>;

    /// Every entry across scenes, in append order.
    fn all(&self) -> Result<Vec<EventLogEntry>, LogError>;

    /// One scene's entries, ordered by sequence.
    fn for_scene(&self, scene: &SceneId) -> Result<Vec<EventLogEntry>, LogError>;

    /// One scene's chain tip.
    fn head(&self, scene: &SceneId) -> Result<LogHead, LogError>;
}
