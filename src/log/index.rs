//! In-memory chain index shared by every backend.

use std::collections::{BTreeMap, BTreeSet};

use crate::game::ids::{IdempotencyKey, SceneId};
use crate::log::{EventLogEntry, LogError, LogHead};

#[derive(Debug, Default)]
struct SceneChain {
    positions: Vec<usize>,
    head: LogHead,
}

/// Entries, per-scene chain heads and consumed keys.
#[derive(Debug, Default)]
pub(crate) struct LogIndex {
    entries: Vec<EventLogEntry>,
    scenes: BTreeMap<SceneId, SceneChain>,
    processed: BTreeSet<(SceneId, IdempotencyKey)>,
}

impl LogIndex {
    pub(crate) fn has_processed(&self, scene: &SceneId, key: &IdempotencyKey) -> bool {
        // Tuple lookup needs owned parts; keys are short.
        self.processed.contains(&(scene.clone(), key.clone()))
    }

    pub(crate) fn mark(&mut self, scene: &SceneId, key: &IdempotencyKey) -> bool {
        self.processed.insert((scene.clone(), key.clone()))
    }

    pub(crate) fn head(&self, scene: &SceneId) -> LogHead {
        self.scenes.get(scene).map(|c| c.head).unwrap_or_default()
    }

    /// Reject an entry that would break idempotency or the chain.
    pub(crate) fn check(&self, entry: &EventLogEntry) -> Result<(), LogError> {
        let scene = &entry.scene_id;

        if let Some(key) = &entry.idempotency_key {
            if self.has_processed(scene, key) {
                return Err(LogError::DuplicateKey {
                    scene: scene.clone(),
                    key: key.clone(),
                });
            }
        }

        let head = self.head(scene);
        if entry.sequence != head.next_sequence {
            return Err(LogError::SequenceGap {
                scene: scene.clone(),
                expected: head.next_sequence,
                got: entry.sequence,
            });
        }
        if head.last_hash.is_some_and(|last| last != entry.state_hash_before) {
            return Err(LogError::ChainBroken {
                scene: scene.clone(),
                sequence: entry.sequence,
            });
        }
        Ok(())
    }

    /// Record an entry already accepted by [`LogIndex::check`].
    pub(crate) fn commit(&mut self, entry: EventLogEntry) {
        if let Some(key) = &entry.idempotency_key {
            self.mark(&entry.scene_id, key);
        }
        let chain = self.scenes.entry(entry.scene_id.clone()).or_default();
        chain.positions.push(self.entries.len());
        chain.head = LogHead {
            next_sequence: entry.sequence + 1,
            last_hash: Some(entry.state_hash_after),
        };
        self.entries.push(entry);
    }

    pub(crate) fn all(&self) -> Vec<EventLogEntry> {
        self.entries.clone()
    }

    pub(crate) fn for_scene(&self, scene: &SceneId) -> Vec<EventLogEntry> {
        self.scenes
            .get(scene)
            .map(|c| c.positions.iter().map(|&i| self.entries[i].clone()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
