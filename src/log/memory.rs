//! In-memory event log for tests and replay.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::trace;

use crate::game::ids::{IdempotencyKey, SceneId};
use crate::log::index::LogIndex;
use crate::log::{EventLog, EventLogEntry, LogError, LogHead};

/// Volatile log. Readers proceed concurrently; appends take the write lock
/// so check and commit are a single step.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    index: RwLock<LogIndex>,
}

impl MemoryEventLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total entries across scenes.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether nothing has been appended.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, LogIndex> {
        self.index.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, LogIndex> {
        self.index.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EventLog for MemoryEventLog {
    fn has_processed(&self, scene: &SceneId, key: &IdempotencyKey) -> Result<bool, LogError> {
        Ok(self.read().has_processed(scene, key))
    }

    fn mark_processed(&self, scene: &SceneId, key: &IdempotencyKey) -> Result<bool, LogError> {
        Ok(self.write().mark(scene, key))
    }

    fn append(&self, entry: &EventLogEntry) -> Result<(), LogError> {
        let mut index = self.write();
        index.check(entry)?;
        index.commit(entry.clone());
        trace!(scene = %entry.scene_id, sequence = entry.sequence, "entry appended");
        Ok(())
    }

    fn all(&self) -> Result<Vec<EventLogEntry>, LogError> {
        Ok(self.read().all())
    }

    fn for_scene(&self, scene: &SceneId) -> Result<Vec<EventLogEntry>, LogError> {
        Ok(self.read().for_scene(scene))
    }

    fn head(&self, scene: &SceneId) -> Result<LogHead, LogError> {
        Ok(self.read().head(scene))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::entry::fixtures::{entry, h};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_append_and_read_back() {
        let log = MemoryEventLog::new();
        log.append(&entry("a", 0, Some("k1"))).unwrap();
        log.append(&entry("b", 0, None)).unwrap();
        log.append(&entry("a", 1, None)).unwrap();

        assert_eq!(log.len(), 3);
        let a = log.for_scene(&SceneId::from("a")).unwrap();
        assert_eq!(a.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(log.all().unwrap()[1].scene_id, SceneId::from("b"));

        let head = log.head(&SceneId::from("a")).unwrap();
        assert_eq!(head.next_sequence, 2);
        assert_eq!(head.last_hash, Some(h(2)));
        assert_eq!(log.head(&SceneId::from("zzz")).unwrap(), LogHead::default());
    }

    #[test]
    fn test_append_marks_key() {
        let log = MemoryEventLog::new();
        let scene = SceneId::from("a");
        let key = IdempotencyKey::from("k1");

        assert!(!log.has_processed(&scene, &key).unwrap());
        log.append(&entry("a", 0, Some("k1"))).unwrap();
        assert!(log.has_processed(&scene, &key).unwrap());
        // Keys are per scene.
        assert!(!log.has_processed(&SceneId::from("b"), &key).unwrap());

        let err = log.append(&entry("a", 1, Some("k1"))).unwrap_err();
        assert!(matches!(err, LogError::DuplicateKey { .. }));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_mark_processed_standalone() {
        let log = MemoryEventLog::new();
        let scene = SceneId::from("a");
        let key = IdempotencyKey::from("imported");
        assert!(log.mark_processed(&scene, &key).unwrap());
        assert!(!log.mark_processed(&scene, &key).unwrap());
        assert!(log.has_processed(&scene, &key).unwrap());
    }

    #[test]
    fn test_rejects_gap_and_broken_chain() {
        let log = MemoryEventLog::new();
        log.append(&entry("a", 0, None)).unwrap();

        let gap = log.append(&entry("a", 2, None)).unwrap_err();
        assert!(matches!(gap, LogError::SequenceGap { expected: 1, got: 2, .. }));

        let mut forged = entry("a", 1, None);
        forged.state_hash_before = h(99);
        let broken = log.append(&forged).unwrap_err();
        assert!(matches!(broken, LogError::ChainBroken { sequence: 1, .. }));

        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_concurrent_same_key_single_winner() {
        let log = Arc::new(MemoryEventLog::new());
        let wins = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let log = log.clone();
                let wins = wins.clone();
                std::thread::spawn(move || {
                    if log.append(&entry("a", 0, Some("k1"))).is_ok() {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert_eq!(log.len(), 1);
    }

    proptest! {
        #[test]
        fn test_chain_holds_for_any_length(n in 1u64..64) {
            let log = MemoryEventLog::new();
            for seq in 0..n {
                log.append(&entry("a", seq, None)).unwrap();
            }
            let entries = log.for_scene(&SceneId::from("a")).unwrap();
            for pair in entries.windows(2) {
                prop_assert_eq!(pair[1].state_hash_before, pair[0].state_hash_after);
            }
        }
    }
}
