//! Turn Lock and Reaction Windows
//!
//! A turn is a mutual-exclusion resource: exactly one actor may act on a
//! scene at a time. Reaction windows are the bounded, time-limited exception.
//!
//! ```text
//!   Unlocked ──try_lock(a)──▶ Locked(a) ──release(a)──▶ Unlocked
//!                              │  ▲
//!                 try_lock(a) ─┘  │  try_lock(b) fails, state untouched
//!                                    release(b) is a silent no-op
//! ```

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::game::ids::{ActorId, SceneId};

/// Turn lock state for one scene.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnLock {
    /// Nobody holds the turn.
    Unlocked,
    /// The named actor holds the turn.
    Locked(ActorId),
}

/// Time-bounded permission to act outside turn order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionWindow {
    /// Scene the window belongs to.
    pub scene_id: SceneId,
    /// Who may react.
    pub for_actor: ActorId,
    /// What triggered it.
    pub reason: String,
    /// Closing instant (exclusive).
    pub expires_at: DateTime<Utc>,
}

impl ReactionWindow {
    /// Whether the window is still open at `now`.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Per-scene turn locks and reaction windows.
///
/// Thread-safe; every operation takes the internal lock once, so check and
/// set are atomic with respect to concurrent callers.
#[derive(Debug, Default)]
pub struct TurnControl {
    locks: Mutex<BTreeMap<SceneId, ActorId>>,
    windows: Mutex<BTreeMap<SceneId, Vec<ReactionWindow>>>,
}

impl TurnControl {
    /// Create empty turn control.
    pub fn new() -> Self {
        Self::default()
    }

    fn locks(&self) -> MutexGuard<'_, BTreeMap<SceneId, ActorId>> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn windows(&self) -> MutexGuard<'_, BTreeMap<SceneId, Vec<ReactionWindow>>> {
        self.windows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Try to take the turn.
    ///
    /// Succeeds if unlocked or already held by `actor`; fails without
    /// touching state if another actor holds it.
    pub fn try_lock(&self, scene: &SceneId, actor: &ActorId) -> bool {
        let mut locks = self.locks();
        match locks.get(scene) {
            None => {
                locks.insert(scene.clone(), actor.clone());
                debug!(scene = %scene, actor = %actor, "turn locked");
                true
            }
            Some(holder) => holder == actor,
        }
    }

    /// Give up the turn. No-op unless `actor` is the holder.
    pub fn release(&self, scene: &SceneId, actor: &ActorId) {
        let mut locks = self.locks();
        if locks.get(scene) == Some(actor) {
            locks.remove(scene);
            debug!(scene = %scene, actor = %actor, "turn released");
        }
    }

    /// Current lock state.
    pub fn lock_state(&self, scene: &SceneId) -> TurnLock {
        match self.locks().get(scene) {
            Some(holder) => TurnLock::Locked(holder.clone()),
            None => TurnLock::Unlocked,
        }
    }

    /// Current holder, if any.
    pub fn holder(&self, scene: &SceneId) -> Option<ActorId> {
        self.locks().get(scene).cloned()
    }

    /// Open a reaction window.
    pub fn open_reaction_window(&self, window: ReactionWindow) {
        debug!(
            scene = %window.scene_id,
            actor = %window.for_actor,
            expires_at = %window.expires_at,
            "reaction window opened"
        );
        self.windows()
            .entry(window.scene_id.clone())
            .or_default()
            .push(window);
    }

    /// Active window for `actor` at `now`.
    ///
    /// Expired windows are pruned on read, whether or not anyone cleared them.
    pub fn get_reaction_window(
        &self,
        scene: &SceneId,
        actor: &ActorId,
        now: DateTime<Utc>,
    ) -> Option<ReactionWindow> {
        let mut windows = self.windows();
        let list = windows.get_mut(scene)?;
        list.retain(|w| w.is_open_at(now));
        list.iter().find(|w| &w.for_actor == actor).cloned()
    }

    /// Close every window for `actor`. Returns whether any was open.
    pub fn clear_reaction_window(&self, scene: &SceneId, actor: &ActorId) -> bool {
        let mut windows = self.windows();
        match windows.get_mut(scene) {
            Some(list) => {
                let before = list.len();
                list.retain(|w| &w.for_actor != actor);
                before != list.len()
            }
            None => false,
        }
    }

    /// Drop all lock and window state for a closed scene.
    pub fn forget_scene(&self, scene: &SceneId) {
        self.locks().remove(scene);
        self.windows().remove(scene);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn scene() -> SceneId {
        SceneId::from("scene-1")
    }

    fn actor(id: &str) -> ActorId {
        ActorId::from(id)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_lock_reentry_and_contention() {
        let turns = TurnControl::new();
        assert_eq!(turns.lock_state(&scene()), TurnLock::Unlocked);

        assert!(turns.try_lock(&scene(), &actor("pc1")));
        assert!(turns.try_lock(&scene(), &actor("pc1")));
        assert!(!turns.try_lock(&scene(), &actor("npc1")));
        assert_eq!(turns.lock_state(&scene()), TurnLock::Locked(actor("pc1")));
    }

    #[test]
    fn test_release_by_non_holder_is_noop() {
        let turns = TurnControl::new();
        turns.try_lock(&scene(), &actor("pc1"));

        turns.release(&scene(), &actor("npc1"));
        assert_eq!(turns.holder(&scene()), Some(actor("pc1")));

        turns.release(&scene(), &actor("pc1"));
        assert_eq!(turns.holder(&scene()), None);
        assert!(turns.try_lock(&scene(), &actor("npc1")));
    }

    #[test]
    fn test_scenes_are_independent() {
        let turns = TurnControl::new();
        assert!(turns.try_lock(&SceneId::from("a"), &actor("pc1")));
        assert!(turns.try_lock(&SceneId::from("b"), &actor("npc1")));
    }

    #[test]
    fn test_concurrent_try_lock_single_winner() {
        let turns = Arc::new(TurnControl::new());
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let turns = turns.clone();
                let winners = winners.clone();
                std::thread::spawn(move || {
                    if turns.try_lock(&scene(), &actor(&format!("actor{i}"))) {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reaction_window_lazy_expiry() {
        let turns = TurnControl::new();
        turns.open_reaction_window(ReactionWindow {
            scene_id: scene(),
            for_actor: actor("pc1"),
            reason: "opportunity attack".into(),
            expires_at: t0() + Duration::seconds(6),
        });

        assert!(turns
            .get_reaction_window(&scene(), &actor("pc1"), t0() + Duration::seconds(5))
            .is_some());
        assert!(turns
            .get_reaction_window(&scene(), &actor("npc1"), t0())
            .is_none());
        assert!(turns
            .get_reaction_window(&scene(), &actor("pc1"), t0() + Duration::seconds(6))
            .is_none());
        // Pruned: even an earlier read no longer finds it.
        assert!(turns
            .get_reaction_window(&scene(), &actor("pc1"), t0())
            .is_none());
    }

    #[test]
    fn test_clear_reaction_window() {
        let turns = TurnControl::new();
        turns.open_reaction_window(ReactionWindow {
            scene_id: scene(),
            for_actor: actor("pc1"),
            reason: "shield".into(),
            expires_at: t0() + Duration::seconds(6),
        });

        assert!(turns.clear_reaction_window(&scene(), &actor("pc1")));
        assert!(!turns.clear_reaction_window(&scene(), &actor("pc1")));
        assert!(turns.get_reaction_window(&scene(), &actor("pc1"), t0()).is_none());
    }

    #[test]
    fn test_forget_scene() {
        let turns = TurnControl::new();
        turns.try_lock(&scene(), &actor("pc1"));
        turns.forget_scene(&scene());
        assert_eq!(turns.lock_state(&scene()), TurnLock::Unlocked);
    }
}
