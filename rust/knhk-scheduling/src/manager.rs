//! Registries of schedulables, indexed for fast traversal by pid, priority,
//! stable state, sync state and language.
//!
//! The original "retained iterator" trick — registering a live cursor with
//! an index so concurrent removals skip past it — is replaced here with a
//! copy-on-read snapshot per traversal, per the design notes: `first`/
//! `next` still describe the contract, but each call to `snapshot` takes
//! an independent, stable list of uids.
//!
//! Each dimension lives behind its own lock (`case_number_map`/`case_id_map`
//! style bidirectional index pair, generalized to five dimensions) so a
//! scan by state doesn't block an unrelated insert, or a pid lookup from
//! contending with a priority scan.

use crate::error::{Result, SchedulingError};
use crate::schedulable::{Language, Schedulable, StableState, SyncState};
use crate::working_mode::WorkingMode;
use knhk_resources::{ResourceAccounter, ViewToken};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::instrument;

pub struct SchedulableSnapshot {
    uids: Vec<u32>,
    cursor: usize,
}

impl SchedulableSnapshot {
    pub fn next(&mut self) -> Option<u32> {
        let uid = self.uids.get(self.cursor).copied();
        self.cursor += 1;
        uid
    }

    pub fn len(&self) -> usize {
        self.uids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uids.is_empty()
    }
}

fn snapshot_of(mut uids: Vec<u32>) -> SchedulableSnapshot {
    uids.sort();
    SchedulableSnapshot { uids, cursor: 0 }
}

pub struct ApplicationManager {
    schedulables: RwLock<HashMap<u32, Schedulable>>,
    by_pid: RwLock<HashMap<u32, HashSet<u32>>>,
    by_priority: RwLock<HashMap<u8, HashSet<u32>>>,
    by_state: RwLock<HashMap<StableState, HashSet<u32>>>,
    by_sync_state: RwLock<HashMap<SyncState, HashSet<u32>>>,
    by_language: RwLock<HashMap<Language, HashSet<u32>>>,
}

impl Default for ApplicationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationManager {
    pub fn new() -> Self {
        Self {
            schedulables: RwLock::new(HashMap::new()),
            by_pid: RwLock::new(HashMap::new()),
            by_priority: RwLock::new(HashMap::new()),
            by_state: RwLock::new(HashMap::new()),
            by_sync_state: RwLock::new(HashMap::new()),
            by_language: RwLock::new(HashMap::new()),
        }
    }

    async fn reindex_state(&self, uid: u32, old: StableState, new: StableState) {
        if old == new {
            return;
        }
        let mut idx = self.by_state.write().await;
        if let Some(set) = idx.get_mut(&old) {
            set.remove(&uid);
        }
        idx.entry(new).or_default().insert(uid);
    }

    async fn reindex_sync_state(&self, uid: u32, old: SyncState, new: SyncState) {
        if old == new {
            return;
        }
        let mut idx = self.by_sync_state.write().await;
        if let Some(set) = idx.get_mut(&old) {
            set.remove(&uid);
        }
        idx.entry(new).or_default().insert(uid);
    }

    #[instrument(skip(self, s))]
    pub async fn create(&self, mut s: Schedulable) -> Result<u32> {
        let uid = s.uid;
        let pid = s.pid;
        let priority = s.priority;
        let language = s.language;
        s.enable().ok(); // a freshly created EXC is immediately enabled
        let state = s.state();
        let sync_state = s.sync_state();

        self.schedulables.write().await.insert(uid, s);
        self.by_pid.write().await.entry(pid).or_default().insert(uid);
        self.by_priority.write().await.entry(priority).or_default().insert(uid);
        self.by_language.write().await.entry(language).or_default().insert(uid);
        self.by_state.write().await.entry(state).or_default().insert(uid);
        self.by_sync_state.write().await.entry(sync_state).or_default().insert(uid);
        Ok(uid)
    }

    pub async fn enable(&self, uid: u32) -> Result<()> {
        self.with_mut(uid, |s| s.enable()).await?
    }

    /// Disable with or without release: release additionally tears down
    /// any resources the EXC currently holds, modeled here by leaving that
    /// to the caller (who owns the accounter) after observing the state
    /// transition this returns.
    pub async fn disable(&self, uid: u32) -> Result<()> {
        self.with_mut(uid, |s| s.disable()).await
    }

    pub async fn terminate(&self, uid: u32) -> Result<()> {
        self.with_mut(uid, |s| s.terminate()).await
    }

    /// All uids registered under `pid`, across every exc_id. The CLI
    /// resolves a bare pid to whatever EXCs it owns through this index
    /// rather than guessing a single exc_id.
    pub async fn uids_for_pid(&self, pid: u32) -> Vec<u32> {
        self.by_pid
            .read()
            .await
            .get(&pid)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn count_language(&self, language: Language) -> usize {
        self.by_language
            .read()
            .await
            .get(&language)
            .map(|set| set.len())
            .unwrap_or(0)
    }

    /// Removes FINISHED entries. Run from a deferred coalescing cleanup
    /// task, never inline with a scheduling round.
    #[instrument(skip(self))]
    pub async fn cleanup_finished(&self) -> Vec<u32> {
        let finished: Vec<u32> = self
            .by_state
            .read()
            .await
            .get(&StableState::Finished)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        if finished.is_empty() {
            return finished;
        }

        let mut map = self.schedulables.write().await;
        let mut by_pid = self.by_pid.write().await;
        let mut by_priority = self.by_priority.write().await;
        let mut by_language = self.by_language.write().await;
        let mut by_state = self.by_state.write().await;
        let mut by_sync_state = self.by_sync_state.write().await;
        for uid in &finished {
            let Some(s) = map.remove(uid) else { continue };
            if let Some(set) = by_pid.get_mut(&s.pid) {
                set.remove(uid);
            }
            if let Some(set) = by_priority.get_mut(&s.priority) {
                set.remove(uid);
            }
            if let Some(set) = by_language.get_mut(&s.language) {
                set.remove(uid);
            }
            if let Some(set) = by_state.get_mut(&StableState::Finished) {
                set.remove(uid);
            }
            if let Some(set) = by_sync_state.get_mut(&s.sync_state()) {
                set.remove(uid);
            }
        }
        finished
    }

    pub async fn get(&self, uid: u32) -> Option<Schedulable> {
        self.schedulables.read().await.get(&uid).cloned()
    }

    /// Mutates the schedulable under the primary lock, then reindexes it
    /// against whatever `f` changed of its stable/sync state. `f` must stay
    /// synchronous: an async mutation (e.g. one that itself touches the
    /// accounter) needs its own method, like `schedule_request` below.
    pub async fn with_mut<F, R>(&self, uid: u32, f: F) -> Result<R>
    where
        F: FnOnce(&mut Schedulable) -> R,
    {
        let (result, old_state, new_state, old_sync, new_sync) = {
            let mut map = self.schedulables.write().await;
            let s = map.get_mut(&uid).ok_or(SchedulingError::NotFound(uid))?;
            let old_state = s.state();
            let old_sync = s.sync_state();
            let result = f(s);
            (result, old_state, s.state(), old_sync, s.sync_state())
        };
        self.reindex_state(uid, old_state, new_state).await;
        self.reindex_sync_state(uid, old_sync, new_sync).await;
        Ok(result)
    }

    /// Books `awm` for `uid` and moves it into SYNC. Kept on the manager
    /// rather than reached through `with_mut`, since the accounter call
    /// inside `Schedulable::schedule_request` is itself async and cannot
    /// be driven to completion from inside a synchronous closure.
    #[instrument(skip(self, awm, accounter))]
    pub async fn schedule_request(
        &self,
        uid: u32,
        awm: WorkingMode,
        accounter: &ResourceAccounter,
        view: ViewToken,
    ) -> Result<()> {
        let (result, old_state, new_state, old_sync, new_sync) = {
            let mut map = self.schedulables.write().await;
            let s = map.get_mut(&uid).ok_or(SchedulingError::NotFound(uid))?;
            let old_state = s.state();
            let old_sync = s.sync_state();
            let result = s.schedule_request(awm, accounter, view).await;
            (result, old_state, s.state(), old_sync, s.sync_state())
        };
        self.reindex_state(uid, old_state, new_state).await;
        self.reindex_sync_state(uid, old_sync, new_sync).await;
        result
    }

    pub async fn snapshot_by_state(&self, state: StableState) -> SchedulableSnapshot {
        let idx = self.by_state.read().await;
        let uids = idx.get(&state).map(|s| s.iter().copied().collect()).unwrap_or_default();
        snapshot_of(uids)
    }

    pub async fn snapshot_by_sync_state(&self, sync_state: SyncState) -> SchedulableSnapshot {
        let idx = self.by_sync_state.read().await;
        let uids = idx.get(&sync_state).map(|s| s.iter().copied().collect()).unwrap_or_default();
        snapshot_of(uids)
    }

    /// Highest priority first (lowest numeric value = highest priority),
    /// among a given stable state — the ordering the scheduler manager's
    /// policy contract relies on. Intersects the state and priority
    /// indices rather than scanning the full schedulable table.
    pub async fn snapshot_by_priority(&self, state: StableState) -> SchedulableSnapshot {
        let state_uids: HashSet<u32> = self
            .by_state
            .read()
            .await
            .get(&state)
            .cloned()
            .unwrap_or_default();
        if state_uids.is_empty() {
            return snapshot_of(Vec::new());
        }

        let by_priority = self.by_priority.read().await;
        let mut entries: Vec<(u8, u32)> = by_priority
            .iter()
            .flat_map(|(priority, uids)| {
                uids.iter()
                    .filter(|uid| state_uids.contains(uid))
                    .map(move |uid| (*priority, *uid))
            })
            .collect();
        entries.sort();
        snapshot_of(entries.into_iter().map(|(_, uid)| uid).collect())
    }

    pub async fn all_uids(&self) -> Vec<u32> {
        self.schedulables.read().await.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.schedulables.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedulable::Language;

    fn schedulable(pid: u32, prio: u8) -> Schedulable {
        Schedulable::new(pid, 0, format!("app{pid}"), Language::Native, prio)
    }

    #[tokio::test]
    async fn create_enables_immediately() {
        let mgr = ApplicationManager::new();
        let uid = mgr.create(schedulable(1, 0)).await.unwrap();
        let s = mgr.get(uid).await.unwrap();
        assert_eq!(s.state(), StableState::Ready);
    }

    #[tokio::test]
    async fn priority_snapshot_orders_highest_first() {
        let mgr = ApplicationManager::new();
        mgr.create(schedulable(1, 5)).await.unwrap();
        mgr.create(schedulable(2, 0)).await.unwrap();
        mgr.create(schedulable(3, 2)).await.unwrap();

        let mut snap = mgr.snapshot_by_priority(StableState::Ready).await;
        let first = mgr.get(snap.next().unwrap()).await.unwrap();
        assert_eq!(first.priority, 0);
    }

    #[tokio::test]
    async fn cleanup_removes_only_finished() {
        let mgr = ApplicationManager::new();
        let uid = mgr.create(schedulable(1, 0)).await.unwrap();
        mgr.terminate(uid).await.unwrap();
        mgr.create(schedulable(2, 0)).await.unwrap();

        let removed = mgr.cleanup_finished().await;
        assert_eq!(removed, vec![uid]);
        assert_eq!(mgr.len().await, 1);
    }

    #[tokio::test]
    async fn snapshot_is_stable_across_concurrent_removal() {
        let mgr = ApplicationManager::new();
        let uid1 = mgr.create(schedulable(1, 0)).await.unwrap();
        let _uid2 = mgr.create(schedulable(2, 0)).await.unwrap();

        let mut snap = mgr.snapshot_by_state(StableState::Ready).await;
        mgr.terminate(uid1).await.unwrap();
        mgr.cleanup_finished().await;

        // the snapshot still reports both uids even though one was removed
        assert_eq!(snap.len(), 2);
        assert!(snap.next().is_some());
        assert!(snap.next().is_some());
    }

    #[tokio::test]
    async fn cleanup_drops_the_finished_entry_from_every_index() {
        let mgr = ApplicationManager::new();
        let uid = mgr.create(schedulable(7, 3)).await.unwrap();
        mgr.terminate(uid).await.unwrap();
        mgr.cleanup_finished().await;

        assert!(mgr.uids_for_pid(7).await.is_empty());
        assert_eq!(mgr.snapshot_by_priority(StableState::Ready).await.len(), 0);
        assert_eq!(mgr.count_language(Language::Native).await, 0);
    }

    #[tokio::test]
    async fn uids_for_pid_finds_every_exc_under_a_container() {
        let mgr = ApplicationManager::new();
        let uid0 = mgr.create(Schedulable::new(9, 0, "a", Language::Native, 0)).await.unwrap();
        let uid1 = mgr.create(Schedulable::new(9, 1, "b", Language::Native, 0)).await.unwrap();

        let mut uids = mgr.uids_for_pid(9).await;
        uids.sort();
        assert_eq!(uids, vec![uid0, uid1]);
    }

    #[tokio::test]
    async fn sync_state_index_tracks_with_mut_transitions() {
        let mgr = ApplicationManager::new();
        let uid = mgr.create(schedulable(1, 0)).await.unwrap();

        mgr.with_mut(uid, |s| s.unschedule()).await.unwrap();
        // READY -> unschedule is a no-op, so it's still reachable from READY
        assert_eq!(mgr.snapshot_by_state(StableState::Ready).await.len(), 1);

        mgr.disable(uid).await.unwrap();
        assert_eq!(mgr.snapshot_by_state(StableState::Ready).await.len(), 0);
        assert_eq!(mgr.snapshot_by_sync_state(SyncState::Disabled).await.len(), 1);
    }
}
