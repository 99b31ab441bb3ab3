//! Per-workload descriptor and its state machine.
//!
//! The re-entrant lock the original design used on this object is flattened
//! away here: each public method below acquires nothing itself — the
//! manager that owns a `Schedulable` behind a single `RwLock` is the only
//! lock, taken once per call.

use crate::error::{Result, SchedulingError};
use crate::working_mode::WorkingMode;
use knhk_resources::{ResourceAccounter, ViewToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StableState {
    New,
    Ready,
    Sync,
    Running,
    Finished,
    Thawed,
    Restoring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    SyncNone,
    Starting,
    Reconf,
    Migrec,
    Migrate,
    Blocked,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Native,
    OpenCl,
    OpenMp,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeProfile {
    pub goal_gap_pct: i32,
    pub cpu_usage_pct: u32,
    pub cycle_time_ms: u64,
    pub cycle_count: u64,
}

/// Union of Application EXCs and generic Processes — both are scheduled
/// through the same state machine.
#[derive(Debug, Clone)]
pub struct Schedulable {
    pub pid: u32,
    pub exc_id: u8,
    pub uid: u32,
    pub name: String,
    pub language: Language,
    pub priority: u8,
    pub current_awm: Option<WorkingMode>,
    pub next_awm: Option<WorkingMode>,
    state: StableState,
    pre_sync_state: StableState,
    sync_state: SyncState,
    pub runtime_profile: RuntimeProfile,
    pub sched_count: u64,
    enabled_awms: Vec<WorkingMode>,
    disabled: bool,
}

pub fn uid_of(pid: u32, exc_id: u8) -> u32 {
    (pid << 8) | exc_id as u32
}

impl Schedulable {
    pub fn new(pid: u32, exc_id: u8, name: impl Into<String>, language: Language, priority: u8) -> Self {
        Self {
            pid,
            exc_id,
            uid: uid_of(pid, exc_id),
            name: name.into(),
            language,
            priority,
            current_awm: None,
            next_awm: None,
            state: StableState::New,
            pre_sync_state: StableState::New,
            sync_state: SyncState::SyncNone,
            runtime_profile: RuntimeProfile::default(),
            sched_count: 0,
            enabled_awms: Vec::new(),
            disabled: false,
        }
    }

    pub fn state(&self) -> StableState {
        self.state
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync_state
    }

    /// True when the pending sync is a RECONF that books the exact same
    /// resources in the exact same amounts as the AWM already running —
    /// a pure relabeling with nothing for the RTLib round trip to do.
    pub fn is_reshuffling(&self) -> bool {
        if self.sync_state != SyncState::Reconf {
            return false;
        }
        match (&self.current_awm, &self.next_awm) {
            (Some(current), Some(next)) => current.requests_same_resources_as(next),
            _ => false,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn set_recipe(&mut self, awms: Vec<WorkingMode>) {
        self.enabled_awms = awms;
    }

    pub fn enabled_awms(&self) -> &[WorkingMode] {
        &self.enabled_awms
    }

    /// NEW -> READY
    pub fn enable(&mut self) -> Result<()> {
        self.require(StableState::New, StableState::Ready)?;
        self.state = StableState::Ready;
        self.disabled = false;
        Ok(())
    }

    /// Marks the EXC disabled; any state -> SYNC(DISABLED) unless already
    /// terminal.
    pub fn disable(&mut self) {
        self.disabled = true;
        if self.state != StableState::Finished {
            self.pre_sync_state = self.state;
            self.state = StableState::Sync;
            self.sync_state = SyncState::Disabled;
        }
    }

    pub fn terminate(&mut self) {
        self.state = StableState::Finished;
        self.sync_state = SyncState::SyncNone;
        self.current_awm = None;
        self.next_awm = None;
    }

    /// The policy assigns (or re-assigns) an AWM and its concrete resource
    /// bindings. Books the request into `view` via the accounter; on
    /// rejection the EXC is unscheduled and `Rejected`'s error is returned.
    pub async fn schedule_request(
        &mut self,
        awm: WorkingMode,
        accounter: &ResourceAccounter,
        view: ViewToken,
    ) -> Result<()> {
        if self.disabled {
            return Err(SchedulingError::Disabled(self.uid));
        }
        // Reset a prior failed sync before accepting a fresh request.
        if self.sync_state == SyncState::Blocked {
            self.state = self.pre_sync_state;
            self.sync_state = SyncState::SyncNone;
        }

        if let Err(e) = accounter
            .book_resources(self.uid, &awm.requested, view)
            .await
        {
            self.unschedule();
            return Err(e.into());
        }

        let sub_state = self.classify_transition(&awm);
        self.next_awm = Some(awm);
        self.pre_sync_state = self.state;
        self.state = StableState::Sync;
        self.sync_state = sub_state;
        Ok(())
    }

    fn classify_transition(&self, next: &WorkingMode) -> SyncState {
        if self.state == StableState::Ready || self.current_awm.is_none() {
            return SyncState::Starting;
        }
        let current = self.current_awm.as_ref().unwrap();
        let same_id = current.id == next.id;
        let same_bindings = current.bound_resource_paths() == next.bound_resource_paths();
        match (same_id, same_bindings) {
            (true, true) => SyncState::SyncNone,
            (true, false) => SyncState::Migrate,
            (false, true) => SyncState::Reconf,
            (false, false) => SyncState::Migrec,
        }
    }

    /// Retracts a prior candidate: RUNNING -> SYNC(BLOCKED); no-op from
    /// READY or an already-blocked state.
    pub fn unschedule(&mut self) {
        if self.state == StableState::Ready || self.sync_state == SyncState::Blocked {
            return;
        }
        if self.state == StableState::Running {
            self.pre_sync_state = self.state;
            self.state = StableState::Sync;
            self.sync_state = SyncState::Blocked;
        }
    }

    /// Commits the pending sync transition, invoked by the synchronization
    /// manager's PostChange phase.
    pub fn schedule_commit(&mut self) {
        if self.state == StableState::Finished {
            return;
        }
        match self.sync_state {
            SyncState::Starting | SyncState::Reconf | SyncState::Migrec | SyncState::Migrate => {
                self.current_awm = self.next_awm.take();
                self.state = StableState::Running;
            }
            SyncState::Blocked => {
                self.current_awm = None;
                self.next_awm = None;
                self.state = StableState::Ready;
            }
            SyncState::Disabled => {
                self.terminate();
            }
            SyncState::SyncNone => {
                self.state = StableState::Running;
            }
        }
        self.sync_state = SyncState::SyncNone;
        self.sched_count += 1;
    }

    pub fn schedule_abort(&mut self) {
        self.next_awm = None;
        self.state = self.pre_sync_state;
        self.sync_state = SyncState::SyncNone;
    }

    /// Commits "no change": valid only when there is no pending next AWM
    /// distinct from the current one.
    pub fn schedule_continue(&mut self) -> Result<()> {
        if self.state != StableState::Running {
            return Ok(());
        }
        self.pre_sync_state = self.state;
        self.state = StableState::Sync;
        self.sync_state = SyncState::SyncNone;
        Ok(())
    }

    fn require(&self, expected: StableState, to: StableState) -> Result<()> {
        if self.state != expected {
            return Err(SchedulingError::StateTransitionNotAllowed {
                uid: self.uid,
                from: self.state,
                to,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::working_mode::WorkingMode;
    use knhk_resources::{ResourceAccounter, ResourceAssignment, ResourcePath, SYSTEM_VIEW};

    fn path(s: &str) -> ResourcePath {
        ResourcePath::parse(s).unwrap()
    }

    async fn accounter_with_one_cpu() -> ResourceAccounter {
        let acc = ResourceAccounter::new();
        acc.register(path("sys0.cpu0.pe0"), 100, "generic");
        acc.set_platform_ready();
        acc
    }

    fn awm(id: u32, amount: u64) -> WorkingMode {
        let mut assignment = ResourceAssignment::new(path("sys0.cpu0.pe0"), amount);
        assignment.bind(vec![path("sys0.cpu0.pe0")]);
        WorkingMode::new(id, 1.0, vec![assignment])
    }

    #[test]
    fn new_to_ready_on_enable() {
        let mut s = Schedulable::new(100, 0, "app", Language::Native, 0);
        s.enable().unwrap();
        assert_eq!(s.state(), StableState::Ready);
    }

    #[tokio::test]
    async fn ready_to_sync_starting_on_schedule_request() {
        let acc = accounter_with_one_cpu().await;
        let mut s = Schedulable::new(100, 0, "app", Language::Native, 0);
        s.enable().unwrap();
        s.schedule_request(awm(0, 40), &acc, SYSTEM_VIEW).await.unwrap();
        assert_eq!(s.state(), StableState::Sync);
        assert_eq!(s.sync_state(), SyncState::Starting);
    }

    #[tokio::test]
    async fn commit_moves_to_running_with_current_awm_set() {
        let acc = accounter_with_one_cpu().await;
        let mut s = Schedulable::new(100, 0, "app", Language::Native, 0);
        s.enable().unwrap();
        s.schedule_request(awm(0, 40), &acc, SYSTEM_VIEW).await.unwrap();
        s.schedule_commit();
        assert_eq!(s.state(), StableState::Running);
        assert!(s.next_awm.is_none());
        assert_eq!(s.current_awm.as_ref().unwrap().id, 0);
    }

    #[tokio::test]
    async fn reconf_detected_when_same_resources_different_awm() {
        let acc = accounter_with_one_cpu().await;
        let mut s = Schedulable::new(100, 0, "app", Language::Native, 0);
        s.enable().unwrap();
        s.schedule_request(awm(0, 40), &acc, SYSTEM_VIEW).await.unwrap();
        s.schedule_commit();
        acc.release_resources(s.uid, SYSTEM_VIEW).await.unwrap();

        let mut other = awm(1, 40);
        other.requested[0].bind(vec![path("sys0.cpu0.pe0")]);
        s.schedule_request(other, &acc, SYSTEM_VIEW).await.unwrap();
        assert_eq!(s.sync_state(), SyncState::Reconf);
    }

    #[tokio::test]
    async fn rejected_booking_unschedules() {
        let acc = accounter_with_one_cpu().await;
        let mut s = Schedulable::new(100, 0, "app", Language::Native, 0);
        s.enable().unwrap();
        s.schedule_request(awm(0, 40), &acc, SYSTEM_VIEW).await.unwrap();
        s.schedule_commit();

        let mut hog = Schedulable::new(101, 0, "hog", Language::Native, 0);
        hog.enable().unwrap();
        let err = hog.schedule_request(awm(9, 1000), &acc, SYSTEM_VIEW).await;
        assert!(err.is_err());
    }
}
