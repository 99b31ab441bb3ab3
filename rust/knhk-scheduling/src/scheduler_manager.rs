//! Drives one pluggable scheduling policy per round.

use crate::error::{Result, SchedulingError};
use crate::manager::ApplicationManager;
use crate::schedulable::StableState;
use async_trait::async_trait;
use knhk_resources::{ResourceAccounter, ViewToken, SYSTEM_VIEW};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyOutcome {
    Done,
    Delayed,
}

pub struct PolicyContext<'a> {
    pub manager: &'a ApplicationManager,
    pub accounter: &'a ResourceAccounter,
    pub view: ViewToken,
}

/// The narrow seam a scheduling policy satisfies. No algorithm is
/// implemented here — only the contract a plugin must honor.
#[async_trait]
pub trait SchedulingPolicy: Send + Sync {
    async fn schedule(&self, ctx: &PolicyContext<'_>) -> std::result::Result<PolicyOutcome, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Ready,
    Scheduling,
}

pub struct SchedulerManager {
    policy: RwLock<Option<Arc<dyn SchedulingPolicy>>>,
    scheduling: AtomicBool,
    ready_notify: Notify,
    session_count: AtomicU64,
    scheduled_view: RwLock<Option<ViewToken>>,
}

impl Default for SchedulerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerManager {
    pub fn new() -> Self {
        Self {
            policy: RwLock::new(None),
            scheduling: AtomicBool::new(false),
            ready_notify: Notify::new(),
            session_count: AtomicU64::new(0),
            scheduled_view: RwLock::new(None),
        }
    }

    pub async fn set_policy(&self, policy: Arc<dyn SchedulingPolicy>) {
        *self.policy.write().await = Some(policy);
    }

    pub fn state(&self) -> SchedulerState {
        if self.scheduling.load(Ordering::SeqCst) {
            SchedulerState::Scheduling
        } else {
            SchedulerState::Ready
        }
    }

    pub async fn wait_for_ready(&self) {
        while self.state() == SchedulerState::Scheduling {
            self.ready_notify.notified().await;
        }
    }

    pub fn session_count(&self) -> u64 {
        self.session_count.load(Ordering::SeqCst)
    }

    pub async fn scheduled_view(&self) -> Option<ViewToken> {
        *self.scheduled_view.read().await
    }

    /// One scheduling round, per §4.E.
    #[instrument(skip(self, manager, accounter))]
    pub async fn run(
        &self,
        manager: &ApplicationManager,
        accounter: &ResourceAccounter,
    ) -> Result<PolicyOutcome> {
        self.scheduling.store(true, Ordering::SeqCst);
        let result = self.run_inner(manager, accounter).await;
        self.scheduling.store(false, Ordering::SeqCst);
        self.ready_notify.notify_waiters();
        result
    }

    async fn run_inner(
        &self,
        manager: &ApplicationManager,
        accounter: &ResourceAccounter,
    ) -> Result<PolicyOutcome> {
        self.session_count.fetch_add(1, Ordering::SeqCst);

        let policy = {
            let guard = self.policy.read().await;
            guard.clone().ok_or(SchedulingError::MissingPolicy)?
        };

        let view = accounter.get_view("scheduling").await;
        let ctx = PolicyContext {
            manager,
            accounter,
            view,
        };

        let outcome = match policy.schedule(&ctx).await {
            Ok(o) => o,
            Err(e) => {
                warn!("scheduling policy failed: {e}");
                accounter.put_view(view).await.ok();
                return Err(SchedulingError::PolicyFailed(e));
            }
        };

        if outcome == PolicyOutcome::Delayed {
            accounter.put_view(view).await.ok();
            return Ok(outcome);
        }

        // Any still-RUNNING EXC the policy left untouched retains its
        // current allocation through the upcoming sync.
        let mut running = manager.snapshot_by_state(StableState::Running).await;
        while let Some(uid) = running.next() {
            let touched = manager
                .with_mut(uid, |s| s.next_awm.is_some())
                .await
                .unwrap_or(false);
            if !touched {
                manager.with_mut(uid, |s| s.schedule_continue().ok()).await.ok();
            }
        }

        let previous = {
            let mut slot = self.scheduled_view.write().await;
            slot.replace(view)
        };
        if let Some(prev) = previous {
            if prev != SYSTEM_VIEW {
                accounter.put_view(prev).await.ok();
            }
        }

        debug!(view, "scheduling round published new scheduled view");
        info!(session = self.session_count(), "scheduling round complete");
        Ok(PolicyOutcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedulable::{Language, Schedulable};
    use knhk_resources::{ResourceAssignment, ResourcePath};

    fn path(s: &str) -> ResourcePath {
        ResourcePath::parse(s).unwrap()
    }

    struct AcceptAllPolicy;

    #[async_trait]
    impl SchedulingPolicy for AcceptAllPolicy {
        async fn schedule(&self, ctx: &PolicyContext<'_>) -> std::result::Result<PolicyOutcome, String> {
            let mut ready = ctx.manager.snapshot_by_priority(StableState::Ready).await;
            while let Some(uid) = ready.next() {
                let mut assignment = ResourceAssignment::new(path("sys0.cpu0.pe0"), 10);
                assignment.bind(vec![path("sys0.cpu0.pe0")]);
                let awm = crate::working_mode::WorkingMode::new(0, 1.0, vec![assignment]);
                ctx.manager
                    .schedule_request(uid, awm, ctx.accounter, ctx.view)
                    .await
                    .ok();
            }
            Ok(PolicyOutcome::Done)
        }
    }

    struct FailingPolicy;

    #[async_trait]
    impl SchedulingPolicy for FailingPolicy {
        async fn schedule(&self, _ctx: &PolicyContext<'_>) -> std::result::Result<PolicyOutcome, String> {
            Err("no resources".to_string())
        }
    }

    #[tokio::test]
    async fn run_without_policy_is_missing_policy() {
        let mgr = ApplicationManager::new();
        let acc = ResourceAccounter::new();
        let sched = SchedulerManager::new();
        let err = sched.run(&mgr, &acc).await.unwrap_err();
        assert!(matches!(err, SchedulingError::MissingPolicy));
    }

    #[tokio::test]
    async fn failed_policy_leaves_scheduled_view_untouched() {
        let mgr = ApplicationManager::new();
        let acc = ResourceAccounter::new();
        acc.register(path("sys0.cpu0.pe0"), 100, "generic");
        acc.set_platform_ready();
        let sched = SchedulerManager::new();
        sched.set_policy(Arc::new(FailingPolicy)).await;

        let err = sched.run(&mgr, &acc).await.unwrap_err();
        assert!(matches!(err, SchedulingError::PolicyFailed(_)));
        assert!(sched.scheduled_view().await.is_none());
    }

    #[tokio::test]
    async fn successful_run_publishes_scheduled_view() {
        let mgr = ApplicationManager::new();
        let acc = ResourceAccounter::new();
        acc.register(path("sys0.cpu0.pe0"), 100, "generic");
        acc.set_platform_ready();
        mgr.create(Schedulable::new(1, 0, "app", Language::Native, 0))
            .await
            .unwrap();

        let sched = SchedulerManager::new();
        sched.set_policy(Arc::new(AcceptAllPolicy)).await;
        sched.run(&mgr, &acc).await.unwrap();

        assert!(sched.scheduled_view().await.is_some());
        assert_eq!(sched.session_count(), 1);
    }
}
