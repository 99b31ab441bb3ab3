//! A minimal first-fit scheduling policy used when the daemon is run
//! without a real policy plugin wired in. Scheduling *algorithms* are an
//! external collaborator (§1 Non-goals); this exists only so the daemon
//! is runnable out of the box, not as a reference allocator.

use async_trait::async_trait;
use knhk_resources::{ResourceAssignment, ResourcePath};
use knhk_scheduling::{PolicyContext, PolicyOutcome, SchedulingPolicy, StableState, WorkingMode};
use tracing::debug;

const DEFAULT_QUANTUM: u64 = 10;

pub struct FirstFitPolicy {
    candidate: ResourcePath,
}

impl FirstFitPolicy {
    pub fn new(candidate: ResourcePath) -> Self {
        Self { candidate }
    }
}

#[async_trait]
impl SchedulingPolicy for FirstFitPolicy {
    async fn schedule(&self, ctx: &PolicyContext<'_>) -> std::result::Result<PolicyOutcome, String> {
        let mut ready = ctx.manager.snapshot_by_priority(StableState::Ready).await;
        while let Some(uid) = ready.next() {
            let avail = ctx
                .accounter
                .available(&self.candidate, ctx.view, uid)
                .await
                .map_err(|e| e.to_string())?;
            if avail == 0 {
                debug!(uid, "first-fit policy: no capacity available, leaving pending");
                continue;
            }
            let quantum = avail.min(DEFAULT_QUANTUM);
            let mut assignment = ResourceAssignment::new(self.candidate.clone(), quantum);
            assignment.bind(vec![self.candidate.clone()]);
            let awm = WorkingMode::new(0, 1.0, vec![assignment]);
            ctx.manager
                .schedule_request(uid, awm, ctx.accounter, ctx.view)
                .await
                .map_err(|e| e.to_string())?;
        }
        Ok(PolicyOutcome::Done)
    }
}
