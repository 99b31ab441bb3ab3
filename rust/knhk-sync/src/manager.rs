//! Drives every SYNC-state schedulable through the five-step commit
//! protocol: PreChange, Sync-Platform, SyncChange, DoChange, PostChange.
//! `SyncOrdering` picks which of the two RTLib-facing orderings applies:
//! `Forced` runs PreChange, SyncChange, Sync-Platform, DoChange in that
//! order; `Eager` runs Sync-Platform before PreChange and skips
//! SyncChange/DoChange entirely. A RECONF that books the exact same
//! resources the EXC already holds (a reshuffle, see
//! `Schedulable::is_reshuffling`) skips the RTLib round trip regardless of
//! ordering — Sync-Platform and PostChange still run.
//!
//! Structurally this generalizes the Offer/Allocate/Start driver pattern —
//! an `Arc<RwLock<HashMap<...>>>` of session state plus one async method
//! per phase, run in sequence by a single driver method — to five phases
//! instead of three, and to a batch of schedulables instead of one
//! resource request.

use crate::channel::SyncChannel;
use crate::error::{Result, SyncError};
use crate::platform::PlatformProxy;
use knhk_config::schema::{SyncLatencyMode, SyncOrdering};
use knhk_resources::{ResourceAccounter, ViewToken};
use knhk_scheduling::{ApplicationManager, SyncState};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub struct SynchronizationManager {
    platform: Arc<dyn PlatformProxy>,
    channel: Arc<dyn SyncChannel>,
    ordering: SyncOrdering,
    latency_mode: SyncLatencyMode,
    rpc_timeout_ms: u64,
    in_progress: AtomicBool,
}

impl SynchronizationManager {
    pub fn new(
        platform: Arc<dyn PlatformProxy>,
        channel: Arc<dyn SyncChannel>,
        ordering: SyncOrdering,
        latency_mode: SyncLatencyMode,
        rpc_timeout_ms: u64,
    ) -> Self {
        Self {
            platform,
            channel,
            ordering,
            latency_mode,
            rpc_timeout_ms,
            in_progress: AtomicBool::new(false),
        }
    }

    /// One synchronization session over every currently SYNC-state
    /// schedulable, committing `scheduled_view` as the new system view on
    /// success (or on partial failure, once failed schedulables have been
    /// re-booked against their prior allocation).
    #[instrument(skip(self, manager, accounter))]
    pub async fn run(
        &self,
        manager: &ApplicationManager,
        accounter: &ResourceAccounter,
        scheduled_view: ViewToken,
    ) -> Result<()> {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            return Err(SyncError::SyncInitFailed);
        }
        let result = self.run_inner(manager, accounter, scheduled_view).await;
        self.in_progress.store(false, Ordering::SeqCst);
        result
    }

    async fn run_inner(
        &self,
        manager: &ApplicationManager,
        accounter: &ResourceAccounter,
        scheduled_view: ViewToken,
    ) -> Result<()> {
        accounter
            .sync_start()
            .map_err(|_| SyncError::SyncInitFailed)?;

        let mut snapshot = manager.snapshot_by_state(knhk_scheduling::StableState::Sync).await;
        let mut uids = Vec::with_capacity(snapshot.len());
        while let Some(uid) = snapshot.next() {
            uids.push(uid);
        }

        let mut failed: HashSet<u32> = HashSet::new();
        let mut reshuffling: HashSet<u32> = HashSet::new();
        for &uid in &uids {
            if manager.get(uid).await.map(|s| s.is_reshuffling()).unwrap_or(false) {
                reshuffling.insert(uid);
            }
        }

        // Forced: PreChange -> SyncChange -> Sync-Platform -> DoChange, the
        // RTLib is given a chance to prepare and confirm before the platform
        // is touched. Eager (the default): Sync-Platform runs first so
        // cgroups/affinity are already set up by the time the EXC
        // reconfigures itself, then PreChange only — no SyncChange/DoChange
        // round trip at all.
        match self.ordering {
            SyncOrdering::Forced => {
                self.pre_change_phase(manager, &uids, &reshuffling, &mut failed).await;
                self.sync_change_phase(&uids, &reshuffling, &mut failed).await;
                self.sync_platform_phase(manager, &uids, &mut failed).await;
                self.do_change_phase(&uids, &reshuffling, &failed).await;
            }
            SyncOrdering::Eager => {
                self.sync_platform_phase(manager, &uids, &mut failed).await;
                self.pre_change_phase(manager, &uids, &reshuffling, &mut failed).await;
            }
        }

        self.post_change_phase(&uids).await;

        for &uid in &uids {
            if failed.contains(&uid) {
                self.rebook_previous_allocation(manager, accounter, uid, scheduled_view)
                    .await;
                manager.with_mut(uid, |s| s.schedule_abort()).await.ok();
            } else {
                manager.with_mut(uid, |s| s.schedule_commit()).await.ok();
            }
        }

        if !uids.is_empty() && failed.len() == uids.len() {
            accounter.sync_abort(scheduled_view).await?;
        } else {
            accounter.sync_commit(scheduled_view).await?;
        }
        Ok(())
    }

    async fn pre_change_phase(
        &self,
        manager: &ApplicationManager,
        uids: &[u32],
        reshuffling: &HashSet<u32>,
        failed: &mut HashSet<u32>,
    ) {
        for &uid in uids {
            if reshuffling.contains(&uid) {
                continue;
            }
            if self.is_blocked(manager, uid).await {
                continue;
            }
            if let Err(e) = self.channel.pre_change(uid).await {
                warn!(uid, error = %e, "PreChange failed");
                failed.insert(uid);
            }
        }
    }

    async fn sync_platform_phase(&self, manager: &ApplicationManager, uids: &[u32], failed: &mut HashSet<u32>) {
        for &uid in uids {
            if failed.contains(&uid) {
                continue;
            }
            if self.is_blocked(manager, uid).await {
                if let Err(e) = self.platform.reclaim_resources(uid).await {
                    warn!(uid, error = %e, "reclaim on block failed");
                }
                continue;
            }
            let assignments = match manager.get(uid).await.and_then(|s| s.next_awm.clone()) {
                Some(awm) => awm.requested,
                None => {
                    failed.insert(uid);
                    continue;
                }
            };
            if let Err(e) = self.platform.map_resources(uid, &assignments).await {
                warn!(uid, error = %e, "Sync-Platform mapping failed");
                failed.insert(uid);
            }
        }
    }

    async fn sync_change_phase(&self, uids: &[u32], reshuffling: &HashSet<u32>, failed: &mut HashSet<u32>) {
        for &uid in uids {
            if failed.contains(&uid) || reshuffling.contains(&uid) {
                continue;
            }
            self.sync_change_one(uid, failed).await;
        }
    }

    async fn sync_change_one(&self, uid: u32, failed: &mut HashSet<u32>) {
        match self.channel.sync_change(uid).await {
            Ok(report) => {
                if self.latency_mode == SyncLatencyMode::Strict && report.latency_ms > self.rpc_timeout_ms {
                    warn!(uid, reported = report.latency_ms, bound = self.rpc_timeout_ms, "sync latency exceeded");
                    failed.insert(uid);
                }
            }
            Err(e) => {
                warn!(uid, error = %e, "SyncChange failed");
                failed.insert(uid);
            }
        }
    }

    async fn do_change_phase(&self, uids: &[u32], reshuffling: &HashSet<u32>, failed: &HashSet<u32>) {
        for &uid in uids {
            if failed.contains(&uid) || reshuffling.contains(&uid) {
                continue;
            }
            if let Err(e) = self.channel.do_change(uid).await {
                warn!(uid, error = %e, "DoChange failed");
            }
        }
    }

    async fn post_change_phase(&self, uids: &[u32]) {
        for &uid in uids {
            if let Err(e) = self.channel.post_change(uid).await {
                debug!(uid, error = %e, "PostChange notification failed, non-fatal");
            }
        }
    }

    /// A schedulable whose SyncChange or Sync-Platform step failed keeps
    /// whatever it was running before this session, so its prior
    /// allocation is re-booked into the about-to-be-promoted view.
    async fn rebook_previous_allocation(
        &self,
        manager: &ApplicationManager,
        accounter: &ResourceAccounter,
        uid: u32,
        view: ViewToken,
    ) {
        let Some(current) = manager.get(uid).await.and_then(|s| s.current_awm) else {
            return;
        };
        accounter.release_resources(uid, view).await.ok();
        if let Err(e) = accounter.book_resources(uid, &current.requested, view).await {
            warn!(uid, error = %e, "failed to re-book prior allocation after sync failure");
        }
    }

    async fn is_blocked(&self, manager: &ApplicationManager, uid: u32) -> bool {
        manager
            .get(uid)
            .await
            .map(|s| s.sync_state() == SyncState::Blocked)
            .unwrap_or(false)
    }
}
