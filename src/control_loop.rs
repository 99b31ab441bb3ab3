//! Event-driven control loop: the daemon's `ResourceManager`, per §4.H.
//!
//! Events are OR'd into a bitset; high-priority events (abort, exit, the
//! two dump requests) are handled the instant they arrive, while the four
//! optimization triggers are coalesced through a `Deferrable` so that a
//! burst of EXC_START/EXC_STOP events collapses into a single `Optimize()`
//! round.

use crate::deferrable::Deferrable;
use knhk_power::{EnergyMonitor, PowerMonitor};
use knhk_scheduling::{ApplicationManager, PolicyOutcome, SchedulerManager, StableState};
use knhk_sync::{PlatformProxy, SynchronizationManager};
use knhk_resources::{ResourceAccounter, ResourcePath};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};

/// Priority order, highest first: a lower discriminant always wins a race
/// between simultaneously-set bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Event {
    Abort = 0,
    Exit = 1,
    DumpMetrics = 2,
    DumpStatus = 3,
    AppOptimize = 4,
    PlatformOptimize = 5,
    ExcStop = 6,
    ExcStart = 7,
}

const IMMEDIATE_EVENTS: [Event; 4] = [Event::Abort, Event::Exit, Event::DumpMetrics, Event::DumpStatus];
const OPTIMIZE_EVENTS: [Event; 4] = [Event::AppOptimize, Event::PlatformOptimize, Event::ExcStop, Event::ExcStart];

fn bit(event: Event) -> u32 {
    1 << (event as u32)
}

fn delay_for(event: Event) -> Duration {
    match event {
        Event::ExcStart | Event::ExcStop => Duration::from_millis(100),
        Event::AppOptimize => Duration::from_millis(50),
        Event::PlatformOptimize => Duration::from_millis(0),
        _ => Duration::from_millis(0),
    }
}

pub struct ResourceManager {
    manager: Arc<ApplicationManager>,
    accounter: Arc<ResourceAccounter>,
    scheduler: Arc<SchedulerManager>,
    synchronizer: Arc<SynchronizationManager>,
    power_monitor: Arc<PowerMonitor>,
    energy_monitor: Arc<EnergyMonitor>,
    energy_path: ResourcePath,
    platform: Arc<dyn PlatformProxy>,
    events: AtomicU32,
    immediate_notify: Notify,
    optimize_deferrable: Arc<Deferrable>,
}

impl ResourceManager {
    pub fn new(
        manager: Arc<ApplicationManager>,
        accounter: Arc<ResourceAccounter>,
        scheduler: Arc<SchedulerManager>,
        synchronizer: Arc<SynchronizationManager>,
        power_monitor: Arc<PowerMonitor>,
        energy_monitor: Arc<EnergyMonitor>,
        energy_path: ResourcePath,
        platform: Arc<dyn PlatformProxy>,
    ) -> Self {
        Self {
            manager,
            accounter,
            scheduler,
            synchronizer,
            power_monitor,
            energy_monitor,
            energy_path,
            platform,
            events: AtomicU32::new(0),
            immediate_notify: Notify::new(),
            optimize_deferrable: Arc::new(Deferrable::new("resource-manager-optimize", None)),
        }
    }

    pub fn manager(&self) -> &Arc<ApplicationManager> {
        &self.manager
    }

    pub fn accounter(&self) -> &Arc<ResourceAccounter> {
        &self.accounter
    }

    pub fn power_monitor(&self) -> &Arc<PowerMonitor> {
        &self.power_monitor
    }

    pub fn energy_monitor(&self) -> &Arc<EnergyMonitor> {
        &self.energy_monitor
    }

    pub fn scheduler(&self) -> &Arc<SchedulerManager> {
        &self.scheduler
    }

    /// Sets an event bit and wakes whichever of the two loops handles it.
    #[instrument(skip(self))]
    pub fn notify_event(&self, event: Event) {
        self.events.fetch_or(bit(event), Ordering::SeqCst);
        if IMMEDIATE_EVENTS.contains(&event) {
            self.immediate_notify.notify_one();
        } else {
            self.optimize_deferrable.schedule(delay_for(event));
        }
    }

    fn test_and_clear(&self, event: Event) -> bool {
        self.events.fetch_and(!bit(event), Ordering::SeqCst) & bit(event) != 0
    }

    /// Runs until an `Event::Exit` or `Event::Abort` is observed.
    #[instrument(skip(self))]
    pub async fn run(self: &Arc<Self>) {
        let opt_handle = {
            let this = self.clone();
            let deferrable = self.optimize_deferrable.clone();
            tokio::spawn(async move {
                deferrable
                    .run(|| {
                        let this = this.clone();
                        async move { this.optimize().await }
                    })
                    .await;
            })
        };

        loop {
            self.immediate_notify.notified().await;
            if self.test_and_clear(Event::Abort) {
                warn!("BBQ_ABORT received, tearing down");
                self.shutdown().await;
                break;
            }
            if self.test_and_clear(Event::Exit) {
                info!("BBQ_EXIT received, shutting down gracefully");
                self.shutdown().await;
                break;
            }
            if self.test_and_clear(Event::DumpMetrics) {
                self.dump_metrics().await;
            }
            if self.test_and_clear(Event::DumpStatus) {
                self.dump_status().await;
            }
        }

        self.optimize_deferrable.stop();
        opt_handle.await.ok();
    }

    async fn shutdown(&self) {
        tokio::time::sleep(Duration::from_millis(30)).await;
        let mut running = self.manager.snapshot_by_state(StableState::Running).await;
        while let Some(uid) = running.next() {
            self.manager.terminate(uid).await.ok();
            self.platform.release(uid).await.ok();
        }
    }

    async fn dump_metrics(&self) {
        info!(
            schedulables = self.manager.len().await,
            scheduling_sessions = self.scheduler.session_count(),
            "metrics dump"
        );
    }

    async fn dump_status(&self) {
        info!(accounter_state = ?self.accounter.state(), "status dump");
    }

    /// `Optimize()`: one round of scheduling plus (if needed) synchronization.
    #[instrument(skip(self))]
    async fn optimize(&self) {
        let app_driven = self.is_app_driven_only();
        for event in OPTIMIZE_EVENTS {
            self.test_and_clear(event);
        }

        if self.manager.is_empty().await && app_driven {
            debug!("no schedulables and trigger was app-driven, skipping optimize round");
            return;
        }

        let outcome = match self.scheduler.run(&self.manager, &self.accounter).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "scheduling round failed");
                return;
            }
        };
        if outcome == PolicyOutcome::Delayed {
            debug!("scheduling policy requested a delay");
            return;
        }

        if let Err(e) = self.platform.refresh().await {
            warn!(error = %e, "platform refresh failed, resources brought back online may be stale");
        }

        let in_sync = !self.manager.snapshot_by_state(StableState::Sync).await.is_empty();
        if in_sync {
            if let Some(view) = self.scheduler.scheduled_view().await {
                // Brackets the whole synchronization round so the energy
                // spent reconfiguring the platform is attributed separately
                // from steady-state running time.
                self.energy_monitor.start(&self.energy_path).await.ok();
                let sync_result = self.synchronizer.run(&self.manager, &self.accounter, view).await;
                match self.energy_monitor.stop(&self.energy_path).await {
                    Ok(uj) => debug!(energy_uj = uj, "synchronization round energy"),
                    Err(e) => warn!(error = %e, "energy bracket close failed"),
                }
                if let Err(e) = sync_result {
                    warn!(error = %e, "synchronization session failed");
                }
            }
        }

        let mut running = self.manager.snapshot_by_state(StableState::Running).await;
        while let Some(uid) = running.next() {
            let awm = match self.manager.get(uid).await {
                Some(s) => s.current_awm.clone(),
                None => continue,
            };
            if let Some(awm) = awm {
                if let Err(e) = self.platform.actuate_power(uid, &awm.requested).await {
                    warn!(uid, error = %e, "power actuation failed");
                }
            }
        }

        // Consume any power-trigger request that fired during this same
        // round so it doesn't schedule a redundant follow-up.
        self.power_monitor.take_pending_optimize();

        let finished = self.manager.cleanup_finished().await;
        if !finished.is_empty() {
            debug!(count = finished.len(), "cleaned up finished schedulables");
        }
    }

    /// Approximates "the trigger was application-driven" by checking that
    /// no platform-driven bit (`PlatformOptimize`) is among the pending
    /// optimize events.
    fn is_app_driven_only(&self) -> bool {
        let pending = self.events.load(Ordering::SeqCst);
        pending & bit(Event::PlatformOptimize) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use knhk_power::PowerSource;
    use knhk_resources::{InfoKind, ResourceAssignment, ResourcePath};
    use knhk_scheduling::{Language, PolicyContext, Schedulable, SchedulingPolicy};
    use knhk_sync::{SyncChannel, SyncLatencyReport};
    use knhk_config::schema::{SyncLatencyMode, SyncOrdering};

    struct NoopPlatform;
    #[async_trait]
    impl PlatformProxy for NoopPlatform {
        async fn map_resources(&self, _uid: u32, _a: &[ResourceAssignment]) -> knhk_sync::Result<()> {
            Ok(())
        }
        async fn reclaim_resources(&self, _uid: u32) -> knhk_sync::Result<()> {
            Ok(())
        }
        async fn release(&self, _uid: u32) -> knhk_sync::Result<()> {
            Ok(())
        }
        async fn restore(&self, _uid: u32) -> knhk_sync::Result<()> {
            Ok(())
        }
        async fn thaw(&self, _uid: u32) -> knhk_sync::Result<()> {
            Ok(())
        }
        async fn refresh(&self) -> knhk_sync::Result<()> {
            Ok(())
        }
        async fn actuate_power(&self, _uid: u32, _a: &[ResourceAssignment]) -> knhk_sync::Result<()> {
            Ok(())
        }
    }

    struct NoopChannel;
    #[async_trait]
    impl SyncChannel for NoopChannel {
        async fn pre_change(&self, _uid: u32) -> knhk_sync::Result<()> {
            Ok(())
        }
        async fn sync_change(&self, _uid: u32) -> knhk_sync::Result<SyncLatencyReport> {
            Ok(SyncLatencyReport { latency_ms: 1 })
        }
        async fn do_change(&self, _uid: u32) -> knhk_sync::Result<()> {
            Ok(())
        }
        async fn post_change(&self, _uid: u32) -> knhk_sync::Result<()> {
            Ok(())
        }
    }

    struct NoopPowerSource;
    #[async_trait]
    impl PowerSource for NoopPowerSource {
        async fn read(&self, _path: &ResourcePath, _kind: InfoKind) -> knhk_power::Result<f64> {
            Ok(0.0)
        }
    }

    struct NoopEnergySource;
    #[async_trait]
    impl knhk_power::EnergySource for NoopEnergySource {
        async fn read_counter_uj(&self) -> knhk_power::Result<u64> {
            Ok(0)
        }
    }

    struct AcceptAllPolicy;
    #[async_trait]
    impl SchedulingPolicy for AcceptAllPolicy {
        async fn schedule(&self, ctx: &PolicyContext<'_>) -> Result<PolicyOutcome, String> {
            let mut ready = ctx.manager.snapshot_by_priority(StableState::Ready).await;
            while let Some(uid) = ready.next() {
                let mut a = ResourceAssignment::new(ResourcePath::parse("sys0.cpu0.pe0").unwrap(), 10);
                a.bind(vec![ResourcePath::parse("sys0.cpu0.pe0").unwrap()]);
                let awm = knhk_scheduling::WorkingMode::new(0, 1.0, vec![a]);
                ctx.manager.schedule_request(uid, awm, ctx.accounter, ctx.view).await.ok();
            }
            Ok(PolicyOutcome::Done)
        }
    }

    fn build() -> Arc<ResourceManager> {
        let manager = Arc::new(ApplicationManager::new());
        let accounter = Arc::new(ResourceAccounter::new());
        accounter.register(ResourcePath::parse("sys0.cpu0.pe0").unwrap(), 100, "generic");
        accounter.set_platform_ready();
        let scheduler = Arc::new(SchedulerManager::new());
        let synchronizer = Arc::new(SynchronizationManager::new(
            Arc::new(NoopPlatform),
            Arc::new(NoopChannel),
            SyncOrdering::Forced,
            SyncLatencyMode::Advisory,
            1000,
        ));
        let power_monitor = Arc::new(PowerMonitor::new(accounter.clone(), Arc::new(NoopPowerSource), 4, 1000, 1));
        let energy_monitor = Arc::new(EnergyMonitor::new(Arc::new(NoopEnergySource)));
        Arc::new(ResourceManager::new(
            manager,
            accounter,
            scheduler,
            synchronizer,
            power_monitor,
            energy_monitor,
            ResourcePath::parse("sys0").unwrap(),
            Arc::new(NoopPlatform),
        ))
    }

    #[tokio::test]
    async fn optimize_round_schedules_and_commits_ready_exc() {
        let rm = build();
        rm.scheduler.set_policy(Arc::new(AcceptAllPolicy)).await;
        let uid = rm
            .manager
            .create(Schedulable::new(1, 0, "app", Language::Native, 0))
            .await
            .unwrap();

        rm.notify_event(Event::ExcStart);
        rm.optimize().await;

        let s = rm.manager.get(uid).await.unwrap();
        assert_eq!(s.state(), StableState::Running);
    }

    #[tokio::test]
    async fn optimize_round_skips_when_empty_and_app_driven() {
        let rm = build();
        rm.scheduler.set_policy(Arc::new(AcceptAllPolicy)).await;
        rm.notify_event(Event::AppOptimize);
        // No schedulables registered: the round should bail out before
        // ever invoking the scheduler, i.e. the session count stays zero.
        rm.optimize().await;
        assert_eq!(rm.scheduler.session_count(), 0);
    }
}
