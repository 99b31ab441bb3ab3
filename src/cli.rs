//! `bq.<module>.<verb>` command dispatch, per §6's CLI command surface.
//!
//! Commands are handler-dispatched dot-separated strings; each handler
//! returns the BBQUE console's exit-code convention: 0 success, 1 usage
//! error, -1 unknown command.

use crate::control_loop::{Event, ResourceManager};
use clap::Parser;
use knhk_resources::ResourcePath;
use knhk_scheduling::{uid_of, Language, Schedulable};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const EXIT_OK: i32 = 0;
pub const EXIT_USAGE: i32 = 1;
pub const EXIT_UNKNOWN: i32 = -1;

#[derive(Parser)]
#[command(name = "bq.ra.set_total")]
struct SetTotalArgs {
    path: String,
    value: u64,
}

#[derive(Parser)]
#[command(name = "bq.am.container_add")]
struct ContainerAddArgs {
    name: String,
    pid: u32,
    recipe: String,
    prio: u8,
}

#[derive(Parser)]
#[command(name = "bq.am.container_del")]
struct ContainerDelArgs {
    pid: u32,
}

#[derive(Parser)]
#[command(name = "bq.wm.datalog")]
struct DatalogArgs {
    action: String,
}

#[derive(Parser)]
#[command(name = "bq.eym.syslifetime")]
struct SysLifetimeArgs {
    action: String,
    hours: Option<u32>,
}

/// Names seen through `container_add`. Recipe *parsing* is an external
/// collaborator out of scope here; this only tracks what `recipes_wipe`
/// drops.
#[derive(Default)]
struct RecipeCache {
    names: Mutex<HashSet<String>>,
}

impl RecipeCache {
    async fn remember(&self, recipe: &str) {
        self.names.lock().await.insert(recipe.to_string());
    }

    async fn wipe(&self) -> usize {
        let mut names = self.names.lock().await;
        let n = names.len();
        names.clear();
        n
    }
}

pub struct Cli {
    rm: Arc<ResourceManager>,
    recipes: RecipeCache,
    datalog_active: AtomicBool,
    battery_lifetime_hours: Mutex<Option<u32>>,
}

impl Cli {
    pub fn new(rm: Arc<ResourceManager>) -> Self {
        Self {
            rm,
            recipes: RecipeCache::default(),
            datalog_active: AtomicBool::new(false),
            battery_lifetime_hours: Mutex::new(None),
        }
    }

    /// Dispatches one whitespace-tokenized command line.
    pub async fn dispatch(&self, line: &str) -> i32 {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&cmd) = tokens.first() else {
            return EXIT_USAGE;
        };
        let args = &tokens[1..];

        match cmd {
            "bq.ra.set_total" => self.ra_set_total(args).await,
            "bq.am.recipes_wipe" => self.am_recipes_wipe().await,
            "bq.am.container_add" => self.am_container_add(args).await,
            "bq.am.container_del" => self.am_container_del(args).await,
            "bq.plm.refresh" => self.plm_refresh().await,
            "bq.rm.sys_status" => self.rm_sys_status().await,
            "bq.rm.opt_force" => self.rm_opt_force().await,
            "bq.wm.datalog" => self.wm_datalog(args).await,
            "bq.eym.syslifetime" => self.eym_syslifetime(args).await,
            other => {
                warn!(command = other, "unknown CLI command");
                EXIT_UNKNOWN
            }
        }
    }

    async fn ra_set_total(&self, args: &[&str]) -> i32 {
        let Ok(parsed) = SetTotalArgs::try_parse_from(std::iter::once("bq.ra.set_total").chain(args.iter().copied())) else {
            return EXIT_USAGE;
        };
        let Ok(path) = ResourcePath::parse(&parsed.path) else {
            return EXIT_USAGE;
        };
        match self.rm.accounter().update_total(&path, parsed.value).await {
            Ok(()) => EXIT_OK,
            Err(e) => {
                warn!(error = %e, "set_total failed");
                EXIT_USAGE
            }
        }
    }

    async fn am_recipes_wipe(&self) -> i32 {
        let n = self.recipes.wipe().await;
        info!(count = n, "recipe cache wiped");
        EXIT_OK
    }

    async fn am_container_add(&self, args: &[&str]) -> i32 {
        let Ok(parsed) = ContainerAddArgs::try_parse_from(std::iter::once("bq.am.container_add").chain(args.iter().copied())) else {
            return EXIT_USAGE;
        };
        self.recipes.remember(&parsed.recipe).await;
        let schedulable = Schedulable::new(parsed.pid, 0, parsed.name, Language::Native, parsed.prio);
        match self.rm.manager().create(schedulable).await {
            Ok(uid) => {
                self.rm.notify_event(Event::ExcStart);
                info!(uid, "container added");
                EXIT_OK
            }
            Err(e) => {
                warn!(error = %e, "container_add failed");
                EXIT_USAGE
            }
        }
    }

    async fn am_container_del(&self, args: &[&str]) -> i32 {
        let Ok(parsed) = ContainerDelArgs::try_parse_from(std::iter::once("bq.am.container_del").chain(args.iter().copied())) else {
            return EXIT_USAGE;
        };
        let mut uids = self.rm.manager().uids_for_pid(parsed.pid).await;
        if uids.is_empty() {
            // no EXC registered under this pid yet; fall back to the
            // canonical single-EXC uid so a plain disable/terminate still
            // reports NotFound rather than silently no-opping.
            uids.push(uid_of(parsed.pid, 0));
        }

        let mut any_ok = false;
        for uid in uids {
            match self.rm.manager().disable(uid).await {
                Ok(()) => {
                    self.rm.manager().terminate(uid).await.ok();
                    any_ok = true;
                }
                Err(e) => warn!(uid, error = %e, "container_del failed for one EXC"),
            }
        }

        if any_ok {
            self.rm.notify_event(Event::ExcStop);
            EXIT_OK
        } else {
            EXIT_USAGE
        }
    }

    async fn plm_refresh(&self) -> i32 {
        self.rm.notify_event(Event::PlatformOptimize);
        EXIT_OK
    }

    async fn rm_sys_status(&self) -> i32 {
        info!(
            schedulables = self.rm.manager().len().await,
            accounter_state = ?self.rm.accounter().state(),
            scheduling_sessions = self.rm.scheduler().session_count(),
            "bq.rm.sys_status"
        );
        EXIT_OK
    }

    async fn rm_opt_force(&self) -> i32 {
        self.rm.notify_event(Event::AppOptimize);
        EXIT_OK
    }

    async fn wm_datalog(&self, args: &[&str]) -> i32 {
        let Ok(parsed) = DatalogArgs::try_parse_from(std::iter::once("bq.wm.datalog").chain(args.iter().copied())) else {
            return EXIT_USAGE;
        };
        match parsed.action.as_str() {
            "start" => {
                self.datalog_active.store(true, Ordering::SeqCst);
                EXIT_OK
            }
            "stop" => {
                self.datalog_active.store(false, Ordering::SeqCst);
                EXIT_OK
            }
            "clear" => EXIT_OK,
            _ => EXIT_USAGE,
        }
    }

    async fn eym_syslifetime(&self, args: &[&str]) -> i32 {
        let Ok(parsed) = SysLifetimeArgs::try_parse_from(std::iter::once("bq.eym.syslifetime").chain(args.iter().copied())) else {
            return EXIT_USAGE;
        };
        match parsed.action.as_str() {
            "set" => {
                let Some(hours) = parsed.hours else {
                    return EXIT_USAGE;
                };
                *self.battery_lifetime_hours.lock().await = Some(hours);
                EXIT_OK
            }
            "clear" => {
                *self.battery_lifetime_hours.lock().await = None;
                EXIT_OK
            }
            "info" => {
                info!(hours = ?*self.battery_lifetime_hours.lock().await, "target battery lifetime");
                EXIT_OK
            }
            "help" => {
                info!("usage: bq.eym.syslifetime {{set <hours>|clear|info|help}}");
                EXIT_OK
            }
            _ => EXIT_USAGE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use knhk_power::{EnergyMonitor, EnergySource, PowerMonitor, PowerSource};
    use knhk_resources::{InfoKind, ResourceAccounter, ResourceAssignment};
    use knhk_scheduling::{ApplicationManager, SchedulerManager};
    use knhk_sync::{PlatformProxy, SyncChannel, SyncLatencyReport, SynchronizationManager};
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
    impl EnergySource for NoopEnergySource {
        async fn read_counter_uj(&self) -> knhk_power::Result<u64> {
            Ok(0)
        }
    }

    fn build_cli() -> Cli {
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
        let rm = Arc::new(ResourceManager::new(
            manager,
            accounter,
            scheduler,
            synchronizer,
            power_monitor,
            energy_monitor,
            ResourcePath::parse("sys0").unwrap(),
            Arc::new(NoopPlatform),
        ));
        Cli::new(rm)
    }

    #[tokio::test]
    async fn set_total_updates_capacity() {
        let cli = build_cli();
        let code = cli.dispatch("bq.ra.set_total sys0.cpu0.pe0 200").await;
        assert_eq!(code, EXIT_OK);
        assert_eq!(cli.rm.accounter().total(&ResourcePath::parse("sys0.cpu0.pe0").unwrap()).unwrap(), 200);
    }

    #[tokio::test]
    async fn set_total_below_used_is_rejected() {
        let cli = build_cli();
        let path = ResourcePath::parse("sys0.cpu0.pe0").unwrap();
        let mut assignment = ResourceAssignment::new(path.clone(), 80);
        assignment.bind(vec![path.clone()]);
        cli.rm.accounter().book_resources(1, &[assignment], knhk_resources::SYSTEM_VIEW).await.unwrap();

        let code = cli.dispatch("bq.ra.set_total sys0.cpu0.pe0 10").await;
        assert_eq!(code, EXIT_USAGE);
        assert_eq!(cli.rm.accounter().total(&path).unwrap(), 100);
    }

    #[tokio::test]
    async fn container_add_then_del_round_trips() {
        let cli = build_cli();
        assert_eq!(cli.dispatch("bq.am.container_add worker 42 worker.recipe 0").await, EXIT_OK);
        assert_eq!(cli.dispatch("bq.am.container_del 42").await, EXIT_OK);
    }

    #[tokio::test]
    async fn unknown_command_reports_unknown() {
        let cli = build_cli();
        assert_eq!(cli.dispatch("bq.nope.nope").await, EXIT_UNKNOWN);
    }

    #[tokio::test]
    async fn malformed_args_report_usage_error() {
        let cli = build_cli();
        assert_eq!(cli.dispatch("bq.ra.set_total only-one-arg").await, EXIT_USAGE);
    }

    #[tokio::test]
    async fn syslifetime_set_then_clear() {
        let cli = build_cli();
        assert_eq!(cli.dispatch("bq.eym.syslifetime set 12").await, EXIT_OK);
        assert_eq!(cli.dispatch("bq.eym.syslifetime clear").await, EXIT_OK);
        assert_eq!(cli.dispatch("bq.eym.syslifetime bogus").await, EXIT_USAGE);
    }
}
