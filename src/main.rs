//! `rtrmd`: the resource manager daemon's composition root.

use knhk_config::load_config;
use knhk_power::{EnergyMonitor, PowerMonitor};
use knhk_resources::ResourceAccounter;
use knhk_rtrm::cli::Cli;
use knhk_rtrm::control_loop::{Event, ResourceManager};
use knhk_rtrm::default_policy::FirstFitPolicy;
use knhk_rtrm::platform::LinuxPlatformProxy;
use knhk_rtrm::power_source::{RaplEnergySource, SysfsPowerSource};
use knhk_resources::ResourcePath;
use knhk_scheduling::{ApplicationManager, SchedulerManager};
use knhk_sync::SynchronizationManager;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod rtlib_channel;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let config = match load_config() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "failed to load configuration, using defaults");
            knhk_config::RtrmConfig::default()
        }
    };

    let default_path = ResourcePath::parse("sys0.cpu0.pe0")?;

    let accounter = Arc::new(ResourceAccounter::new());
    accounter.register(default_path.clone(), 100, "generic");
    accounter.set_platform_ready();

    let manager = Arc::new(ApplicationManager::new());

    let scheduler = Arc::new(SchedulerManager::new());
    scheduler.set_policy(Arc::new(FirstFitPolicy::new(default_path))).await;

    let platform = Arc::new(LinuxPlatformProxy::new(&config.linux_platform_proxy));
    let channel = Arc::new(rtlib_channel::FifoSyncChannel::new());
    let synchronizer = Arc::new(SynchronizationManager::new(
        platform.clone(),
        channel,
        config.synchronization_manager.ordering,
        config.synchronization_manager.sync_latency_mode,
        config.synchronization_manager.rpc_timeout_ms,
    ));

    let power_monitor = Arc::new(PowerMonitor::new(
        accounter.clone(),
        Arc::new(SysfsPowerSource::new()),
        8,
        config.power_monitor.period_ms,
        config.power_monitor.nr_threads,
    ));
    let energy_monitor = Arc::new(EnergyMonitor::new(Arc::new(RaplEnergySource::new("intel-rapl:0"))));
    let energy_path = ResourcePath::parse("sys0")?;

    let resource_manager = Arc::new(ResourceManager::new(
        manager,
        accounter,
        scheduler,
        synchronizer,
        power_monitor.clone(),
        energy_monitor,
        energy_path,
        platform,
    ));

    let power_task = {
        let pm = power_monitor.clone();
        tokio::spawn(async move { pm.start().await })
    };
    let control_task = {
        let rm = resource_manager.clone();
        tokio::spawn(async move { rm.run().await })
    };

    let cli = Cli::new(resource_manager.clone());
    info!("rtrmd ready, reading CLI commands from stdin");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let code = cli.dispatch(&line).await;
        info!(command = %line, exit_code = code, "cli command handled");
    }

    resource_manager.notify_event(Event::Exit);
    power_monitor.stop();
    control_task.await.ok();
    power_task.abort();
    Ok(())
}
