//! Periodic power/thermal sampling worker, per §4.G: splits the
//! registered-resource list across worker tasks, folds each sample into
//! its resource's EMA, and evaluates any trigger bound to that signal.

use crate::error::Result;
use crate::trigger::Trigger;
use async_trait::async_trait;
use knhk_resources::{InfoKind, ResourceAccounter, ResourcePath};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

/// Platform power-management read interface. A concrete implementation
/// (sysfs, RAPL, IPMI, ...) lives outside this crate.
#[async_trait]
pub trait PowerSource: Send + Sync {
    async fn read(&self, path: &ResourcePath, kind: InfoKind) -> Result<f64>;
}

#[derive(Clone)]
pub enum TriggerAction {
    /// Coalesced into the monitor's single pending-optimization flag.
    RequestOptimize,
    /// Invoked directly, once, on firing.
    Callback(Arc<dyn Fn(&ResourcePath, InfoKind) + Send + Sync>),
}

struct TriggerBinding {
    kind: InfoKind,
    trigger: Trigger,
    action: TriggerAction,
}

const SAMPLED_KINDS: [InfoKind; 4] = [
    InfoKind::Temperature,
    InfoKind::Load,
    InfoKind::Frequency,
    InfoKind::Power,
];

pub struct PowerMonitor {
    accounter: Arc<ResourceAccounter>,
    source: Arc<dyn PowerSource>,
    window: u32,
    period: Duration,
    nr_threads: usize,
    bindings: RwLock<HashMap<String, Vec<TriggerBinding>>>,
    optimize_pending: Arc<AtomicBool>,
    running: AtomicBool,
}

impl PowerMonitor {
    pub fn new(
        accounter: Arc<ResourceAccounter>,
        source: Arc<dyn PowerSource>,
        window: u32,
        period_ms: u64,
        nr_threads: u32,
    ) -> Self {
        Self {
            accounter,
            source,
            window,
            period: Duration::from_millis(period_ms),
            nr_threads: nr_threads.max(1) as usize,
            bindings: RwLock::new(HashMap::new()),
            optimize_pending: Arc::new(AtomicBool::new(false)),
            running: AtomicBool::new(false),
        }
    }

    pub async fn bind_trigger(&self, path: &ResourcePath, kind: InfoKind, trigger: Trigger, action: TriggerAction) {
        let mut bindings = self.bindings.write().await;
        bindings
            .entry(path.to_string())
            .or_default()
            .push(TriggerBinding { kind, trigger, action });
    }

    /// Consumes the pending-optimization flag. At most one request is ever
    /// outstanding, per §4.G.
    pub fn take_pending_optimize(&self) -> bool {
        self.optimize_pending.swap(false, Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    #[instrument(skip(self))]
    pub async fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        let mut ticker = tokio::time::interval(self.period);
        while self.running.load(Ordering::SeqCst) {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                warn!(error = %e, "power sampling round failed");
            }
        }
    }

    /// One full sampling round over every registered resource, split
    /// across `nr_threads` concurrent worker tasks.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<()> {
        let paths = self.accounter.all_paths();
        if paths.is_empty() {
            return Ok(());
        }
        let chunk_size = ((paths.len() + self.nr_threads - 1) / self.nr_threads).max(1);

        let mut set = JoinSet::new();
        for chunk in paths.chunks(chunk_size) {
            let chunk = chunk.to_vec();
            let accounter = self.accounter.clone();
            let source = self.source.clone();
            let window = self.window;
            set.spawn(async move { Self::sample_chunk(accounter, source, window, chunk).await });
        }

        let mut samples = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(chunk_samples) => samples.extend(chunk_samples),
                Err(e) => warn!(error = %e, "power sampling worker task panicked"),
            }
        }

        self.evaluate_triggers(samples).await;
        Ok(())
    }

    async fn sample_chunk(
        accounter: Arc<ResourceAccounter>,
        source: Arc<dyn PowerSource>,
        window: u32,
        paths: Vec<ResourcePath>,
    ) -> Vec<(ResourcePath, InfoKind, f64)> {
        let mut out = Vec::new();
        for path in paths {
            for kind in SAMPLED_KINDS {
                match source.read(&path, kind).await {
                    Ok(raw) => {
                        if let Ok(ema) = accounter.sample_power(&path, kind, raw, window) {
                            out.push((path.clone(), kind, ema));
                        }
                    }
                    Err(e) => debug!(path = %path, ?kind, error = %e, "sample read failed, skipping"),
                }
            }
        }
        out
    }

    async fn evaluate_triggers(&self, samples: Vec<(ResourcePath, InfoKind, f64)>) {
        let mut bindings = self.bindings.write().await;
        for (path, kind, value) in samples {
            let Some(per_path) = bindings.get_mut(&path.to_string()) else {
                continue;
            };
            for binding in per_path.iter_mut().filter(|b| b.kind == kind) {
                if binding.trigger.evaluate(value) {
                    match &binding.action {
                        TriggerAction::RequestOptimize => {
                            self.optimize_pending.store(true, Ordering::SeqCst);
                        }
                        TriggerAction::Callback(cb) => cb(&path, kind),
                    }
                }
            }
        }
    }
}
