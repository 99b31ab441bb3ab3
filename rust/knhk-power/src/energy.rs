//! Range-measurement energy monitor: `Start`/`Stop` brackets read a
//! monotonic µJ counter (e.g. Intel RAPL) and the delta is the energy
//! consumed over the bracket, per §4.G's energy monitor extension.

use crate::error::{PowerError, Result};
use async_trait::async_trait;
use knhk_resources::ResourcePath;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::instrument;

/// Monotonic energy counter read interface (an Intel RAPL-style µJ file,
/// or any platform equivalent).
#[async_trait]
pub trait EnergySource: Send + Sync {
    async fn read_counter_uj(&self) -> Result<u64>;
}

/// A single resource's open measurement bracket.
struct OpenBracket {
    start_uj: u64,
}

/// Guarded by one mutex so that concurrent `start`/`stop` calls — even for
/// different resources — serialize on the counter read, mirroring the
/// original's condition-variable-guarded sampling round.
pub struct EnergyMonitor {
    source: std::sync::Arc<dyn EnergySource>,
    open: Mutex<HashMap<String, OpenBracket>>,
}

impl EnergyMonitor {
    pub fn new(source: std::sync::Arc<dyn EnergySource>) -> Self {
        Self {
            source,
            open: Mutex::new(HashMap::new()),
        }
    }

    #[instrument(skip(self))]
    pub async fn start(&self, path: &ResourcePath) -> Result<()> {
        let mut open = self.open.lock().await;
        if open.contains_key(&path.to_string()) {
            return Err(PowerError::BracketAlreadyOpen);
        }
        let start_uj = self.source.read_counter_uj().await?;
        open.insert(path.to_string(), OpenBracket { start_uj });
        Ok(())
    }

    /// Closes the bracket and returns the energy consumed, in µJ.
    #[instrument(skip(self))]
    pub async fn stop(&self, path: &ResourcePath) -> Result<u64> {
        let mut open = self.open.lock().await;
        let bracket = open
            .remove(&path.to_string())
            .ok_or(PowerError::BracketNotOpen)?;
        let end_uj = self.source.read_counter_uj().await?;
        Ok(end_uj.saturating_sub(bracket.start_uj))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn path(s: &str) -> ResourcePath {
        ResourcePath::parse(s).unwrap()
    }

    struct CountingSource(AtomicU64);

    #[async_trait]
    impl EnergySource for CountingSource {
        async fn read_counter_uj(&self) -> Result<u64> {
            Ok(self.0.fetch_add(1000, Ordering::SeqCst))
        }
    }

    #[tokio::test]
    async fn bracket_reports_delta_between_start_and_stop() {
        let monitor = EnergyMonitor::new(Arc::new(CountingSource(AtomicU64::new(0))));
        let p = path("sys0.cpu0.pe0");
        monitor.start(&p).await.unwrap();
        let delta = monitor.stop(&p).await.unwrap();
        assert_eq!(delta, 1000);
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let monitor = EnergyMonitor::new(Arc::new(CountingSource(AtomicU64::new(0))));
        let p = path("sys0.cpu0.pe0");
        monitor.start(&p).await.unwrap();
        assert!(monitor.start(&p).await.is_err());
    }

    #[tokio::test]
    async fn stop_without_start_is_rejected() {
        let monitor = EnergyMonitor::new(Arc::new(CountingSource(AtomicU64::new(0))));
        assert!(monitor.stop(&path("sys0.cpu0.pe0")).await.is_err());
    }
}
