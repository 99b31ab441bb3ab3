//! Coalescing execution timer: repeated `schedule` calls before the timer
//! fires replace the pending execution time rather than queuing another
//! one, mirroring `include/bbque/utils/deferrable.h`'s `Schedule`/
//! `SetPeriodic` contract.

use parking_lot::Mutex;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, instrument};

struct DeferrableState {
    next: Option<Instant>,
    period: Option<Duration>,
    running: bool,
}

pub struct Deferrable {
    name: String,
    state: Mutex<DeferrableState>,
    notify: Notify,
}

impl Deferrable {
    pub fn new(name: impl Into<String>, period: Option<Duration>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(DeferrableState {
                next: None,
                period,
                running: true,
            }),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Requests an execution at `now + delay`, discarding any earlier
    /// pending request.
    pub fn schedule(&self, delay: Duration) {
        self.state.lock().next = Some(Instant::now() + delay);
        self.notify.notify_one();
    }

    pub fn set_periodic(&self, period: Duration) {
        self.state.lock().period = Some(period);
    }

    pub fn set_on_demand(&self) {
        self.state.lock().period = None;
    }

    pub fn stop(&self) {
        self.state.lock().running = false;
        self.notify.notify_one();
    }

    /// Drives `f` at each scheduled firing until `stop()` is called. Runs
    /// on whatever task calls it — callers typically `tokio::spawn` this.
    #[instrument(skip(self, f), fields(name = %self.name))]
    pub async fn run<F, Fut>(&self, mut f: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        loop {
            let (target, running) = {
                let state = self.state.lock();
                (state.next, state.running)
            };
            if !running {
                return;
            }
            match target {
                Some(t) => {
                    let now = Instant::now();
                    if t > now {
                        tokio::select! {
                            _ = tokio::time::sleep(t - now) => {}
                            _ = self.notify.notified() => continue,
                        }
                    }
                    let rescheduled = {
                        let mut state = self.state.lock();
                        // Only re-arm from our own firing if nobody moved
                        // the target again while we slept.
                        if state.next == Some(t) {
                            state.next = state.period.map(|p| Instant::now() + p);
                            false
                        } else {
                            true
                        }
                    };
                    if rescheduled {
                        continue;
                    }
                    debug!(deferrable = %self.name, "firing");
                    f().await;
                }
                None => self.notify.notified().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn rescheduling_before_fire_coalesces_to_latest() {
        let deferrable = Arc::new(Deferrable::new("test", None));
        let fires = Arc::new(AtomicU32::new(0));

        deferrable.schedule(Duration::from_millis(50));
        deferrable.schedule(Duration::from_millis(5));

        let d = deferrable.clone();
        let f = fires.clone();
        let handle = tokio::spawn(async move {
            d.run(|| {
                let f = f.clone();
                async move {
                    f.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        deferrable.stop();
        handle.await.unwrap();
        assert_eq!(fires.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn periodic_timer_fires_repeatedly() {
        let deferrable = Arc::new(Deferrable::new("periodic", Some(Duration::from_millis(10))));
        let fires = Arc::new(AtomicU32::new(0));
        deferrable.schedule(Duration::from_millis(0));

        let d = deferrable.clone();
        let f = fires.clone();
        let handle = tokio::spawn(async move {
            d.run(|| {
                let f = f.clone();
                async move {
                    f.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
        });

        tokio::time::sleep(Duration::from_millis(45)).await;
        deferrable.stop();
        handle.await.unwrap();
        assert!(fires.load(Ordering::SeqCst) >= 2);
    }
}
