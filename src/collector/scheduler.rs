use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Runs a job on a fixed interval without ever overlapping itself.
///
/// A tick that arrives while the previous run is still executing is
/// dropped, not queued.
#[derive(Clone)]
pub struct PollingTrigger {
    name: String,
    every: Duration,
    in_flight: Arc<AtomicBool>,
}

struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PollingTrigger {
    pub fn new(name: impl Into<String>, every: Duration) -> Self {
        Self {
            name: name.into(),
            every,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn every(&self) -> Duration {
        self.every
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Start one run of `job`, unless a previous run is still going
    pub fn fire<F, Fut>(&self, job: F) -> Option<JoinHandle<()>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!(trigger = %self.name, "⏭️  Previous run still in flight, skipping tick");
            return None;
        }

        let guard = InFlightGuard(self.in_flight.clone());
        let fut = job();
        Some(tokio::spawn(async move {
            let _guard = guard;
            fut.await;
        }))
    }

    /// Fire `job` on every tick, forever
    pub async fn run<F, Fut>(self, mut job: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tracing::info!(trigger = %self.name, every_secs = self.every.as_secs(), "⏰ Polling trigger started");

        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.fire(&mut job);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let trigger = PollingTrigger::new("collect-1m", Duration::from_secs(60));
        let (release, wait) = oneshot::channel::<()>();

        let first = trigger.fire(|| async move {
            wait.await.ok();
        });
        assert!(first.is_some());
        assert!(trigger.is_running());

        let second = trigger.fire(|| async {});
        assert!(second.is_none());

        release.send(()).ok();
        first.unwrap().await.unwrap();
        assert!(!trigger.is_running());

        let third = trigger.fire(|| async {});
        assert!(third.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_fires_each_interval() {
        let runs = Arc::new(AtomicUsize::new(0));
        let trigger = PollingTrigger::new("collect-5m", Duration::from_secs(300));

        let counter = runs.clone();
        let handle = tokio::spawn(trigger.run(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        // first tick is immediate, then one per interval
        tokio::time::sleep(Duration::from_secs(601)).await;
        handle.abort();

        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }
}
