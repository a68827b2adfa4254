//! Check scheduler: registry, workers, probe tracer and result sink
//! wired behind a start/stop façade.

pub mod registry;
pub mod sink;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use self::registry::CheckRegistry;
use self::sink::ResultSink;
use crate::config::SchedulerConfig;
use crate::probe::ProbeTracer;
use crate::store::CheckStore;

pub struct Scheduler {
    region: String,
    settings: SchedulerConfig,
    store: Arc<dyn CheckStore>,
    shutdown: CancellationToken,
    registry: Option<Arc<CheckRegistry>>,
    reconciler: Option<JoinHandle<()>>,
    sink: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(region: String, settings: SchedulerConfig, store: Arc<dyn CheckStore>) -> Self {
        Self {
            region,
            settings,
            store,
            shutdown: CancellationToken::new(),
            registry: None,
            reconciler: None,
            sink: None,
        }
    }

    /// Run the initial reconciliation and spawn the background tasks.
    pub async fn start(&mut self) {
        info!(region = self.region, "starting scheduler");

        let (result_tx, result_rx) = mpsc::channel(self.settings.result_queue_capacity);
        let registry = Arc::new(CheckRegistry::new(
            self.region.clone(),
            Arc::new(ProbeTracer::new()),
            result_tx,
            self.shutdown.clone(),
        ));

        match registry.reconcile(self.store.as_ref()).await {
            Ok(started) => info!(started = started.len(), "initial reconciliation complete"),
            Err(err) => {
                warn!(error = %err, "initial reconciliation failed, retrying on next poll")
            }
        }

        self.reconciler = Some(tokio::spawn(reconcile_loop(
            Arc::clone(&registry),
            Arc::clone(&self.store),
            Duration::from_secs(self.settings.poll_interval_seconds),
            self.shutdown.clone(),
        )));

        let sink = ResultSink::new(
            Arc::clone(&self.store),
            Duration::from_secs(self.settings.flush_interval_seconds),
            self.settings.max_buffered_results,
        );
        self.sink = Some(tokio::spawn(sink.run(result_rx)));

        self.registry = Some(registry);
    }

    /// Graceful shutdown: signal every task, wait for the workers to
    /// finish their in-flight probes, then let the sink flush whatever
    /// is still buffered before returning.
    pub async fn stop(&mut self) {
        info!("stopping scheduler");
        self.shutdown.cancel();

        if let Some(handle) = self.reconciler.take() {
            let _ = handle.await;
        }

        if let Some(registry) = self.registry.take() {
            registry.drain_workers().await;
            // Last owner of the result sender: dropping it closes the
            // queue and lets the sink run its final flush.
            drop(registry);
        }

        if let Some(handle) = self.sink.take() {
            let _ = handle.await;
        }

        info!("scheduler stopped");
    }
}

/// Periodic reconciliation against the check store. Store failures are
/// logged and retried on the next tick; the registry is untouched by a
/// failed cycle.
async fn reconcile_loop(
    registry: Arc<CheckRegistry>,
    store: Arc<dyn CheckStore>,
    poll_interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // the immediate first tick duplicates the initial reconciliation
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("reconciler stopping");
                return;
            }

            _ = ticker.tick() => {
                debug!("refreshing check definitions");
                match registry.reconcile(store.as_ref()).await {
                    Ok(started) if !started.is_empty() => {
                        info!(started = started.len(), "reconciliation started new checks");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "reconciliation failed, will retry next cycle");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::checks::CheckDefinition;
    use crate::store::mock::MockStore;
    use crate::testutil;

    fn fast_check(id: &str, url: &str) -> CheckDefinition {
        CheckDefinition {
            id: id.to_string(),
            url: url.to_string(),
            interval_seconds: 1,
            http_timeout_seconds: 2,
            regions: vec!["us-test-1".to_string()],
            modified_at: Utc::now(),
            serial: 0,
            active: true,
        }
    }

    fn test_settings() -> SchedulerConfig {
        SchedulerConfig {
            poll_interval_seconds: 1,
            flush_interval_seconds: 1,
            result_queue_capacity: 1024,
            max_buffered_results: 10_000,
        }
    }

    #[tokio::test]
    async fn scheduler_probes_flushes_and_stops_cleanly() {
        let addr =
            testutil::spawn_http_server("HTTP/1.1 200 OK", "ok", Duration::from_millis(10)).await;
        let url = format!("http://{addr}/");

        let store = Arc::new(MockStore::new());
        store.put_check(fast_check("check-a", &url));

        let mut scheduler =
            Scheduler::new("us-test-1".to_string(), test_settings(), store.clone());
        scheduler.start().await;

        tokio::time::sleep(Duration::from_secs(3)).await;
        scheduler.stop().await;

        let results = store.results_for("check-a");
        assert!(!results.is_empty(), "expected flushed results for check-a");
        assert!(results.iter().all(|r| r.response_code == 200));
        assert!(results.iter().all(|r| r.region == "us-test-1"));
    }

    #[tokio::test]
    async fn checks_added_after_start_are_picked_up_by_polling() {
        let addr =
            testutil::spawn_http_server("HTTP/1.1 200 OK", "ok", Duration::from_millis(10)).await;
        let url = format!("http://{addr}/");

        let store = Arc::new(MockStore::new());

        let mut scheduler =
            Scheduler::new("us-test-1".to_string(), test_settings(), store.clone());
        scheduler.start().await;

        // appears only after the scheduler is already running
        store.put_check(fast_check("check-late", &url));

        tokio::time::sleep(Duration::from_secs(4)).await;
        scheduler.stop().await;

        assert!(
            !store.results_for("check-late").is_empty(),
            "late check never produced results"
        );
    }

    #[tokio::test]
    async fn stop_flushes_buffered_results() {
        let addr =
            testutil::spawn_http_server("HTTP/1.1 200 OK", "ok", Duration::from_millis(10)).await;
        let url = format!("http://{addr}/");

        let store = Arc::new(MockStore::new());
        store.put_check(fast_check("check-a", &url));

        // flush interval far beyond test duration: only the shutdown
        // drain can deliver results
        let mut settings = test_settings();
        settings.flush_interval_seconds = 600;

        let mut scheduler =
            Scheduler::new("us-test-1".to_string(), settings, store.clone());
        scheduler.start().await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        scheduler.stop().await;

        assert!(!store.results_for("check-a").is_empty());
    }
}
