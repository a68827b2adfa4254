//! Check registry and reconciliation.
//!
//! The registry owns the authoritative in-memory map of check
//! definitions and the control channel of every worker it has spawned.
//! Only `reconcile` mutates the map, and it does so under one lock for
//! the whole pass, so two concurrent polls can never race a worker
//! into existence twice for the same ID.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::worker::{WorkerContext, run_worker};
use crate::checks::{CheckDefinition, CheckResult};
use crate::probe::ProbeTracer;
use crate::store::{CheckStore, StoreError};

/// Control channel capacity. One slot is enough: the reconciler blocks
/// on delivery and the worker drains with priority.
const CONTROL_CAPACITY: usize = 1;

struct RegistryEntry {
    definition: CheckDefinition,
    control: mpsc::Sender<CheckDefinition>,
}

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<String, RegistryEntry>,
    workers: JoinSet<()>,
}

pub struct CheckRegistry {
    region: String,
    tracer: Arc<ProbeTracer>,
    results: mpsc::Sender<CheckResult>,
    shutdown: CancellationToken,
    inner: Mutex<RegistryInner>,
}

impl CheckRegistry {
    pub fn new(
        region: String,
        tracer: Arc<ProbeTracer>,
        results: mpsc::Sender<CheckResult>,
        shutdown: CancellationToken,
    ) -> Self {
        Self { region, tracer, results, shutdown, inner: Mutex::new(RegistryInner::default()) }
    }

    /// Fetch the region's definitions from the store and bring the
    /// worker set in line with them. Returns the definitions that got a
    /// brand-new worker this pass.
    ///
    /// The fetch happens before the registry lock is taken; on a store
    /// error nothing is mutated and the error is handed to the caller
    /// to log and retry on the next cycle.
    pub async fn reconcile(
        &self,
        store: &dyn CheckStore,
    ) -> Result<Vec<CheckDefinition>, StoreError> {
        let updates = store.fetch_region_checks(&self.region).await?;

        let mut inner = self.inner.lock().await;
        let mut started = Vec::new();

        for update in updates {
            let currently_active =
                inner.entries.get(&update.id).map(|entry| entry.definition.active);

            match currently_active {
                // Live worker: refresh the cached definition and forward
                // the update unconditionally, changed or not. The worker
                // decides what to do with it, including terminating when
                // it sees `active == false`.
                Some(true) => {
                    debug!(check_id = update.id, serial = update.serial, "updating check");
                    let Some(entry) = inner.entries.get_mut(&update.id) else {
                        continue;
                    };
                    entry.definition = update.clone();
                    let control = entry.control.clone();
                    let id = update.id.clone();
                    if control.send(update).await.is_err() {
                        // Worker already exited (e.g. the result queue
                        // closed under it). Flag the entry inactive so
                        // the next pass takes the respawn branch.
                        debug!(check_id = id, "worker gone, entry flagged for respawn");
                        if let Some(entry) = inner.entries.get_mut(&id) {
                            entry.definition.active = false;
                        }
                    }
                }

                // Unknown check, or a deactivated one coming back: fresh
                // channel, fresh worker, fresh jitter.
                Some(false) | None if update.active => {
                    info!(
                        check_id = update.id,
                        interval = update.interval_seconds,
                        "starting check worker"
                    );
                    let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
                    let jitter = startup_jitter(update.interval_seconds);
                    let ctx = WorkerContext {
                        region: self.region.clone(),
                        tracer: Arc::clone(&self.tracer),
                        results: self.results.clone(),
                        shutdown: self.shutdown.clone(),
                    };
                    inner.workers.spawn(run_worker(ctx, control_rx, jitter));

                    // Capacity 1 and the channel is empty, so this never
                    // blocks.
                    let _ = control_tx.send(update.clone()).await;
                    inner.entries.insert(
                        update.id.clone(),
                        RegistryEntry { definition: update.clone(), control: control_tx },
                    );
                    started.push(update);
                }

                // Known and inactive on both sides: keep the cached copy
                // fresh, no worker action.
                Some(false) => {
                    if let Some(entry) = inner.entries.get_mut(&update.id) {
                        entry.definition = update;
                    }
                }

                // Unknown and inactive: nothing to do.
                None => {}
            }
        }

        // Reap workers that have already finished so the set does not
        // accumulate completed tasks between polls.
        while let Some(result) = inner.workers.try_join_next() {
            if let Err(err) = result {
                debug!(error = %err, "check worker task ended abnormally");
            }
        }

        Ok(started)
    }

    /// Wait for every worker task to finish. Call after cancelling the
    /// shutdown token.
    pub async fn drain_workers(&self) {
        let mut inner = self.inner.lock().await;
        while inner.workers.join_next().await.is_some() {}
    }

    #[cfg(test)]
    pub(crate) async fn entry_count(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    #[cfg(test)]
    pub(crate) async fn entry_active(&self, id: &str) -> Option<bool> {
        self.inner.lock().await.entries.get(id).map(|e| e.definition.active)
    }

    #[cfg(test)]
    pub(crate) async fn control_closed(&self, id: &str) -> Option<bool> {
        self.inner.lock().await.entries.get(id).map(|e| e.control.is_closed())
    }
}

fn startup_jitter(interval_seconds: u64) -> Duration {
    let bound = interval_seconds.max(1);
    Duration::from_secs(rand::thread_rng().gen_range(0..bound))
}
