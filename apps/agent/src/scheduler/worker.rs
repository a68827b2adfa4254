//! Per-check worker task.
//!
//! One task owns one check: it waits for its initial definition on its
//! control channel, sleeps a startup jitter, then alternates between a
//! coalescing interval timer and the control channel. The registry is
//! the only writer of check state; the worker sees updates exclusively
//! as messages.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checks::{CheckDefinition, CheckResult};
use crate::probe::ProbeTracer;

/// Everything a worker needs besides its own control channel.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub region: String,
    pub tracer: Arc<ProbeTracer>,
    pub results: mpsc::Sender<CheckResult>,
    pub shutdown: CancellationToken,
}

fn new_ticker(interval_seconds: u64, immediate: bool) -> time::Interval {
    let period = Duration::from_secs(interval_seconds.max(1));
    let start =
        if immediate { time::Instant::now() } else { time::Instant::now() + period };
    let mut ticker = time::interval_at(start, period);
    // Deliberate: a probe that overruns its interval drops the missed
    // firings instead of queueing a burst of catch-up probes.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Run one check to termination. Exits when the check is deactivated,
/// the control channel closes, or the root shutdown fires; an in-flight
/// probe is always finished first.
pub(crate) async fn run_worker(
    ctx: WorkerContext,
    mut control: mpsc::Receiver<CheckDefinition>,
    jitter: Duration,
) {
    let Some(mut definition) = control.recv().await else {
        return;
    };
    let check_id = definition.id.clone();

    debug!(check_id, delay_ms = jitter.as_millis() as u64, "applying startup jitter");
    let jitter_deadline = time::Instant::now() + jitter;
    loop {
        tokio::select! {
            biased;

            _ = ctx.shutdown.cancelled() => return,

            // Updates can land while we are still spreading start
            // times; a deactivation must not wait the jitter out.
            update = control.recv() => match update {
                None => return,
                Some(update) if !update.active => {
                    info!(check_id, "check deactivated before first probe, stopping");
                    return;
                }
                Some(update) => definition = update,
            },

            _ = time::sleep_until(jitter_deadline) => break,
        }
    }

    // First firing right after the jitter, then every interval.
    let mut ticker = new_ticker(definition.interval_seconds, true);

    loop {
        tokio::select! {
            biased;

            _ = ctx.shutdown.cancelled() => {
                info!(check_id, "shutdown requested, stopping check");
                return;
            }

            update = control.recv() => {
                match update {
                    None => {
                        info!(check_id, "control channel closed, stopping check");
                        return;
                    }
                    Some(update) if !update.active => {
                        info!(check_id, "check deactivated, stopping");
                        return;
                    }
                    Some(update) => {
                        if update.interval_seconds != definition.interval_seconds {
                            // Re-arm in place: next probe after one full
                            // new interval, no immediate extra firing.
                            debug!(
                                check_id,
                                interval = update.interval_seconds,
                                "interval changed, re-arming ticker"
                            );
                            ticker = new_ticker(update.interval_seconds, false);
                        }
                        debug!(check_id, serial = update.serial, "definition updated");
                        definition = update;
                    }
                }
            }

            _ = ticker.tick() => {
                if !definition.active {
                    info!(check_id, "check no longer active, stopping");
                    return;
                }

                let result = execute_probe(&ctx, &definition).await;
                match ctx.results.try_send(result) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        // Never block probing on a slow sink.
                        warn!(check_id, "result queue full, dropping result");
                    }
                    Err(TrySendError::Closed(_)) => {
                        info!(check_id, "result queue closed, stopping check");
                        return;
                    }
                }
            }
        }
    }
}

/// One probe attempt, always producing exactly one result.
pub(crate) async fn execute_probe(ctx: &WorkerContext, definition: &CheckDefinition) -> CheckResult {
    let deadline = Duration::from_secs(definition.http_timeout_seconds.max(1));
    let fallback_timestamp = Utc::now();

    match ctx.tracer.probe(&definition.url, deadline).await {
        Ok(report) => {
            info!(
                check_id = definition.id,
                region = ctx.region,
                response_code = report.status_code,
                firstbyte_ms = report.firstbyte_ms,
                "check_result"
            );
            CheckResult {
                region: ctx.region.clone(),
                check_id: definition.id.clone(),
                timestamp: report.started_at,
                response_code: report.status_code,
                response_info: report.status_text,
                firstbyte_ms: report.firstbyte_ms,
                dns_ms: report.dns_ms,
                tls_ms: report.tls_ms,
                connect_ms: report.connect_ms,
            }
        }
        Err(err) => {
            error!(
                check_id = definition.id,
                region = ctx.region,
                error = %err,
                "probe failed"
            );
            CheckResult::failed(
                ctx.region.clone(),
                definition.id.clone(),
                fallback_timestamp,
                err.to_string(),
            )
        }
    }
}
