//! Batched result delivery.
//!
//! Workers push into a bounded queue; the sink buffers everything that
//! arrives between flush ticks and writes one batch per tick. The sink
//! exits after a final flush when the queue closes, which is how
//! shutdown drains the last results.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::checks::CheckResult;
use crate::store::CheckStore;

pub struct ResultSink {
    store: Arc<dyn CheckStore>,
    flush_interval: Duration,
    /// Flush-failure policy: retain-and-retry. A failed batch stays
    /// buffered for the next tick, but the buffer never grows past this
    /// cap; beyond it the oldest results are dropped with a warning.
    max_buffered: usize,
    buffer: Vec<CheckResult>,
}

impl ResultSink {
    pub fn new(store: Arc<dyn CheckStore>, flush_interval: Duration, max_buffered: usize) -> Self {
        Self { store, flush_interval, max_buffered, buffer: Vec::new() }
    }

    /// Consume the queue until it closes, flushing on every tick.
    pub async fn run(mut self, mut queue: mpsc::Receiver<CheckResult>) {
        let mut ticker = time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe_result = queue.recv() => match maybe_result {
                    Some(result) => self.buffer.push(result),
                    None => {
                        debug!("result queue closed, flushing remaining results");
                        self.flush().await;
                        return;
                    }
                },

                _ = ticker.tick() => self.flush().await,
            }
        }
    }

    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        match self.store.write_results(&self.buffer).await {
            Ok(summary) => {
                info!(%summary, "flushed result batch");
                self.buffer.clear();
            }
            Err(err) => {
                warn!(
                    error = %err,
                    buffered = self.buffer.len(),
                    "result flush failed, retaining batch for next attempt"
                );
                if self.buffer.len() > self.max_buffered {
                    let excess = self.buffer.len() - self.max_buffered;
                    self.buffer.drain(..excess);
                    warn!(dropped = excess, "result buffer over capacity, dropped oldest results");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::store::mock::MockStore;

    fn test_result(check_id: &str) -> CheckResult {
        CheckResult {
            region: "us-test-1".into(),
            check_id: check_id.into(),
            timestamp: Utc::now(),
            response_code: 200,
            response_info: "200 OK".into(),
            firstbyte_ms: 10,
            dns_ms: 1,
            tls_ms: 0,
            connect_ms: 2,
        }
    }

    #[tokio::test]
    async fn three_results_flush_as_one_batch() {
        let store = Arc::new(MockStore::new());
        let (tx, rx) = mpsc::channel(64);

        let sink = ResultSink::new(store.clone(), Duration::from_secs(1), 1000);
        let handle = tokio::spawn(sink.run(rx));

        for i in 0..3 {
            tx.send(test_result(&format!("check-{i}"))).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.batches.lock().unwrap()[0].len(), 3);

        // queue closes; the now-empty buffer must not produce a write
        drop(tx);
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn failed_flush_retains_batch_until_store_recovers() {
        let store = Arc::new(MockStore::new());
        store.fail_next_writes(2);
        let (tx, rx) = mpsc::channel(64);

        let sink = ResultSink::new(store.clone(), Duration::from_millis(300), 1000);
        let handle = tokio::spawn(sink.run(rx));

        for i in 0..3 {
            tx.send(test_result(&format!("check-{i}"))).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(1500)).await;
        drop(tx);
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();

        // exactly one successful write, containing all three results
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.batches.lock().unwrap()[0].len(), 3);
    }

    #[tokio::test]
    async fn overflowing_buffer_drops_oldest_results() {
        let store = Arc::new(MockStore::new());
        store.fail_next_writes(2);
        let (tx, rx) = mpsc::channel(64);

        // cap of 2 with five buffered results forces the drop path
        let sink = ResultSink::new(store.clone(), Duration::from_millis(300), 2);
        let handle = tokio::spawn(sink.run(rx));

        for i in 0..5 {
            tx.send(test_result(&format!("check-{i}"))).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(1500)).await;
        drop(tx);
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();

        // only the two newest results survive to the successful write
        assert_eq!(store.write_count(), 1);
        let batches = store.batches.lock().unwrap();
        assert_eq!(batches[0].len(), 2);
        let ids: Vec<&str> = batches[0].iter().map(|r| r.check_id.as_str()).collect();
        assert_eq!(ids, vec!["check-3", "check-4"]);
    }

    #[tokio::test]
    async fn queue_close_flushes_remaining_results() {
        let store = Arc::new(MockStore::new());
        let (tx, rx) = mpsc::channel(64);

        // long flush interval: only the close-triggered flush can fire
        let sink = ResultSink::new(store.clone(), Duration::from_secs(600), 1000);
        let handle = tokio::spawn(sink.run(rx));

        tx.send(test_result("check-a")).await.unwrap();
        tx.send(test_result("check-b")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(tx);

        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.batches.lock().unwrap()[0].len(), 2);
    }
}
