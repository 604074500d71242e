use super::{AnalyticsRow, AnalyticsStore};
use crate::dataflow::MetricsTracker;
use crate::event::EnrichedEvent;
use crate::retry::Backoff;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct SinkSettings {
    pub queue_capacity: usize,
    pub batch_size: usize,
    /// Partial batches are written at least this often
    pub flush_interval: Duration,
    pub write_timeout: Duration,
    pub backoff: Backoff,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            batch_size: 500,
            flush_interval: Duration::from_secs(1),
            write_timeout: Duration::from_secs(5),
            backoff: Backoff::from_millis(200, 5_000, 5),
        }
    }
}

/// Build the bounded queue between workers and the background writer.
pub fn sink_channel(
    settings: SinkSettings,
    store: Arc<dyn AnalyticsStore>,
    metrics: MetricsTracker,
) -> (SinkHandle, SinkWriter) {
    let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
    let handle = SinkHandle {
        tx,
        metrics: metrics.clone(),
    };
    let writer = SinkWriter {
        rx,
        store,
        settings,
        metrics,
    };
    (handle, writer)
}

/// Producer side of the sink queue. Submitting never waits.
#[derive(Clone)]
pub struct SinkHandle {
    tx: mpsc::Sender<AnalyticsRow>,
    metrics: MetricsTracker,
}

impl SinkHandle {
    /// Enqueue an event for persistence. Returns false if it was dropped.
    pub fn submit(&self, event: &EnrichedEvent) -> bool {
        match self.tx.try_send(AnalyticsRow::from(event)) {
            Ok(()) => true,
            Err(TrySendError::Full(row)) => {
                warn!(
                    entity_id = %row.user_id,
                    sequence_no = row.sequence_no,
                    "Sink queue full, dropping event"
                );
                self.metrics.record_sink_dropped(1);
                false
            }
            Err(TrySendError::Closed(row)) => {
                warn!(entity_id = %row.user_id, "Sink writer stopped, dropping event");
                self.metrics.record_sink_dropped(1);
                false
            }
        }
    }
}

/// Background task draining the sink queue into the analytics store.
pub struct SinkWriter {
    rx: mpsc::Receiver<AnalyticsRow>,
    store: Arc<dyn AnalyticsStore>,
    settings: SinkSettings,
    metrics: MetricsTracker,
}

impl SinkWriter {
    /// Runs until every `SinkHandle` is dropped, then flushes what is left.
    pub async fn run(mut self) {
        let batch_size = self.settings.batch_size.max(1);
        let mut batch: Vec<AnalyticsRow> = Vec::with_capacity(batch_size);
        let mut ticker = interval(self.settings.flush_interval.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        info!(store = self.store.name(), batch_size = batch_size, "Sink writer started");

        loop {
            tokio::select! {
                maybe_row = self.rx.recv() => {
                    match maybe_row {
                        Some(row) => {
                            batch.push(row);
                            if batch.len() >= batch_size {
                                self.flush(&mut batch).await;
                            }
                        }
                        None => {
                            self.flush(&mut batch).await;
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.flush(&mut batch).await;
                }
            }
        }

        info!(store = self.store.name(), "Sink writer drained and stopped");
    }

    async fn flush(&self, batch: &mut Vec<AnalyticsRow>) {
        if batch.is_empty() {
            return;
        }
        let rows = std::mem::take(batch);
        let backoff = self.settings.backoff;

        for attempt in 0..backoff.max_attempts {
            match timeout(self.settings.write_timeout, self.store.append(&rows)).await {
                Ok(Ok(())) => {
                    debug!(rows = rows.len(), store = self.store.name(), "Wrote batch");
                    self.metrics.record_sink_written(rows.len());
                    return;
                }
                Ok(Err(e)) => {
                    warn!(
                        store = self.store.name(),
                        attempt = attempt + 1,
                        max_attempts = backoff.max_attempts,
                        error = %e,
                        "Batch write failed"
                    );
                }
                Err(_) => {
                    warn!(
                        store = self.store.name(),
                        attempt = attempt + 1,
                        max_attempts = backoff.max_attempts,
                        timeout_ms = self.settings.write_timeout.as_millis() as u64,
                        "Batch write timed out"
                    );
                }
            }

            if backoff.should_retry(attempt) {
                sleep(backoff.delay(attempt)).await;
            }
        }

        error!(
            store = self.store.name(),
            rows = rows.len(),
            "Dropping batch after exhausting retries"
        );
        self.metrics.record_sink_failed_batch();
        self.metrics.record_sink_dropped(rows.len());
    }
}
