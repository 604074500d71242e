use super::worker::{Downstream, PartitionWorker};
use crate::event::{partition_for, PositionEvent};
use crate::nats::NatsConfig;
use anyhow::{Context, Result};
use async_nats::jetstream::{self, consumer::pull, consumer::AckPolicy, consumer::DeliverPolicy};
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Consume one bus partition through a durable pull consumer.
///
/// Messages are acked only after the event was processed and emitted, so a
/// crash redelivers; the worker's sequence check discards the replays.
/// Malformed payloads are acked and skipped.
pub async fn run_partition(
    jetstream: jetstream::Context,
    nats: NatsConfig,
    mut worker: PartitionWorker,
    downstream: Downstream,
    poll_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let partition = worker.partition();
    let consumer_name = nats.consumer_for(partition);

    let stream = jetstream
        .get_stream(&nats.stream_name)
        .await
        .with_context(|| format!("Failed to get {} stream", nats.stream_name))?;

    let consumer = stream
        .get_or_create_consumer(
            &consumer_name,
            pull::Config {
                durable_name: Some(consumer_name.clone()),
                filter_subject: nats.subject_for(partition),
                deliver_policy: DeliverPolicy::All,
                ack_policy: AckPolicy::Explicit,
                ..Default::default()
            },
        )
        .await
        .with_context(|| format!("Failed to get or create consumer {}", consumer_name))?;

    let mut messages = consumer
        .messages()
        .await
        .with_context(|| format!("Failed to open message stream for {}", consumer_name))?;

    info!(partition, consumer = %consumer_name, "Partition worker consuming");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let next = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            next = timeout(poll_timeout, messages.next()) => next,
        };

        let msg = match next {
            // Idle poll, re-check shutdown
            Err(_) => continue,
            Ok(None) => {
                warn!(partition, "Partition message stream ended");
                break;
            }
            Ok(Some(Err(e))) => {
                error!(partition, error = %e, "Error receiving message");
                continue;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match serde_json::from_slice::<PositionEvent>(&msg.payload) {
            Ok(event) => {
                worker.handle(event, &downstream).await;
            }
            Err(e) => {
                error!(partition, error = %e, "Failed to deserialize position event, skipping");
                worker.metrics().record_invalid();
            }
        }

        if let Err(e) = msg.ack().await {
            error!(partition, error = %e, "Failed to acknowledge message");
        }
    }

    info!(partition, "Partition worker stopped");
    Ok(())
}

/// Drive a worker from an in-process channel until it closes or shutdown is
/// signalled. Events already queued are processed first.
pub async fn run_stream(
    mut worker: PartitionWorker,
    downstream: Downstream,
    mut rx: mpsc::Receiver<PositionEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let partition = worker.partition();
    debug!(partition, "In-process worker started");

    loop {
        tokio::select! {
            biased;
            maybe_event = rx.recv() => {
                match maybe_event {
                    Some(event) => {
                        worker.handle(event, &downstream).await;
                    }
                    None => break,
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    debug!(partition, "In-process worker stopped");
}

/// Route events from one channel to per-partition channels, preserving the
/// per-entity order. Stops when the input closes or every partition is gone.
pub async fn dispatch(mut rx: mpsc::Receiver<PositionEvent>, partitions: Vec<mpsc::Sender<PositionEvent>>) {
    if partitions.is_empty() {
        return;
    }
    let count = partitions.len() as u32;

    while let Some(event) = rx.recv().await {
        let partition = partition_for(&event.entity_id, count) as usize;
        if partitions[partition].send(event).await.is_err() {
            warn!(partition, "Partition worker gone, stopping dispatch");
            break;
        }
    }
}
