//! Buffered delivery with bounded retry and dead-lettering.
//!
//! Messages enter through a [`QueueSender`], accumulate into batches
//! (bounded by size and a batching window), and are handed to a
//! [`QueueHandler`] one message at a time. A handler error, or a handler
//! that does not acknowledge within the visibility timeout, counts as a
//! failed attempt; the failure is recorded on the message before it is
//! redelivered. Once a message's attempts reach the configured maximum it
//! moves to the dead-letter queue, which only the rejection path drains.
//!
//! Per-message states: Pending -> Delivered -> Acknowledged, or back to
//! Pending with attempts+1, or DeadLettered. Ordering across messages is
//! not guaranteed. Redeliveries go through an internal retry buffer, never
//! back through the producer channel, so retries cannot block on a full
//! channel the consumer itself drains.

use crate::config::QueueConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Errors surfaced to producers enqueueing messages.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,
}

/// Consumer invoked for each delivered message.
///
/// Returning an error signals "redeliver this message": the queue records
/// the failed attempt and retries up to the configured maximum.
#[async_trait]
pub trait QueueHandler<T: Send + Sync>: Send + Sync {
    type Error: fmt::Display + Send;

    async fn handle(&self, message: &T) -> Result<(), Self::Error>;
}

/// A message in flight, with its delivery attempt counter.
///
/// The counter is owned by the queue and never visible to handlers.
#[derive(Debug, Clone)]
pub struct QueuedMessage<T> {
    pub id: Uuid,
    pub payload: T,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// A message that exhausted its delivery attempts.
#[derive(Debug, Clone)]
pub struct DeadLetter<T> {
    pub id: Uuid,
    pub payload: T,
    pub attempts: u32,
    pub last_error: String,
    pub enqueued_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Producer handle feeding the queue.
pub struct QueueSender<T> {
    tx: mpsc::Sender<QueuedMessage<T>>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send> QueueSender<T> {
    pub async fn enqueue(&self, payload: T) -> Result<(), QueueError> {
        let message = QueuedMessage {
            id: Uuid::new_v4(),
            payload,
            attempts: 0,
            enqueued_at: Utc::now(),
        };
        self.tx
            .send(message)
            .await
            .map_err(|_| QueueError::Closed)?;
        metrics::counter!("queue.messages.enqueued").increment(1);
        Ok(())
    }
}

/// Consumer side of the dead-letter queue.
pub struct DeadLetterQueue<T> {
    rx: mpsc::Receiver<DeadLetter<T>>,
}

impl<T> DeadLetterQueue<T> {
    /// Receive the next dead letter; `None` once the queue shut down and
    /// drained.
    pub async fn recv(&mut self) -> Option<DeadLetter<T>> {
        self.rx.recv().await
    }
}

/// Signals the queue's run loop to stop.
///
/// The signal is level-triggered state, not a pulse: a handle fired
/// before the run loop is first polled still stops it.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// Buffered queue with per-message retry accounting.
pub struct BufferedQueue<T> {
    rx: mpsc::Receiver<QueuedMessage<T>>,
    redelivery: VecDeque<QueuedMessage<T>>,
    dlq_tx: mpsc::Sender<DeadLetter<T>>,
    batch_size: usize,
    batch_window: Duration,
    visibility_timeout: Duration,
    max_attempts: u32,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Create a buffered queue with its producer handle and dead-letter queue.
pub fn buffered<T: Send + Sync + 'static>(
    config: &QueueConfig,
) -> (QueueSender<T>, BufferedQueue<T>, DeadLetterQueue<T>) {
    let (tx, rx) = mpsc::channel(config.capacity);
    let (dlq_tx, dlq_rx) = mpsc::channel(config.capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let queue = BufferedQueue {
        rx,
        redelivery: VecDeque::new(),
        dlq_tx,
        batch_size: config.batch_size,
        batch_window: config.batch_window(),
        visibility_timeout: config.visibility_timeout(),
        max_attempts: config.max_attempts,
        shutdown_tx,
        shutdown_rx,
    };

    (QueueSender { tx }, queue, DeadLetterQueue { rx: dlq_rx })
}

impl<T: Send + Sync + 'static> BufferedQueue<T> {
    /// Handle used to stop the run loop.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Consume batches and process them until shutdown.
    pub async fn run<H: QueueHandler<T>>(mut self, handler: Arc<H>) {
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!(
            batch_size = self.batch_size,
            max_attempts = self.max_attempts,
            "starting buffered queue consumer"
        );

        while let Some(batch) = self.collect_batch(&mut shutdown_rx).await {
            debug!(batch_len = batch.len(), "delivering batch");
            for message in batch {
                self.deliver(handler.as_ref(), message).await;
            }
        }

        info!("buffered queue consumer stopped");
    }

    /// Wait for the next batch: redeliveries first, then blocks for the
    /// first new message and fills up to `batch_size` within the batching
    /// window.
    async fn collect_batch(
        &mut self,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Option<Vec<QueuedMessage<T>>> {
        if *shutdown_rx.borrow() {
            debug!("shutdown signal received");
            return None;
        }

        let first = match self.redelivery.pop_front() {
            Some(message) => message,
            None => tokio::select! {
                _ = shutdown_rx.changed() => {
                    debug!("shutdown signal received");
                    return None;
                }
                message = self.rx.recv() => message?,
            },
        };

        let mut batch = vec![first];
        let deadline = Instant::now() + self.batch_window;

        while batch.len() < self.batch_size {
            if let Some(message) = self.redelivery.pop_front() {
                batch.push(message);
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                message = self.rx.recv() => match message {
                    Some(m) => batch.push(m),
                    None => break,
                },
            }
        }

        Some(batch)
    }

    /// Deliver one message, acknowledging on success and otherwise
    /// recording the failed attempt before redelivery or dead-lettering.
    async fn deliver<H: QueueHandler<T>>(&mut self, handler: &H, mut message: QueuedMessage<T>) {
        let outcome =
            tokio::time::timeout(self.visibility_timeout, handler.handle(&message.payload)).await;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!(
                "not acknowledged within {:?}",
                self.visibility_timeout
            )),
        };

        let Some(last_error) = failure else {
            debug!(message_id = %message.id, "message acknowledged");
            metrics::counter!("queue.messages.acknowledged").increment(1);
            return;
        };

        message.attempts += 1;
        metrics::counter!("queue.attempts.failed").increment(1);

        if message.attempts >= self.max_attempts {
            warn!(
                message_id = %message.id,
                attempts = message.attempts,
                error = %last_error,
                "message exhausted retries, dead-lettering"
            );
            let dead = DeadLetter {
                id: message.id,
                payload: message.payload,
                attempts: message.attempts,
                last_error,
                enqueued_at: message.enqueued_at,
                dead_lettered_at: Utc::now(),
            };
            if self.dlq_tx.send(dead).await.is_err() {
                error!("dead-letter queue closed, dropping message");
            }
            metrics::counter!("queue.messages.dead_lettered").increment(1);
        } else {
            debug!(
                message_id = %message.id,
                attempts = message.attempts,
                error = %last_error,
                "processing failed, message buffered for redelivery"
            );
            metrics::counter!("queue.messages.retried").increment(1);
            self.redelivery.push_back(message);
        }
    }
}
