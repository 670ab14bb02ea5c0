//! Consumer side of the broker: fan-in over the four queues, manual
//! acknowledgement, and header-tracked retry with capped exponential
//! backoff.
//!
//! Native requeue would drop headers and lose the retry cap, so a failed
//! delivery is republished through the default exchange with the original
//! queue name as routing key and `x-retry-count` incremented.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{Delivery, HeaderValue, PriorityBroker, TaskMessage, QUEUES, RETRY_COUNT_HEADER};
use crate::common::{Error, Result};

/// Consumer tuning; defaults follow the broker protocol contract.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Unacked deliveries allowed in flight.
    pub prefetch: usize,
    /// Retry budget; the initial attempt is not counted.
    pub max_retries: i64,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            prefetch: 10,
            max_retries: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// `min(initial · 2^retry, max)`
pub fn backoff_delay(config: &ConsumerConfig, retry: i64) -> Duration {
    let exponent = retry.clamp(0, 30) as u32;
    let delay = config.initial_backoff * 2u32.pow(exponent);
    delay.min(config.max_backoff)
}

/// Handles one parsed delivery. A returned error triggers the retry
/// protocol; success acknowledges.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &TaskMessage) -> anyhow::Result<()>;
}

pub struct Consumer {
    broker: Arc<PriorityBroker>,
    config: ConsumerConfig,
}

impl Consumer {
    pub fn new(broker: Arc<PriorityBroker>, config: ConsumerConfig) -> Self {
        Self { broker, config }
    }

    /// Run until the token fires and the merged channel drains.
    ///
    /// One reader per queue forwards into a single bounded channel; the
    /// merged channel closes exactly once, after every reader has
    /// terminated. A cancellation that lands during a backoff wait rejects
    /// the in-flight delivery and surfaces as [`Error::Cancelled`].
    pub async fn run(
        &self,
        handler: Arc<dyn MessageHandler>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let (merged_tx, mut merged_rx) = mpsc::channel::<Delivery>(self.config.prefetch.max(1));

        for queue in QUEUES {
            let mut rx = self.broker.take_receiver(queue).await?;
            let tx = merged_tx.clone();
            let cancel = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        delivery = rx.recv() => match delivery {
                            Some(delivery) => {
                                if tx.send(delivery).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        },
                    }
                }
                debug!(queue, "queue reader terminated");
            });
        }
        // The readers hold the only remaining senders; when they exit the
        // merged channel closes and the loop below drains out.
        drop(merged_tx);

        while let Some(delivery) = merged_rx.recv().await {
            if shutdown.is_cancelled() {
                self.broker.reject(delivery);
                continue;
            }
            self.handle_delivery(delivery, handler.as_ref(), &shutdown)
                .await?;
        }

        debug!("consumer stopped");
        Ok(())
    }

    async fn handle_delivery(
        &self,
        delivery: Delivery,
        handler: &dyn MessageHandler,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        let message: TaskMessage = match serde_json::from_slice(&delivery.body) {
            Ok(message) => message,
            Err(e) => {
                warn!(queue = delivery.queue, error = %e, "poison message, rejecting");
                self.broker.reject(delivery);
                return Ok(());
            }
        };

        let retry = delivery.headers.retry_count();
        match handler.handle(&message).await {
            Ok(()) => {
                debug!(task_id = %message.job_id, queue = delivery.queue, "delivery acked");
                Ok(())
            }
            Err(e) if retry < self.config.max_retries => {
                let delay = backoff_delay(&self.config, retry);
                warn!(
                    task_id = %message.job_id,
                    queue = delivery.queue,
                    retry,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "handler failed, scheduling retry"
                );
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        self.broker.reject(delivery);
                        return Err(Error::Cancelled);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }

                let mut headers = delivery.headers.clone();
                headers.insert(RETRY_COUNT_HEADER, HeaderValue::Long(retry + 1));
                if let Err(publish_err) =
                    self.broker
                        .publish_to_queue(delivery.queue, delivery.body.clone(), headers)
                {
                    error!(
                        task_id = %message.job_id,
                        error = %publish_err,
                        "republish failed, rejecting delivery"
                    );
                    self.broker.reject(delivery);
                }
                Ok(())
            }
            Err(e) => {
                warn!(
                    task_id = %message.job_id,
                    queue = delivery.queue,
                    retry,
                    error = %e,
                    "retry budget exhausted, dead-lettering"
                );
                self.broker.reject(delivery);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct CountingHandler {
        calls: AtomicUsize,
        fail: bool,
        invoked: Notify,
    }

    impl CountingHandler {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
                invoked: Notify::new(),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessageHandler for CountingHandler {
        async fn handle(&self, _message: &TaskMessage) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.invoked.notify_waiters();
            if self.fail {
                anyhow::bail!("deterministic failure")
            }
            Ok(())
        }
    }

    fn message(priority: i32) -> TaskMessage {
        TaskMessage {
            job_id: "task-1".to_string(),
            priority,
            kind: "search".to_string(),
        }
    }

    #[test]
    fn backoff_sequence_is_capped() {
        let config = ConsumerConfig::default();
        let delays: Vec<u64> = (0..6)
            .map(|retry| backoff_delay(&config, retry).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30]);
    }

    #[tokio::test]
    async fn successful_delivery_is_acked_once() {
        let broker = Arc::new(PriorityBroker::new(16));
        let handler = CountingHandler::new(false);
        broker.publish(&message(0)).unwrap();

        let shutdown = CancellationToken::new();
        let consumer = Consumer::new(broker.clone(), ConsumerConfig::default());
        let run = {
            let handler = handler.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { consumer.run(handler, shutdown).await })
        };

        handler.invoked.notified().await;
        shutdown.cancel();
        run.await.unwrap().unwrap();

        assert_eq!(handler.calls(), 1);
        assert_eq!(broker.dead_letter_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_delivery_is_retried_then_dead_lettered() {
        let broker = Arc::new(PriorityBroker::new(16));
        let handler = CountingHandler::new(true);
        broker.publish(&message(0)).unwrap();

        let shutdown = CancellationToken::new();
        let consumer = Consumer::new(broker.clone(), ConsumerConfig::default());
        let started = tokio::time::Instant::now();
        let run = {
            let handler = handler.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { consumer.run(handler, shutdown).await })
        };

        // Initial attempt plus five retries, then dead-letter.
        while broker.dead_letter_count() == 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        shutdown.cancel();
        run.await.unwrap().unwrap();

        assert_eq!(handler.calls(), 6);
        assert_eq!(broker.dead_letter_count(), 1);
        // Backoffs between attempts: 1 + 2 + 4 + 8 + 16 = 31 seconds.
        assert!(started.elapsed() >= Duration::from_secs(31));

        let dead = broker.dead_letters();
        assert_eq!(dead[0].headers.retry_count(), 5);
    }

    #[tokio::test]
    async fn poison_message_is_rejected_without_retry() {
        let broker = Arc::new(PriorityBroker::new(16));
        broker
            .publish_to_queue(crate::broker::QUEUE_DEFAULT, b"not json".to_vec(), Default::default())
            .unwrap();
        let handler = CountingHandler::new(false);

        let shutdown = CancellationToken::new();
        let consumer = Consumer::new(broker.clone(), ConsumerConfig::default());
        let run = {
            let handler = handler.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { consumer.run(handler, shutdown).await })
        };

        while broker.dead_letter_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        run.await.unwrap().unwrap();

        assert_eq!(handler.calls(), 0);
        assert_eq!(broker.dead_letter_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_rejects_and_errors() {
        let broker = Arc::new(PriorityBroker::new(16));
        let handler = CountingHandler::new(true);
        broker.publish(&message(0)).unwrap();

        let shutdown = CancellationToken::new();
        let consumer = Consumer::new(broker.clone(), ConsumerConfig::default());
        let run = {
            let handler = handler.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { consumer.run(handler, shutdown).await })
        };

        // Cancel while the first backoff wait is pending.
        handler.invoked.notified().await;
        shutdown.cancel();

        let result = run.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(handler.calls(), 1);
        assert_eq!(broker.dead_letter_count(), 1);
    }

    #[tokio::test]
    async fn merged_channel_closes_after_cancellation() {
        let broker = Arc::new(PriorityBroker::new(16));
        let handler = CountingHandler::new(false);
        let shutdown = CancellationToken::new();
        let consumer = Consumer::new(broker.clone(), ConsumerConfig::default());
        let run = {
            let handler = handler.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { consumer.run(handler, shutdown).await })
        };

        shutdown.cancel();
        // Every reader terminates and the merged channel closes exactly
        // once; run() returns cleanly.
        run.await.unwrap().unwrap();
    }
}
