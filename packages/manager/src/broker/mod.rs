//! Priority-aware message broker bridging parent jobs to executable tasks.
//!
//! Four durable queues hang off one direct exchange: `critical`, `high`,
//! `default`, `low`. Publishing routes by the job's integer priority;
//! consuming fan-in merges all four queues under a cancellation token with
//! manual acknowledgement and header-tracked retry (see [`consume`]).
//!
//! The broker is in-process: bounded channels stand in for the wire, but
//! the protocol — persistent delivery metadata, publish timestamps, the
//! `x-retry-count` header in both 64- and 32-bit encodings, reject-without-
//! requeue dead-lettering — is the same contract a remote broker would
//! carry.

pub mod consume;

pub use consume::{Consumer, ConsumerConfig, MessageHandler};

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::common::{Error, Result};

pub const QUEUE_CRITICAL: &str = "critical";
pub const QUEUE_HIGH: &str = "high";
pub const QUEUE_DEFAULT: &str = "default";
pub const QUEUE_LOW: &str = "low";

/// All queues, highest priority class first.
pub const QUEUES: [&str; 4] = [QUEUE_CRITICAL, QUEUE_HIGH, QUEUE_DEFAULT, QUEUE_LOW];

/// Delivery header carrying the retry counter.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

const CONTENT_TYPE_JSON: &str = "application/json";

/// Map an integer priority to its queue routing key.
pub fn routing_key(priority: i32) -> &'static str {
    if priority >= 10 {
        QUEUE_CRITICAL
    } else if priority >= 5 {
        QUEUE_HIGH
    } else if priority < 0 {
        QUEUE_LOW
    } else {
        QUEUE_DEFAULT
    }
}

/// Wire message: which task to run and at what priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    /// Child task id (a UUID in textual form).
    pub job_id: String,
    pub priority: i32,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Header values as they appear on the wire; integers arrive in both
/// 64- and 32-bit encodings depending on the publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Long(i64),
    Int(i32),
    Str(String),
}

#[derive(Debug, Clone, Default)]
pub struct Headers(HashMap<String, HeaderValue>);

impl Headers {
    pub fn insert(&mut self, key: impl Into<String>, value: HeaderValue) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.0.get(key)
    }

    /// The `x-retry-count` header; absent or non-integer reads as 0.
    pub fn retry_count(&self) -> i64 {
        match self.get(RETRY_COUNT_HEADER) {
            Some(HeaderValue::Long(n)) => *n,
            Some(HeaderValue::Int(n)) => i64::from(*n),
            _ => 0,
        }
    }
}

/// One queued delivery with its transport metadata.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Queue the delivery was consumed from (and the routing key a retry
    /// republish must use).
    pub queue: &'static str,
    pub body: Vec<u8>,
    pub content_type: &'static str,
    pub persistent: bool,
    pub published_at: DateTime<Utc>,
    pub headers: Headers,
}

struct QueueState {
    tx: mpsc::Sender<Delivery>,
    rx: tokio::sync::Mutex<Option<mpsc::Receiver<Delivery>>>,
    capacity: usize,
}

/// The four-queue broker. One publisher side shared across publishes; one
/// consumer subscription per queue, taken at most once.
pub struct PriorityBroker {
    queues: HashMap<&'static str, QueueState>,
    dead_letters: Mutex<Vec<Delivery>>,
}

impl PriorityBroker {
    pub fn new(queue_capacity: usize) -> Self {
        let capacity = queue_capacity.max(1);
        let queues = QUEUES
            .iter()
            .map(|&name| {
                let (tx, rx) = mpsc::channel(capacity);
                (
                    name,
                    QueueState {
                        tx,
                        rx: tokio::sync::Mutex::new(Some(rx)),
                        capacity,
                    },
                )
            })
            .collect();
        Self {
            queues,
            dead_letters: Mutex::new(Vec::new()),
        }
    }

    fn queue(&self, name: &str) -> Result<&QueueState> {
        self.queues
            .get(name)
            .ok_or_else(|| Error::InvalidInput(format!("unknown queue {name:?}")))
    }

    /// Serialize and publish a message, routed by its priority.
    pub fn publish(&self, message: &TaskMessage) -> Result<()> {
        let body = serde_json::to_vec(message)
            .map_err(|e| Error::Internal(anyhow::anyhow!("encode broker message: {e}")))?;
        self.publish_to_queue(routing_key(message.priority), body, Headers::default())
    }

    /// Publish raw bytes to a named queue. This is the default-exchange
    /// path retries use, with the original queue name as routing key.
    pub fn publish_to_queue(
        &self,
        queue_name: &str,
        body: Vec<u8>,
        headers: Headers,
    ) -> Result<()> {
        let queue = self.queue(queue_name)?;
        // `queues` keys are the static names; resolve to the canonical one.
        let name = QUEUES
            .iter()
            .copied()
            .find(|&n| n == queue_name)
            .unwrap_or(QUEUE_DEFAULT);
        let delivery = Delivery {
            queue: name,
            body,
            content_type: CONTENT_TYPE_JSON,
            persistent: true,
            published_at: Utc::now(),
            headers,
        };
        queue.tx.try_send(delivery).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => {
                Error::DependencyDown(format!("queue {queue_name} is full"))
            }
            mpsc::error::TrySendError::Closed(_) => {
                Error::Transport(format!("queue {queue_name} is closed"))
            }
        })
    }

    /// Take the consumer side of a queue. Each queue has exactly one
    /// subscription; a second take is a conflict.
    pub async fn take_receiver(&self, queue_name: &str) -> Result<mpsc::Receiver<Delivery>> {
        let queue = self.queue(queue_name)?;
        queue
            .rx
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Conflict(format!("queue {queue_name} already consumed")))
    }

    /// Reject a delivery without requeue (dead-letter).
    pub fn reject(&self, delivery: Delivery) {
        self.dead_letters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(delivery);
    }

    pub fn dead_letter_count(&self) -> usize {
        self.dead_letters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn dead_letters(&self) -> Vec<Delivery> {
        self.dead_letters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Messages currently buffered in a queue.
    pub fn queue_depth(&self, queue_name: &str) -> Result<usize> {
        let queue = self.queue(queue_name)?;
        Ok(queue.capacity - queue.tx.capacity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_table_matches_priority_classes() {
        assert_eq!(routing_key(12), QUEUE_CRITICAL);
        assert_eq!(routing_key(10), QUEUE_CRITICAL);
        assert_eq!(routing_key(9), QUEUE_HIGH);
        assert_eq!(routing_key(7), QUEUE_HIGH);
        assert_eq!(routing_key(5), QUEUE_HIGH);
        assert_eq!(routing_key(4), QUEUE_DEFAULT);
        assert_eq!(routing_key(0), QUEUE_DEFAULT);
        assert_eq!(routing_key(-1), QUEUE_LOW);
        assert_eq!(routing_key(-3), QUEUE_LOW);
    }

    #[test]
    fn retry_header_accepts_both_integer_encodings() {
        let mut headers = Headers::default();
        assert_eq!(headers.retry_count(), 0);

        headers.insert(RETRY_COUNT_HEADER, HeaderValue::Long(3));
        assert_eq!(headers.retry_count(), 3);

        headers.insert(RETRY_COUNT_HEADER, HeaderValue::Int(4));
        assert_eq!(headers.retry_count(), 4);

        headers.insert(RETRY_COUNT_HEADER, HeaderValue::Str("x".to_string()));
        assert_eq!(headers.retry_count(), 0);
    }

    #[test]
    fn message_body_is_stable_json() {
        let message = TaskMessage {
            job_id: "abc".to_string(),
            priority: 7,
            kind: "search".to_string(),
        };
        let body = serde_json::to_string(&message).unwrap();
        assert_eq!(body, r#"{"job_id":"abc","priority":7,"type":"search"}"#);
        let back: TaskMessage = serde_json::from_str(&body).unwrap();
        assert_eq!(back, message);
    }

    #[tokio::test]
    async fn publish_routes_to_expected_queues() {
        let broker = PriorityBroker::new(16);
        for (priority, queue) in [
            (12, QUEUE_CRITICAL),
            (7, QUEUE_HIGH),
            (0, QUEUE_DEFAULT),
            (-3, QUEUE_LOW),
        ] {
            broker
                .publish(&TaskMessage {
                    job_id: format!("job-{priority}"),
                    priority,
                    kind: "search".to_string(),
                })
                .unwrap();
            assert_eq!(broker.queue_depth(queue).unwrap(), 1);
        }

        let mut rx = broker.take_receiver(QUEUE_HIGH).await.unwrap();
        let delivery = rx.recv().await.unwrap();
        assert!(delivery.persistent);
        assert_eq!(delivery.content_type, "application/json");
        let message: TaskMessage = serde_json::from_slice(&delivery.body).unwrap();
        assert_eq!(message.priority, 7);
    }

    #[tokio::test]
    async fn second_subscription_is_a_conflict() {
        let broker = PriorityBroker::new(16);
        broker.take_receiver(QUEUE_LOW).await.unwrap();
        assert!(matches!(
            broker.take_receiver(QUEUE_LOW).await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn full_queue_rejects_publish() {
        let broker = PriorityBroker::new(1);
        let message = TaskMessage {
            job_id: "a".to_string(),
            priority: 0,
            kind: "search".to_string(),
        };
        broker.publish(&message).unwrap();
        assert!(matches!(
            broker.publish(&message),
            Err(Error::DependencyDown(_))
        ));
    }
}
