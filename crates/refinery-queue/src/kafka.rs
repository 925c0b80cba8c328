//! Kafka (partitioned log) queue backend.
//!
//! Delivery through the consumer group is at-least-once; duplicates are
//! tolerated downstream via the idempotent build-status upsert. `clear` is
//! not expressible on a log and returns an error callers must tolerate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use tokio_util::sync::CancellationToken;

use refinery_types::BuildRequest;

use crate::{QueueError, QueueStats};

const LIST_DEADLINE: Duration = Duration::from_secs(2);
const LIST_LIMIT: usize = 50;
const POP_IDLE: Duration = Duration::from_millis(500);

static PEEK_GROUP_SEQ: AtomicU64 = AtomicU64::new(0);

pub struct KafkaQueue {
    brokers: String,
    topic: String,
    group: String,
    producer: FutureProducer,
    consumer: StreamConsumer,
}

impl KafkaQueue {
    pub fn connect(
        brokers: impl Into<String>,
        topic: impl Into<String>,
        group: impl Into<String>,
    ) -> Result<Self, QueueError> {
        let brokers = brokers.into();
        let topic = topic.into();
        let group = group.into();

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "10000")
            .create()?;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("group.id", &group)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .create()?;
        consumer.subscribe(&[&topic])?;

        Ok(Self {
            brokers,
            topic,
            group,
            producer,
            consumer,
        })
    }

    pub(crate) async fn enqueue(&self, request: BuildRequest) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(&request)?;
        self.producer
            .send(
                FutureRecord::to(&self.topic)
                    .payload(&payload)
                    .key(&request.name),
                Timeout::After(Duration::from_secs(10)),
            )
            .await
            .map_err(|(err, _message)| QueueError::Kafka(err))?;
        Ok(())
    }

    /// Best-effort peek: read up to 50 messages with a fresh, throwaway
    /// consumer group inside a 2 second deadline. Offsets are not committed.
    pub(crate) async fn list(&self) -> Result<Vec<BuildRequest>, QueueError> {
        let peek_group = format!(
            "{}-peek-{}-{}",
            self.group,
            std::process::id(),
            PEEK_GROUP_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", peek_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;
        consumer.subscribe(&[&self.topic])?;

        let mut requests = Vec::new();
        let deadline = tokio::time::Instant::now() + LIST_DEADLINE;
        while requests.len() < LIST_LIMIT {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, consumer.recv()).await {
                Ok(Ok(message)) => {
                    if let Some(request) = decode(rdkafka::Message::payload(&message)) {
                        requests.push(request);
                    }
                }
                Ok(Err(err)) => {
                    tracing::warn!("kafka peek error: {err}");
                    break;
                }
                Err(_elapsed) => break,
            }
        }
        Ok(requests)
    }

    pub(crate) fn clear(&self) -> Result<(), QueueError> {
        Err(QueueError::Unsupported(
            "clear not supported for kafka backend".to_string(),
        ))
    }

    /// Approximate length from watermark offsets: committed position is not
    /// consulted, so this overcounts after consumption.
    pub(crate) async fn stats(&self) -> Result<QueueStats, QueueError> {
        let brokers = self.brokers.clone();
        let topic = self.topic.clone();
        let length = tokio::task::spawn_blocking(move || -> Result<i64, QueueError> {
            let consumer: BaseConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .create()?;
            let metadata =
                consumer.fetch_metadata(Some(&topic), Timeout::After(Duration::from_secs(2)))?;
            let mut length = 0;
            for topic_metadata in metadata.topics() {
                for partition in topic_metadata.partitions() {
                    let (low, high) = consumer.fetch_watermarks(
                        &topic,
                        partition.id(),
                        Timeout::After(Duration::from_secs(2)),
                    )?;
                    length += high - low;
                }
            }
            Ok(length)
        })
        .await
        .map_err(|err| QueueError::Unsupported(format!("kafka stats task failed: {err}")))??;

        Ok(QueueStats {
            backend: "kafka",
            length,
            oldest_enqueued_at: None,
        })
    }

    /// Consume up to `max` messages through the shared consumer group. Stops
    /// early on cancellation or when the log goes quiet.
    pub(crate) async fn pop(
        &self,
        max: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<BuildRequest>, QueueError> {
        let mut requests = Vec::new();
        while requests.len() < max {
            tokio::select! {
                () = cancel.cancelled() => break,
                message = tokio::time::timeout(POP_IDLE, self.consumer.recv()) => {
                    match message {
                        Ok(Ok(message)) => {
                            if let Some(request) = decode(rdkafka::Message::payload(&message)) {
                                requests.push(request);
                            }
                        }
                        Ok(Err(err)) => {
                            tracing::warn!("kafka pop error: {err}");
                            break;
                        }
                        Err(_elapsed) => break,
                    }
                }
            }
        }
        Ok(requests)
    }
}

fn decode(payload: Option<&[u8]>) -> Option<BuildRequest> {
    let bytes = payload?;
    match serde_json::from_slice(bytes) {
        Ok(request) => Some(request),
        Err(err) => {
            tracing::warn!("dropping malformed kafka message: {err}");
            None
        }
    }
}
