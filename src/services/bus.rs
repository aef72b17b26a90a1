use crate::model::PartitionKey;
use crate::settings::BusSettings;
use async_trait::async_trait;
use kafka::client::KafkaClient;
use kafka::error::KafkaCode;
use kafka::producer::{ProduceConfirm, Producer, Record, RequiredAcks};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use strum_macros::IntoStaticStr;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::{task, time};

/// Where the bus placed a published record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Sends one record and returns only after the bus acknowledged it.
    async fn publish(
        &self, topic: &str, key: &PartitionKey, payload: String,
    ) -> Result<DeliveryReceipt, PublishError>;

    async fn flush(&self, timeout: Duration) -> Result<(), PublishError>;

    async fn close(&self, timeout: Duration) -> Result<(), PublishError>;
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("could not connect to message bus at {bootstrap:?}: {source}")]
    Kafka {
        bootstrap: Vec<String>,
        #[source]
        source: kafka::Error,
    },

    #[error("message bus connection to {bootstrap:?} not established within {timeout:?}")]
    Timeout { bootstrap: Vec<String>, timeout: Duration },

    #[error("message bus connection worker failed: {0}")]
    Worker(#[from] task::JoinError),
}

#[derive(Debug, Error, IntoStaticStr)]
pub enum PublishError {
    #[error("message bus send failed: {0}")]
    Send(#[from] kafka::Error),

    #[error("message bus did not acknowledge within {0:?}")]
    AckTimeout(Duration),

    #[error("message bus rejected record on partition {partition}: {code:?}")]
    Rejected { partition: i32, code: KafkaCode },

    #[error("message bus returned no delivery confirmation for topic {0}")]
    MissingConfirmation(String),

    #[error("message bus flush did not complete within {0:?}")]
    Flush(Duration),

    #[error("message bus did not close within {0:?}")]
    Close(Duration),

    #[error("message bus connection is closed")]
    Closed,

    #[error("message bus worker failed: {0}")]
    Worker(#[from] task::JoinError),
}

impl PublishError {
    pub fn variant(&self) -> &'static str {
        self.into()
    }
}

impl DeliveryReceipt {
    fn from_confirms(topic: &str, confirms: &[ProduceConfirm]) -> Result<Self, PublishError> {
        let confirm = confirms
            .iter()
            .find(|c| c.topic == topic)
            .and_then(|c| c.partition_confirms.first())
            .ok_or_else(|| PublishError::MissingConfirmation(topic.to_string()))?;

        match confirm.offset {
            Ok(offset) => Ok(Self {
                topic: topic.to_string(),
                partition: confirm.partition,
                offset,
            }),
            Err(code) => Err(PublishError::Rejected { partition: confirm.partition, code }),
        }
    }
}

type SharedProducer = Arc<Mutex<Option<Producer>>>;

/// Kafka-backed bus. The underlying producer is synchronous and unbuffered, so every send
/// runs on the blocking pool and holds the producer until the leader acknowledges.
#[derive(Clone)]
pub struct KafkaEventBus {
    producer: SharedProducer,
    ack_timeout: Duration,
}

impl fmt::Debug for KafkaEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaEventBus")
            .field("ack_timeout", &self.ack_timeout)
            .finish()
    }
}

impl KafkaEventBus {
    #[tracing::instrument(level = "debug", skip(settings), fields(bootstrap = ?settings.bootstrap))]
    pub async fn connect(settings: &BusSettings) -> Result<Self, ConnectError> {
        let bootstrap = settings.bootstrap_hosts();
        let connect_timeout = settings.connect_timeout;

        let worker = {
            let bootstrap = bootstrap.clone();
            let client_id = settings.client_id.clone();
            let retries = settings.retries;
            let ack_timeout = settings.ack_timeout;
            let io_timeout = settings.io_timeout();
            task::spawn_blocking(move || {
                make_producer(bootstrap.clone(), client_id, retries, ack_timeout, io_timeout)
                    .map_err(|source| ConnectError::Kafka { bootstrap, source })
            })
        };

        let producer = time::timeout(connect_timeout, worker)
            .await
            .map_err(|_elapsed| ConnectError::Timeout { bootstrap, timeout: connect_timeout })???;

        Ok(Self {
            producer: Arc::new(Mutex::new(Some(producer))),
            ack_timeout: settings.ack_timeout,
        })
    }

    /// Waits until no send is in flight, returning the held producer slot.
    async fn acquire(
        &self, timeout: Duration,
    ) -> Option<tokio::sync::OwnedMutexGuard<Option<Producer>>> {
        time::timeout(timeout, self.producer.clone().lock_owned()).await.ok()
    }
}

/// Socket reads and writes are bounded by `io_timeout`, so a worker left behind by an elapsed
/// connect or ack deadline still finishes instead of holding the blocking pool.
fn make_producer(
    bootstrap: Vec<String>, client_id: String, retries: u32, ack_timeout: Duration,
    io_timeout: Duration,
) -> Result<Producer, kafka::Error> {
    let mut client = KafkaClient::new(bootstrap);
    client.set_client_id(client_id);
    client.set_retry_max_attempts(retries);
    client.set_connection_rw_timeout(Some(io_timeout));
    client.load_metadata_all()?;

    Producer::from_client(client)
        .with_required_acks(RequiredAcks::One)
        .with_ack_timeout(ack_timeout)
        .create()
}

#[async_trait]
impl EventBus for KafkaEventBus {
    #[tracing::instrument(level = "debug", skip(self, payload))]
    async fn publish(
        &self, topic: &str, key: &PartitionKey, payload: String,
    ) -> Result<DeliveryReceipt, PublishError> {
        let ack_timeout = self.ack_timeout;
        let mut producer = self.acquire(ack_timeout).await.ok_or(PublishError::AckTimeout(ack_timeout))?;

        let topic = topic.to_string();
        let key = key.to_string();
        let send = task::spawn_blocking(move || {
            let producer = producer.as_mut().ok_or(PublishError::Closed)?;
            let record = Record::from_key_value(topic.as_str(), key.as_str(), payload.as_str());
            let confirms = producer.send_all(std::slice::from_ref(&record))?;
            DeliveryReceipt::from_confirms(&topic, &confirms)
        });

        let receipt = time::timeout(ack_timeout, send)
            .await
            .map_err(|_elapsed| PublishError::AckTimeout(ack_timeout))???;

        self.flush(ack_timeout).await?;
        Ok(receipt)
    }

    /// Sends are synchronous, so flushing waits (bounded) until no send holds the producer.
    async fn flush(&self, timeout: Duration) -> Result<(), PublishError> {
        let producer = self.acquire(timeout).await.ok_or(PublishError::Flush(timeout))?;
        if producer.is_none() {
            return Err(PublishError::Closed);
        }
        Ok(())
    }

    async fn close(&self, timeout: Duration) -> Result<(), PublishError> {
        let mut producer = self.acquire(timeout).await.ok_or(PublishError::Close(timeout))?;
        if producer.take().is_some() {
            tracing::debug!("kafka producer connection dropped");
        }
        Ok(())
    }
}
