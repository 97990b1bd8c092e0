//! Message broker contract and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::Result;

/// One message handed to the broker.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    /// Destination topic.
    pub topic: String,

    /// Optional partitioning key.
    pub key: Option<String>,

    /// Optional explicit partition.
    pub partition: Option<u32>,

    /// The message body as JSON.
    pub payload: serde_json::Value,

    /// Message headers.
    pub headers: HashMap<String, String>,
}

impl BrokerMessage {
    /// Creates a message for a topic with the given payload.
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            partition: None,
            payload,
            headers: HashMap::new(),
        }
    }

    /// Sets the partitioning key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Sets an explicit partition.
    pub fn with_partition(mut self, partition: u32) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Adds a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Narrow contract for the injected broker client.
///
/// `publish` returns `Ok(false)` for a per-message rejection the broker
/// reported cleanly; `Err` is reserved for transport-level failures.
/// `publish_batch` returns one boolean per input message, same order.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publishes a single message.
    async fn publish(&self, message: BrokerMessage) -> Result<bool>;

    /// Publishes a batch, returning per-message outcomes in input order.
    async fn publish_batch(&self, messages: Vec<BrokerMessage>) -> Result<Vec<bool>> {
        let mut results = Vec::with_capacity(messages.len());
        for message in messages {
            results.push(self.publish(message).await?);
        }
        Ok(results)
    }
}

#[derive(Debug, Default)]
struct InMemoryBrokerState {
    topics: HashMap<String, Vec<BrokerMessage>>,
    failing_topics: HashSet<String>,
    fail_all: bool,
}

/// In-memory broker for testing.
///
/// Failures are simulated per topic or globally; failed messages are
/// reported as clean rejections (`false`), matching a broker that
/// accepted the request but could not deliver.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<RwLock<InMemoryBrokerState>>,
}

impl InMemoryBroker {
    /// Creates a new in-memory broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every publish fail while set.
    pub fn set_fail_all(&self, fail: bool) {
        self.state.write().unwrap().fail_all = fail;
    }

    /// Makes publishes to one topic fail while set.
    pub fn set_fail_topic(&self, topic: impl Into<String>, fail: bool) {
        let mut state = self.state.write().unwrap();
        let topic = topic.into();
        if fail {
            state.failing_topics.insert(topic);
        } else {
            state.failing_topics.remove(&topic);
        }
    }

    /// Messages delivered to a topic, in publish order.
    pub fn messages_for(&self, topic: &str) -> Vec<BrokerMessage> {
        self.state
            .read()
            .unwrap()
            .topics
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Total delivered message count across all topics.
    pub fn message_count(&self) -> usize {
        self.state
            .read()
            .unwrap()
            .topics
            .values()
            .map(Vec::len)
            .sum()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, message: BrokerMessage) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        if state.fail_all || state.failing_topics.contains(&message.topic) {
            return Ok(false);
        }
        state
            .topics
            .entry(message.topic.clone())
            .or_default()
            .push(message);
        Ok(true)
    }

    async fn publish_batch(&self, messages: Vec<BrokerMessage>) -> Result<Vec<bool>> {
        let mut state = self.state.write().unwrap();
        let mut results = Vec::with_capacity(messages.len());
        for message in messages {
            if state.fail_all || state.failing_topics.contains(&message.topic) {
                results.push(false);
            } else {
                state
                    .topics
                    .entry(message.topic.clone())
                    .or_default()
                    .push(message);
                results.push(true);
            }
        }
        Ok(results)
    }
}
