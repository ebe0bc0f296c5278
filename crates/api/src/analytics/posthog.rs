//! PostHog capture client
//!
//! Messages are buffered in process and sent in one `/batch/` request on
//! flush. The buffer is bounded; once full, new messages are rejected rather
//! than growing memory without limit.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{AnalyticsError, AnalyticsSink, GroupIdentify, Properties};

pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

const LIB_NAME: &str = "eventdesk-api";

pub struct PostHogClient {
    http: Client,
    host: String,
    api_key: String,
    queue: Mutex<Vec<Value>>,
    max_queue_size: usize,
}

impl PostHogClient {
    pub fn new(http: Client, host: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            host: host.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            queue: Mutex::new(Vec::new()),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
        }
    }

    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    fn enqueue(
        &self,
        event: &str,
        distinct_id: &str,
        mut properties: Properties,
    ) -> Result<(), AnalyticsError> {
        properties.insert("$lib".to_string(), json!(LIB_NAME));
        properties.insert("$lib_version".to_string(), json!(env!("CARGO_PKG_VERSION")));

        let message = json!({
            "event": event,
            "distinct_id": distinct_id,
            "properties": properties,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "uuid": Uuid::new_v4(),
        });

        let mut queue = self.queue.lock().map_err(|_| AnalyticsError::Poisoned)?;
        if queue.len() >= self.max_queue_size {
            return Err(AnalyticsError::QueueFull(queue.len()));
        }
        queue.push(message);
        Ok(())
    }
}

#[async_trait]
impl AnalyticsSink for PostHogClient {
    fn identify(&self, distinct_id: &str, properties: Properties) -> Result<(), AnalyticsError> {
        let mut wrapped = Properties::new();
        wrapped.insert("$set".to_string(), Value::Object(properties));
        self.enqueue("$identify", distinct_id, wrapped)
    }

    fn group_identify(&self, group: GroupIdentify) -> Result<(), AnalyticsError> {
        let distinct_id = group
            .distinct_id
            .clone()
            .unwrap_or_else(|| format!("${}_{}", group.group_type, group.group_key));

        let mut wrapped = Properties::new();
        wrapped.insert("$group_type".to_string(), json!(group.group_type));
        wrapped.insert("$group_key".to_string(), json!(group.group_key));
        wrapped.insert("$group_set".to_string(), Value::Object(group.properties));
        self.enqueue("$groupidentify", &distinct_id, wrapped)
    }

    fn capture(
        &self,
        event: &str,
        distinct_id: &str,
        properties: Properties,
    ) -> Result<(), AnalyticsError> {
        self.enqueue(event, distinct_id, properties)
    }

    async fn flush(&self) -> Result<(), AnalyticsError> {
        let batch = {
            let mut queue = self.queue.lock().map_err(|_| AnalyticsError::Poisoned)?;
            std::mem::take(&mut *queue)
        };
        if batch.is_empty() {
            return Ok(());
        }

        let count = batch.len();
        let response = self
            .http
            .post(format!("{}/batch/", self.host))
            .timeout(Duration::from_secs(10))
            .json(&json!({
                "api_key": self.api_key,
                "batch": batch,
            }))
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match response {
            Ok(_) => {
                tracing::debug!(count = count, "Analytics batch delivered");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(count = count, error = %e, "Analytics batch dropped");
                Err(AnalyticsError::Delivery(e.to_string()))
            }
        }
    }
}
