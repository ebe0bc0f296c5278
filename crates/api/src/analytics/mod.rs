//! Product analytics sink
//!
//! Handlers enqueue `identify`, `group_identify` and `capture` calls
//! synchronously; the webhook route awaits [`AnalyticsSink::flush`] once
//! before responding.

pub mod posthog;
#[cfg(test)]
pub(crate) mod recording;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

pub use posthog::PostHogClient;

pub type Properties = Map<String, Value>;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("Analytics queue is full ({0} events pending)")]
    QueueFull(usize),

    #[error("Analytics queue lock poisoned")]
    Poisoned,

    #[error("Analytics delivery failed: {0}")]
    Delivery(String),
}

/// Group profile update (an organization, as group type `company`)
#[derive(Debug, Clone, PartialEq)]
pub struct GroupIdentify {
    pub group_type: String,
    pub group_key: String,
    pub distinct_id: Option<String>,
    pub properties: Properties,
}

#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    /// Set person properties for `distinct_id`
    fn identify(&self, distinct_id: &str, properties: Properties) -> Result<(), AnalyticsError>;

    fn group_identify(&self, group: GroupIdentify) -> Result<(), AnalyticsError>;

    fn capture(
        &self,
        event: &str,
        distinct_id: &str,
        properties: Properties,
    ) -> Result<(), AnalyticsError>;

    /// Deliver everything queued so far
    async fn flush(&self) -> Result<(), AnalyticsError>;
}

/// Used when no analytics key is configured
pub struct NoopAnalytics;

#[async_trait]
impl AnalyticsSink for NoopAnalytics {
    fn identify(&self, distinct_id: &str, _properties: Properties) -> Result<(), AnalyticsError> {
        tracing::debug!(distinct_id = %distinct_id, "analytics disabled, identify dropped");
        Ok(())
    }

    fn group_identify(&self, group: GroupIdentify) -> Result<(), AnalyticsError> {
        tracing::debug!(group_key = %group.group_key, "analytics disabled, group identify dropped");
        Ok(())
    }

    fn capture(
        &self,
        event: &str,
        distinct_id: &str,
        _properties: Properties,
    ) -> Result<(), AnalyticsError> {
        tracing::debug!(event = %event, distinct_id = %distinct_id, "analytics disabled, capture dropped");
        Ok(())
    }

    async fn flush(&self) -> Result<(), AnalyticsError> {
        Ok(())
    }
}

/// Emits a `capture` call when dropped
///
/// Created at the top of a handler so the event is recorded on every exit
/// path, including early returns on persistence failure. A `None` distinct
/// id disarms the guard.
pub struct CaptureOnDrop {
    sink: Arc<dyn AnalyticsSink>,
    event: &'static str,
    distinct_id: Option<String>,
}

impl CaptureOnDrop {
    pub fn new(
        sink: Arc<dyn AnalyticsSink>,
        event: &'static str,
        distinct_id: Option<String>,
    ) -> Self {
        Self {
            sink,
            event,
            distinct_id,
        }
    }
}

impl Drop for CaptureOnDrop {
    fn drop(&mut self) {
        let Some(distinct_id) = self.distinct_id.take() else {
            return;
        };
        if let Err(e) = self.sink.capture(self.event, &distinct_id, Properties::new()) {
            tracing::warn!(
                event = %self.event,
                distinct_id = %distinct_id,
                error = %e,
                "Failed to enqueue analytics capture"
            );
        }
    }
}
