//! Analytics sink that records calls for assertions

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{AnalyticsError, AnalyticsSink, GroupIdentify, Properties};

#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Identify {
        distinct_id: String,
        properties: Properties,
    },
    GroupIdentify(GroupIdentify),
    Capture {
        event: String,
        distinct_id: String,
    },
    Flush,
}

#[derive(Default)]
pub struct RecordingAnalytics {
    records: Mutex<Vec<Recorded>>,
    fail_identify: AtomicBool,
}

impl RecordingAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `identify` and `group_identify` fail
    pub fn fail_identify(&self) {
        self.fail_identify.store(true, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<Recorded> {
        self.records.lock().unwrap().clone()
    }

    pub fn captures(&self) -> Vec<(String, String)> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                Recorded::Capture { event, distinct_id } => Some((event, distinct_id)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, record: Recorded) {
        self.records.lock().unwrap().push(record);
    }
}

#[async_trait]
impl AnalyticsSink for RecordingAnalytics {
    fn identify(&self, distinct_id: &str, properties: Properties) -> Result<(), AnalyticsError> {
        if self.fail_identify.load(Ordering::SeqCst) {
            return Err(AnalyticsError::QueueFull(0));
        }
        self.push(Recorded::Identify {
            distinct_id: distinct_id.to_string(),
            properties,
        });
        Ok(())
    }

    fn group_identify(&self, group: GroupIdentify) -> Result<(), AnalyticsError> {
        if self.fail_identify.load(Ordering::SeqCst) {
            return Err(AnalyticsError::QueueFull(0));
        }
        self.push(Recorded::GroupIdentify(group));
        Ok(())
    }

    fn capture(
        &self,
        event: &str,
        distinct_id: &str,
        _properties: Properties,
    ) -> Result<(), AnalyticsError> {
        self.push(Recorded::Capture {
            event: event.to_string(),
            distinct_id: distinct_id.to_string(),
        });
        Ok(())
    }

    async fn flush(&self) -> Result<(), AnalyticsError> {
        self.push(Recorded::Flush);
        Ok(())
    }
}
