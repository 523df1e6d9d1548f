use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use relay_common::types::{NotificationTask, PARCEL_ARRIVED, TaskStatus};

use crate::channels::{ChannelAdapter, ChannelError, OutboundMessage};

/// Channel that records every send and either succeeds or answers with a
/// fixed provider status.
pub struct FakeChannel {
    name: &'static str,
    fail_status: Option<u16>,
    sent: Mutex<Vec<(String, OutboundMessage)>>,
}

impl FakeChannel {
    pub fn ok(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail_status: None,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(name: &'static str, status: u16) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail_status: Some(status),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn recipients(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(to, _)| to.clone()).collect()
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
    }
}

#[async_trait]
impl ChannelAdapter for FakeChannel {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn send(&self, recipient: &str, message: &OutboundMessage) -> Result<(), ChannelError> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), message.clone()));
        match self.fail_status {
            None => Ok(()),
            Some(status) => Err(ChannelError::Rejected {
                channel: self.name,
                status,
                body: "simulated failure".to_string(),
            }),
        }
    }
}

pub fn task_with_payload(payload: serde_json::Value) -> NotificationTask {
    let now = Utc::now();
    NotificationTask {
        id: Uuid::new_v4(),
        task_type: PARCEL_ARRIVED.to_string(),
        payload,
        source_table: None,
        source_id: None,
        status: TaskStatus::Claimed,
        attempt_count: 1,
        max_attempts: 5,
        claimed_by: Some("worker-test".to_string()),
        claimed_at: Some(now),
        lease_expires_at: Some(now + chrono::Duration::seconds(300)),
        next_visible_at: now,
        last_error: None,
        created_at: now,
        completed_at: None,
    }
}
