//! Maps a task to its channel attempts and decides what counts as failure.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use relay_common::types::{NotificationTask, PARCEL_ARRIVED};
use relay_queue::FailureKind;

use crate::channels::{ChannelAdapter, ChannelError};
use crate::payload::ParcelArrivedPayload;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No contact info: need email or phone")]
    NoContactInfo,

    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Email failed: {0}")]
    Email(#[source] ChannelError),

    #[error("SMS failed: {0}")]
    Sms(#[source] ChannelError),

    #[error("Dispatch timed out after {0:?}")]
    Timeout(Duration),
}

impl DispatchError {
    /// Errors that no amount of retrying will fix skip the retry budget.
    pub fn kind(&self) -> FailureKind {
        match self {
            DispatchError::NoContactInfo
            | DispatchError::UnknownTaskType(_)
            | DispatchError::InvalidPayload(_) => FailureKind::Permanent,
            DispatchError::Email(e) | DispatchError::Sms(e) if e.is_permanent() => {
                FailureKind::Permanent
            }
            _ => FailureKind::Transient,
        }
    }
}

/// What actually went out for a successfully dispatched task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub email_sent: bool,
    pub sms_sent: bool,
    /// SMS error swallowed because email already reached the recipient.
    pub sms_error: Option<String>,
}

pub struct Dispatcher {
    email: Arc<dyn ChannelAdapter>,
    sms: Arc<dyn ChannelAdapter>,
}

impl Dispatcher {
    pub fn new(email: Arc<dyn ChannelAdapter>, sms: Arc<dyn ChannelAdapter>) -> Self {
        Self { email, sms }
    }

    pub async fn dispatch(&self, task: &NotificationTask) -> Result<DispatchReport, DispatchError> {
        match task.task_type.as_str() {
            PARCEL_ARRIVED => {
                let payload: ParcelArrivedPayload = serde_json::from_value(task.payload.clone())
                    .map_err(|e| DispatchError::InvalidPayload(e.to_string()))?;
                self.parcel_arrived(task, &payload).await
            }
            other => Err(DispatchError::UnknownTaskType(other.to_string())),
        }
    }

    /// Email is the primary channel: its failure fails the task. SMS only
    /// fails the task when there was no email to fall back on.
    async fn parcel_arrived(
        &self,
        task: &NotificationTask,
        payload: &ParcelArrivedPayload,
    ) -> Result<DispatchReport, DispatchError> {
        let email = payload.email();
        let phone = payload.phone();
        if email.is_none() && phone.is_none() {
            return Err(DispatchError::NoContactInfo);
        }

        let mut report = DispatchReport::default();

        if let Some(address) = email {
            self.email
                .send(address, &payload.email_message(task.id))
                .await
                .map_err(DispatchError::Email)?;
            report.email_sent = true;
        }

        if let Some(number) = phone {
            match self.sms.send(number, &payload.sms_message(task.id)).await {
                Ok(()) => report.sms_sent = true,
                Err(e) if report.email_sent => {
                    tracing::warn!(
                        task_id = %task.id,
                        error = %e,
                        "SMS failed after email was delivered; not retrying"
                    );
                    report.sms_error = Some(e.to_string());
                }
                Err(e) => return Err(DispatchError::Sms(e)),
            }
        }

        Ok(report)
    }
}
