//! Outbound channel adapters.
//!
//! An adapter sends exactly one message to one recipient and reports success
//! or failure. Adapters never retry; the queue re-runs the whole task.

pub mod email;
pub mod sms;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use relay_common::config::ChannelConfig;

pub use email::ResendEmail;
pub use sms::TwilioSms;

/// Rendered notification for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
    /// Stable across retries of the same task so providers can drop duplicates.
    pub idempotency_key: String,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("{channel} request failed: {source}")]
    Http {
        channel: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{channel} rejected the message ({status}): {body}")]
    Rejected {
        channel: &'static str,
        status: u16,
        body: String,
    },

    #[error("{channel} cannot deliver to '{recipient}'")]
    InvalidRecipient {
        channel: &'static str,
        recipient: String,
    },

    #[error("{0} channel is not configured")]
    NotConfigured(&'static str),
}

impl ChannelError {
    /// Whether resending the same message can never succeed.
    ///
    /// Provider 4xx responses other than 408 and 429 mean the request itself
    /// is wrong (bad address, unverified sender) and retrying is pointless.
    pub fn is_permanent(&self) -> bool {
        match self {
            ChannelError::Rejected { status, .. } => {
                (400..500).contains(status) && *status != 408 && *status != 429
            }
            ChannelError::InvalidRecipient { .. } => true,
            ChannelError::Http { .. } | ChannelError::NotConfigured(_) => false,
        }
    }
}

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, recipient: &str, message: &OutboundMessage) -> Result<(), ChannelError>;
}

/// Stand-in for a channel whose credentials are missing.
pub struct DisabledChannel {
    name: &'static str,
}

impl DisabledChannel {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl ChannelAdapter for DisabledChannel {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn send(&self, _recipient: &str, _message: &OutboundMessage) -> Result<(), ChannelError> {
        Err(ChannelError::NotConfigured(self.name))
    }
}

/// Build the email and SMS adapters from configuration.
pub fn adapters_from_config(
    config: &ChannelConfig,
) -> (Arc<dyn ChannelAdapter>, Arc<dyn ChannelAdapter>) {
    let timeout = Duration::from_secs(config.timeout_secs);

    let email: Arc<dyn ChannelAdapter> = match (&config.resend_api_key, &config.email_from) {
        (Some(key), Some(from)) => Arc::new(ResendEmail::new(key.clone(), from.clone(), timeout)),
        _ => {
            tracing::warn!("RESEND_API_KEY or EMAIL_FROM missing; email delivery disabled");
            Arc::new(DisabledChannel::new(email::CHANNEL))
        }
    };

    let sms: Arc<dyn ChannelAdapter> = match (
        &config.twilio_account_sid,
        &config.twilio_auth_token,
        &config.twilio_messaging_service_sid,
    ) {
        (Some(sid), Some(token), Some(service)) => Arc::new(TwilioSms::new(
            sid.clone(),
            token.clone(),
            service.clone(),
            timeout,
        )),
        _ => {
            tracing::warn!("Twilio credentials missing; SMS delivery disabled");
            Arc::new(DisabledChannel::new(sms::CHANNEL))
        }
    };

    (email, sms)
}
