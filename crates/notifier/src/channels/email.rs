//! Email delivery via the Resend HTTP API.

use std::time::Duration;

use async_trait::async_trait;

use super::{ChannelAdapter, ChannelError, OutboundMessage};

pub const CHANNEL: &str = "email";

const RESEND_URL: &str = "https://api.resend.com/emails";

pub struct ResendEmail {
    client: reqwest::Client,
    api_key: String,
    from: String,
    timeout: Duration,
}

impl ResendEmail {
    pub fn new(api_key: String, from: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            from,
            timeout,
        }
    }
}

#[async_trait]
impl ChannelAdapter for ResendEmail {
    fn name(&self) -> &'static str {
        CHANNEL
    }

    async fn send(&self, recipient: &str, message: &OutboundMessage) -> Result<(), ChannelError> {
        if !recipient.contains('@') {
            return Err(ChannelError::InvalidRecipient {
                channel: CHANNEL,
                recipient: recipient.to_string(),
            });
        }

        let mut body = serde_json::json!({
            "from": self.from,
            "to": [recipient],
            "subject": message.subject,
            "text": message.text,
        });
        if let Some(html) = &message.html {
            body["html"] = serde_json::Value::String(html.clone());
        }

        let resp = self
            .client
            .post(RESEND_URL)
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", &message.idempotency_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|source| ChannelError::Http {
                channel: CHANNEL,
                source,
            })?;

        if resp.status().is_success() {
            tracing::info!(subject = %message.subject, "Email notification sent");
            Ok(())
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            Err(ChannelError::Rejected {
                channel: CHANNEL,
                status,
                body,
            })
        }
    }
}
