//! SMS delivery via the Twilio Messages API.
//!
//! Twilio has no idempotency key, so a retried task can text the recipient
//! twice. The queue accepts that in exchange for never losing a notification.

use std::time::Duration;

use async_trait::async_trait;

use super::{ChannelAdapter, ChannelError, OutboundMessage};

pub const CHANNEL: &str = "sms";

pub struct TwilioSms {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    messaging_service_sid: String,
    timeout: Duration,
}

impl TwilioSms {
    pub fn new(
        account_sid: String,
        auth_token: String,
        messaging_service_sid: String,
        timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            account_sid,
            auth_token,
            messaging_service_sid,
            timeout,
        }
    }
}

/// Normalise a North American number to E.164.
///
/// Non-digits are stripped; a leading country code `1` is kept, otherwise
/// `+1` is prepended. Returns `None` when too few digits remain.
pub fn to_e164(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 10 {
        return None;
    }
    if digits.starts_with('1') {
        Some(format!("+{}", digits))
    } else {
        Some(format!("+1{}", digits))
    }
}

#[async_trait]
impl ChannelAdapter for TwilioSms {
    fn name(&self) -> &'static str {
        CHANNEL
    }

    async fn send(&self, recipient: &str, message: &OutboundMessage) -> Result<(), ChannelError> {
        let to = to_e164(recipient).ok_or_else(|| ChannelError::InvalidRecipient {
            channel: CHANNEL,
            recipient: recipient.to_string(),
        })?;

        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        );

        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("MessagingServiceSid", self.messaging_service_sid.as_str()),
                ("To", to.as_str()),
                ("Body", message.text.as_str()),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|source| ChannelError::Http {
                channel: CHANNEL,
                source,
            })?;

        if resp.status().is_success() {
            tracing::info!(to = %to, "SMS notification sent");
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ten_digit_number_gets_country_code() {
        assert_eq!(to_e164("2155551234").as_deref(), Some("+12155551234"));
        assert_eq!(to_e164("(215) 555-1234").as_deref(), Some("+12155551234"));
    }

    #[test]
    fn test_leading_one_is_kept() {
        assert_eq!(to_e164("1-215-555-1234").as_deref(), Some("+12155551234"));
        assert_eq!(to_e164("+1 215 555 1234").as_deref(), Some("+12155551234"));
    }

    #[test]
    fn test_short_numbers_rejected() {
        assert_eq!(to_e164("555-1234"), None);
        assert_eq!(to_e164(""), None);
    }
}
