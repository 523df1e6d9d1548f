//! Typed payloads and message rendering per task type.

use serde::Deserialize;
use uuid::Uuid;

use crate::channels::OutboundMessage;

/// Payload written by parcel check-in.
///
/// Short field names (`name`, `email`, `phone`) are accepted as aliases.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParcelArrivedPayload {
    #[serde(default, alias = "name")]
    pub recipient_name: Option<String>,
    #[serde(default, alias = "email")]
    pub recipient_email: Option<String>,
    #[serde(default, alias = "phone")]
    pub recipient_phone: Option<String>,
    #[serde(default)]
    pub tracking_number: Option<String>,
    #[serde(default)]
    pub carrier: Option<String>,
    #[serde(default)]
    pub unit_number: Option<String>,
    #[serde(default)]
    pub pickup_code: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ParcelArrivedPayload {
    pub fn email(&self) -> Option<&str> {
        present(&self.recipient_email)
    }

    pub fn phone(&self) -> Option<&str> {
        present(&self.recipient_phone)
    }

    fn name(&self) -> &str {
        present(&self.recipient_name).unwrap_or("Neighbor")
    }

    fn tracking(&self) -> &str {
        present(&self.tracking_number).unwrap_or("Parcel")
    }

    pub fn email_message(&self, task_id: Uuid) -> OutboundMessage {
        let carrier = present(&self.carrier).unwrap_or("a carrier");
        let mut text = format!(
            "Hi {},\n\nYour package from {} ({}) is here and secured at the hub.",
            self.name(),
            carrier,
            self.tracking()
        );
        if let Some(code) = present(&self.pickup_code) {
            text.push_str(&format!("\nPickup code: {}", code));
        }
        text.push_str("\n\nStop by during cafe hours to pick it up.");

        let mut html = format!(
            "<h1>Package Arrived!</h1><p>Hi {},</p>\
             <p>Your package from <strong>{}</strong> is here and secured at the hub.</p>\
             <p><strong>Tracking #:</strong> {}</p>",
            escape_html(self.name()),
            escape_html(carrier),
            escape_html(self.tracking())
        );
        if let Some(code) = present(&self.pickup_code) {
            html.push_str(&format!(
                "<p><strong>Pickup code:</strong> {}</p>",
                escape_html(code)
            ));
        }
        if let Some(unit) = present(&self.unit_number) {
            html.push_str(&format!("<p><strong>Unit:</strong> {}</p>", escape_html(unit)));
        }

        OutboundMessage {
            subject: "Your parcel is ready at the hub".to_string(),
            text,
            html: Some(html),
            idempotency_key: format!("{}-email", task_id),
        }
    }

    pub fn sms_message(&self, task_id: Uuid) -> OutboundMessage {
        let mut text = format!(
            "Hi {}! Your package ({}) is at the hub.",
            self.name(),
            self.tracking()
        );
        if let Some(code) = present(&self.pickup_code) {
            text.push_str(&format!(" Pickup code: {}.", code));
        }
        text.push_str(" Reply STOP to opt out.");

        OutboundMessage {
            subject: "Parcel arrived".to_string(),
            text,
            html: None,
            idempotency_key: format!("{}-sms", task_id),
        }
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(value: serde_json::Value) -> ParcelArrivedPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_short_aliases_accepted() {
        let payload = parse(serde_json::json!({
            "name": "J. Rivera",
            "email": "j@x.com",
            "phone": "2155551234"
        }));
        assert_eq!(payload.recipient_name.as_deref(), Some("J. Rivera"));
        assert_eq!(payload.email(), Some("j@x.com"));
        assert_eq!(payload.phone(), Some("2155551234"));
    }

    #[test]
    fn test_blank_contacts_count_as_absent() {
        let payload = parse(serde_json::json!({
            "recipient_email": "   ",
            "recipient_phone": ""
        }));
        assert_eq!(payload.email(), None);
        assert_eq!(payload.phone(), None);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let payload = parse(serde_json::json!({
            "recipient_email": "j@x.com",
            "value_tier": "standard",
            "is_guest": true
        }));
        assert_eq!(payload.email(), Some("j@x.com"));
    }

    #[test]
    fn test_email_message_escapes_and_includes_details() {
        let payload = parse(serde_json::json!({
            "recipient_name": "<b>Sam</b>",
            "tracking_number": "1Z999",
            "carrier": "UPS",
            "pickup_code": "4821"
        }));
        let id = Uuid::new_v4();
        let msg = payload.email_message(id);
        let html = msg.html.unwrap();
        assert!(html.contains("&lt;b&gt;Sam&lt;/b&gt;"));
        assert!(html.contains("1Z999"));
        assert!(html.contains("4821"));
        assert!(msg.text.contains("UPS"));
        assert_eq!(msg.idempotency_key, format!("{}-email", id));
    }

    #[test]
    fn test_sms_message_defaults() {
        let msg = ParcelArrivedPayload::default().sms_message(Uuid::nil());
        assert!(msg.text.starts_with("Hi Neighbor!"));
        assert!(msg.text.contains("(Parcel)"));
        assert!(msg.text.ends_with("Reply STOP to opt out."));
        assert!(msg.html.is_none());
    }
}
