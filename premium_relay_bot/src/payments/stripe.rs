use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use teloxide::types::UserId;
use url::Url;

use super::{parse_user_reference, PaymentError, PaymentNotification, PaymentProvider};

type HmacSha256 = Hmac<Sha256>;

/// How far a notification's timestamp may be from our clock, in seconds.
/// Same as Stripe's own libraries.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripeConfig {
    pub secret_key: String,
    /// `whsec_...` secret of the webhook endpoint.
    pub webhook_secret: String,
    /// Price the checkout charges for premium.
    pub price_id: String,
    pub api_base: Url,
    pub success_url: Url,
    pub cancel_url: Url,
}

impl StripeConfig {
    pub const DEFAULT_API_BASE: &'static str = "https://api.stripe.com/";
}

/// Stripe Checkout, one-time payment mode.
pub struct Stripe {
    client: Client,
    config: StripeConfig,
}

impl Stripe {
    pub fn new(client: Client, config: StripeConfig) -> Self {
        Stripe { client, config }
    }

    /// [`PaymentProvider::verify_notification`] with an explicit "now",
    /// as seconds since the Unix epoch.
    fn verify_at(
        &self,
        signature: Option<&str>,
        body: &[u8],
        now: i64,
    ) -> Result<PaymentNotification, PaymentError> {
        let signature = signature.ok_or(PaymentError::MissingSignature)?;
        let (timestamp, candidates) = parse_signature_header(signature)?;

        let mut mac = HmacSha256::new_from_slice(self.config.webhook_secret.as_bytes())
            .map_err(|_| PaymentError::BadSignature)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);

        let matches = candidates
            .iter()
            .filter_map(|candidate| hex::decode(candidate).ok())
            .any(|candidate| mac.clone().verify_slice(&candidate).is_ok());
        if !matches {
            return Err(PaymentError::BadSignature);
        }

        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            return Err(PaymentError::StaleSignature);
        }

        interpret_event(serde_json::from_slice(body)?)
    }
}

/// Splits `t=123,v1=abc,v1=def,v0=xyz` into the timestamp and all `v1` signatures.
fn parse_signature_header(header: &str) -> Result<(i64, Vec<&str>), PaymentError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for pair in header.split(',') {
        let Some((key, value)) = pair.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => signatures.push(value),
            _ => (), // v0 is the test-mode scheme. Don't care.
        }
    }

    match timestamp {
        Some(timestamp) if !signatures.is_empty() => Ok((timestamp, signatures)),
        _ => Err(PaymentError::BadSignature),
    }
}

#[derive(Deserialize)]
struct Event {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    data: EventData,
}

#[derive(Deserialize)]
struct EventData {
    object: serde_json::Value,
}

#[derive(Deserialize)]
struct CheckoutSession {
    id: String,
    #[serde(default)]
    client_reference_id: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    metadata: std::collections::HashMap<String, String>,
}

fn interpret_event(event: Event) -> Result<PaymentNotification, PaymentError> {
    if !matches!(
        event.kind.as_str(),
        "checkout.session.completed" | "checkout.session.async_payment_succeeded"
    ) {
        return Ok(PaymentNotification::Ignored {
            reason: format!("event {} is of type {}", event.id, event.kind),
        });
    }

    let session: CheckoutSession = serde_json::from_value(event.data.object)?;

    // Delayed payment methods complete the session before the money arrives.
    if session.payment_status.as_deref() != Some("paid") {
        return Ok(PaymentNotification::Ignored {
            reason: format!(
                "session {} is {}",
                session.id,
                session.payment_status.as_deref().unwrap_or("of unknown status")
            ),
        });
    }

    // Payment links and sessions made outside the bot carry no user.
    let Some(reference) = session
        .client_reference_id
        .as_deref()
        .or_else(|| session.metadata.get("telegram_user_id").map(String::as_str))
    else {
        return Ok(PaymentNotification::Ignored {
            reason: format!("session {} has no user reference", session.id),
        });
    };

    Ok(PaymentNotification::Completed {
        user_id: parse_user_reference(reference)?,
        reference: session.id,
    })
}

#[derive(Deserialize)]
struct CreatedSession {
    url: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[async_trait]
impl PaymentProvider for Stripe {
    fn name(&self) -> &'static str {
        "stripe"
    }

    async fn create_checkout(&self, user: UserId) -> Result<Url, PaymentError> {
        let user = user.to_string();
        let form = [
            ("mode", "payment"),
            ("line_items[0][price]", self.config.price_id.as_str()),
            ("line_items[0][quantity]", "1"),
            ("success_url", self.config.success_url.as_str()),
            ("cancel_url", self.config.cancel_url.as_str()),
            ("client_reference_id", user.as_str()),
            ("metadata[telegram_user_id]", user.as_str()),
        ];

        let response = self
            .client
            .post(self.config.api_base.join("v1/checkout/sessions")?)
            .bearer_auth(&self.config.secret_key)
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| status.to_string());
            return Err(PaymentError::Api(message));
        }

        let session: CreatedSession = serde_json::from_slice(&body)?;
        let url = session
            .url
            .ok_or_else(|| PaymentError::Api(String::from("session has no URL")))?;
        Ok(Url::parse(&url)?)
    }

    fn signature_header(&self) -> &'static str {
        "stripe-signature"
    }

    fn verify_notification(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<PaymentNotification, PaymentError> {
        self.verify_at(signature, body, chrono::Utc::now().timestamp())
    }
}
