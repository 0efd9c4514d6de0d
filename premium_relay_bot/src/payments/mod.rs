//! Payment providers: creating a checkout link for a user, and
//! authenticating the provider's "payment done" notifications.
//!
//! Notifications are untrusted until their signature checks out. Nothing
//! else (like someone landing on the success page) ever grants premium.

mod nowpayments;
mod stripe;

use std::str::FromStr;

use async_trait::async_trait;
use teloxide::types::UserId;
use url::Url;

pub use nowpayments::{NowPayments, NowPaymentsConfig};
pub use stripe::{Stripe, StripeConfig};

/// What an authentic notification means for us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentNotification {
    /// The user paid. `reference` is the provider's ID of the payment, for logs.
    Completed { user_id: UserId, reference: String },
    /// Legit, but not something that grants anything.
    Ignored { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("request to the payment provider failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("the payment provider returned an error: {0}")]
    Api(String),
    #[error("notification has no signature")]
    MissingSignature,
    #[error("notification signature doesn't match")]
    BadSignature,
    #[error("notification signature is too old")]
    StaleSignature,
    #[error("notification payload is malformed: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("payment doesn't reference a valid user: {0:?}")]
    BadReference(String),
    #[error("the payment provider returned a bad URL: {0}")]
    BadUrl(#[from] url::ParseError),
}

impl PaymentError {
    /// Whether this is the notification's fault (bad signature, bad body),
    /// as opposed to something on our or the provider's end.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            PaymentError::MissingSignature
                | PaymentError::BadSignature
                | PaymentError::StaleSignature
                | PaymentError::Payload(_)
                | PaymentError::BadReference(_)
        )
    }
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Make a checkout for `user` and return the link they should open.
    async fn create_checkout(&self, user: UserId) -> Result<Url, PaymentError>;

    /// Name of the HTTP header carrying the notification signature.
    fn signature_header(&self) -> &'static str;

    /// Authenticate a notification's raw body against its signature header
    /// value and tell what it means.
    fn verify_notification(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<PaymentNotification, PaymentError>;
}

/// Which provider to use, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentProviderKind {
    Stripe,
    NowPayments,
    Disabled,
}

impl FromStr for PaymentProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stripe" => Ok(PaymentProviderKind::Stripe),
            "nowpayments" | "crypto" => Ok(PaymentProviderKind::NowPayments),
            "none" | "" => Ok(PaymentProviderKind::Disabled),
            other => Err(format!("unknown payment provider: {other}")),
        }
    }
}

/// Turn whatever the provider echoed back to us into a user ID.
fn parse_user_reference(reference: &str) -> Result<UserId, PaymentError> {
    reference
        .trim()
        .parse()
        .map(UserId)
        .map_err(|_| PaymentError::BadReference(reference.to_string()))
}
