use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha512;
use teloxide::types::UserId;
use url::Url;

use super::{parse_user_reference, PaymentError, PaymentNotification, PaymentProvider};

type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, Clone, PartialEq)]
pub struct NowPaymentsConfig {
    pub api_key: String,
    /// Secret the IPN callbacks are signed with.
    pub ipn_secret: String,
    /// Price of premium, in `price_currency`.
    pub price_amount: f64,
    pub price_currency: String,
    pub api_base: Url,
    pub ipn_callback_url: Url,
    pub success_url: Url,
    pub cancel_url: Url,
}

impl NowPaymentsConfig {
    pub const DEFAULT_API_BASE: &'static str = "https://api.nowpayments.io/";
}

/// NOWPayments crypto invoices.
pub struct NowPayments {
    client: Client,
    config: NowPaymentsConfig,
}

impl NowPayments {
    pub fn new(client: Client, config: NowPaymentsConfig) -> Self {
        NowPayments { client, config }
    }
}

/// Recursively rebuild `value` with all object keys in sorted order,
/// which is what the IPN signature is computed over.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, sort_keys(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// IDs come back either as strings or as numbers depending on the field and the mood.
fn value_to_reference(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Serialize)]
struct InvoiceRequest<'a> {
    price_amount: f64,
    price_currency: &'a str,
    order_id: &'a str,
    order_description: &'a str,
    ipn_callback_url: &'a str,
    success_url: &'a str,
    cancel_url: &'a str,
}

#[derive(Deserialize)]
struct InvoiceResponse {
    #[serde(default)]
    invoice_url: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[async_trait]
impl PaymentProvider for NowPayments {
    fn name(&self) -> &'static str {
        "nowpayments"
    }

    async fn create_checkout(&self, user: UserId) -> Result<Url, PaymentError> {
        let order_id = user.to_string();
        let response = self
            .client
            .post(self.config.api_base.join("v1/invoice")?)
            .header("x-api-key", &self.config.api_key)
            .json(&InvoiceRequest {
                price_amount: self.config.price_amount,
                price_currency: &self.config.price_currency,
                order_id: &order_id,
                order_description: "Premium access",
                ipn_callback_url: self.config.ipn_callback_url.as_str(),
                success_url: self.config.success_url.as_str(),
                cancel_url: self.config.cancel_url.as_str(),
            })
            .send()
            .await?;

        let status = response.status();
        let invoice: InvoiceResponse = response.json().await?;

        match invoice.invoice_url {
            Some(url) if status.is_success() => Ok(Url::parse(&url)?),
            _ => Err(PaymentError::Api(
                invoice.message.unwrap_or_else(|| status.to_string()),
            )),
        }
    }

    fn signature_header(&self) -> &'static str {
        "x-nowpayments-sig"
    }

    fn verify_notification(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<PaymentNotification, PaymentError> {
        let signature = signature.ok_or(PaymentError::MissingSignature)?;
        let signature = hex::decode(signature.trim()).map_err(|_| PaymentError::BadSignature)?;

        // The signature is over the re-serialized, key-sorted body, so the
        // body has to be parsed before it can be checked.
        let payload = sort_keys(serde_json::from_slice(body)?);
        let canonical = serde_json::to_string(&payload)?;

        let mut mac = HmacSha512::new_from_slice(self.config.ipn_secret.as_bytes())
            .map_err(|_| PaymentError::BadSignature)?;
        mac.update(canonical.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| PaymentError::BadSignature)?;

        let status = payload
            .get("payment_status")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let reference =
            value_to_reference(payload.get("payment_id")).unwrap_or_else(|| String::from("?"));

        if status != "finished" {
            return Ok(PaymentNotification::Ignored {
                reason: format!("payment {reference} is {status}"),
            });
        }

        let order_id = value_to_reference(payload.get("order_id"))
            .ok_or_else(|| PaymentError::BadReference(String::new()))?;

        Ok(PaymentNotification::Completed {
            user_id: parse_user_reference(&order_id)?,
            reference,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        matchers::{body_partial_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    const SECRET: &str = "ipn-secret";

    fn config(api_base: &str) -> NowPaymentsConfig {
        NowPaymentsConfig {
            api_key: "np-key".into(),
            ipn_secret: SECRET.into(),
            price_amount: 5.0,
            price_currency: "usd".into(),
            api_base: Url::parse(api_base).unwrap(),
            ipn_callback_url: Url::parse("https://bot.example.com/payments/webhook").unwrap(),
            success_url: Url::parse("https://bot.example.com/payments/success").unwrap(),
            cancel_url: Url::parse("https://bot.example.com/payments/cancel").unwrap(),
        }
    }

    fn provider() -> NowPayments {
        NowPayments::new(Client::new(), config(NowPaymentsConfig::DEFAULT_API_BASE))
    }

    fn sign(secret: &str, payload: &Value) -> String {
        let canonical = serde_json::to_string(&sort_keys(payload.clone())).unwrap();
        let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(canonical.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn ipn(status: &str) -> Value {
        // Deliberately not in sorted order.
        json!({
            "payment_status": status,
            "payment_id": 5_077_125_051u64,
            "order_id": "42",
            "pay_currency": "btc",
            "actually_paid": 0.000_17,
            "fee": {"depositFee": 0, "currency": "btc", "serviceFee": 0},
        })
    }

    #[test]
    fn sort_keys_is_recursive() {
        let sorted = sort_keys(json!({"b": 1, "a": {"d": 2, "c": [{"f": 3, "e": 4}]}}));
        assert_eq!(
            serde_json::to_string(&sorted).unwrap(),
            r#"{"a":{"c":[{"e":4,"f":3}],"d":2},"b":1}"#
        );
    }

    #[test]
    fn accepts_finished_payment() {
        let payload = ipn("finished");
        let body = serde_json::to_vec(&payload).unwrap();
        let result = provider().verify_notification(Some(&sign(SECRET, &payload)), &body);
        assert_eq!(
            result.unwrap(),
            PaymentNotification::Completed {
                user_id: UserId(42),
                reference: "5077125051".into()
            }
        );
    }

    #[test]
    fn other_statuses_are_ignored() {
        for status in ["waiting", "confirming", "partially_paid", "expired"] {
            let payload = ipn(status);
            let body = serde_json::to_vec(&payload).unwrap();
            assert!(matches!(
                provider().verify_notification(Some(&sign(SECRET, &payload)), &body),
                Ok(PaymentNotification::Ignored { .. })
            ));
        }
    }

    #[test]
    fn rejects_bad_signatures() {
        let payload = ipn("finished");
        let body = serde_json::to_vec(&payload).unwrap();

        assert!(matches!(
            provider().verify_notification(None, &body),
            Err(PaymentError::MissingSignature)
        ));
        assert!(matches!(
            provider().verify_notification(Some("not hex"), &body),
            Err(PaymentError::BadSignature)
        ));
        assert!(matches!(
            provider().verify_notification(Some(&sign("wrong", &payload)), &body),
            Err(PaymentError::BadSignature)
        ));

        let mut tampered = payload.clone();
        tampered["order_id"] = json!("43");
        let tampered_body = serde_json::to_vec(&tampered).unwrap();
        assert!(matches!(
            provider().verify_notification(Some(&sign(SECRET, &payload)), &tampered_body),
            Err(PaymentError::BadSignature)
        ));
    }

    #[tokio::test]
    async fn creates_invoice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/invoice"))
            .and(header("x-api-key", "np-key"))
            .and(body_partial_json(json!({
                "order_id": "42",
                "price_currency": "usd",
                "ipn_callback_url": "https://bot.example.com/payments/webhook",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "4522625843",
                "order_id": "42",
                "invoice_url": "https://nowpayments.io/payment/?iid=4522625843",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = NowPayments::new(Client::new(), config(&format!("{}/", server.uri())));
        assert_eq!(
            provider.create_checkout(UserId(42)).await.unwrap().as_str(),
            "https://nowpayments.io/payment/?iid=4522625843"
        );
    }

    #[tokio::test]
    async fn invoice_errors_come_through() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "status": false,
                "statusCode": 403,
                "message": "Invalid api key",
            })))
            .mount(&server)
            .await;

        let provider = NowPayments::new(Client::new(), config(&format!("{}/", server.uri())));
        match provider.create_checkout(UserId(42)).await {
            Err(PaymentError::Api(message)) => assert_eq!(message, "Invalid api key"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
