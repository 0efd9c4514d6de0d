//! The HTTP side of the bot: Telegram's webhook, the payment provider's
//! webhook and the pages a buyer lands on after checkout.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use teloxide::types::Update;
use tokio::net::TcpListener;

use crate::{
    handlers::UpdateDispatcher,
    ledger::AccessFlag,
    payments::PaymentNotification,
};

const TELEGRAM_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<UpdateDispatcher>,
    /// Whether Telegram updates arrive over HTTP at all. Off when polling.
    pub accept_updates: bool,
    /// If set, Telegram's webhook requests must carry this in
    /// `X-Telegram-Bot-Api-Secret-Token`.
    pub webhook_secret: Option<Arc<str>>,
}

pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/payments/webhook", post(payment_webhook))
        .route("/payments/success", get(payment_success))
        .route("/payments/cancel", get(payment_cancel))
        .route("/health", get(health));

    if state.accept_updates {
        router = router.route("/", post(telegram_webhook));
    }

    router.with_state(state)
}

/// Serve until Ctrl+C.
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;

    log::info!("Listening on http://{}", addr);
    if state.accept_updates {
        log::info!("  POST /                  - Telegram updates");
    }
    log::info!("  POST /payments/webhook  - payment notifications");
    log::info!("  GET  /health            - health check");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("Got Ctrl+C, shutting down the server.");
        })
        .await
}

/// POST / - one Telegram update.
///
/// Anything that gets past the secret check is acknowledged, even garbage,
/// or else Telegram keeps redelivering it.
async fn telegram_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = &state.webhook_secret {
        let given = headers
            .get(TELEGRAM_SECRET_HEADER)
            .and_then(|v| v.to_str().ok());
        if given != Some(&**secret) {
            log::warn!("Got a Telegram update with a wrong secret token.");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    match serde_json::from_slice::<Update>(&body) {
        Ok(update) => {
            if let Err(e) = state.dispatcher.handle_update(&update).await {
                log::error!("Failed to handle update {}: {}", update.id.0, e);
            }
        }
        Err(e) => log::debug!("Ignoring an update that doesn't parse: {}", e),
    }

    Json(json!({"ok": true})).into_response()
}

/// POST /payments/webhook - the payment provider says something happened.
async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let dispatcher = &state.dispatcher;
    let Some(payments) = &dispatcher.payments else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "payments are not enabled"})),
        )
            .into_response();
    };

    let signature = headers
        .get(payments.signature_header())
        .and_then(|v| v.to_str().ok());

    match payments.verify_notification(signature, &body) {
        Ok(PaymentNotification::Completed { user_id, reference }) => {
            if let Err(e) = dispatcher.ledger.grant(user_id, AccessFlag::Premium).await {
                // A 500 makes the provider try again later, which is what we want.
                log::error!(
                    "Payment {} by {} went through, but the ledger failed: {}",
                    reference,
                    user_id,
                    e
                );
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            log::info!(
                "{} is premium now ({} payment {})",
                user_id,
                payments.name(),
                reference
            );
            dispatcher.notify_premium_granted(user_id).await;
            Json(json!({"received": true})).into_response()
        }
        Ok(PaymentNotification::Ignored { reason }) => {
            log::debug!("Ignoring {} notification: {}", payments.name(), reason);
            Json(json!({"received": true})).into_response()
        }
        Err(e) if e.is_rejection() => {
            log::warn!("Rejected a {} notification: {}", payments.name(), e);
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "invalid signature"})),
            )
                .into_response()
        }
        Err(e) => {
            log::error!("Failed to process a {} notification: {}", payments.name(), e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// Landing on these means nothing. Only the signed webhook grants premium.

async fn payment_success() -> Html<&'static str> {
    Html(
        "<h1>Thanks!</h1><p>Premium is activated as soon as the payment is confirmed. \
You'll get a message from the bot. You can close this page.</p>",
    )
}

async fn payment_cancel() -> Html<&'static str> {
    Html("<h1>Payment canceled</h1><p>Nothing was charged. You can close this page.</p>")
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}
