use std::sync::Arc;

use teloxide::{dptree::deps, payloads::SetWebhookSetters, prelude::*};

use crate::{
    chat::Inbound,
    config::{Config, PaymentsConfig, UpdateMode},
    generation::{ModelsLabImages, OpenRouterText},
    handlers::{commands::Command, DispatchError, DispatchSettings, UpdateDispatcher},
    ledger::open_ledger,
    payments::{NowPayments, PaymentProvider, Stripe},
    server::{self, AppState},
};

/// # Panics
/// Panics if the bot fails to start lol
pub async fn entry() {
    log::info!("ASYNC WOOOO");

    let config = Config::from_env().unwrap_or_else(|e| panic!("Bad configuration: {e}"));

    let ledger = open_ledger(&config.ledger)
        .await
        .unwrap_or_else(|e| panic!("Could not open the access ledger: {e}"));

    let bot = Bot::new(&config.bot_token);

    let me = bot.get_me().await.expect("Could not reach Telegram!");
    log::info!("Running as @{}", me.username());

    bot.set_my_commands(Command::generate_bot_commands())
        .await
        .expect("Failed to set bot commands!");

    // One client for everything that talks HTTP that isn't Telegram.
    let client = reqwest::Client::new();

    let payments: Option<Arc<dyn PaymentProvider>> = match config.payments.clone() {
        PaymentsConfig::Disabled => {
            log::warn!("No payment provider configured, /pay won't work.");
            None
        }
        PaymentsConfig::Stripe(stripe) => Some(Arc::new(Stripe::new(client.clone(), stripe))),
        PaymentsConfig::NowPayments(np) => Some(Arc::new(NowPayments::new(client.clone(), np))),
    };

    let dispatcher = Arc::new(UpdateDispatcher::new(
        ledger,
        Arc::new(bot.clone()),
        Arc::new(OpenRouterText::new(client.clone(), config.openrouter.clone())),
        Arc::new(ModelsLabImages::new(client, config.modelslab.clone())),
        payments,
        DispatchSettings {
            bot_username: me.username().to_string(),
            verify_chat: config.verify_chat,
            chat_gate: config.chat_gate,
            history_window: config.history_window,
            owner_id: config.owner_id,
        },
    ));

    let state = AppState {
        dispatcher: dispatcher.clone(),
        accept_updates: config.update_mode == UpdateMode::Webhook,
        webhook_secret: config.webhook_secret.as_deref().map(Arc::from),
    };

    match config.update_mode {
        UpdateMode::Webhook => {
            let Some(public_url) = config.public_url.clone() else {
                panic!("Webhook mode needs PUBLIC_URL!");
            };

            let mut set_webhook = bot.set_webhook(public_url);
            if let Some(secret) = &config.webhook_secret {
                set_webhook = set_webhook.secret_token(secret.clone());
            }
            set_webhook.await.expect("Failed to set the webhook!");

            log::info!("Webhook is set, serving.");

            server::serve(config.bind_addr, state)
                .await
                .expect("The HTTP server died!");
        }
        UpdateMode::Polling => {
            // Payment notifications still need somewhere to land.
            let bind_addr = config.bind_addr;
            tokio::spawn(async move {
                if let Err(e) = server::serve(bind_addr, state).await {
                    log::error!("The HTTP server died: {}", e);
                }
            });

            log::info!("Dispatching the dispatcher!");

            let handler = Update::filter_message().endpoint(handle_message);

            Dispatcher::builder(bot, handler)
                .default_handler(|_| async {})
                .dependencies(deps![dispatcher])
                .enable_ctrlc_handler()
                .build()
                .dispatch()
                .await;
        }
    }

    log::info!("it appears we have been bonked.");
}

async fn handle_message(
    message: Message,
    dispatcher: Arc<UpdateDispatcher>,
) -> Result<(), DispatchError> {
    let Some(inbound) = Inbound::from_message(&message) else {
        return Ok(());
    };
    dispatcher.handle(&inbound).await
}
