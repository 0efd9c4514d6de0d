pub mod commands;

use std::sync::Arc;

use teloxide::{
    types::{ChatId, Update, UserId},
    RequestError,
};

use crate::{
    chat::{ChatApi, Inbound},
    generation::{ImageGenerator, TextGenerator},
    history::ChatHistory,
    ledger::{AccessFlag, AccessLedger, LedgerError},
    payments::PaymentProvider,
};
use commands::{CommandParams, Route};

/// Everything the bot can say on its own. Failures from the outside world
/// always turn into one of these, never into the raw error.
pub mod messages {
    pub const WELCOME: &str = "hi! I'm a chat bot. Talk to me and I'll talk back, \
or make pictures for you if you have premium.";
    pub const NEEDS_PREMIUM: &str = "🔒 Upgrade required. This is a premium feature, send /pay to get premium.";
    pub const NEEDS_VERIFIED: &str = "🔒 Verification required. Send /verify first.";
    pub const IMAGE_USAGE: &str = "Usage: /image <prompt>";
    pub const IMAGE_FAILED: &str = "❌ Failed to generate image.";
    pub const TEXT_FAILED: &str = "❌ Text generation failed.";
    pub const ALREADY_VERIFIED: &str = "You're already verified!";
    pub const VERIFIED: &str = "✅ You're verified now. Go ahead and chat!";
    pub const JOIN_TO_VERIFY: &str =
        "To get verified, join our community chat first, then send /verify again.";
    pub const VERIFY_FAILED: &str = "❌ Couldn't check your membership right now. Try again later.";
    pub const ALREADY_PREMIUM: &str = "You already have premium!";
    pub const PAYMENTS_UNAVAILABLE: &str = "Payments aren't available right now, sorry.";
    pub const PAY_HERE: &str = "Get premium here. It's activated as soon as the payment goes through:";
    pub const CHECKOUT_FAILED: &str = "❌ Couldn't create a payment link. Try again later.";
    pub const PAYMENT_RECEIVED: &str = "✅ Payment received! You have premium now.";
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("ledger failed: {0}")]
    Ledger(#[from] LedgerError),
    #[error("telegram request failed: {0}")]
    Telegram(#[from] RequestError),
}

/// Knobs of the dispatcher that aren't services.
#[derive(Debug, Clone, Default)]
pub struct DispatchSettings {
    /// Bot's own username, to tell `/cmd@ThisBot` from `/cmd@OtherBot`.
    pub bot_username: String,
    /// Users must be in this chat to pass `/verify`. If `None`, anyone passes.
    pub verify_chat: Option<ChatId>,
    /// Flag needed to talk to the text model. `None` lets everyone in.
    pub chat_gate: Option<AccessFlag>,
    /// How many past turns per chat to send along with a prompt.
    pub history_window: usize,
    /// Who may use `/grant`.
    pub owner_id: Option<UserId>,
}

/// Takes one incoming message, decides what it wants, checks the ledger,
/// calls at most one generator and says something back.
pub struct UpdateDispatcher {
    pub ledger: Arc<dyn AccessLedger>,
    pub chat: Arc<dyn ChatApi>,
    pub text: Arc<dyn TextGenerator>,
    pub image: Arc<dyn ImageGenerator>,
    pub payments: Option<Arc<dyn PaymentProvider>>,
    pub bot_username: String,
    pub verify_chat: Option<ChatId>,
    pub chat_gate: Option<AccessFlag>,
    pub owner_id: Option<UserId>,
    history: ChatHistory,
}

impl UpdateDispatcher {
    pub fn new(
        ledger: Arc<dyn AccessLedger>,
        chat: Arc<dyn ChatApi>,
        text: Arc<dyn TextGenerator>,
        image: Arc<dyn ImageGenerator>,
        payments: Option<Arc<dyn PaymentProvider>>,
        settings: DispatchSettings,
    ) -> Self {
        UpdateDispatcher {
            ledger,
            chat,
            text,
            image,
            payments,
            bot_username: settings.bot_username,
            verify_chat: settings.verify_chat,
            chat_gate: settings.chat_gate,
            owner_id: settings.owner_id,
            history: ChatHistory::new(settings.history_window),
        }
    }

    /// Handle a raw update. Anything that isn't a text message from a user
    /// is silently dropped.
    pub async fn handle_update(&self, update: &Update) -> Result<(), DispatchError> {
        match Inbound::from_update(update) {
            Some(inbound) => self.handle(&inbound).await,
            None => Ok(()),
        }
    }

    pub async fn handle(&self, inbound: &Inbound) -> Result<(), DispatchError> {
        match CommandParams::route(self, inbound) {
            Route::Command(command, params) => {
                log::debug!("{} called {}", inbound.user_id, command.callname);
                (command.function)(params).await
            }
            Route::FreeText => self.free_text(inbound).await,
            Route::NotForUs => Ok(()),
        }
    }

    /// Check that the sender has `flag`. If not, tell them so and return `false`.
    pub async fn gate(&self, inbound: &Inbound, flag: AccessFlag) -> Result<bool, DispatchError> {
        if self.ledger.check(inbound.user_id, flag).await? {
            return Ok(true);
        }

        let denial = match flag {
            AccessFlag::Premium => messages::NEEDS_PREMIUM,
            AccessFlag::Verified => messages::NEEDS_VERIFIED,
        };
        self.chat.send_text(inbound.chat_id, denial).await?;
        Ok(false)
    }

    async fn free_text(&self, inbound: &Inbound) -> Result<(), DispatchError> {
        if let Some(flag) = self.chat_gate {
            if !self.gate(inbound, flag).await? {
                return Ok(());
            }
        }

        let _ = self.chat.typing(inbound.chat_id).await;

        let turns = self.history.conversation(inbound.chat_id, &inbound.text);

        match self.text.complete(&turns).await {
            Ok(reply) => {
                self.chat.send_text(inbound.chat_id, &reply).await?;
                self.history
                    .remember(inbound.chat_id, &inbound.text, &reply);
            }
            Err(e) => {
                log::warn!("Text generation for {} failed: {}", inbound.user_id, e);
                self.chat
                    .send_text(inbound.chat_id, messages::TEXT_FAILED)
                    .await?;
            }
        }

        Ok(())
    }

    /// Let a user know their payment went through. Best effort: they may
    /// have never started a private chat with the bot, or blocked it since.
    pub async fn notify_premium_granted(&self, user: UserId) {
        if let Err(e) = self
            .chat
            .send_text(ChatId::from(user), messages::PAYMENT_RECEIVED)
            .await
        {
            log::warn!("Could not tell {} about their payment: {}", user, e);
        }
    }
}
