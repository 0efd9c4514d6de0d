//! Everything the bot says goes through [`ChatApi`], so the dispatcher
//! doesn't care whether it's talking to Telegram or to a test.

use async_trait::async_trait;
use relay_bot_commons::{is_member_of, useful_methods::*};
use teloxide::{
    requests::Requester,
    types::{ChatId, InputFile, Message, Update, UpdateKind, UserId},
    Bot, RequestError,
};
use url::Url;

#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Send plain text, split into several messages if it's too long.
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<(), RequestError>;
    /// Send a photo Telegram should fetch from `photo` by itself.
    async fn send_photo(&self, chat: ChatId, photo: Url) -> Result<(), RequestError>;
    async fn typing(&self, chat: ChatId) -> Result<(), RequestError>;
    async fn is_member(&self, chat: ChatId, user: UserId) -> Result<bool, RequestError>;
}

#[async_trait]
impl ChatApi for Bot {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<(), RequestError> {
        self.send_long_text(chat, text).await?;
        Ok(())
    }

    async fn send_photo(&self, chat: ChatId, photo: Url) -> Result<(), RequestError> {
        Requester::send_photo(self, chat, InputFile::url(photo)).await?;
        Ok(())
    }

    async fn typing(&self, chat: ChatId) -> Result<(), RequestError> {
        BotStuff::typing(self, chat).await
    }

    async fn is_member(&self, chat: ChatId, user: UserId) -> Result<bool, RequestError> {
        is_member_of(self, user, chat).await
    }
}

/// The only parts of an incoming message the dispatcher looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub text: String,
}

impl Inbound {
    /// `None` for anything that isn't a new message with text from a user.
    pub fn from_update(update: &Update) -> Option<Inbound> {
        match &update.kind {
            UpdateKind::Message(message) => Inbound::from_message(message),
            _ => None,
        }
    }

    pub fn from_message(message: &Message) -> Option<Inbound> {
        Some(Inbound {
            chat_id: message.chat.id,
            user_id: message.sender_id()?,
            text: message.text_full()?.to_string(),
        })
    }
}
