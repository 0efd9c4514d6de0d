mod split_msg;
pub use split_msg::*;

use futures::Future;
use teloxide::{
    requests::Requester,
    types::{ChatId, Message, UserId},
    Bot, RequestError,
};

pub trait MessageStuff {
    /// Text of the message, or its caption if it's media with one.
    fn text_full(&self) -> Option<&str>;
    /// ID of the user who sent this, if it was sent by a user at all
    /// (and not by a channel or anonymously on behalf of a group).
    fn sender_id(&self) -> Option<UserId>;
}

impl MessageStuff for Message {
    fn text_full(&self) -> Option<&str> {
        self.text().or_else(|| self.caption())
    }
    fn sender_id(&self) -> Option<UserId> {
        if self.sender_chat.is_some() {
            return None;
        }
        self.from.as_ref().map(|from| from.id)
    }
}

pub trait BotStuff {
    /// Show the "typing..." status in the chat. It goes away on its own
    /// after a few seconds or once the bot sends something.
    fn typing(&self, to_where: ChatId) -> impl Future<Output = Result<(), RequestError>> + Send;
}

impl BotStuff for Bot {
    async fn typing(&self, to_where: ChatId) -> Result<(), RequestError> {
        self.send_chat_action(to_where, teloxide::types::ChatAction::Typing)
            .await?;
        Ok(())
    }
}
