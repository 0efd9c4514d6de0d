use std::{future::Future, pin::Pin};

use teloxide::types::{BotCommand, UserId};

use super::{messages, DispatchError, UpdateDispatcher};
use crate::{chat::Inbound, ledger::AccessFlag};

pub const COMMANDS: &[Command] = &[START, HELP, IMAGE, VERIFY, PAY, STATUS, GRANT];

pub type Ret = Result<(), DispatchError>;
pub type CommandFuture<'a> = Pin<Box<dyn Future<Output = Ret> + Send + 'a>>;

pub struct CommandParams<'a> {
    pub dispatcher: &'a UpdateDispatcher,
    pub inbound: &'a Inbound,
    command_len: usize,
}

/// Where a message should go.
pub enum Route<'a> {
    Command(&'static Command, CommandParams<'a>),
    /// Not a command we know, so it's a prompt for the text model.
    FreeText,
    /// A command for some other bot in the same group chat.
    NotForUs,
}

impl<'a> CommandParams<'a> {
    pub fn route(dispatcher: &'a UpdateDispatcher, inbound: &'a Inbound) -> Route<'a> {
        if !inbound.text.starts_with('/') {
            return Route::FreeText;
        }

        let Some(command) = inbound.text.split_whitespace().next() else {
            return Route::FreeText;
        };

        if !command.is_ascii() {
            // Telegram commands must be ASCII.
            // See https://core.telegram.org/bots/api#botcommand
            return Route::FreeText;
        }

        // If the command is "/image@Relay_Bot", trim the "@" and everything after it.
        let callname = if let Some(username_start) = command.find('@') {
            // While we're here, also check if the username is actually ours.
            // Bot names are guaranteed ASCII, so ignore ASCII case specifically.
            if !command[username_start + '@'.len_utf8()..]
                .eq_ignore_ascii_case(&dispatcher.bot_username)
            {
                return Route::NotForUs;
            }

            &command[0..username_start]
        } else {
            command
        };

        for known in COMMANDS {
            if known.is_matching_callname(callname) {
                return Route::Command(
                    known,
                    CommandParams {
                        dispatcher,
                        inbound,
                        command_len: command.len(),
                    },
                );
            }
        }

        // No matching command found. Everything is a prompt if you believe hard enough.
        Route::FreeText
    }

    /// Text parameters of the command.
    ///
    /// If the input is `/image a cat in a hat`, this will be `a cat in a hat`.
    #[inline]
    pub fn get_params(&self) -> &str {
        self.inbound.text[self.command_len..].trim()
    }

    async fn reply(&self, text: &str) -> Ret {
        self.dispatcher
            .chat
            .send_text(self.inbound.chat_id, text)
            .await?;
        Ok(())
    }
}

pub struct Command {
    pub callname: &'static str,
    pub description: &'static str,
    pub function: fn(CommandParams) -> CommandFuture,
    hidden: bool,
}

impl Command {
    pub fn is_matching_callname(&self, command: &str) -> bool {
        self.callname
            .split_ascii_whitespace()
            .next()
            .is_some_and(|x| x.eq_ignore_ascii_case(command))
    }

    pub fn get_help(&self, mut output: impl std::fmt::Write) -> Result<(), std::fmt::Error> {
        output.write_str(self.callname)?;
        if !self.description.is_empty() {
            output.write_str(" - ")?;
            output.write_str(self.description)?;
        }

        Ok(())
    }

    pub fn generate_help() -> String {
        let mut response = String::from("Commands:\n\n");
        for command in COMMANDS {
            if command.hidden {
                continue;
            }
            // Writing into a String never fails.
            let _ = command.get_help(&mut response);
            response.push('\n');
        }
        response.push_str("\nAnything else you send goes straight to the chat model.");
        response
    }

    pub fn generate_bot_commands() -> Vec<BotCommand> {
        let mut output = Vec::new();

        for command in COMMANDS {
            if command.hidden {
                continue;
            }
            let Some(callname) = command.callname.split_ascii_whitespace().next() else {
                continue;
            };

            // Cut off the /
            output.push(BotCommand::new(&callname[1..], command.description));
        }

        output
    }
}

///////////////////////////////////////
/////////////////COMMAND DEFINITIONS
///////////////////////////////////////

/// Wraps the function's return value in a pinning closure.
macro_rules! wrap {
    ($thing:expr) => {
        |cp| Box::pin($thing(cp))
    };
}

pub const START: Command = Command {
    callname: "/start",
    description: "Say hi.",
    function: wrap!(start),
    hidden: false,
};
async fn start(cp: CommandParams<'_>) -> Ret {
    let mut response = String::from(messages::WELCOME);
    response.push_str("\n\n");
    response.push_str(&Command::generate_help());
    cp.reply(&response).await
}

pub const HELP: Command = Command {
    callname: "/help",
    description: "Show this help.",
    function: wrap!(help),
    hidden: false,
};
async fn help(cp: CommandParams<'_>) -> Ret {
    cp.reply(&Command::generate_help()).await
}

pub const IMAGE: Command = Command {
    callname: "/image <prompt>",
    description: "Generate an image. Premium only.",
    function: wrap!(image),
    hidden: false,
};
async fn image(cp: CommandParams<'_>) -> Ret {
    let d = cp.dispatcher;
    let chat_id = cp.inbound.chat_id;

    if !d.gate(cp.inbound, AccessFlag::Premium).await? {
        return Ok(());
    }

    let prompt = cp.get_params();
    if prompt.is_empty() {
        return cp.reply(messages::IMAGE_USAGE).await;
    }

    let _ = d.chat.typing(chat_id).await;

    let url = match d.image.generate(prompt).await {
        Ok(url) => url,
        Err(e) => {
            log::warn!("Image generation for {} failed: {}", cp.inbound.user_id, e);
            return cp.reply(messages::IMAGE_FAILED).await;
        }
    };

    if let Err(e) = d.chat.send_photo(chat_id, url.clone()).await {
        // Usually Telegram failing to fetch the URL itself.
        log::warn!("Failed to send generated image {}: {}", url, e);
        return cp.reply(messages::IMAGE_FAILED).await;
    }

    Ok(())
}

pub const VERIFY: Command = Command {
    callname: "/verify",
    description: "Get verified to chat with the bot.",
    function: wrap!(verify),
    hidden: false,
};
async fn verify(cp: CommandParams<'_>) -> Ret {
    let d = cp.dispatcher;
    let user = cp.inbound.user_id;

    if d.ledger.check(user, AccessFlag::Verified).await? {
        return cp.reply(messages::ALREADY_VERIFIED).await;
    }

    if let Some(verify_chat) = d.verify_chat {
        match d.chat.is_member(verify_chat, user).await {
            Ok(true) => {}
            Ok(false) => return cp.reply(messages::JOIN_TO_VERIFY).await,
            Err(e) => {
                log::warn!("Could not check if {} is in {}: {}", user, verify_chat, e);
                return cp.reply(messages::VERIFY_FAILED).await;
            }
        }
    }

    d.ledger.grant(user, AccessFlag::Verified).await?;
    log::info!("{} is verified now", user);
    cp.reply(messages::VERIFIED).await
}

pub const PAY: Command = Command {
    callname: "/pay",
    description: "Get premium.",
    function: wrap!(pay),
    hidden: false,
};
async fn pay(cp: CommandParams<'_>) -> Ret {
    let d = cp.dispatcher;
    let user = cp.inbound.user_id;

    if d.ledger.check(user, AccessFlag::Premium).await? {
        return cp.reply(messages::ALREADY_PREMIUM).await;
    }

    let Some(payments) = &d.payments else {
        return cp.reply(messages::PAYMENTS_UNAVAILABLE).await;
    };

    match payments.create_checkout(user).await {
        Ok(url) => cp.reply(&format!("{}\n\n{}", messages::PAY_HERE, url)).await,
        Err(e) => {
            log::error!(
                "Failed to create a {} checkout for {}: {}",
                payments.name(),
                user,
                e
            );
            cp.reply(messages::CHECKOUT_FAILED).await
        }
    }
}

pub const STATUS: Command = Command {
    callname: "/status",
    description: "Show what you have access to.",
    function: wrap!(status),
    hidden: false,
};
async fn status(cp: CommandParams<'_>) -> Ret {
    let record = cp.dispatcher.ledger.record(cp.inbound.user_id).await?;
    let yes_no = |x: bool| if x { "yes" } else { "no" };
    let response = format!(
        "Verified: {}\nPremium: {}",
        yes_no(record.is_verified),
        yes_no(record.is_premium)
    );
    cp.reply(&response).await
}

pub const GRANT: Command = Command {
    callname: "/grant <userid> <verified|premium>",
    description: "grant",
    function: wrap!(grant),
    hidden: true,
};
async fn grant(cp: CommandParams<'_>) -> Ret {
    if cp.dispatcher.owner_id != Some(cp.inbound.user_id) {
        // Pretend it doesn't exist.
        return Ok(());
    }

    let mut params = cp.get_params().split_whitespace();
    let (Some(who), Some(flag), None) = (params.next(), params.next(), params.next()) else {
        return cp.reply("usage: /grant <userid> <verified|premium>").await;
    };

    let Ok(who): Result<u64, _> = who.parse() else {
        return cp.reply(&format!("wtf is {}", who)).await;
    };
    let flag: AccessFlag = match flag.parse() {
        Ok(flag) => flag,
        Err(e) => return cp.reply(&e).await,
    };

    cp.dispatcher.ledger.grant(UserId(who), flag).await?;
    log::info!("Owner granted {} to {}", flag, who);

    cp.reply(&format!("{} is {} now", who, flag)).await
}
