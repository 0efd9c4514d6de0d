//! Source code for the premium relay bot: a Telegram bot that passes
//! messages on to a chat model and `/image` prompts on to an image model,
//! for users who verified or paid.

/// Outbound Telegram calls, and what we take from inbound ones.
pub mod chat;

/// Environment-driven configuration.
pub mod config;

/// Who has access to what.
pub mod ledger;

/// Text and image generation APIs.
pub mod generation;

/// Per-chat memory for the text model.
pub mod history;

/// Checkout links and payment notifications.
pub mod payments;

/// Functions that handle messages from Telegram.
pub mod handlers;

/// The HTTP server.
pub mod server;

#[cfg(test)]
mod testing;

/// Entry function that starts the bot.
mod entry;
pub use entry::*;
