//! Shared boilerplate for the relay bots: logging and runtime startup,
//! plus a couple of extension traits over teloxide's [`Bot`].

use std::future::Future;

use teloxide::prelude::*;

pub mod useful_methods;

/// Initialize logging and start the `closure` in an async runtime.
/// Logging is enabled by default on level `info` unless overridden
/// by environment variable `RUST_LOG`. This uses the crate
/// [pretty_env_logger][] internally, see its documentation for more details.
///
/// When running under systemd (`JOURNAL_STREAM` is set), timestamps are
/// left out since the journal adds its own.
///
/// # Panics
///
/// Panics if the tokio runtime can't be built.
///
/// [pretty_env_logger]: https://docs.rs/pretty_env_logger
pub fn start_everything(closure: impl Future<Output = ()>) {
    let log_level = std::env::var_os("RUST_LOG")
        .unwrap_or_else(|| std::ffi::OsString::from("info"))
        .into_string()
        .unwrap_or_else(|_| String::from("info"));

    let running_as_systemd_service = std::env::var_os("JOURNAL_STREAM").is_some();

    let mut builder = match running_as_systemd_service {
        true => pretty_env_logger::formatted_builder(),
        false => pretty_env_logger::formatted_timed_builder(),
    };

    builder.parse_filters(&log_level);

    if builder.try_init().is_err() {
        log::error!("Tried to init logger twice!");
    }

    log::info!("Logger is up.");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build the tokio runtime!")
        .block_on(closure);
}

/// Find out if a user of this ID is currently a member of the chat of that ID.
///
/// "Member" here means anyone present in the chat: owners, admins, plain
/// members and restricted members who haven't left. Users that left or were
/// banned are not members. A user the chat has never seen counts as not a
/// member either, instead of being an error.
pub async fn is_member_of(
    bot: &Bot,
    user: UserId,
    chat: ChatId,
) -> Result<bool, teloxide::RequestError> {
    match bot.get_chat_member(chat, user).await {
        Ok(member) => Ok(member.is_present()),
        Err(teloxide::RequestError::Api(teloxide::ApiError::UserNotFound)) => Ok(false),
        Err(e) => Err(e),
    }
}
