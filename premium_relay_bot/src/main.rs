use relay_bot_commons::*;

fn main() {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "WARN,premium_relay_bot=debug");
    }
    start_everything(premium_relay_bot::entry());
}
