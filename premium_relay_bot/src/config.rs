//! Configuration, from environment variables (and a `.env` file, if there is one).

use std::{fmt::Display, net::SocketAddr, str::FromStr};

use teloxide::types::{ChatId, UserId};
use url::Url;

use crate::{
    generation::{ModelsLabConfig, OpenRouterConfig},
    ledger::{AccessFlag, LedgerBackend, LedgerConfig},
    payments::{NowPaymentsConfig, PaymentProviderKind, StripeConfig},
};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:10000";
const DEFAULT_PREMIUM_PRICE_USD: f64 = 5.0;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// How Telegram updates reach us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Telegram POSTs them to `PUBLIC_URL`.
    Webhook,
    /// We long-poll for them.
    Polling,
}

impl FromStr for UpdateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "webhook" => Ok(UpdateMode::Webhook),
            "polling" => Ok(UpdateMode::Polling),
            other => Err(format!("unknown update mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PaymentsConfig {
    Disabled,
    Stripe(StripeConfig),
    NowPayments(NowPaymentsConfig),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bot_token: String,
    pub bind_addr: SocketAddr,
    /// Where the outside world reaches our HTTP server.
    pub public_url: Option<Url>,
    pub update_mode: UpdateMode,
    pub webhook_secret: Option<String>,
    pub ledger: LedgerConfig,
    pub openrouter: OpenRouterConfig,
    pub modelslab: ModelsLabConfig,
    pub payments: PaymentsConfig,
    pub verify_chat: Option<ChatId>,
    /// `None` means free chat is open to everyone.
    pub chat_gate: Option<AccessFlag>,
    pub history_window: usize,
    pub owner_id: Option<UserId>,
}

impl Config {
    /// Read the configuration from the process environment, after loading
    /// `.env` into it if there is one.
    ///
    /// The bot token may also come from a file named `key`
    /// (or `key_debug` in debug builds), in case it's not in the environment.
    pub fn from_env() -> Result<Config, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            log::info!("Loaded environment from {}", path.display());
        }

        Config::from_lookup(|name| {
            let value = std::env::var(name).ok();
            if value.is_none() && name == "TELEGRAM_BOT_TOKEN" {
                return read_key_file();
            }
            value
        })
    }

    /// Build the configuration out of whatever `lookup` says each variable is.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Config, ConfigError> {
        let get = |name: &'static str| -> Option<String> {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));
        let parse_opt = |name: &'static str| get(name).map(|raw| (name, raw));

        let bot_token = require("TELEGRAM_BOT_TOKEN")?;

        let bind_addr = parse(
            "BIND_ADDR",
            &get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
        )?;

        let public_url = match parse_opt("PUBLIC_URL") {
            Some((name, raw)) => Some(as_directory(parse::<Url>(name, &raw)?)),
            None => None,
        };

        let update_mode = match parse_opt("UPDATE_MODE") {
            Some((name, raw)) => parse(name, &raw)?,
            None if public_url.is_some() => UpdateMode::Webhook,
            None => UpdateMode::Polling,
        };
        if update_mode == UpdateMode::Webhook && public_url.is_none() {
            return Err(ConfigError::Missing("PUBLIC_URL"));
        }

        let backend: LedgerBackend = match parse_opt("LEDGER_BACKEND") {
            Some((name, raw)) => parse(name, &raw)?,
            None => LedgerBackend::Sqlite,
        };
        let ledger = LedgerConfig {
            backend,
            path: get("LEDGER_PATH").unwrap_or_else(|| backend.default_path().to_string()),
        };

        let openrouter = OpenRouterConfig {
            api_key: require("OPENROUTER_API_KEY")?,
            model: get("OPENROUTER_MODEL")
                .unwrap_or_else(|| OpenRouterConfig::DEFAULT_MODEL.to_string()),
            url: parse(
                "OPENROUTER_URL",
                &get("OPENROUTER_URL").unwrap_or_else(|| OpenRouterConfig::DEFAULT_URL.to_string()),
            )?,
        };

        let modelslab = ModelsLabConfig {
            api_key: require("MODEL_LAB_API_KEY")?,
            model_id: get("MODEL_LAB_MODEL")
                .unwrap_or_else(|| ModelsLabConfig::DEFAULT_MODEL.to_string()),
            url: parse(
                "MODEL_LAB_URL",
                &get("MODEL_LAB_URL").unwrap_or_else(|| ModelsLabConfig::DEFAULT_URL.to_string()),
            )?,
        };

        let provider: PaymentProviderKind = match parse_opt("PAYMENT_PROVIDER") {
            Some((name, raw)) => parse(name, &raw)?,
            None => PaymentProviderKind::Disabled,
        };

        let payments = match provider {
            PaymentProviderKind::Disabled => PaymentsConfig::Disabled,
            kind => {
                // Providers need to send buyers and notifications back to us.
                let public_url = public_url.clone().ok_or(ConfigError::Missing("PUBLIC_URL"))?;
                let page = |path: &str| {
                    public_url.join(path).map_err(|e| ConfigError::Invalid {
                        name: "PUBLIC_URL",
                        reason: e.to_string(),
                    })
                };

                match kind {
                    PaymentProviderKind::Stripe => PaymentsConfig::Stripe(StripeConfig {
                        secret_key: require("STRIPE_SECRET_KEY")?,
                        webhook_secret: require("STRIPE_WEBHOOK_SECRET")?,
                        price_id: require("STRIPE_PRICE_ID")?,
                        api_base: parse("STRIPE_API_BASE", StripeConfig::DEFAULT_API_BASE)?,
                        success_url: page("payments/success")?,
                        cancel_url: page("payments/cancel")?,
                    }),
                    _ => PaymentsConfig::NowPayments(NowPaymentsConfig {
                        api_key: require("NOWPAYMENTS_API_KEY")?,
                        ipn_secret: require("NOWPAYMENTS_IPN_SECRET")?,
                        price_amount: match parse_opt("PREMIUM_PRICE_USD") {
                            Some((name, raw)) => positive_price(name, &raw)?,
                            None => DEFAULT_PREMIUM_PRICE_USD,
                        },
                        price_currency: String::from("usd"),
                        api_base: parse("NOWPAYMENTS_API_BASE", NowPaymentsConfig::DEFAULT_API_BASE)?,
                        ipn_callback_url: page("payments/webhook")?,
                        success_url: page("payments/success")?,
                        cancel_url: page("payments/cancel")?,
                    }),
                }
            }
        };

        let verify_chat = match parse_opt("VERIFY_CHAT_ID") {
            Some((name, raw)) => Some(ChatId(parse(name, &raw)?)),
            None => None,
        };

        let chat_gate = match get("CHAT_GATE").as_deref().map(str::to_ascii_lowercase) {
            None => Some(AccessFlag::Verified),
            Some(gate) if gate == "none" => None,
            Some(gate) => Some(parse("CHAT_GATE", &gate)?),
        };

        let history_window = match parse_opt("HISTORY_WINDOW") {
            Some((name, raw)) => parse(name, &raw)?,
            None => 0,
        };

        let owner_id = match parse_opt("OWNER_ID") {
            Some((name, raw)) => Some(UserId(parse(name, &raw)?)),
            None => None,
        };

        Ok(Config {
            bot_token,
            bind_addr,
            public_url,
            update_mode,
            webhook_secret: get("TELEGRAM_WEBHOOK_SECRET"),
            ledger,
            openrouter,
            modelslab,
            payments,
            verify_chat,
            chat_gate,
            history_window,
            owner_id,
        })
    }
}

fn parse<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

fn positive_price(name: &'static str, raw: &str) -> Result<f64, ConfigError> {
    let price: f64 = parse(name, raw)?;
    if !price.is_finite() || price <= 0.0 {
        return Err(ConfigError::Invalid {
            name,
            reason: format!("{price} is not a price"),
        });
    }
    Ok(price)
}

/// Make sure the URL ends with a slash, so joining paths onto it appends
/// to it instead of replacing its last segment.
fn as_directory(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn read_key_file() -> Option<String> {
    let path = match cfg!(debug_assertions) {
        true => "key_debug",
        false => "key",
    };
    std::fs::read_to_string(path).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let mut env: HashMap<String, String> = [
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("OPENROUTER_API_KEY", "sk-or"),
            ("MODEL_LAB_API_KEY", "ml"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in vars {
            env.insert(k.to_string(), v.to_string());
        }
        Config::from_lookup(|name| env.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR.parse().unwrap());
        assert_eq!(config.update_mode, UpdateMode::Polling);
        assert_eq!(config.ledger.backend, LedgerBackend::Sqlite);
        assert_eq!(config.ledger.path, "sqlite:access_ledger.sqlite");
        assert_eq!(config.openrouter.model, "gryphe/mythomist-7b");
        assert_eq!(config.modelslab.model_id, "realistic-vision-v51");
        assert_eq!(config.payments, PaymentsConfig::Disabled);
        assert_eq!(config.chat_gate, Some(AccessFlag::Verified));
        assert_eq!(config.history_window, 0);
        assert_eq!(config.verify_chat, None);
        assert_eq!(config.owner_id, None);
    }

    #[test]
    fn required_keys() {
        let result = Config::from_lookup(|name| match name {
            "TELEGRAM_BOT_TOKEN" => Some(String::from("123:abc")),
            _ => None,
        });
        assert!(matches!(result, Err(ConfigError::Missing("OPENROUTER_API_KEY"))));

        // Blank is the same as unset.
        assert!(matches!(
            config(&[("TELEGRAM_BOT_TOKEN", "  ")]),
            Err(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))
        ));
    }

    #[test]
    fn public_url_means_webhook() {
        let config = config(&[("PUBLIC_URL", "https://bot.example.com/relay")]).unwrap();
        assert_eq!(config.update_mode, UpdateMode::Webhook);
        assert_eq!(
            config.public_url.unwrap().as_str(),
            "https://bot.example.com/relay/"
        );
    }

    #[test]
    fn webhook_without_public_url() {
        assert!(matches!(
            config(&[("UPDATE_MODE", "webhook")]),
            Err(ConfigError::Missing("PUBLIC_URL"))
        ));
    }

    #[test]
    fn stripe() {
        let config = config(&[
            ("PUBLIC_URL", "https://bot.example.com"),
            ("PAYMENT_PROVIDER", "stripe"),
            ("STRIPE_SECRET_KEY", "sk_test"),
            ("STRIPE_WEBHOOK_SECRET", "whsec"),
            ("STRIPE_PRICE_ID", "price_1"),
        ])
        .unwrap();

        let PaymentsConfig::Stripe(stripe) = config.payments else {
            panic!("expected stripe");
        };
        assert_eq!(stripe.price_id, "price_1");
        assert_eq!(
            stripe.success_url.as_str(),
            "https://bot.example.com/payments/success"
        );
    }

    #[test]
    fn nowpayments() {
        let config = config(&[
            ("PUBLIC_URL", "https://bot.example.com/"),
            ("PAYMENT_PROVIDER", "nowpayments"),
            ("NOWPAYMENTS_API_KEY", "np"),
            ("NOWPAYMENTS_IPN_SECRET", "ipn"),
            ("PREMIUM_PRICE_USD", "9.99"),
        ])
        .unwrap();

        let PaymentsConfig::NowPayments(np) = config.payments else {
            panic!("expected nowpayments");
        };
        assert_eq!(np.price_amount, 9.99);
        assert_eq!(
            np.ipn_callback_url.as_str(),
            "https://bot.example.com/payments/webhook"
        );
    }

    #[test]
    fn payments_need_public_url_and_secrets() {
        assert!(matches!(
            config(&[("PAYMENT_PROVIDER", "stripe")]),
            Err(ConfigError::Missing("PUBLIC_URL"))
        ));
        assert!(matches!(
            config(&[
                ("PUBLIC_URL", "https://bot.example.com"),
                ("PAYMENT_PROVIDER", "stripe"),
                ("STRIPE_SECRET_KEY", "sk_test"),
            ]),
            Err(ConfigError::Missing("STRIPE_WEBHOOK_SECRET"))
        ));
    }

    #[test]
    fn gates_and_knobs() {
        let config = config(&[
            ("CHAT_GATE", "None"),
            ("HISTORY_WINDOW", "6"),
            ("VERIFY_CHAT_ID", "-1001234567890"),
            ("OWNER_ID", "1366743555"),
            ("LEDGER_BACKEND", "json"),
        ])
        .unwrap();
        assert_eq!(config.chat_gate, None);
        assert_eq!(config.history_window, 6);
        assert_eq!(config.verify_chat, Some(ChatId(-1001234567890)));
        assert_eq!(config.owner_id, Some(UserId(1366743555)));
        assert_eq!(config.ledger.path, "access_ledger.json");
    }

    #[test]
    fn invalid_values() {
        for (name, value) in [
            ("CHAT_GATE", "vip"),
            ("HISTORY_WINDOW", "-1"),
            ("BIND_ADDR", "localhost"),
            ("LEDGER_BACKEND", "redis"),
            ("PAYMENT_PROVIDER", "paypal"),
        ] {
            match config(&[(name, value)]) {
                Err(ConfigError::Invalid { name: got, .. }) => assert_eq!(got, name),
                other => panic!("{name}={value} gave {other:?}"),
            }
        }
    }
}
