//! Logging setup from a declarative YAML document, with an optional Telegram
//! alert sink for warnings and errors.

mod telegram;

use std::{fmt, path::Path};

use serde::Deserialize;
use stacked_errors::{Result, StackableErr};
pub use telegram::*;
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// The logging document, e.g.
///
/// ```yaml
/// filter: "info,container_autoupdate=debug"
/// format: compact
/// telegram:
///   level: error
/// ```
///
/// `RUST_LOG`, when set, takes precedence over `filter`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// [EnvFilter] directives
    pub filter: String,
    pub format: LogFormat,
    pub ansi: bool,
    /// Include the event target in log lines
    pub target: bool,
    pub telegram: Option<TelegramConfig>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
            format: LogFormat::Full,
            ansi: true,
            target: false,
            telegram: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Full,
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelegramConfig {
    pub enabled: bool,
    /// Minimum level that is forwarded
    pub level: AlertLevel,
    pub api_url: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: AlertLevel::Warn,
            api_url: DEFAULT_TELEGRAM_API_URL.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warn,
    Error,
}

impl From<AlertLevel> for Level {
    fn from(level: AlertLevel) -> Self {
        match level {
            AlertLevel::Warn => Level::WARN,
            AlertLevel::Error => Level::ERROR,
        }
    }
}

impl LoggingConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        // an empty document means all defaults
        if s.trim().is_empty() {
            return Ok(Self::default())
        }
        serde_yaml::from_str(s).stack()
    }

    /// Reads the document at `path`, no path gives the defaults
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default())
        };
        let contents = tokio::fs::read_to_string(path)
            .await
            .stack_err_with(|| format!("reading logging config {path:?}"))?;
        Self::from_yaml_str(&contents).stack_err_with(|| format!("parsing logging config {path:?}"))
    }
}

/// Credentials for the alert channel, kept out of the logging document
#[derive(Clone, Default)]
pub struct Secrets {
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

// for omitting the token
impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("telegram_token", &self.telegram_token.as_ref().map(|_| "<redacted>"))
            .field("telegram_chat_id", &self.telegram_chat_id)
            .finish()
    }
}

/// Keeps the alert sender alive, call [LoggingGuard::shutdown] before exiting
/// so queued alerts are delivered.
#[must_use]
#[derive(Debug)]
pub struct LoggingGuard {
    alert_worker: Option<AlertWorker>,
}

impl LoggingGuard {
    pub async fn shutdown(self) {
        if let Some(alert_worker) = self.alert_worker {
            alert_worker.shutdown().await;
        }
    }
}

/// Builds the alert layer if the config enables it and the credentials are
/// present. Must be called within a tokio runtime.
fn alert_layer(
    config: &LoggingConfig,
    secrets: &Secrets,
) -> Result<Option<(TelegramLayer, AlertWorker)>> {
    let Some(telegram) = config.telegram.as_ref().filter(|telegram| telegram.enabled) else {
        return Ok(None)
    };
    let (Some(token), Some(chat_id)) = (&secrets.telegram_token, &secrets.telegram_chat_id)
    else {
        // the logger is not up yet
        eprintln!(
            "telegram alerts are enabled but TELEGRAM_TOKEN or TELEGRAM_CHAT_ID is missing, \
             alerts are disabled"
        );
        return Ok(None)
    };
    let notifier = TelegramNotifier::new(&telegram.api_url, token, chat_id).stack()?;
    let (layer, alerts) = TelegramLayer::new(telegram.level.into());
    Ok(Some((layer, AlertWorker::spawn(alerts, notifier))))
}

/// Installs the global `tracing` subscriber described by `config`
pub fn init_logging(config: &LoggingConfig, secrets: &Secrets) -> Result<LoggingGuard> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter)
            .stack_err_with(|| format!("invalid log filter \"{}\"", config.filter))?,
    };

    let fmt_layer = match config.format {
        LogFormat::Full => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(config.ansi)
            .with_target(config.target)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_ansi(config.ansi)
            .with_target(config.target)
            .boxed(),
    };

    let (layer, alert_worker) = alert_layer(config, secrets).stack()?.unzip();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(layer)
        .try_init()
        .stack()?;

    Ok(LoggingGuard { alert_worker })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        assert_eq!(
            LoggingConfig::from_yaml_str("").unwrap(),
            LoggingConfig::default()
        );
        let config = LoggingConfig::from_yaml_str("telegram: {}").unwrap();
        assert_eq!(config.telegram, Some(TelegramConfig::default()));
    }

    #[test]
    fn full_document() {
        let config = LoggingConfig::from_yaml_str(
            r#"
filter: "warn,container_autoupdate=debug"
format: compact
ansi: false
target: true
telegram:
  enabled: false
  level: error
  api_url: http://127.0.0.1:8081
"#,
        )
        .unwrap();
        assert_eq!(config, LoggingConfig {
            filter: "warn,container_autoupdate=debug".to_owned(),
            format: LogFormat::Compact,
            ansi: false,
            target: true,
            telegram: Some(TelegramConfig {
                enabled: false,
                level: AlertLevel::Error,
                api_url: "http://127.0.0.1:8081".to_owned(),
            }),
        });
    }

    #[test]
    fn example_document() {
        let config =
            LoggingConfig::from_yaml_str(include_str!("../resources/logging_config.yaml")).unwrap();
        assert_eq!(config.filter, "info,container_autoupdate=debug");
        assert_eq!(config.telegram.unwrap().level, AlertLevel::Warn);
    }

    #[test]
    fn rejects_unknown_and_secret_fields() {
        assert!(LoggingConfig::from_yaml_str("levle: debug").is_err());
        assert!(LoggingConfig::from_yaml_str("telegram:\n  token: abc").is_err());
        assert!(LoggingConfig::from_yaml_str("format: json").is_err());
    }

    #[tokio::test]
    async fn alerts_need_credentials() {
        let config = LoggingConfig {
            telegram: Some(TelegramConfig::default()),
            ..Default::default()
        };
        assert!(alert_layer(&config, &Secrets::default()).unwrap().is_none());
        assert!(alert_layer(&LoggingConfig::default(), &Secrets {
            telegram_token: Some("t".to_owned()),
            telegram_chat_id: Some("1".to_owned()),
        })
        .unwrap()
        .is_none());

        let (_, worker) = alert_layer(&config, &Secrets {
            telegram_token: Some("t".to_owned()),
            telegram_chat_id: Some("1".to_owned()),
        })
        .unwrap()
        .unwrap();
        worker.shutdown().await;
    }

    #[test]
    fn secrets_are_redacted() {
        let secrets = Secrets {
            telegram_token: Some("123:secret".to_owned()),
            telegram_chat_id: Some("42".to_owned()),
        };
        let debug = format!("{secrets:?}");
        assert!(!debug.contains("123:secret"));
        assert!(debug.contains("<redacted>"));
    }
}
