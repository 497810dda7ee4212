use std::{fmt::Write as _, time::Duration};

use serde::Serialize;
use stacked_errors::{bail, Result, StackableErr};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{
    field::{Field, Visit},
    Event, Level, Subscriber,
};
use tracing_subscriber::{layer::Context, Layer};

/// Events from these targets are never forwarded, delivering an alert must
/// not produce new alerts
const IGNORED_TARGETS: &[&str] = &["reqwest", "hyper", "hyper_util", "h2", "rustls"];

const SEND_TIMEOUT: Duration = Duration::from_secs(15);

/// Posts messages to a chat through the Telegram Bot API
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    endpoint: String,
    chat_id: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

impl TelegramNotifier {
    pub fn new(api_url: &str, token: &str, chat_id: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .stack()?;
        Ok(Self {
            client,
            endpoint: format!("{}/bot{token}/sendMessage", api_url.trim_end_matches('/')),
            chat_id: chat_id.to_owned(),
        })
    }

    pub async fn send(&self, text: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text,
            })
            .send()
            .await
            // the endpoint contains the token
            .map_err(|err| err.without_url())
            .stack()?;
        if !response.status().is_success() {
            bail!("the Telegram API returned {}", response.status())
        }
        Ok(())
    }
}

/// A [Layer] that queues every event at or above its level as alert text.
/// The receiving end is drained by an [AlertWorker].
#[derive(Debug)]
pub struct TelegramLayer {
    level: Level,
    alerts: mpsc::UnboundedSender<String>,
}

impl TelegramLayer {
    pub fn new(level: Level) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (alerts, receiver) = mpsc::unbounded_channel();
        (Self { level, alerts }, receiver)
    }
}

#[derive(Default)]
struct AlertVisitor {
    message: String,
    fields: String,
}

impl Visit for AlertVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={value}", field.name());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={value:?}", field.name());
        }
    }
}

/// Renders an alert as `LEVEL target: message key=value...`
fn alert_text(event: &Event<'_>) -> String {
    let metadata = event.metadata();
    let mut visitor = AlertVisitor::default();
    event.record(&mut visitor);
    format!(
        "{} {}: {}{}",
        metadata.level(),
        metadata.target(),
        visitor.message,
        visitor.fields
    )
}

fn is_ignored(target: &str) -> bool {
    IGNORED_TARGETS.iter().any(|ignored| {
        target
            .strip_prefix(ignored)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
    })
}

impl<S: Subscriber> Layer<S> for TelegramLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        // more verbose levels compare greater
        if *metadata.level() > self.level || is_ignored(metadata.target()) {
            return
        }
        // the worker is gone only during shutdown
        let _ = self.alerts.send(alert_text(event));
    }
}

/// Background task delivering queued alerts
#[derive(Debug)]
pub struct AlertWorker {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl AlertWorker {
    pub fn spawn(mut alerts: mpsc::UnboundedReceiver<String>, notifier: TelegramNotifier) -> Self {
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            // failures go to stderr, logging them would queue another alert
            let deliver = |text: String| {
                let notifier = notifier.clone();
                async move {
                    if let Err(err) = notifier.send(&text).await {
                        eprintln!("failed to deliver alert \"{text}\": {err}");
                    }
                }
            };
            loop {
                tokio::select! {
                    biased;
                    Some(text) = alerts.recv() => deliver(text).await,
                    _ = &mut shutdown_rx => break,
                }
            }
            while let Ok(text) = alerts.try_recv() {
                deliver(text).await;
            }
        });
        Self { shutdown, handle }
    }

    /// Delivers everything queued so far, then stops the task
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(err) = self.handle.await {
            eprintln!("alert worker failed: {err}");
        }
    }
}
