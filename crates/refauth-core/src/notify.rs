//! Outbound notifications (password-reset mail).

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Delivers a message to a recipient. Callers treat delivery as
/// fire-and-forget: failures are logged, never surfaced to the requester.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: Message) -> anyhow::Result<()>;
}

/// Writes messages to the log instead of delivering them.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: Message) -> anyhow::Result<()> {
        tracing::info!(
            to = %message.to,
            subject = %message.subject,
            "Notification (log delivery): {}",
            message.body
        );
        Ok(())
    }
}

/// Records sent messages; used by tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingNotifier {
    pub sent: tokio::sync::Mutex<Vec<Message>>,
}

#[cfg(test)]
#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: Message) -> anyhow::Result<()> {
        self.sent.lock().await.push(message);
        Ok(())
    }
}
