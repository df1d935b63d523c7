use async_trait::async_trait;
use refauth_core::{Message, Notifier};

/// Relays mail by POSTing it as JSON to a webhook.
///
/// Body: `{"from", "to", "subject", "body"}`. Any non-2xx answer is an error.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    from: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            from: from.into(),
        }
    }

    fn payload(&self, message: &Message) -> serde_json::Value {
        serde_json::json!({
            "from": self.from,
            "to": message.to,
            "subject": message.subject,
            "body": message.body,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, message: Message) -> anyhow::Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&self.payload(&message))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Mail webhook failed: {}",
                response.status()
            ));
        }

        tracing::debug!("Mail relayed to webhook: subject={}", message.subject);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_includes_sender() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook", "noreply@example.com");
        let payload = notifier.payload(&Message {
            to: "alice@example.com".into(),
            subject: "Password Reset Request".into(),
            body: "link".into(),
        });
        assert_eq!(payload["from"], "noreply@example.com");
        assert_eq!(payload["to"], "alice@example.com");
        assert_eq!(payload["subject"], "Password Reset Request");
    }

    #[tokio::test]
    async fn unreachable_webhook_is_an_error() {
        // Port 9 (discard) is closed on loopback in test environments.
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook", "noreply@example.com");
        let result = notifier
            .send(Message {
                to: "alice@example.com".into(),
                subject: "s".into(),
                body: "b".into(),
            })
            .await;
        assert!(result.is_err());
    }
}
