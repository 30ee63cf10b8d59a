/// Mail dispatch collaborators

use crate::error::StepError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A rendered message ready to hand off
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), StepError>;
}

/// POSTs `{from, to, subject, body}` as JSON to a mail relay
#[derive(Debug, Clone)]
pub struct HttpMailer {
    client: reqwest::Client,
    relay_url: String,
}

impl HttpMailer {
    pub fn new(relay_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            relay_url: relay_url.to_string(),
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), StepError> {
        tracing::debug!("📧 Relaying email to {} via {}", email.to, self.relay_url);

        let response = self
            .client
            .post(&self.relay_url)
            .json(email)
            .send()
            .await
            .map_err(|e| StepError::Dispatch(format!("relay request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StepError::Dispatch(format!("relay answered {status}: {body}")));
        }

        Ok(())
    }
}

/// Writes messages to the log instead of sending them
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), StepError> {
        tracing::info!(
            "📧 [log mailer] to={} subject={:?} ({} bytes)",
            email.to,
            email.subject,
            email.body.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_mailer_accepts_everything() {
        let email = OutgoingEmail {
            from: "no-reply@lendflow.local".into(),
            to: "ada@example.com".into(),
            subject: "Hello".into(),
            body: "Body".into(),
        };
        assert!(LogMailer.send(&email).await.is_ok());
    }

    #[tokio::test]
    async fn http_mailer_reports_unreachable_relay() {
        let mailer = HttpMailer::new("http://127.0.0.1:9/relay");
        let email = OutgoingEmail {
            from: "a@b".into(),
            to: "c@d".into(),
            subject: "s".into(),
            body: "b".into(),
        };
        assert!(matches!(mailer.send(&email).await, Err(StepError::Dispatch(_))));
    }
}
