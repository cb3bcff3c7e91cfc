//! Outbound notification seam.
//!
//! Email transport is an external collaborator. The platform only needs a
//! single `send` capability; [`LoggingEmailSender`] is used when nothing
//! else is configured.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::core::{PlatformError, Result};

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

/// Writes each message to the log instead of delivering it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEmailSender;

#[async_trait]
impl EmailSender for LoggingEmailSender {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        if to.trim().is_empty() {
            return Err(PlatformError::Notification("recipient must not be empty".into()));
        }
        log::info!("Email to {} | {} | {} byte(s)", to, subject, body.len());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Keeps every message in memory.
#[derive(Debug, Default)]
pub struct OutboxEmailSender {
    sent: Mutex<Vec<SentEmail>>,
}

impl OutboxEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EmailSender for OutboxEmailSender {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| PlatformError::Notification("outbox lock poisoned".into()))?;
        sent.push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_outbox_records_messages() {
        let outbox = OutboxEmailSender::new();
        outbox.send("ops@example.com", "Hi", "body").await.unwrap();
        assert_eq!(outbox.sent()[0].subject, "Hi");
    }

    #[tokio::test]
    async fn test_logging_sender_rejects_blank_recipient() {
        let err = LoggingEmailSender.send(" ", "Hi", "").await.unwrap_err();
        assert_eq!(err.reason(), "notification_error");
    }
}
