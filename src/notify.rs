//! Notification sender seam.
//!
//! The subsystem only ever hands a template id and a structured payload to
//! the sender; rendering and transport live elsewhere.

use async_trait::async_trait;
use std::sync::Mutex;
use thiserror::Error;

/// Message templates this subsystem can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailTemplate {
    VerifyEmail,
    PasswordReset,
}

impl EmailTemplate {
    pub fn id(&self) -> &'static str {
        match self {
            EmailTemplate::VerifyEmail => "verify_email",
            EmailTemplate::PasswordReset => "password_reset",
        }
    }
}

/// Notification delivery errors
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Delivers verification/reset messages.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(
        &self,
        template: EmailTemplate,
        recipient: &str,
        payload: serde_json::Value,
    ) -> Result<(), NotifyError>;
}

/// Sender that logs and reports success. Default for embedders that wire
/// mail delivery elsewhere.
#[derive(Debug, Default)]
pub struct NullSender;

#[async_trait]
impl NotificationSender for NullSender {
    async fn send(
        &self,
        template: EmailTemplate,
        recipient: &str,
        _payload: serde_json::Value,
    ) -> Result<(), NotifyError> {
        log::info!("dropping {} notification for {recipient}", template.id());
        Ok(())
    }
}

/// One captured send.
#[derive(Debug, Clone)]
pub struct SentMail {
    pub template: EmailTemplate,
    pub recipient: String,
    pub payload: serde_json::Value,
}

/// Sender that records every send for assertions. Test double.
#[derive(Debug, Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<SentMail>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().expect("sender lock poisoned").clone()
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(
        &self,
        template: EmailTemplate,
        recipient: &str,
        payload: serde_json::Value,
    ) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .expect("sender lock poisoned")
            .push(SentMail {
                template,
                recipient: recipient.to_string(),
                payload,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_sender_captures_payload() {
        let sender = RecordingSender::new();
        sender
            .send(
                EmailTemplate::PasswordReset,
                "user@example.com",
                serde_json::json!({"token": "abc"}),
            )
            .await
            .unwrap();

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].template, EmailTemplate::PasswordReset);
        assert_eq!(sent[0].payload["token"], "abc");
    }
}
