//! Completion notifications
//!
//! Best-effort, one-shot messages sent when a tracked operation finishes.
//! A failed send is logged by the caller and never changes job state.

mod sendmail;

pub use sendmail::{SendmailConfig, SendmailNotifier};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use instance_ops_model::OperationKind;
use serde::{Deserialize, Serialize};

/// One notification message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: String,
    /// Operation kind, as sent in the subject line
    pub subject: String,
    pub body: String,
    pub kind: OperationKind,
}

impl Notification {
    pub fn completed(recipient: &str, kind: OperationKind) -> Self {
        Self {
            recipient: recipient.to_string(),
            subject: kind.to_string(),
            body: kind.completion_message().to_string(),
            kind,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("No recipient configured")]
    NoRecipient,

    #[error("Failed to run mailer: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Mailer exited with {status}: {stderr}")]
    Mailer { status: String, stderr: String },

    #[error("Notification rejected: {0}")]
    Rejected(String),

    #[error("Line break in {field} header")]
    InvalidHeader { field: &'static str },
}

pub trait Notifier: Send + Sync {
    fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log instead of delivering them
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            recipient = %notification.recipient,
            subject = %notification.subject,
            body = %notification.body,
            "notification"
        );
        Ok(())
    }
}

/// Keeps every notification in memory; used by tests
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn sent_guard(&self) -> MutexGuard<'_, Vec<Notification>> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make subsequent sends fail (the attempt is still recorded)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent_guard().clone()
    }

    pub fn count(&self) -> usize {
        self.sent_guard().len()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent_guard().push(notification.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Rejected("recording notifier set to fail".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_payload() {
        let n = Notification::completed("ops@example.com", OperationKind::Stop);
        assert_eq!(n.subject, "stop");
        assert_eq!(n.body, "Server has been stopped");
        assert_eq!(n.recipient, "ops@example.com");
    }

    #[test]
    fn test_recording_notifier_failure_still_recorded() {
        let notifier = RecordingNotifier::new();
        notifier.set_failing(true);
        let n = Notification::completed("ops@example.com", OperationKind::Start);
        assert!(notifier.send(&n).is_err());
        assert_eq!(notifier.count(), 1);
    }

    #[test]
    fn test_recording_notifier_survives_poisoned_lock() {
        let notifier = RecordingNotifier::new();
        let poisoner = notifier.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.sent.lock().unwrap();
            panic!("poison");
        })
        .join();

        let n = Notification::completed("ops@example.com", OperationKind::Start);
        notifier.send(&n).unwrap();
        assert_eq!(notifier.count(), 1);
    }

    #[test]
    fn test_log_notifier_succeeds() {
        let n = Notification::completed("ops@example.com", OperationKind::Start);
        assert!(LogNotifier.send(&n).is_ok());
    }
}
