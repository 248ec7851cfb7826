//! Mail delivery through a sendmail-compatible binary
//!
//! Format: RFC 5322 headers + body on stdin, recipients taken from the
//! headers (`sendmail -t`).

use std::io::Write;
use std::process::{Command, Stdio};

use super::{Notification, Notifier, NotifyError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendmailConfig {
    /// Path to the sendmail binary
    pub binary: String,
    /// From address
    pub sender: String,
}

impl Default for SendmailConfig {
    fn default() -> Self {
        Self {
            binary: "/usr/sbin/sendmail".to_string(),
            sender: "instance-ops@localhost".to_string(),
        }
    }
}

/// Header values must stay on one line
fn header(field: &'static str, value: &str) -> Result<(), NotifyError> {
    if value.contains(['\r', '\n']) {
        return Err(NotifyError::InvalidHeader { field });
    }
    Ok(())
}

pub struct SendmailNotifier {
    config: SendmailConfig,
}

impl SendmailNotifier {
    pub fn new(config: SendmailConfig) -> Self {
        Self { config }
    }

    fn render(&self, notification: &Notification) -> Result<String, NotifyError> {
        header("From", &self.config.sender)?;
        header("To", &notification.recipient)?;
        header("Subject", &notification.subject)?;
        Ok(format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}\r\n",
            self.config.sender, notification.recipient, notification.subject, notification.body
        ))
    }
}

impl Notifier for SendmailNotifier {
    fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        if notification.recipient.trim().is_empty() {
            return Err(NotifyError::NoRecipient);
        }

        let message = self.render(notification)?;
        let mut child = Command::new(&self.config.binary)
            .arg("-t")
            .arg("-oi")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let written = match child.stdin.take() {
            // Dropping stdin closes it so the mailer sees EOF
            Some(mut stdin) => stdin.write_all(message.as_bytes()),
            None => Ok(()),
        };
        if let Err(err) = written {
            // Reap the mailer before reporting
            let _ = child.kill();
            let _ = child.wait();
            return Err(err.into());
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(NotifyError::Mailer {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}
