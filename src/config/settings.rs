//! Typed settings (the shape of the merged configuration)
//!
//! ```toml
//! [tracking]
//! poll_interval_ms = 3000
//! max_retries = 3
//! max_consecutive_poll_errors = 20
//! overall_timeout_seconds = 1800
//! notify_kind = "observed"     # or "requested"
//!
//! [notify]
//! backend = "log"              # or "sendmail"
//! recipient = "ops@example.com"
//!
//! [gateway]
//! binary = "gcloud"
//! project = "my-project"
//!
//! [store]
//! backend = "file"             # or "memory"
//! dir = "/var/lib/instance-ops"
//!
//! [log]
//! filter = "info"
//! format = "compact"           # or "json"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::gateway::GcloudConfig;
use crate::logging::LogFormat;
use crate::notify::SendmailConfig;
use crate::timeout::TimeoutConfig;
use crate::tracking::{NotifyKindPolicy, TrackerConfig};

use super::ConfigError;

/// Upper bound on `tracking.max_retries`
pub const MAX_RETRIES_LIMIT: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub tracking: TrackingSettings,
    pub notify: NotifySettings,
    pub gateway: GatewaySettings,
    pub store: StoreSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
    pub poll_interval_ms: u64,
    pub max_retries: u32,
    pub max_consecutive_poll_errors: u32,
    pub overall_timeout_seconds: u64,
    pub notify_kind: NotifyKindPolicy,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3000,
            max_retries: 3,
            max_consecutive_poll_errors: 20,
            overall_timeout_seconds: 1800,
            notify_kind: NotifyKindPolicy::Observed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyBackend {
    #[default]
    Log,
    Sendmail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifySettings {
    pub backend: NotifyBackend,
    pub recipient: String,
    pub sender: String,
    pub sendmail_path: String,
}

impl Default for NotifySettings {
    fn default() -> Self {
        let sendmail = SendmailConfig::default();
        Self {
            backend: NotifyBackend::Log,
            recipient: String::new(),
            sender: sendmail.sender,
            sendmail_path: sendmail.binary,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub binary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<PathBuf>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            binary: "gcloud".to_string(),
            project: None,
            credentials_file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    /// Job directory (default: `$HOME/.local/share/instance-ops/jobs`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl StoreSettings {
    pub fn resolved_dir(&self) -> PathBuf {
        match self.dir {
            Some(ref dir) => dir.clone(),
            None => std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".local/share/instance-ops/jobs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timeouts()
            .validate()
            .map_err(|e| ConfigError::Validation(format!("tracking: {}", e)))?;

        if self.tracking.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::Validation(format!(
                "tracking.max_retries must be at most {}, got {}",
                MAX_RETRIES_LIMIT, self.tracking.max_retries
            )));
        }

        if self.tracking.max_consecutive_poll_errors == 0 {
            return Err(ConfigError::Validation(
                "tracking.max_consecutive_poll_errors must be at least 1".to_string(),
            ));
        }

        if self.notify.backend == NotifyBackend::Sendmail && self.notify.recipient.trim().is_empty() {
            return Err(ConfigError::Validation(
                "notify.recipient is required when notify.backend = \"sendmail\"".to_string(),
            ));
        }

        if self.gateway.binary.trim().is_empty() {
            return Err(ConfigError::Validation("gateway.binary must not be empty".to_string()));
        }

        Ok(())
    }

    pub fn timeouts(&self) -> TimeoutConfig {
        TimeoutConfig {
            poll_interval: Duration::from_millis(self.tracking.poll_interval_ms),
            overall: Some(Duration::from_secs(self.tracking.overall_timeout_seconds)),
        }
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        let timeouts = self.timeouts();
        TrackerConfig {
            poll_interval: timeouts.poll_interval,
            max_retries: self.tracking.max_retries,
            max_consecutive_poll_errors: self.tracking.max_consecutive_poll_errors,
            overall_timeout: timeouts.overall,
            notify_kind: self.tracking.notify_kind,
        }
    }

    pub fn gcloud_config(&self) -> GcloudConfig {
        GcloudConfig {
            binary: self.gateway.binary.clone(),
            project: self.gateway.project.clone(),
            credentials_file: self.gateway.credentials_file.clone(),
        }
    }

    pub fn sendmail_config(&self) -> SendmailConfig {
        SendmailConfig {
            binary: self.notify.sendmail_path.clone(),
            sender: self.notify.sender.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());

        let tracker = settings.tracker_config();
        assert_eq!(tracker.poll_interval, Duration::from_secs(3));
        assert_eq!(tracker.max_retries, 3);
        assert_eq!(tracker.overall_timeout, Some(Duration::from_secs(1800)));
        assert_eq!(tracker.notify_kind, NotifyKindPolicy::Observed);
    }

    #[test]
    fn test_sendmail_requires_recipient() {
        let mut settings = Settings::default();
        settings.notify.backend = NotifyBackend::Sendmail;
        assert!(settings.validate().is_err());

        settings.notify.recipient = "ops@example.com".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_retry_limit() {
        let mut settings = Settings::default();
        settings.tracking.max_retries = MAX_RETRIES_LIMIT + 1;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("max_retries"));
    }

    #[test]
    fn test_poll_interval_bounds() {
        let mut settings = Settings::default();
        settings.tracking.poll_interval_ms = 0;
        assert!(settings.validate().is_err());

        settings.tracking.poll_interval_ms = 300_001;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_explicit_store_dir() {
        let settings = StoreSettings {
            backend: StoreBackend::File,
            dir: Some(PathBuf::from("/var/lib/instance-ops")),
        };
        assert_eq!(settings.resolved_dir(), PathBuf::from("/var/lib/instance-ops"));
    }
}
