//! Outbound alert notifications.
//!
//! Delivery is best-effort and at-most-once: the pipeline calls `Notifier::send`
//! only when the alert gate permits, logs a failure, and never retries.

use anyhow::Result;
use std::path::PathBuf;

/// Subject used for motion alerts.
pub const MOTION_ALERT_SUBJECT: &str = "Motion Detected!";
/// Body used for motion alerts.
pub const MOTION_ALERT_BODY: &str = "Motion was detected. See the attached image.";

/// A single alert with one JPEG attachment on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Alert {
    pub subject: String,
    pub body: String,
    pub attachment: PathBuf,
}

impl Alert {
    pub fn motion(attachment: PathBuf) -> Self {
        Self {
            subject: MOTION_ALERT_SUBJECT.to_string(),
            body: MOTION_ALERT_BODY.to_string(),
            attachment,
        }
    }
}

pub trait Notifier: Send {
    fn name(&self) -> &'static str;

    fn send(&mut self, alert: &Alert) -> Result<()>;
}

/// Writes alerts to the log only. Used when no relay is configured.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    fn send(&mut self, alert: &Alert) -> Result<()> {
        log::warn!(
            "alert (no relay configured): {} - {} [{}]",
            alert.subject,
            alert.body,
            alert.attachment.display()
        );
        Ok(())
    }
}

#[cfg(feature = "notify-relay")]
pub use relay::{RelayConfig, RelayNotifier};

#[cfg(feature = "notify-relay")]
mod relay {
    use super::{Alert, Notifier};
    use anyhow::{anyhow, Context, Result};
    use std::time::Duration;

    /// Authenticated HTTP mail relay.
    #[derive(Clone, Debug)]
    pub struct RelayConfig {
        pub url: String,
        pub token: String,
        pub from: String,
        pub to: String,
        pub timeout: Duration,
    }

    /// Posts the JPEG attachment to the relay; message metadata travels in headers.
    pub struct RelayNotifier {
        config: RelayConfig,
        agent: ureq::Agent,
    }

    impl RelayNotifier {
        pub fn new(config: RelayConfig) -> Result<Self> {
            let parsed = url::Url::parse(&config.url)
                .with_context(|| format!("invalid relay url {}", config.url))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(anyhow!("relay url must be http(s), got {}", parsed.scheme()));
            }
            if config.token.trim().is_empty() {
                return Err(anyhow!("relay token must not be empty"));
            }
            let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
            Ok(Self { config, agent })
        }
    }

    impl Notifier for RelayNotifier {
        fn name(&self) -> &'static str {
            "relay"
        }

        fn send(&mut self, alert: &Alert) -> Result<()> {
            let attachment = std::fs::read(&alert.attachment)
                .with_context(|| format!("read attachment {}", alert.attachment.display()))?;
            let filename = alert
                .attachment
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("snapshot.jpg");

            self.agent
                .post(&self.config.url)
                .set("Authorization", &format!("Bearer {}", self.config.token))
                .set("Content-Type", "image/jpeg")
                .set("X-Alert-From", &self.config.from)
                .set("X-Alert-To", &self.config.to)
                .set("X-Alert-Subject", &alert.subject)
                .set("X-Alert-Body", &alert.body)
                .set("X-Alert-Filename", filename)
                .send_bytes(&attachment)
                .map_err(|err| anyhow!("relay delivery failed: {}", err))?;

            log::info!("alert delivered via relay to {}", self.config.to);
            Ok(())
        }
    }
}
