//! Best-effort chat webhook notifications.

use std::time::Duration;

use tracing::{debug, warn};

/// A lifecycle transition worth telling players about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Started { server: String, address: String },
    AddressChanged { server: String, address: String },
    IdleShutdown { server: String, idle_minutes: u64 },
}

impl Notice {
    pub fn kind(&self) -> &'static str {
        match self {
            Notice::Started { .. } => "started",
            Notice::AddressChanged { .. } => "address_changed",
            Notice::IdleShutdown { .. } => "idle_shutdown",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Notice::Started { server, address } => {
                format!("{server} is up at {address}")
            }
            Notice::AddressChanged { server, address } => {
                format!("{server} moved to {address}")
            }
            Notice::IdleShutdown {
                server,
                idle_minutes,
            } => format!("{server} shutting down after {idle_minutes} idle minutes"),
        }
    }
}

/// Posts `{"content": ...}` to a chat webhook. Without a URL every
/// notification is a no-op.
#[derive(Debug, Clone)]
pub struct Notifier {
    webhook: Option<String>,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(webhook: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            webhook: webhook.filter(|url| !url.trim().is_empty()),
            client,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, Duration::from_secs(5))
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook.is_some()
    }

    /// Deliver a notice. Returns whether the webhook accepted it; failures
    /// are logged and otherwise ignored.
    pub async fn notify(&self, notice: &Notice) -> bool {
        let Some(url) = &self.webhook else {
            return false;
        };
        let body = serde_json::json!({ "content": notice.message() });

        match self.client.post(url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(kind = notice.kind(), "webhook delivered");
                true
            }
            Ok(resp) => {
                warn!(kind = notice.kind(), status = resp.status().as_u16(), "webhook rejected");
                false
            }
            Err(e) => {
                warn!(kind = notice.kind(), error = %e, "webhook failed");
                false
            }
        }
    }
}
