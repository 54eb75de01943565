//! Notification sink for lifecycle progress
//!
//! Each lifecycle operation instance gets one `CorrelationId`; the pending
//! and resolved notifications share it so a sink can update in place.

use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Pending,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// `accept-7#12`, `withdraw#3`
    pub fn new(tag: &str, target: Option<u64>, seq: u64) -> Self {
        match target {
            Some(id) => Self(format!("{}-{}#{}", tag, id, seq)),
            None => Self(format!("{}#{}", tag, seq)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub severity: Severity,
    pub message: String,
    pub detail: Option<String>,
    pub correlation_id: CorrelationId,
}

/// One-way "notify user" channel.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, n: Notification) {
        let detail = n.detail.as_deref().unwrap_or("");
        match n.severity {
            Severity::Pending => tracing::info!(id = %n.correlation_id, detail, "{}", n.message),
            Severity::Success => tracing::info!(id = %n.correlation_id, detail, "{}", n.message),
            Severity::Warning => tracing::warn!(id = %n.correlation_id, detail, "{}", n.message),
            Severity::Error => tracing::error!(id = %n.correlation_id, detail, "{}", n.message),
        }
    }
}

/// Forwards notifications to a tokio channel (UI layers, tests).
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        // Receiver gone means nobody is listening anymore.
        let _ = self.tx.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_id_format() {
        assert_eq!(CorrelationId::new("accept", Some(7), 12).as_str(), "accept-7#12");
        assert_eq!(CorrelationId::new("withdraw", None, 3).as_str(), "withdraw#3");
    }

    #[tokio::test]
    async fn test_channel_notifier_forwards() {
        let (notifier, mut rx) = ChannelNotifier::new();
        notifier.notify(Notification {
            severity: Severity::Pending,
            message: "Accepting job...".into(),
            detail: None,
            correlation_id: CorrelationId::new("accept", Some(1), 1),
        });
        let got = rx.recv().await.unwrap();
        assert_eq!(got.severity, Severity::Pending);
        assert_eq!(got.correlation_id.as_str(), "accept-1#1");
    }
}
