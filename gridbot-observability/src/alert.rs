//! `AlertSink` (spec.md §4.7.1): the seam for the scariest failure mode —
//! exhausting STOPPING retries, i.e. "we cannot shut a bot down". The
//! default implementation only logs at `error`; a real deployment plugs
//! PagerDuty/Telegram/Slack in behind the same trait.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub code: &'static str,
    pub message: String,
    pub bot_id: Option<String>,
}

pub trait AlertSink: Send + Sync {
    fn send(&self, alert: Alert, at: DateTime<Utc>);
}

/// Logs the alert at `error` (critical) or `warn` (warning) and nothing
/// else. Used as the worker's default sink until a real one is configured.
#[derive(Debug, Default)]
pub struct LoggingAlertSink;

impl AlertSink for LoggingAlertSink {
    fn send(&self, alert: Alert, at: DateTime<Utc>) {
        match alert.severity {
            AlertSeverity::Critical => tracing::error!(
                code = alert.code,
                bot_id = alert.bot_id.as_deref().unwrap_or("-"),
                at = %at,
                "{}",
                alert.message
            ),
            AlertSeverity::Warning => tracing::warn!(
                code = alert.code,
                bot_id = alert.bot_id.as_deref().unwrap_or("-"),
                at = %at,
                "{}",
                alert.message
            ),
        }
    }
}

/// Convenience constructor for the STOPPING-exhaustion alert named in
/// spec.md §4.7.1.
pub fn stopping_failed_alert(bot_id: &str, code: &str, msg: &str) -> Alert {
    Alert {
        severity: AlertSeverity::Critical,
        code: "STOPPING_FAILED",
        message: format!("STOPPING_FAILED: {code}: {msg}"),
        bot_id: Some(bot_id.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        received: Mutex<Vec<Alert>>,
    }

    impl AlertSink for RecordingSink {
        fn send(&self, alert: Alert, _at: DateTime<Utc>) {
            self.received.lock().unwrap().push(alert);
        }
    }

    #[test]
    fn stopping_failed_alert_is_critical_and_carries_bot_id() {
        let sink = RecordingSink::default();
        let alert = stopping_failed_alert("bot-1", "EXCHANGE_UNAVAILABLE", "timed out");
        assert_eq!(alert.severity, AlertSeverity::Critical);
        sink.send(alert, Utc::now());
        let received = sink.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].bot_id.as_deref(), Some("bot-1"));
        assert!(received[0].message.contains("EXCHANGE_UNAVAILABLE"));
    }

    #[test]
    fn logging_sink_does_not_panic() {
        let sink = LoggingAlertSink;
        sink.send(stopping_failed_alert("bot-2", "TIMEOUT", "retry exhausted"), Utc::now());
    }
}
