//! Best-effort notification dispatch for suspicious logins.
//!
//! Enqueue failures must never fail the login; the manager logs and moves
//! on.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::net::IpAddr;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Payload handed to the surrounding job system when a privileged login
/// looks suspicious.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SuspiciousLoginAlert {
    pub user_id: Uuid,
    pub client_ip: IpAddr,
    pub user_agent: Option<String>,
}

impl SuspiciousLoginAlert {
    /// Job kind under which implementations should enqueue the alert.
    pub const KIND: &'static str = "suspicious_login";
}

/// Asynchronous notification sink.
#[async_trait]
pub trait NotificationDispatch: Send + Sync {
    /// Hand the alert to the surrounding job system.
    ///
    /// # Errors
    /// Returns an error if the alert could not be enqueued; callers log and
    /// continue.
    async fn enqueue(&self, alert: SuspiciousLoginAlert) -> Result<()>;
}

/// Drops every alert; for embedders without a job system.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotificationDispatch;

#[async_trait]
impl NotificationDispatch for NoopNotificationDispatch {
    async fn enqueue(&self, _alert: SuspiciousLoginAlert) -> Result<()> {
        Ok(())
    }
}

/// Collects alerts in memory; used in tests.
#[derive(Debug, Default)]
pub struct MemoryNotificationDispatch {
    alerts: Mutex<Vec<SuspiciousLoginAlert>>,
}

impl MemoryNotificationDispatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every alert enqueued so far.
    pub async fn snapshot(&self) -> Vec<SuspiciousLoginAlert> {
        self.alerts.lock().await.clone()
    }
}

#[async_trait]
impl NotificationDispatch for MemoryNotificationDispatch {
    async fn enqueue(&self, alert: SuspiciousLoginAlert) -> Result<()> {
        self.alerts.lock().await.push(alert);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_dispatch_collects_alerts() {
        let dispatch = MemoryNotificationDispatch::new();
        let alert = SuspiciousLoginAlert {
            user_id: Uuid::new_v4(),
            client_ip: "1.2.3.4".parse().unwrap(),
            user_agent: Some("agent".to_string()),
        };
        dispatch.enqueue(alert.clone()).await.unwrap();
        assert_eq!(dispatch.snapshot().await, vec![alert]);
    }

    #[test]
    fn alert_serializes_for_queue_payloads() {
        let alert = SuspiciousLoginAlert {
            user_id: Uuid::nil(),
            client_ip: "1.2.3.4".parse().unwrap(),
            user_agent: None,
        };
        let value = serde_json::to_value(&alert).unwrap();
        assert_eq!(value["client_ip"], "1.2.3.4");
        assert_eq!(
            value["user_id"],
            "00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(SuspiciousLoginAlert::KIND, "suspicious_login");
    }
}
