//! Audit trail collaborator for token lifecycle events.
//!
//! Appends are fire-and-forget; the manager never branches on the result of
//! `record`. The trail also feeds the suspicious-login heuristic with the
//! principal's historical client IPs.

use anyhow::Result;
use async_trait::async_trait;
use std::net::IpAddr;
use tokio::sync::Mutex;
use uuid::Uuid;

/// What happened to a token record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditAction {
    Issued,
    Rotated,
    Revoked,
    BulkRevoked,
    Missed,
    MarkedSeen,
    MarkSeenLost,
    PreviousSeen,
    PreviousSeenUnchanged,
    SuspiciousLogin,
}

impl AuditAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Issued => "issued",
            Self::Rotated => "rotated",
            Self::Revoked => "revoked",
            Self::BulkRevoked => "bulk_revoked",
            Self::Missed => "missed",
            Self::MarkedSeen => "marked_seen",
            Self::MarkSeenLost => "mark_seen_lost",
            Self::PreviousSeen => "previous_seen",
            Self::PreviousSeenUnchanged => "previous_seen_unchanged",
            Self::SuspiciousLogin => "suspicious_login",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit trail entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub record_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub digest: Option<Vec<u8>>,
    pub user_agent: Option<String>,
    pub client_ip: Option<IpAddr>,
    pub path: Option<String>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            record_id: None,
            user_id: None,
            digest: None,
            user_agent: None,
            client_ip: None,
            path: None,
        }
    }
}

/// Append-only audit trail.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append an event. Failures are the implementation's problem; callers
    /// never see them.
    async fn record(&self, event: AuditEvent);

    /// Distinct client IPs previously recorded for a principal, excluding
    /// `exclude` when given.
    ///
    /// # Errors
    /// Returns an error if the underlying trail cannot be read.
    async fn distinct_client_ips(
        &self,
        user_id: Uuid,
        exclude: Option<IpAddr>,
    ) -> Result<Vec<IpAddr>>;
}

/// Discards every event; for embedders that keep no trail.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAuditLog;

#[async_trait]
impl AuditLog for NoopAuditLog {
    async fn record(&self, _event: AuditEvent) {}

    async fn distinct_client_ips(
        &self,
        _user_id: Uuid,
        _exclude: Option<IpAddr>,
    ) -> Result<Vec<IpAddr>> {
        Ok(Vec::new())
    }
}

/// In-process audit trail kept in a plain vector.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every event recorded so far.
    pub async fn snapshot(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn record(&self, event: AuditEvent) {
        self.events.lock().await.push(event);
    }

    async fn distinct_client_ips(
        &self,
        user_id: Uuid,
        exclude: Option<IpAddr>,
    ) -> Result<Vec<IpAddr>> {
        let events = self.events.lock().await;
        let mut ips = Vec::new();
        for event in events.iter() {
            let Some(ip) = event.client_ip else {
                continue;
            };
            if event.user_id != Some(user_id) || Some(ip) == exclude || ips.contains(&ip) {
                continue;
            }
            ips.push(ip);
        }
        Ok(ips)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login_event(user_id: Uuid, ip: IpAddr) -> AuditEvent {
        let mut event = AuditEvent::new(AuditAction::Issued);
        event.user_id = Some(user_id);
        event.client_ip = Some(ip);
        event
    }

    #[test]
    fn action_names_are_stable() {
        assert_eq!(AuditAction::Issued.as_str(), "issued");
        assert_eq!(AuditAction::PreviousSeenUnchanged.to_string(), "previous_seen_unchanged");
        assert_eq!(AuditAction::SuspiciousLogin.as_str(), "suspicious_login");
    }

    #[tokio::test]
    async fn memory_log_records_and_snapshots() {
        let log = MemoryAuditLog::new();
        let user_id = Uuid::new_v4();
        log.record(login_event(user_id, "10.0.0.1".parse().unwrap()))
            .await;

        let events = log.snapshot().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, AuditAction::Issued);
        assert_eq!(events[0].user_id, Some(user_id));
    }

    #[tokio::test]
    async fn distinct_ips_dedupes_and_excludes() {
        let log = MemoryAuditLog::new();
        let user_id = Uuid::new_v4();
        let other = Uuid::new_v4();
        for ip in ["10.0.0.1", "10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            log.record(login_event(user_id, ip.parse().unwrap())).await;
        }
        log.record(login_event(other, "10.9.9.9".parse().unwrap()))
            .await;

        let ips = log
            .distinct_client_ips(user_id, Some("10.0.0.3".parse().unwrap()))
            .await
            .unwrap();
        assert_eq!(
            ips,
            vec![
                "10.0.0.1".parse::<IpAddr>().unwrap(),
                "10.0.0.2".parse::<IpAddr>().unwrap(),
            ]
        );
    }

    #[tokio::test]
    async fn noop_log_returns_no_history() {
        let log = NoopAuditLog;
        log.record(AuditEvent::new(AuditAction::Missed)).await;
        let ips = log.distinct_client_ips(Uuid::new_v4(), None).await.unwrap();
        assert!(ips.is_empty());
    }
}
