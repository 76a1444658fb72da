//! Suspicious-login heuristic for privileged accounts.
//!
//! Compares the coarse region of a new login against the regions seen in
//! the principal's audit history. Country-level granularity is deliberate:
//! finer would flag routine network changes, coarser would miss nothing at
//! all.

use std::net::IpAddr;
use tracing::warn;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::geo::Geolocator;

/// Whether a login for `user_id` from `ip` looks suspicious.
///
/// Only privileged accounts are judged. A principal with no prior IP
/// history is never suspicious, and an unknown region for the new IP means
/// the heuristic cannot judge, so it stays quiet. Collaborator failures
/// degrade to "not suspicious".
pub async fn is_suspicious_login(
    audit: &dyn AuditLog,
    geo: &dyn Geolocator,
    user_id: Uuid,
    privileged: bool,
    ip: IpAddr,
) -> bool {
    if !privileged {
        return false;
    }

    let history = match audit.distinct_client_ips(user_id, Some(ip)).await {
        Ok(history) => history,
        Err(err) => {
            warn!("Failed to read login history for {user_id}: {err}");
            return false;
        }
    };
    if history.is_empty() {
        return false;
    }

    let Some(region) = geo.locate(ip).await else {
        return false;
    };

    for known_ip in history {
        if geo.locate(known_ip).await.as_deref() == Some(region.as_str()) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditAction, AuditEvent, MemoryAuditLog, NoopAuditLog};
    use crate::geo::{NoopGeolocator, StaticGeolocator};

    const NEW_IP: &str = "203.0.113.7";
    const HOME_IP: &str = "192.0.2.1";
    const OFFICE_IP: &str = "192.0.2.2";

    async fn history_of(ips: &[&str]) -> (Uuid, MemoryAuditLog) {
        let user_id = Uuid::new_v4();
        let log = MemoryAuditLog::new();
        for ip in ips {
            let mut event = AuditEvent::new(AuditAction::Issued);
            event.user_id = Some(user_id);
            event.client_ip = Some(ip.parse().unwrap());
            log.record(event).await;
        }
        (user_id, log)
    }

    fn geo() -> StaticGeolocator {
        StaticGeolocator::new()
            .with_region(HOME_IP.parse().unwrap(), "ES")
            .with_region(OFFICE_IP.parse().unwrap(), "ES")
            .with_region(NEW_IP.parse().unwrap(), "AU")
    }

    #[tokio::test]
    async fn unprivileged_accounts_are_never_suspicious() {
        let (user_id, log) = history_of(&[HOME_IP]).await;
        let suspicious =
            is_suspicious_login(&log, &geo(), user_id, false, NEW_IP.parse().unwrap()).await;
        assert!(!suspicious);
    }

    #[tokio::test]
    async fn empty_history_is_not_suspicious() {
        let suspicious = is_suspicious_login(
            &NoopAuditLog,
            &geo(),
            Uuid::new_v4(),
            true,
            NEW_IP.parse().unwrap(),
        )
        .await;
        assert!(!suspicious);
    }

    #[tokio::test]
    async fn history_of_only_the_current_ip_is_not_suspicious() {
        let (user_id, log) = history_of(&[NEW_IP]).await;
        let suspicious =
            is_suspicious_login(&log, &geo(), user_id, true, NEW_IP.parse().unwrap()).await;
        assert!(!suspicious);
    }

    #[tokio::test]
    async fn matching_region_is_not_suspicious() {
        let (user_id, log) = history_of(&[HOME_IP, OFFICE_IP]).await;
        let suspicious =
            is_suspicious_login(&log, &geo(), user_id, true, OFFICE_IP.parse().unwrap()).await;
        assert!(!suspicious);
    }

    #[tokio::test]
    async fn disjoint_region_with_history_is_suspicious() {
        let (user_id, log) = history_of(&[HOME_IP, OFFICE_IP]).await;
        let suspicious =
            is_suspicious_login(&log, &geo(), user_id, true, NEW_IP.parse().unwrap()).await;
        assert!(suspicious);
    }

    #[tokio::test]
    async fn unknown_region_for_new_ip_cannot_judge() {
        let (user_id, log) = history_of(&[HOME_IP]).await;
        let suspicious =
            is_suspicious_login(&log, &NoopGeolocator, user_id, true, NEW_IP.parse().unwrap())
                .await;
        assert!(!suspicious);
    }

    #[tokio::test]
    async fn unknown_history_regions_match_nothing() {
        // History exists but none of it resolves; the new region matches no
        // known region, so the login is flagged.
        let (user_id, log) = history_of(&[HOME_IP]).await;
        let geo = StaticGeolocator::new().with_region(NEW_IP.parse().unwrap(), "AU");
        let suspicious =
            is_suspicious_login(&log, &geo, user_id, true, NEW_IP.parse().unwrap()).await;
        assert!(suspicious);
    }
}
