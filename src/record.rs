//! The session token record and its classification helpers.

use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::time::Duration;
use uuid::Uuid;

use crate::policy::SessionPolicy;

/// Longest user agent string kept on a record; anything beyond is noise.
pub(crate) const MAX_USER_AGENT_LEN: usize = 400;

/// Advisory client details captured at issue and rotation time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientMeta {
    pub user_agent: Option<String>,
    pub client_ip: Option<IpAddr>,
}

impl ClientMeta {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    #[must_use]
    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    /// Copy with the user agent clamped to the stored maximum.
    pub(crate) fn clamped(&self) -> Self {
        Self {
            user_agent: self.user_agent.as_deref().map(clamp_user_agent),
            client_ip: self.client_ip,
        }
    }
}

fn clamp_user_agent(user_agent: &str) -> String {
    let mut end = user_agent.len().min(MAX_USER_AGENT_LEN);
    while !user_agent.is_char_boundary(end) {
        end -= 1;
    }
    user_agent[..end].to_string()
}

/// Which of a record's digests an incoming token matched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenMatch {
    /// The token the client is expected to present.
    Current,
    /// The immediately prior token, still honored for in-flight requests.
    Previous,
}

/// One persistent login session for one browser or device.
///
/// Mutated only by rotation and seen-marking; both go through the store's
/// conditional writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub current_digest: Vec<u8>,
    pub previous_digest: Vec<u8>,
    pub seen: bool,
    pub seen_at: Option<DateTime<Utc>>,
    pub rotated_at: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub client_ip: Option<IpAddr>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionToken {
    /// Classify a presented digest against this record.
    #[must_use]
    pub fn classify(&self, digest: &[u8]) -> Option<TokenMatch> {
        if self.current_digest == digest {
            Some(TokenMatch::Current)
        } else if self.previous_digest == digest {
            Some(TokenMatch::Previous)
        } else {
            None
        }
    }

    /// Whether the rotation policy calls for a fresh token.
    ///
    /// Seen tokens rotate on the regular interval; unseen ones rotate on the
    /// urgent interval so a token lost in delivery is replaced quickly.
    #[must_use]
    pub fn due_for_rotation(&self, policy: &dyn SessionPolicy, now: DateTime<Utc>) -> bool {
        let window = if self.seen {
            policy.rotation_interval()
        } else {
            policy.urgent_rotation_interval()
        };
        self.rotated_at < cutoff_before(now, window)
    }

    /// Whether the record is past the maximum session age.
    #[must_use]
    pub fn expired(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.rotated_at <= cutoff_before(now, max_age)
    }

    /// Apply a successful rotation to the in-memory view, mirroring the
    /// store-side transition without a re-read.
    pub(crate) fn apply_rotation(
        &mut self,
        new_digest: Vec<u8>,
        meta: &ClientMeta,
        now: DateTime<Utc>,
    ) {
        if self.seen {
            self.previous_digest = std::mem::take(&mut self.current_digest);
        }
        self.current_digest = new_digest;
        self.seen = false;
        self.seen_at = None;
        self.rotated_at = now;
        self.updated_at = now;
        if meta.user_agent.is_some() {
            self.user_agent.clone_from(&meta.user_agent);
        }
        if meta.client_ip.is_some() {
            self.client_ip = meta.client_ip;
        }
    }
}

/// The instant `window` before `now`, saturating instead of overflowing.
pub(crate) fn cutoff_before(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::StaticPolicy;

    fn record(seen: bool, rotated_at: DateTime<Utc>) -> SessionToken {
        SessionToken {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            current_digest: vec![1; 32],
            previous_digest: vec![2; 32],
            seen,
            seen_at: None,
            rotated_at,
            user_agent: None,
            client_ip: None,
            created_at: rotated_at,
            updated_at: rotated_at,
        }
    }

    #[test]
    fn classify_matches_each_digest() {
        let token = record(false, Utc::now());
        assert_eq!(token.classify(&[1; 32]), Some(TokenMatch::Current));
        assert_eq!(token.classify(&[2; 32]), Some(TokenMatch::Previous));
        assert_eq!(token.classify(&[3; 32]), None);
    }

    #[test]
    fn due_for_rotation_uses_urgent_window_when_unseen() {
        let policy = StaticPolicy::new()
            .with_rotation_interval(Duration::from_secs(600))
            .with_urgent_rotation_interval(Duration::from_secs(60));
        let now = Utc::now();
        let aged = now - chrono::Duration::seconds(120);

        assert!(record(false, aged).due_for_rotation(&policy, now));
        assert!(!record(true, aged).due_for_rotation(&policy, now));
        assert!(!record(false, now).due_for_rotation(&policy, now));
    }

    #[test]
    fn expired_compares_rotation_age() {
        let now = Utc::now();
        let max_age = Duration::from_secs(3600);
        assert!(record(true, now - chrono::Duration::seconds(3601)).expired(max_age, now));
        assert!(!record(true, now - chrono::Duration::seconds(3599)).expired(max_age, now));
    }

    #[test]
    fn apply_rotation_shifts_current_into_previous_when_seen() {
        let now = Utc::now();
        let mut token = record(true, now - chrono::Duration::seconds(60));
        token.seen_at = Some(now);

        let meta = ClientMeta::new().with_user_agent("agent");
        token.apply_rotation(vec![9; 32], &meta, now);

        assert_eq!(token.previous_digest, vec![1; 32]);
        assert_eq!(token.current_digest, vec![9; 32]);
        assert!(!token.seen);
        assert_eq!(token.seen_at, None);
        assert_eq!(token.rotated_at, now);
        assert_eq!(token.user_agent.as_deref(), Some("agent"));
    }

    #[test]
    fn apply_rotation_keeps_previous_when_unseen() {
        let now = Utc::now();
        let mut token = record(false, now - chrono::Duration::seconds(60));
        token.apply_rotation(vec![9; 32], &ClientMeta::new(), now);

        assert_eq!(token.previous_digest, vec![2; 32]);
        assert_eq!(token.current_digest, vec![9; 32]);
    }

    #[test]
    fn clamped_truncates_long_user_agents() {
        let meta = ClientMeta::new().with_user_agent("a".repeat(1000));
        let clamped = meta.clamped();
        assert_eq!(
            clamped.user_agent.map(|ua| ua.len()),
            Some(MAX_USER_AGENT_LEN)
        );
    }

    #[test]
    fn clamped_respects_char_boundaries() {
        let meta = ClientMeta::new().with_user_agent("é".repeat(300));
        let clamped = meta.clamped().user_agent.unwrap();
        assert!(clamped.len() <= MAX_USER_AGENT_LEN);
        assert!(clamped.chars().all(|c| c == 'é'));
    }

    #[test]
    fn cutoff_before_saturates_on_overflow() {
        let cutoff = cutoff_before(Utc::now(), Duration::from_secs(u64::MAX));
        assert_eq!(cutoff, DateTime::<Utc>::MIN_UTC);
    }
}
