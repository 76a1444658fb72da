//! Session policy thresholds supplied by the surrounding deployment.
//!
//! The manager reads every value at the moment of use, so implementations
//! backed by a live settings store take effect without a restart.

use std::time::Duration;

const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(10 * 60);
const DEFAULT_URGENT_ROTATION_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_MAX_SESSION_AGE_HOURS: u64 = 1440;
const DEFAULT_ROTATION_SAFEGUARD: Duration = Duration::from_secs(30);
const DEFAULT_PREVIOUS_TOKEN_MIN_AGE: Duration = Duration::from_secs(60);

/// Tunable thresholds governing token rotation and verification.
pub trait SessionPolicy: Send + Sync {
    /// How often a seen token is rotated.
    fn rotation_interval(&self) -> Duration;

    /// How often an unseen token is rotated; shorter than
    /// [`rotation_interval`](Self::rotation_interval) so a token whose
    /// delivery failed is replaced quickly.
    fn urgent_rotation_interval(&self) -> Duration;

    /// Maximum age of a session counted from its last rotation.
    fn max_session_age(&self) -> Duration;

    /// Minimum time since the last rotation before an unseen token may
    /// rotate again. Absorbs bursts of near-simultaneous rotation attempts.
    fn rotation_safeguard(&self) -> Duration;

    /// Minimum rotation age before a replayed previous token may clear the
    /// seen flag on the current one.
    fn previous_token_min_age(&self) -> Duration;

    /// Whether chatty lookup-path audit events are recorded.
    fn verbose_audit_enabled(&self) -> bool;
}

/// Fixed policy values, the common choice for single-binary deployments.
#[derive(Clone, Debug)]
pub struct StaticPolicy {
    rotation_interval: Duration,
    urgent_rotation_interval: Duration,
    max_session_age: Duration,
    rotation_safeguard: Duration,
    previous_token_min_age: Duration,
    verbose_audit_enabled: bool,
}

impl StaticPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rotation_interval: DEFAULT_ROTATION_INTERVAL,
            urgent_rotation_interval: DEFAULT_URGENT_ROTATION_INTERVAL,
            max_session_age: Duration::from_secs(DEFAULT_MAX_SESSION_AGE_HOURS * 60 * 60),
            rotation_safeguard: DEFAULT_ROTATION_SAFEGUARD,
            previous_token_min_age: DEFAULT_PREVIOUS_TOKEN_MIN_AGE,
            verbose_audit_enabled: false,
        }
    }

    #[must_use]
    pub fn with_rotation_interval(mut self, interval: Duration) -> Self {
        self.rotation_interval = interval;
        self
    }

    #[must_use]
    pub fn with_urgent_rotation_interval(mut self, interval: Duration) -> Self {
        self.urgent_rotation_interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_session_age_hours(mut self, hours: u64) -> Self {
        self.max_session_age = Duration::from_secs(hours * 60 * 60);
        self
    }

    #[must_use]
    pub fn with_rotation_safeguard(mut self, window: Duration) -> Self {
        self.rotation_safeguard = window;
        self
    }

    #[must_use]
    pub fn with_previous_token_min_age(mut self, min_age: Duration) -> Self {
        self.previous_token_min_age = min_age;
        self
    }

    #[must_use]
    pub fn with_verbose_audit(mut self, enabled: bool) -> Self {
        self.verbose_audit_enabled = enabled;
        self
    }
}

impl Default for StaticPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionPolicy for StaticPolicy {
    fn rotation_interval(&self) -> Duration {
        self.rotation_interval
    }

    fn urgent_rotation_interval(&self) -> Duration {
        self.urgent_rotation_interval
    }

    fn max_session_age(&self) -> Duration {
        self.max_session_age
    }

    fn rotation_safeguard(&self) -> Duration {
        self.rotation_safeguard
    }

    fn previous_token_min_age(&self) -> Duration {
        self.previous_token_min_age
    }

    fn verbose_audit_enabled(&self) -> bool {
        self.verbose_audit_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_policy_defaults() {
        let policy = StaticPolicy::new();
        assert_eq!(policy.rotation_interval(), Duration::from_secs(600));
        assert_eq!(policy.urgent_rotation_interval(), Duration::from_secs(60));
        assert_eq!(
            policy.max_session_age(),
            Duration::from_secs(1440 * 60 * 60)
        );
        assert_eq!(policy.rotation_safeguard(), Duration::from_secs(30));
        assert_eq!(policy.previous_token_min_age(), Duration::from_secs(60));
        assert!(!policy.verbose_audit_enabled());
    }

    #[test]
    fn static_policy_overrides() {
        let policy = StaticPolicy::new()
            .with_rotation_interval(Duration::from_secs(120))
            .with_urgent_rotation_interval(Duration::from_secs(10))
            .with_max_session_age_hours(2)
            .with_rotation_safeguard(Duration::from_secs(5))
            .with_previous_token_min_age(Duration::ZERO)
            .with_verbose_audit(true);
        assert_eq!(policy.rotation_interval(), Duration::from_secs(120));
        assert_eq!(policy.urgent_rotation_interval(), Duration::from_secs(10));
        assert_eq!(policy.max_session_age(), Duration::from_secs(7200));
        assert_eq!(policy.rotation_safeguard(), Duration::from_secs(5));
        assert_eq!(policy.previous_token_min_age(), Duration::ZERO);
        assert!(policy.verbose_audit_enabled());
    }
}
