//! Session token lifecycle: issuance, verification, rotation, revocation.
//!
//! The manager holds no locks; every state transition goes through the
//! store's conditional writes and the manager branches on their outcome.
//! Audit, geolocation, and notification are best-effort side channels that
//! never affect the protocol.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEvent, AuditLog, NoopAuditLog};
use crate::codec::TokenCodec;
use crate::geo::{Geolocator, NoopGeolocator};
use crate::notify::{NoopNotificationDispatch, NotificationDispatch, SuspiciousLoginAlert};
use crate::policy::SessionPolicy;
use crate::record::{ClientMeta, SessionToken, TokenMatch};
use crate::store::{StoreError, TokenStore};
use crate::suspicion::is_suspicious_login;

/// How many fresh tokens to try before giving up on a digest collision.
const CREATE_ATTEMPTS: usize = 3;

/// A freshly issued or rotated token: the raw value for cookie delivery
/// plus the stored record.
#[derive(Clone, Debug)]
pub struct IssuedToken {
    pub raw: String,
    pub record: SessionToken,
}

/// Per-request context for [`SessionManager::verify`].
#[derive(Clone, Debug, Default)]
pub struct VerifyContext {
    pub user_agent: Option<String>,
    pub client_ip: Option<IpAddr>,
    pub path: Option<String>,
    pub mark_seen: bool,
}

impl VerifyContext {
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

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_mark_seen(mut self, mark_seen: bool) -> Self {
        self.mark_seen = mark_seen;
        self
    }
}

/// A successfully resolved session.
#[derive(Clone, Debug)]
pub struct VerifiedSession {
    pub record: SessionToken,
    /// Which digest the client presented.
    pub matched: TokenMatch,
    /// True when the presented token was the previous one after the current
    /// token had already been confirmed seen: either a client that missed a
    /// rotation or a replayed capture.
    pub replay_suspected: bool,
}

/// Coordinates the token rotation and verification protocol.
pub struct SessionManager {
    store: Arc<dyn TokenStore>,
    codec: TokenCodec,
    policy: Arc<dyn SessionPolicy>,
    audit: Arc<dyn AuditLog>,
    geo: Arc<dyn Geolocator>,
    notifier: Arc<dyn NotificationDispatch>,
}

impl SessionManager {
    /// Build a manager with no-op side channels; attach real ones with the
    /// `with_*` methods.
    #[must_use]
    pub fn new(
        store: Arc<dyn TokenStore>,
        codec: TokenCodec,
        policy: Arc<dyn SessionPolicy>,
    ) -> Self {
        Self {
            store,
            codec,
            policy,
            audit: Arc::new(NoopAuditLog),
            geo: Arc::new(NoopGeolocator),
            notifier: Arc::new(NoopNotificationDispatch),
        }
    }

    #[must_use]
    pub fn with_audit_log(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    #[must_use]
    pub fn with_geolocator(mut self, geo: Arc<dyn Geolocator>) -> Self {
        self.geo = geo;
        self
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationDispatch>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Issue a brand new session token for a principal.
    ///
    /// The raw value is only returned for cookie delivery; the store keeps
    /// the digest. Retries on the negligible chance of a digest collision.
    ///
    /// # Errors
    /// Returns an error if the store is unavailable or no unique token
    /// could be generated.
    pub async fn issue(
        &self,
        user_id: Uuid,
        meta: &ClientMeta,
        path: Option<&str>,
    ) -> Result<IssuedToken> {
        let now = Utc::now();
        let meta = meta.clamped();

        for _ in 0..CREATE_ATTEMPTS {
            let raw = TokenCodec::generate_token()?;
            let digest = self.codec.digest(&raw);
            match self.store.create(user_id, &digest, &meta, now).await {
                Ok(record) => {
                    self.audit
                        .record(self.event(AuditAction::Issued, &record, Some(digest), path))
                        .await;
                    return Ok(IssuedToken { raw, record });
                }
                Err(StoreError::DuplicateDigest) => {}
                Err(err) => {
                    return Err(anyhow::Error::new(err).context("failed to create session token"));
                }
            }
        }

        bail!("failed to generate a unique session token")
    }

    /// Resolve a raw token to a live session, if any.
    ///
    /// A miss is `Ok(None)`, not an error. When the previous token is
    /// presented after the current one was confirmed seen, the session is
    /// still returned with `replay_suspected` set, and one more acceptance
    /// window is re-armed on the current token.
    ///
    /// # Errors
    /// Returns an error only when the store is unavailable.
    pub async fn verify(
        &self,
        raw_token: &str,
        ctx: &VerifyContext,
    ) -> Result<Option<VerifiedSession>> {
        let now = Utc::now();
        let digest = self.codec.digest(raw_token);
        let found = self
            .store
            .find_live(&digest, self.policy.max_session_age(), now)
            .await
            .context("failed to lookup session token")?;

        let Some(mut record) = found else {
            self.audit_verbose(self.miss_event(digest, ctx)).await;
            return Ok(None);
        };

        let Some(matched) = record.classify(&digest) else {
            // find_live only returns digest matches; classify cannot fail.
            return Ok(None);
        };

        let mut replay_suspected = false;
        if matched == TokenMatch::Previous && record.seen {
            replay_suspected = true;
            let rows = self
                .store
                .try_invalidate_previous(
                    record.id,
                    &digest,
                    self.policy.previous_token_min_age(),
                    now,
                )
                .await
                .context("failed to invalidate previous token")?;
            let action = if rows > 0 {
                AuditAction::PreviousSeen
            } else {
                AuditAction::PreviousSeenUnchanged
            };
            self.audit_verbose(self.lookup_event(action, &record, digest.clone(), ctx))
                .await;
        }

        if ctx.mark_seen && matched == TokenMatch::Current && !record.seen {
            let marked = self
                .store
                .try_mark_seen(record.id, &digest, now)
                .await
                .context("failed to mark session token seen")?;
            if marked {
                // Reflect the transition locally instead of re-reading,
                // which could observe a concurrent rotation.
                record.seen = true;
                record.seen_at = Some(now);
            }
            let action = if marked {
                AuditAction::MarkedSeen
            } else {
                AuditAction::MarkSeenLost
            };
            self.audit_verbose(self.lookup_event(action, &record, digest, ctx))
                .await;
        }

        Ok(Some(VerifiedSession {
            record,
            matched,
            replay_suspected,
        }))
    }

    /// Rotate a session token to a fresh value if the store-side condition
    /// holds.
    ///
    /// On success the caller's record is updated in place and the new raw
    /// token is returned for delivery. `Ok(None)` means another request won
    /// the race or the safeguard window is still open; the existing token
    /// stays valid.
    ///
    /// # Errors
    /// Returns an error if the store is unavailable or no unique token
    /// could be generated.
    pub async fn rotate(
        &self,
        record: &mut SessionToken,
        meta: &ClientMeta,
    ) -> Result<Option<String>> {
        let now = Utc::now();
        let meta = meta.clamped();
        let safeguard = self.policy.rotation_safeguard();

        for _ in 0..CREATE_ATTEMPTS {
            let raw = TokenCodec::generate_token()?;
            let digest = self.codec.digest(&raw);
            match self
                .store
                .try_rotate(record.id, &digest, &meta, now, safeguard)
                .await
            {
                Ok(true) => {
                    record.apply_rotation(digest.clone(), &meta, now);
                    self.audit
                        .record(self.event(AuditAction::Rotated, record, Some(digest), None))
                        .await;
                    return Ok(Some(raw));
                }
                Ok(false) => return Ok(None),
                Err(StoreError::DuplicateDigest) => {}
                Err(err) => {
                    return Err(anyhow::Error::new(err).context("failed to rotate session token"));
                }
            }
        }

        bail!("failed to generate a unique session token")
    }

    /// Whether the policy calls for rotating this record now.
    #[must_use]
    pub fn due_for_rotation(&self, record: &SessionToken) -> bool {
        record.due_for_rotation(self.policy.as_ref(), Utc::now())
    }

    /// Revoke one session (logout). Idempotent.
    ///
    /// # Errors
    /// Returns an error if the store is unavailable.
    pub async fn revoke(&self, record: &SessionToken) -> Result<bool> {
        let rows = self
            .store
            .revoke(record.id)
            .await
            .context("failed to revoke session token")?;
        if rows > 0 {
            self.audit
                .record(self.event(AuditAction::Revoked, record, None, None))
                .await;
        }
        Ok(rows > 0)
    }

    /// Revoke every session owned by a principal, e.g. after a password
    /// change. Returns how many were removed.
    ///
    /// # Errors
    /// Returns an error if the store is unavailable.
    pub async fn revoke_all(&self, user_id: Uuid) -> Result<u64> {
        let rows = self
            .store
            .revoke_all_for(user_id)
            .await
            .context("failed to revoke user sessions")?;
        if rows > 0 {
            let mut event = AuditEvent::new(AuditAction::BulkRevoked);
            event.user_id = Some(user_id);
            self.audit.record(event).await;
        }
        Ok(rows)
    }

    /// Delete sessions past retention: the maximum session age plus one
    /// rotation interval, so a token that was valid at the cutoff is never
    /// deleted out from under an in-flight request.
    ///
    /// # Errors
    /// Returns an error if the store is unavailable.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let retention = self.policy.max_session_age() + self.policy.rotation_interval();
        let rows = self
            .store
            .sweep_expired(retention, Utc::now())
            .await
            .context("failed to sweep expired sessions")?;
        Ok(rows)
    }

    /// Judge a fresh login and raise the suspicious-login side channel when
    /// it fires. Returns whether the login was flagged.
    ///
    /// Collaborator failures (history read, geolocation, notification) are
    /// logged and swallowed; they never fail the login.
    pub async fn confirm_login(
        &self,
        user_id: Uuid,
        privileged: bool,
        meta: &ClientMeta,
    ) -> bool {
        let Some(client_ip) = meta.client_ip else {
            return false;
        };
        let suspicious = is_suspicious_login(
            self.audit.as_ref(),
            self.geo.as_ref(),
            user_id,
            privileged,
            client_ip,
        )
        .await;
        if !suspicious {
            return false;
        }

        let mut event = AuditEvent::new(AuditAction::SuspiciousLogin);
        event.user_id = Some(user_id);
        event.client_ip = Some(client_ip);
        event.user_agent.clone_from(&meta.user_agent);
        self.audit.record(event).await;

        let alert = SuspiciousLoginAlert {
            user_id,
            client_ip,
            user_agent: meta.user_agent.clone(),
        };
        if let Err(err) = self.notifier.enqueue(alert).await {
            error!("Failed to enqueue suspicious login alert: {err}");
        }
        true
    }

    fn event(
        &self,
        action: AuditAction,
        record: &SessionToken,
        digest: Option<Vec<u8>>,
        path: Option<&str>,
    ) -> AuditEvent {
        let mut event = AuditEvent::new(action);
        event.record_id = Some(record.id);
        event.user_id = Some(record.user_id);
        event.digest = digest;
        event.user_agent.clone_from(&record.user_agent);
        event.client_ip = record.client_ip;
        event.path = path.map(str::to_string);
        event
    }

    fn lookup_event(
        &self,
        action: AuditAction,
        record: &SessionToken,
        digest: Vec<u8>,
        ctx: &VerifyContext,
    ) -> AuditEvent {
        let mut event = AuditEvent::new(action);
        event.record_id = Some(record.id);
        event.user_id = Some(record.user_id);
        event.digest = Some(digest);
        event.user_agent.clone_from(&ctx.user_agent);
        event.client_ip = ctx.client_ip;
        event.path.clone_from(&ctx.path);
        event
    }

    fn miss_event(&self, digest: Vec<u8>, ctx: &VerifyContext) -> AuditEvent {
        let mut event = AuditEvent::new(AuditAction::Missed);
        event.digest = Some(digest);
        event.user_agent.clone_from(&ctx.user_agent);
        event.client_ip = ctx.client_ip;
        event.path.clone_from(&ctx.path);
        event
    }

    async fn audit_verbose(&self, event: AuditEvent) {
        if self.policy.verbose_audit_enabled() {
            self.audit.record(event).await;
        }
    }
}
