//! Persistence and atomic updates for session token records.
//!
//! Every mutation is a single conditional operation: the precondition and
//! the write happen indivisibly, so two concurrent callers attempting the
//! same transition cannot both win. Callers branch on the boolean or
//! row-count result instead of assuming success.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::record::{ClientMeta, SessionToken};

mod memory;
mod postgres;

pub use memory::MemoryTokenStore;
pub use postgres::PgTokenStore;

/// Store-level failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The digest is already live on another record; retry with a fresh
    /// token.
    #[error("digest already in use")]
    DuplicateDigest,
    /// The backend failed; fatal for the current request.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Atomic persistence contract for session token records.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Insert a fresh record with `current_digest = previous_digest =
    /// digest`, unseen, rotated at `now`.
    async fn create(
        &self,
        user_id: Uuid,
        digest: &[u8],
        meta: &ClientMeta,
        now: DateTime<Utc>,
    ) -> Result<SessionToken, StoreError>;

    /// Find the record whose current or previous digest matches, rotated
    /// within `max_age` of `now`.
    async fn find_live(
        &self,
        digest: &[u8],
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionToken>, StoreError>;

    /// Point lookup by record id.
    async fn get(&self, id: Uuid) -> Result<Option<SessionToken>, StoreError>;

    /// Swap in a new current digest, but only if the token has been seen or
    /// the last rotation is older than `safeguard`. Returns whether exactly
    /// one row changed; losing the race is a normal outcome.
    async fn try_rotate(
        &self,
        id: Uuid,
        new_digest: &[u8],
        meta: &ClientMeta,
        now: DateTime<Utc>,
        safeguard: Duration,
    ) -> Result<bool, StoreError>;

    /// Mark the current token seen, but only if `digest` is still the
    /// current digest and the record is unseen.
    async fn try_mark_seen(
        &self,
        id: Uuid,
        digest: &[u8],
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Clear the seen flag in response to a replayed previous token, but
    /// only if `digest` still matches the previous digest and the rotation
    /// is older than `min_age`. Returns the affected row count.
    async fn try_invalidate_previous(
        &self,
        id: Uuid,
        digest: &[u8],
        min_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Delete one record; logout is idempotent.
    async fn revoke(&self, id: Uuid) -> Result<u64, StoreError>;

    /// Delete every record owned by a principal.
    async fn revoke_all_for(&self, user_id: Uuid) -> Result<u64, StoreError>;

    /// Delete records whose last rotation is older than `retention`. Runs
    /// against a time predicate only, so it is safe next to live traffic.
    async fn sweep_expired(
        &self,
        retention: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}
