//! In-process token store.
//!
//! Implements the same conditional-write contract as the Postgres store:
//! each transition checks its precondition and mutates under one mutex
//! acquisition, so at most one concurrent caller wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{StoreError, TokenStore};
use crate::record::{ClientMeta, SessionToken, cutoff_before};

/// Mutex-guarded map of token records; suitable for tests and single
/// process embedders.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    records: Mutex<HashMap<Uuid, SessionToken>>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

fn digest_in_use(records: &HashMap<Uuid, SessionToken>, digest: &[u8], skip: Option<Uuid>) -> bool {
    records.values().any(|record| {
        Some(record.id) != skip
            && (record.current_digest == digest || record.previous_digest == digest)
    })
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn create(
        &self,
        user_id: Uuid,
        digest: &[u8],
        meta: &ClientMeta,
        now: DateTime<Utc>,
    ) -> Result<SessionToken, StoreError> {
        let mut records = self.records.lock().await;
        if digest_in_use(&records, digest, None) {
            return Err(StoreError::DuplicateDigest);
        }
        let token = SessionToken {
            id: Uuid::new_v4(),
            user_id,
            current_digest: digest.to_vec(),
            previous_digest: digest.to_vec(),
            seen: false,
            seen_at: None,
            rotated_at: now,
            user_agent: meta.user_agent.clone(),
            client_ip: meta.client_ip,
            created_at: now,
            updated_at: now,
        };
        records.insert(token.id, token.clone());
        Ok(token)
    }

    async fn find_live(
        &self,
        digest: &[u8],
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionToken>, StoreError> {
        let cutoff = cutoff_before(now, max_age);
        let records = self.records.lock().await;
        Ok(records
            .values()
            .find(|record| {
                record.rotated_at > cutoff
                    && (record.current_digest == digest || record.previous_digest == digest)
            })
            .cloned())
    }

    async fn get(&self, id: Uuid) -> Result<Option<SessionToken>, StoreError> {
        Ok(self.records.lock().await.get(&id).cloned())
    }

    async fn try_rotate(
        &self,
        id: Uuid,
        new_digest: &[u8],
        meta: &ClientMeta,
        now: DateTime<Utc>,
        safeguard: Duration,
    ) -> Result<bool, StoreError> {
        let cutoff = cutoff_before(now, safeguard);
        let mut records = self.records.lock().await;
        if digest_in_use(&records, new_digest, Some(id)) {
            return Err(StoreError::DuplicateDigest);
        }
        let Some(record) = records.get_mut(&id) else {
            return Ok(false);
        };
        if !(record.seen || record.rotated_at < cutoff) {
            return Ok(false);
        }
        record.apply_rotation(new_digest.to_vec(), meta, now);
        Ok(true)
    }

    async fn try_mark_seen(
        &self,
        id: Uuid,
        digest: &[u8],
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(&id) else {
            return Ok(false);
        };
        if record.seen || record.current_digest != digest {
            return Ok(false);
        }
        record.seen = true;
        record.seen_at = Some(now);
        record.updated_at = now;
        Ok(true)
    }

    async fn try_invalidate_previous(
        &self,
        id: Uuid,
        digest: &[u8],
        min_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let cutoff = cutoff_before(now, min_age);
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(&id) else {
            return Ok(0);
        };
        if record.previous_digest != digest || record.rotated_at >= cutoff {
            return Ok(0);
        }
        record.seen = false;
        record.updated_at = now;
        Ok(1)
    }

    async fn revoke(&self, id: Uuid) -> Result<u64, StoreError> {
        let mut records = self.records.lock().await;
        Ok(u64::from(records.remove(&id).is_some()))
    }

    async fn revoke_all_for(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, record| record.user_id != user_id);
        Ok((before - records.len()) as u64)
    }

    async fn sweep_expired(
        &self,
        retention: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let cutoff = cutoff_before(now, retention);
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, record| record.rotated_at >= cutoff);
        Ok((before - records.len()) as u64)
    }
}
