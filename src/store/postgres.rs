//! Postgres-backed token store.
//!
//! Each mutation is one conditional `UPDATE`/`DELETE`; the database is the
//! only arbiter of who wins a race. `PostgreSQL` also enforces the
//! store-wide digest uniqueness through the unique indexes in
//! `sql/schema.sql`.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use super::{StoreError, TokenStore};
use crate::record::{ClientMeta, SessionToken, cutoff_before};

const TOKEN_COLUMNS: &str = "id, user_id, current_digest, previous_digest, seen, seen_at, \
     rotated_at, user_agent, client_ip, created_at, updated_at";

/// Token store on a shared [`PgPool`].
#[derive(Clone, Debug)]
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_token(row: &PgRow) -> SessionToken {
    let client_ip: Option<IpNetwork> = row.get("client_ip");
    SessionToken {
        id: row.get("id"),
        user_id: row.get("user_id"),
        current_digest: row.get("current_digest"),
        previous_digest: row.get("previous_digest"),
        seen: row.get("seen"),
        seen_at: row.get("seen_at"),
        rotated_at: row.get("rotated_at"),
        user_agent: row.get("user_agent"),
        client_ip: client_ip.map(|network| network.ip()),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn create(
        &self,
        user_id: Uuid,
        digest: &[u8],
        meta: &ClientMeta,
        now: DateTime<Utc>,
    ) -> Result<SessionToken, StoreError> {
        let query = r"
            INSERT INTO session_tokens
                (user_id, current_digest, previous_digest, seen, rotated_at,
                 user_agent, client_ip, created_at, updated_at)
            VALUES ($1, $2, $2, FALSE, $3, $4, $5, $3, $3)
            RETURNING id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(digest)
            .bind(now)
            .bind(meta.user_agent.as_deref())
            .bind(meta.client_ip.map(IpNetwork::from))
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::DuplicateDigest
                } else {
                    StoreError::Backend(
                        anyhow::Error::new(err).context("failed to insert session token"),
                    )
                }
            })?;

        Ok(SessionToken {
            id: row.get("id"),
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
        })
    }

    async fn find_live(
        &self,
        digest: &[u8],
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionToken>, StoreError> {
        let query = format!(
            r"
            SELECT {TOKEN_COLUMNS}
            FROM session_tokens
            WHERE (current_digest = $1 OR previous_digest = $1)
              AND rotated_at > $2
            LIMIT 1
        "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(digest)
            .bind(cutoff_before(now, max_age))
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session token")?;
        Ok(row.as_ref().map(row_to_token))
    }

    async fn get(&self, id: Uuid) -> Result<Option<SessionToken>, StoreError> {
        let query = format!("SELECT {TOKEN_COLUMNS} FROM session_tokens WHERE id = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch session token")?;
        Ok(row.as_ref().map(row_to_token))
    }

    async fn try_rotate(
        &self,
        id: Uuid,
        new_digest: &[u8],
        meta: &ClientMeta,
        now: DateTime<Utc>,
        safeguard: Duration,
    ) -> Result<bool, StoreError> {
        // The condition and the column swap are one statement; only the
        // first caller past the safeguard (or any caller once seen) wins.
        let query = r"
            UPDATE session_tokens
            SET previous_digest = CASE WHEN seen THEN current_digest ELSE previous_digest END,
                current_digest = $2,
                seen = FALSE,
                seen_at = NULL,
                rotated_at = $3,
                user_agent = COALESCE($4, user_agent),
                client_ip = COALESCE($5, client_ip),
                updated_at = $3
            WHERE id = $1
              AND (seen OR rotated_at < $6)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .bind(new_digest)
            .bind(now)
            .bind(meta.user_agent.as_deref())
            .bind(meta.client_ip.map(IpNetwork::from))
            .bind(cutoff_before(now, safeguard))
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::DuplicateDigest
                } else {
                    StoreError::Backend(
                        anyhow::Error::new(err).context("failed to rotate session token"),
                    )
                }
            })?;
        Ok(result.rows_affected() == 1)
    }

    async fn try_mark_seen(
        &self,
        id: Uuid,
        digest: &[u8],
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let query = r"
            UPDATE session_tokens
            SET seen = TRUE, seen_at = $3, updated_at = $3
            WHERE id = $1
              AND current_digest = $2
              AND NOT seen
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .bind(digest)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to mark session token seen")?;
        Ok(result.rows_affected() == 1)
    }

    async fn try_invalidate_previous(
        &self,
        id: Uuid,
        digest: &[u8],
        min_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let query = r"
            UPDATE session_tokens
            SET seen = FALSE, updated_at = $3
            WHERE id = $1
              AND previous_digest = $2
              AND rotated_at < $4
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .bind(digest)
            .bind(now)
            .bind(cutoff_before(now, min_age))
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to invalidate previous token")?;
        Ok(result.rows_affected())
    }

    async fn revoke(&self, id: Uuid) -> Result<u64, StoreError> {
        let query = "DELETE FROM session_tokens WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete session token")?;
        Ok(result.rows_affected())
    }

    async fn revoke_all_for(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let query = "DELETE FROM session_tokens WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete user session tokens")?;
        Ok(result.rows_affected())
    }

    async fn sweep_expired(
        &self,
        retention: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let query = "DELETE FROM session_tokens WHERE rotated_at < $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(cutoff_before(now, retention))
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to sweep expired session tokens")?;
        Ok(result.rows_affected())
    }
}
