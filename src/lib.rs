//! # Sesio (Rotating Session Token Store)
//!
//! `sesio` keeps a user authenticated across requests without re-sending
//! credentials. It owns the session token layer only: a principal has
//! already been authenticated once, and this crate issues, verifies,
//! rotates, and revokes the persistent token that represents that login.
//!
//! ## Rotation Protocol
//!
//! Each record keeps two digests: the current token and the immediately
//! prior one. Rotation swaps in a fresh token atomically; the previous
//! token stays valid during a short grace window so in-flight requests are
//! not logged out. A token is *seen* once the client has presented it back;
//! a previous token presented after the current one was confirmed seen is a
//! replay signal, answered with one re-armed acceptance window instead of a
//! hard logout.
//!
//! ## Concurrency
//!
//! Concurrent requests from the same browser (tabs, retries, prefetches)
//! race on the same record. Every mutation (rotate, mark-seen,
//! invalidate-previous) is a single conditional write keyed by the expected
//! prior state, so at most one racer wins and the rest see a clean no-op. A
//! safeguard window absorbs rotation storms: only the first request past
//! the last rotation may rotate an unseen token.
//!
//! ## Storage
//!
//! Raw tokens never reach storage; the store holds HMAC-SHA256 digests
//! keyed by a process-wide secret. [`PgTokenStore`] is the production
//! backend (`sql/schema.sql`); [`MemoryTokenStore`] implements the same
//! conditional-write contract in process.
//!
//! > **Warning:** Rotating the digest secret invalidates every outstanding
//! > session by design.

pub mod audit;
pub mod codec;
pub mod geo;
pub mod manager;
pub mod notify;
pub mod policy;
pub mod record;
pub mod store;
pub mod suspicion;

pub use audit::{AuditAction, AuditEvent, AuditLog, MemoryAuditLog, NoopAuditLog};
pub use codec::TokenCodec;
pub use geo::{Geolocator, NoopGeolocator, StaticGeolocator};
pub use manager::{IssuedToken, SessionManager, VerifiedSession, VerifyContext};
pub use notify::{
    MemoryNotificationDispatch, NoopNotificationDispatch, NotificationDispatch,
    SuspiciousLoginAlert,
};
pub use policy::{SessionPolicy, StaticPolicy};
pub use record::{ClientMeta, SessionToken, TokenMatch};
pub use store::{MemoryTokenStore, PgTokenStore, StoreError, TokenStore};
pub use suspicion::is_suspicious_login;
