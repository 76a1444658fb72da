//! Keyed token digests and raw token generation.
//!
//! Raw tokens are only ever handed to the caller for cookie delivery; the
//! database stores the HMAC-SHA256 digest. Rotating the server secret
//! invalidates every outstanding token.

use anyhow::{Context, Result, bail};
use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretSlice};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Minimum length for the server-wide digest key.
const MIN_SECRET_LEN: usize = 32;

/// Number of random bytes in a freshly issued token.
const TOKEN_BYTES: usize = 32;

/// One-way codec turning raw session tokens into storable digests.
#[derive(Clone)]
pub struct TokenCodec {
    mac: HmacSha256,
}

impl TokenCodec {
    /// Build a codec from the process-wide secret key.
    ///
    /// # Errors
    /// Returns an error if the key is shorter than 32 bytes.
    pub fn new(secret: &SecretSlice<u8>) -> Result<Self> {
        let key = secret.expose_secret();
        if key.len() < MIN_SECRET_LEN {
            bail!("digest key must be at least {MIN_SECRET_LEN} bytes");
        }
        let mac = HmacSha256::new_from_slice(key)
            .map_err(|err| anyhow::anyhow!("failed to key token digest: {err}"))?;
        Ok(Self { mac })
    }

    /// Create a new random session token.
    /// The raw value is only returned to deliver to the client; the database
    /// stores a digest.
    ///
    /// # Errors
    /// Returns an error if the OS random source fails.
    pub fn generate_token() -> Result<String> {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .context("failed to generate session token")?;
        Ok(Base64UrlUnpadded::encode_string(&bytes))
    }

    /// Digest a raw token so raw values never touch the database.
    /// Deterministic for a given key; 32 bytes of output.
    #[must_use]
    pub fn digest(&self, token: &str) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(token.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose key material through Debug output.
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}
