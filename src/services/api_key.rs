use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::crypto::argon2id;
use crate::error::Result;
use crate::models::api_key::ApiKey;

/// The size of a raw API key secret in bytes.
const SECRET_SIZE: usize = 32;

/// A newly issued API key secret.
pub struct IssuedSecret {
    /// Shown to the caller exactly once.
    pub raw: Zeroizing<String>,
    /// The Argon2id credential string to persist.
    pub encoded: String,
}

/// Generates a new random API key secret and its stored form.
///
/// # Returns
///
/// The URL-safe base64 secret together with its Argon2id encoding.
pub fn issue_secret() -> Result<IssuedSecret> {
    let mut secret = Zeroizing::new([0u8; SECRET_SIZE]);
    OsRng.fill_bytes(&mut secret[..]);

    let raw = Zeroizing::new(general_purpose::URL_SAFE_NO_PAD.encode(&secret[..]));
    let encoded = argon2id::encode(raw.as_bytes())?;

    Ok(IssuedSecret { raw, encoded })
}

/// Checks a presented API key secret.
///
/// The key must be active at `now`, carry at least one permission and the
/// secret must verify against the stored credential.
pub fn verify_api_key(key: &ApiKey, encoded: &str, raw: &str, now: DateTime<Utc>) -> bool {
    if !key.is_active_at(now) {
        tracing::debug!("❌ API key {} used outside its validity window", key.id);
        return false;
    }

    if key.permissions.is_empty() {
        tracing::debug!("❌ API key {} has no permissions", key.id);
        return false;
    }

    argon2id::verify(encoded, raw.as_bytes())
}
