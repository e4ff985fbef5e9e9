use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};

/// A federated login session, joined with its federation and account.
///
/// `metadata` is the stored ciphertext. It can only be decrypted with the
/// key material carried in the session token.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// The opaque session identifier.
    pub id: String,
    /// The account this session belongs to.
    pub account_id: Uuid,
    /// When the account was created.
    pub account_creation_time: DateTime<Utc>,
    /// The identity provider that authenticated the session.
    pub issuer: String,
    /// The user's id at that identity provider.
    pub id_at_issuer: String,
    /// When the session was created.
    pub creation_time: DateTime<Utc>,
    /// When the session expires unless refreshed.
    pub expiration_time: DateTime<Utc>,
    /// AES-CBC encrypted [`SessionMetadata`] JSON.
    pub metadata: Vec<u8>,
}

/// Where the session was last used from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub lat: f64,
    pub lng: f64,
}

impl SessionMetadata {
    /// Parses decrypted metadata.
    ///
    /// Since CBC carries no authentication tag, this is where a wrong key
    /// usually surfaces.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        sonic_rs::from_slice(bytes)
            .map_err(|e| AppError::Format(format!("Invalid session metadata: {}", e)))
    }

    /// Serializes to the `{"lat":..,"lng":..}` plaintext form.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        sonic_rs::to_vec(self)
            .map_err(|e| AppError::Internal(format!("Failed to serialize session metadata: {}", e)))
    }
}
