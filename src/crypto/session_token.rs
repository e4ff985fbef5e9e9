use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode,
};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::error::AppError;

/// The issuer written into and required from every session token.
pub const ISSUER: &str = "login.gw2auth.com";
/// Tolerated clock skew in seconds.
pub const LEEWAY_SECS: u64 = 5;

const ALGORITHM: Algorithm = Algorithm::RS256;

/// Reasons a session token could not be written or read.
///
/// Only meant for logging; callers collapse all of them into
/// [`AppError::InvalidSession`].
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token header carries no kid")]
    MissingKid,
    #[error("unknown key id: {0}")]
    UnknownKid(String),
    #[error("key id {0} is already registered")]
    DuplicateKid(String),
    #[error("failed to parse RSA key: {0}")]
    KeyParse(String),
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("invalid claims: {0}")]
    Claims(&'static str),
    #[error("k claim could not be decoded: {0}")]
    KeyMaterial(#[from] base64::DecodeError),
}

impl From<TokenError> for AppError {
    fn from(_: TokenError) -> Self {
        AppError::InvalidSession
    }
}

/// The payload of a session token.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionClaims {
    /// Identifier of the persisted session record.
    pub session_id: String,
    /// Serialized [`crate::crypto::aes::SessionKeyMaterial`].
    pub encryption_key: Vec<u8>,
}

impl fmt::Debug for SessionClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionClaims")
            .field("session_id", &self.session_id)
            .field("encryption_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    iss: String,
    iat: i64,
    nbf: i64,
    exp: i64,
    #[serde(default)]
    session: String,
    #[serde(default)]
    k: String,
}

/// The keys used for session tokens.
///
/// Exactly one private key signs; any key in the verification set is
/// accepted. The active key's public half is always part of the set.
#[derive(Clone)]
pub struct SigningKeyset {
    active_kid: String,
    signing_key: EncodingKey,
    verification_keys: BTreeMap<String, DecodingKey>,
}

impl fmt::Debug for SigningKeyset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyset")
            .field("active_kid", &self.active_kid)
            .field("verification_kids", &self.verification_keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SigningKeyset {
    /// Builds a keyset from the active RSA private key (PKCS#8 or PKCS#1 PEM).
    ///
    /// The public half is derived from the private key and registered under
    /// the same kid, so the keyset can always verify its own tokens.
    pub fn from_private_pem(kid: impl Into<String>, pem: &str) -> Result<Self, TokenError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| TokenError::KeyParse(e.to_string()))?;

        let private_der = private_key
            .to_pkcs1_der()
            .map_err(|e| TokenError::KeyParse(e.to_string()))?;
        let public_der = private_key
            .to_public_key()
            .to_pkcs1_der()
            .map_err(|e| TokenError::KeyParse(e.to_string()))?;

        let kid = kid.into();
        let mut verification_keys = BTreeMap::new();
        verification_keys.insert(kid.clone(), DecodingKey::from_rsa_der(public_der.as_bytes()));

        Ok(Self {
            active_kid: kid,
            signing_key: EncodingKey::from_rsa_der(private_der.as_bytes()),
            verification_keys,
        })
    }

    /// Registers an additional public key (SPKI or PKCS#1 PEM) for verification.
    ///
    /// This is how a retiring key stays valid after rotation. Registering a
    /// kid that is already present is rejected, so the active key can never
    /// be shadowed.
    pub fn with_verification_key_pem(
        mut self,
        kid: impl Into<String>,
        pem: &str,
    ) -> Result<Self, TokenError> {
        let kid = kid.into();
        if self.verification_keys.contains_key(&kid) {
            return Err(TokenError::DuplicateKid(kid));
        }

        let key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| TokenError::KeyParse(e.to_string()))?;
        self.verification_keys.insert(kid, key);

        Ok(self)
    }

    /// The kid new tokens are signed with.
    pub fn active_kid(&self) -> &str {
        &self.active_kid
    }

    /// Looks up a verification key by kid.
    pub fn verification_key(&self, kid: &str) -> Option<&DecodingKey> {
        self.verification_keys.get(kid)
    }

    /// All kids accepted for verification, in sorted order.
    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.verification_keys.keys().map(String::as_str)
    }
}

/// Writes and reads signed session tokens.
#[derive(Clone)]
pub struct SessionTokenCodec {
    keyset: SigningKeyset,
    validation: Validation,
}

impl SessionTokenCodec {
    /// Creates a codec over `keyset`.
    pub fn new(keyset: SigningKeyset) -> Self {
        let mut validation = Validation::new(ALGORITHM);
        validation.set_issuer(&[ISSUER]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss"]);
        validation.validate_nbf = true;
        validation.leeway = LEEWAY_SECS;

        Self { keyset, validation }
    }

    /// The keyset backing this codec.
    pub fn keyset(&self) -> &SigningKeyset {
        &self.keyset
    }

    /// Signs `claims` with the active key, valid from now until `expires_at`.
    pub fn write(
        &self,
        claims: &SessionClaims,
        expires_at: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let token_claims = TokenClaims {
            iss: ISSUER.to_string(),
            iat: now,
            nbf: now,
            exp: expires_at.timestamp(),
            session: claims.session_id.clone(),
            k: STANDARD_NO_PAD.encode(&claims.encryption_key),
        };

        let mut header = Header::new(ALGORITHM);
        header.kid = Some(self.keyset.active_kid.clone());

        Ok(encode(&header, &token_claims, &self.keyset.signing_key)?)
    }

    /// Verifies `token` and returns its claims together with its issued-at time.
    pub fn read(&self, token: &str) -> Result<(SessionClaims, DateTime<Utc>), TokenError> {
        let header = decode_header(token)?;
        let kid = header.kid.ok_or(TokenError::MissingKid)?;
        let key = self
            .keyset
            .verification_key(&kid)
            .ok_or_else(|| TokenError::UnknownKid(kid.clone()))?;

        let claims = decode::<TokenClaims>(token, key, &self.validation)?.claims;

        if claims.session.is_empty() {
            return Err(TokenError::Claims("expected session claim to be a non-empty string"));
        }
        if claims.k.is_empty() {
            return Err(TokenError::Claims("expected k claim to be a non-empty string"));
        }

        let encryption_key = STANDARD_NO_PAD.decode(&claims.k)?;
        let issued_at = DateTime::<Utc>::from_timestamp(claims.iat, 0)
            .ok_or(TokenError::Claims("iat claim out of range"))?;

        Ok((
            SessionClaims {
                session_id: claims.session,
                encryption_key,
            },
            issued_at,
        ))
    }
}
