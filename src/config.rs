use std::env;
use std::net::SocketAddr;
use anyhow::{Context, Result};
use zeroize::Zeroizing;

use crate::crypto::session_token::{SessionTokenCodec, SigningKeyset};
use crate::services::session::DEFAULT_SESSION_LIFETIME_DAYS;

/// A previous signing key that is still accepted for verification.
#[derive(Clone)]
pub struct RetiredKey {
    /// The key id tokens signed with this key carry.
    pub kid: String,
    /// The public key in PEM form.
    pub public_key_pem: String,
}

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The URL of the PostgreSQL database.
    pub database_url: String,
    /// The address the server listens on.
    pub bind_address: SocketAddr,
    /// The key id of the active session signing key.
    pub signing_kid: String,
    /// The active RSA private key in PEM form.
    pub signing_key_pem: Zeroizing<String>,
    /// An optional retired verification key.
    pub retired_key: Option<RetiredKey>,
    /// The duration of a session in days.
    pub session_duration_days: i64,
    /// Whether cookies are always marked `Secure`.
    pub secure_cookies: bool,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        let retired_key = match (
            env::var("SESSION_RETIRED_KID").ok(),
            env::var("SESSION_RETIRED_PUBLIC_KEY_PEM").ok(),
        ) {
            (Some(kid), Some(public_key_pem)) => Some(RetiredKey { kid, public_key_pem }),
            (None, None) => None,
            _ => anyhow::bail!(
                "SESSION_RETIRED_KID and SESSION_RETIRED_PUBLIC_KEY_PEM must be set together"
            ),
        };

        let session_duration_days: i64 = env::var("SESSION_DURATION_DAYS")
            .unwrap_or_else(|_| DEFAULT_SESSION_LIFETIME_DAYS.to_string())
            .parse()
            .context("Invalid SESSION_DURATION_DAYS")?;

        if session_duration_days < 1 {
            anyhow::bail!("SESSION_DURATION_DAYS must be at least 1");
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,
            bind_address: env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
                .parse()
                .context("Invalid BIND_ADDRESS")?,
            signing_kid: env::var("SESSION_SIGNING_KID")
                .context("SESSION_SIGNING_KID must be set")?,
            signing_key_pem: Zeroizing::new(
                env::var("SESSION_SIGNING_KEY_PEM").context(
                    "SESSION_SIGNING_KEY_PEM must be set (RSA private key, PKCS#8 or PKCS#1 PEM)",
                )?,
            ),
            retired_key,
            session_duration_days,
            secure_cookies: env::var("APP_ENV")
                .unwrap_or_else(|_| "development".to_string()) == "production",
        })
    }

    /// Builds the session token codec from the configured keys.
    pub fn session_token_codec(&self) -> Result<SessionTokenCodec> {
        let mut keyset =
            SigningKeyset::from_private_pem(self.signing_kid.clone(), &self.signing_key_pem)
                .context("SESSION_SIGNING_KEY_PEM is not a valid RSA private key")?;

        if let Some(retired) = &self.retired_key {
            keyset = keyset
                .with_verification_key_pem(retired.kid.clone(), &retired.public_key_pem)
                .context("Invalid retired session verification key")?;
        }

        tracing::info!("🔐 Session keyset loaded: active kid {}", keyset.active_kid());
        Ok(SessionTokenCodec::new(keyset))
    }
}
