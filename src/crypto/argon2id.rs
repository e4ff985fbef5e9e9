use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::{AppError, Result};

/// The algorithm tag of the encoded form.
const ALGORITHM: &str = "argon2id";

// Spring Security 5.8 Argon2PasswordEncoder defaults.
/// Salt length in bytes.
pub const SALT_LENGTH: usize = 16;
/// Derived hash length in bytes.
pub const HASH_LENGTH: usize = 32;
/// Degree of parallelism.
pub const PARALLELISM: u8 = 1;
/// Memory cost in KiB.
pub const MEMORY_KIB: u32 = 16384;
/// Number of iterations.
pub const ITERATIONS: u32 = 2;

/// An Argon2id credential: parameters, salt and derived hash.
///
/// The derived key length is always the length of `hash`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Argon2Credential {
    version: u32,
    salt: Vec<u8>,
    time_cost: u32,
    memory_kib: u32,
    parallelism: u8,
    hash: Vec<u8>,
}

impl Argon2Credential {
    /// Derives a new credential for `secret` with a fresh random salt.
    pub fn from_secret(secret: &[u8]) -> Result<Self> {
        let mut salt = vec![0u8; SALT_LENGTH];
        OsRng.fill_bytes(&mut salt);

        let mut credential = Self {
            version: Version::V0x13 as u32,
            salt,
            time_cost: ITERATIONS,
            memory_kib: MEMORY_KIB,
            parallelism: PARALLELISM,
            hash: Vec::new(),
        };
        credential.hash = credential.derive(secret, HASH_LENGTH)?.to_vec();

        Ok(credential)
    }

    /// Parses the `$argon2id$v=..$m=..,t=..,p=..$salt$hash` form.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Format` for any structural problem.
    pub fn parse(encoded: &str) -> Result<Self> {
        let parts: Vec<&str> = encoded.split('$').collect();
        if parts.len() != 6 || !parts[0].is_empty() {
            return Err(format_error(
                "expected 5 encoded parts (type, version, params, salt, hash)",
            ));
        }

        let (tag, version, params, salt, hash) = (parts[1], parts[2], parts[3], parts[4], parts[5]);
        if [tag, version, params, salt, hash].iter().any(|p| p.is_empty()) {
            return Err(format_error("encoded parts must not be empty"));
        }

        if tag != ALGORITHM {
            return Err(format_error("expected type argon2id"));
        }

        let version = version
            .strip_prefix("v=")
            .ok_or_else(|| format_error("version (2nd part) must start with [v=]"))?
            .parse::<u32>()
            .map_err(|e| format_error(&format!("invalid version: {}", e)))?;

        let mut memory_kib = 0u32;
        let mut time_cost = 0u32;
        let mut parallelism = 0u8;

        for param in params.split(',') {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };

            match key {
                "m" => memory_kib = parse_param(key, value)?,
                "t" => time_cost = parse_param(key, value)?,
                "p" => parallelism = parse_param(key, value)?,
                _ => {}
            }
        }

        if memory_kib == 0 || time_cost == 0 || parallelism == 0 {
            return Err(format_error(
                "missing required param (3rd part); expected [m,t,p]",
            ));
        }

        let salt = STANDARD_NO_PAD
            .decode(salt)
            .map_err(|e| format_error(&format!("invalid salt encoding: {}", e)))?;
        let hash = STANDARD_NO_PAD
            .decode(hash)
            .map_err(|e| format_error(&format!("invalid hash encoding: {}", e)))?;

        Ok(Self {
            version,
            salt,
            time_cost,
            memory_kib,
            parallelism,
            hash,
        })
    }

    /// Re-derives with the embedded parameters and compares in constant time.
    ///
    /// Any derivation error counts as a mismatch.
    pub fn verify(&self, secret: &[u8]) -> bool {
        match self.derive(secret, self.hash.len()) {
            Ok(derived) => derived.as_slice().ct_eq(self.hash.as_slice()).into(),
            Err(e) => {
                tracing::debug!("Argon2 derivation failed during verification: {}", e);
                false
            }
        }
    }

    fn derive(&self, secret: &[u8], output_len: usize) -> Result<Zeroizing<Vec<u8>>> {
        let version = Version::try_from(self.version)
            .map_err(|e| AppError::Encryption(format!("Unsupported Argon2 version: {}", e)))?;
        let params = Params::new(
            self.memory_kib,
            self.time_cost,
            u32::from(self.parallelism),
            Some(output_len),
        )
        .map_err(|e| AppError::Encryption(format!("Argon2 params: {}", e)))?;

        let mut out = Zeroizing::new(vec![0u8; output_len]);
        Argon2::new(Algorithm::Argon2id, version, params)
            .hash_password_into(secret, &self.salt, &mut out)
            .map_err(|e| AppError::Encryption(format!("Argon2 hash error: {}", e)))?;

        Ok(out)
    }
}

impl fmt::Display for Argon2Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "${}$v={}$m={},t={},p={}${}${}",
            ALGORITHM,
            self.version,
            self.memory_kib,
            self.time_cost,
            self.parallelism,
            STANDARD_NO_PAD.encode(&self.salt),
            STANDARD_NO_PAD.encode(&self.hash),
        )
    }
}

impl FromStr for Argon2Credential {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Hashes `secret` into its encoded credential string.
pub fn encode(secret: &[u8]) -> Result<String> {
    let credential = Argon2Credential::from_secret(secret)?;
    tracing::debug!("Secret hashed successfully with Argon2id");
    Ok(credential.to_string())
}

/// Verifies `secret` against an encoded credential.
///
/// Malformed credentials fail closed.
pub fn verify(encoded: &str, secret: &[u8]) -> bool {
    match Argon2Credential::parse(encoded) {
        Ok(credential) => credential.verify(secret),
        Err(e) => {
            tracing::warn!("⚠️  Stored credential could not be parsed: {}", e);
            false
        }
    }
}

fn parse_param<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| format_error(&format!("invalid param {}: {}", key, e)))
}

fn format_error(msg: &str) -> AppError {
    AppError::Format(msg.to_string())
}
