use chrono::{DateTime, TimeDelta, Utc};

use crate::{
    crypto::aes::SessionKeyMaterial,
    crypto::session_token::{SessionClaims, SessionTokenCodec},
    error::{AppError, Result},
    models::session::{Session, SessionMetadata},
    repositories::session::SessionStore,
    services::continuity,
};

/// Default lifetime in days granted by each refresh.
pub const DEFAULT_SESSION_LIFETIME_DAYS: i64 = 30;

/// The result of a successful refresh.
#[derive(Debug)]
pub struct RefreshedSession {
    /// The session as persisted after the refresh.
    pub session: Session,
    /// The location the session is now bound to.
    pub metadata: SessionMetadata,
    /// A freshly signed token expiring with the session.
    pub token: String,
    /// When the token and session expire.
    pub expires_at: DateTime<Utc>,
}

/// Everything a login flow needs to persist a new session and hand out
/// its first token.
#[derive(Debug)]
pub struct EstablishedSession {
    /// Claims for the first token.
    pub claims: SessionClaims,
    /// Encrypted initial metadata to store with the session.
    pub metadata: Vec<u8>,
}

/// Creates key material for a new session bound to `location`.
///
/// The key material only ever leaves this function inside the claims, so
/// the stored metadata is unreadable without the token.
pub fn establish_session(
    session_id: impl Into<String>,
    location: &SessionMetadata,
) -> Result<EstablishedSession> {
    let material = SessionKeyMaterial::generate();
    let metadata = material.encrypt(&location.to_json()?)?;

    Ok(EstablishedSession {
        claims: SessionClaims {
            session_id: session_id.into(),
            encryption_key: material.to_bytes(),
        },
        metadata,
    })
}

/// Verifies a session token and moves the session forward.
///
/// The stored location is decrypted with the key from the token and checked
/// against `observed` for the time passed since the token was issued. On
/// success the session is re-encrypted with the new location, its expiry is
/// pushed to `now + lifetime` and a new token is issued.
///
/// Once the session id is known, every failure destroys the session. All
/// failures are reported as [`AppError::InvalidSession`].
///
/// # Arguments
///
/// * `codec` - The session token codec.
/// * `store` - Where sessions are persisted.
/// * `token` - The presented session token.
/// * `observed` - The location of the current request, if known.
/// * `now` - The current time.
/// * `lifetime` - How long the refreshed session stays valid.
pub async fn refresh_session<S: SessionStore>(
    codec: &SessionTokenCodec,
    store: &S,
    token: &str,
    observed: Option<SessionMetadata>,
    now: DateTime<Utc>,
    lifetime: TimeDelta,
) -> Result<RefreshedSession> {
    let (claims, issued_at) = codec.read(token).map_err(|e| {
        tracing::info!("❌ Session token rejected: {}", e);
        AppError::InvalidSession
    })?;

    match refresh_known_session(codec, store, &claims, issued_at, observed, now, lifetime).await {
        Ok(refreshed) => {
            tracing::debug!("✅ Session refreshed for account: {}", refreshed.session.account_id);
            Ok(refreshed)
        }
        Err(e) => {
            tracing::info!("❌ Session refresh failed: {}", e);
            destroy_session(store, &claims.session_id).await;
            Err(AppError::InvalidSession)
        }
    }
}

async fn refresh_known_session<S: SessionStore>(
    codec: &SessionTokenCodec,
    store: &S,
    claims: &SessionClaims,
    issued_at: DateTime<Utc>,
    observed: Option<SessionMetadata>,
    now: DateTime<Utc>,
    lifetime: TimeDelta,
) -> Result<RefreshedSession> {
    let observed = observed.ok_or_else(|| AppError::Format("Missing viewer location".to_string()))?;
    let material = SessionKeyMaterial::from_bytes(&claims.encryption_key)?;
    let expires_at = now + lifetime;

    let session = store
        .update_locked(&claims.session_id, |session| {
            if session.expiration_time <= now {
                tracing::info!("❌ Session expired at {}", session.expiration_time);
                return Err(AppError::InvalidSession);
            }

            let plaintext = material.decrypt(&session.metadata)?;
            let previous = SessionMetadata::from_json(&plaintext)?;

            if !continuity::is_plausible(&previous, &observed, now - issued_at) {
                tracing::warn!(
                    "⚠️  Implausible location change for session of account {}",
                    session.account_id
                );
                return Err(AppError::InvalidSession);
            }

            session.metadata = material.encrypt(&observed.to_json()?)?;
            session.expiration_time = expires_at;
            Ok(())
        })
        .await?;

    let token = codec.write(claims, expires_at)?;

    Ok(RefreshedSession {
        session,
        metadata: observed,
        token,
        expires_at,
    })
}

/// Deletes a session, logging rather than returning failures.
pub async fn destroy_session<S: SessionStore>(store: &S, session_id: &str) {
    match store.delete(session_id).await {
        Ok(()) => tracing::debug!("🗑️  Session deleted"),
        Err(e) => tracing::warn!("⚠️  Failed to delete session: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::session_token::tests::test_codec;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    fn lifetime() -> TimeDelta {
        TimeDelta::days(DEFAULT_SESSION_LIFETIME_DAYS)
    }

    #[derive(Default)]
    struct MemoryStore {
        sessions: Mutex<HashMap<String, Session>>,
    }

    impl MemoryStore {
        fn insert(&self, session: Session) {
            self.sessions.lock().unwrap().insert(session.id.clone(), session);
        }

        fn get(&self, id: &str) -> Option<Session> {
            self.sessions.lock().unwrap().get(id).cloned()
        }
    }

    impl SessionStore for MemoryStore {
        async fn update_locked<F>(&self, id: &str, mut apply: F) -> Result<Session>
        where
            F: FnMut(&mut Session) -> Result<()> + Send,
        {
            let mut sessions = self.sessions.lock().unwrap();
            let stored = sessions.get_mut(id).ok_or(AppError::NotFound)?;
            let mut session = stored.clone();
            apply(&mut session)?;
            *stored = session.clone();
            Ok(session)
        }

        async fn delete(&self, id: &str) -> Result<()> {
            self.sessions.lock().unwrap().remove(id);
            Ok(())
        }
    }

    const MUNICH: SessionMetadata = SessionMetadata { lat: 48.137, lng: 11.575 };
    const NEARBY: SessionMetadata = SessionMetadata { lat: 48.2, lng: 11.6 };
    const LISBON: SessionMetadata = SessionMetadata { lat: 38.72, lng: -9.14 };

    fn setup(location: &SessionMetadata) -> (SessionTokenCodec, MemoryStore, String) {
        let codec = test_codec();
        let store = MemoryStore::default();
        let now = Utc::now();

        let established = establish_session("session-1", location).unwrap();
        store.insert(Session {
            id: "session-1".to_string(),
            account_id: Uuid::new_v4(),
            account_creation_time: now,
            issuer: "google".to_string(),
            id_at_issuer: "12345".to_string(),
            creation_time: now,
            expiration_time: now + TimeDelta::days(30),
            metadata: established.metadata,
        });

        let token = codec
            .write(&established.claims, now + TimeDelta::days(30))
            .unwrap();
        (codec, store, token)
    }

    #[tokio::test]
    async fn nearby_refresh_succeeds() {
        let (codec, store, token) = setup(&MUNICH);
        let now = Utc::now();

        let refreshed = refresh_session(&codec, &store, &token, Some(NEARBY), now, lifetime())
            .await
            .unwrap();

        assert_eq!(refreshed.metadata, NEARBY);
        assert_eq!(refreshed.expires_at, now + lifetime());
        assert_eq!(refreshed.session.expiration_time, refreshed.expires_at);

        let (claims, _) = codec.read(&refreshed.token).unwrap();
        assert_eq!(claims.session_id, "session-1");

        let stored = store.get("session-1").unwrap();
        let material = SessionKeyMaterial::from_bytes(&claims.encryption_key).unwrap();
        let plaintext = material.decrypt(&stored.metadata).unwrap();
        assert_eq!(SessionMetadata::from_json(&plaintext).unwrap(), NEARBY);
    }

    #[tokio::test]
    async fn implausible_travel_destroys_session() {
        let (codec, store, token) = setup(&MUNICH);

        let result =
            refresh_session(&codec, &store, &token, Some(LISBON), Utc::now(), lifetime()).await;

        assert!(matches!(result, Err(AppError::InvalidSession)));
        assert!(store.get("session-1").is_none());
    }

    #[tokio::test]
    async fn missing_location_destroys_session() {
        let (codec, store, token) = setup(&MUNICH);

        let result = refresh_session(&codec, &store, &token, None, Utc::now(), lifetime()).await;

        assert!(matches!(result, Err(AppError::InvalidSession)));
        assert!(store.get("session-1").is_none());
    }

    #[tokio::test]
    async fn forged_token_leaves_store_untouched() {
        let (codec, store, token) = setup(&MUNICH);
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[2] = "AAAA";

        let result = refresh_session(
            &codec,
            &store,
            &parts.join("."),
            Some(MUNICH),
            Utc::now(),
            lifetime(),
        )
        .await;

        assert!(matches!(result, Err(AppError::InvalidSession)));
        assert!(store.get("session-1").is_some());
    }

    #[tokio::test]
    async fn wrong_key_material_destroys_session() {
        let (codec, store, _) = setup(&MUNICH);
        let other = SessionKeyMaterial::generate();
        let token = codec
            .write(
                &SessionClaims {
                    session_id: "session-1".to_string(),
                    encryption_key: other.to_bytes(),
                },
                Utc::now() + TimeDelta::days(1),
            )
            .unwrap();

        let result =
            refresh_session(&codec, &store, &token, Some(MUNICH), Utc::now(), lifetime()).await;

        assert!(matches!(result, Err(AppError::InvalidSession)));
        assert!(store.get("session-1").is_none());
    }

    #[tokio::test]
    async fn expired_record_destroys_session() {
        let (codec, store, token) = setup(&MUNICH);
        let later = Utc::now() + TimeDelta::days(31);

        let result = refresh_session(&codec, &store, &token, Some(MUNICH), later, lifetime()).await;

        assert!(matches!(result, Err(AppError::InvalidSession)));
        assert!(store.get("session-1").is_none());
    }

    #[tokio::test]
    async fn unknown_session_is_invalid() {
        let codec = test_codec();
        let store = MemoryStore::default();
        let established = establish_session("ghost", &MUNICH).unwrap();
        let token = codec
            .write(&established.claims, Utc::now() + TimeDelta::days(1))
            .unwrap();

        let result =
            refresh_session(&codec, &store, &token, Some(MUNICH), Utc::now(), lifetime()).await;

        assert!(matches!(result, Err(AppError::InvalidSession)));
    }

    #[test]
    fn established_metadata_decrypts_with_claims_key() {
        let established = establish_session("abc", &LISBON).unwrap();
        assert_eq!(established.claims.session_id, "abc");

        let material = SessionKeyMaterial::from_bytes(&established.claims.encryption_key).unwrap();
        let plaintext = material.decrypt(&established.metadata).unwrap();
        assert_eq!(SessionMetadata::from_json(&plaintext).unwrap(), LISBON);
    }
}
