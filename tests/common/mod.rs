#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use chrono::{TimeDelta, Utc};
use gw2auth_core::{
    crypto::session_token::{SessionTokenCodec, SigningKeyset},
    error::{AppError, Result},
    models::session::Session,
    repositories::session::SessionStore,
};
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::RsaPrivateKey;
use uuid::Uuid;

/// A generated RSA key pair in PEM form.
pub struct TestKey {
    pub kid: String,
    pub private_pem: String,
    pub public_pem: String,
}

impl TestKey {
    pub fn generate() -> Self {
        let private_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        Self {
            kid: Uuid::new_v4().to_string(),
            private_pem: private_key.to_pkcs8_pem(LineEnding::LF).unwrap().as_str().to_owned(),
            public_pem: private_key.to_public_key().to_public_key_pem(LineEnding::LF).unwrap(),
        }
    }

    pub fn codec(&self) -> SessionTokenCodec {
        let keyset = SigningKeyset::from_private_pem(self.kid.clone(), &self.private_pem).unwrap();
        SessionTokenCodec::new(keyset)
    }
}

/// Keys are expensive to generate, so the suite shares two.
pub fn shared_keys() -> &'static (TestKey, TestKey) {
    static KEYS: OnceLock<(TestKey, TestKey)> = OnceLock::new();
    KEYS.get_or_init(|| (TestKey::generate(), TestKey::generate()))
}

/// An in-memory [`SessionStore`] that also counts deletions.
#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, Session>>,
    deletes: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn insert(&self, id: &str, metadata: Vec<u8>) -> Session {
        let now = Utc::now();
        let session = Session {
            id: id.to_string(),
            account_id: Uuid::new_v4(),
            account_creation_time: now - TimeDelta::days(100),
            issuer: "cognito".to_string(),
            id_at_issuer: "user-1".to_string(),
            creation_time: now,
            expiration_time: now + TimeDelta::days(30),
            metadata,
        };
        self.sessions.lock().unwrap().insert(id.to_string(), session.clone());
        session
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
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
        self.deletes.lock().unwrap().push(id.to_string());
        self.sessions.lock().unwrap().remove(id);
        Ok(())
    }
}
