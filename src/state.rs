use std::sync::Arc;

use chrono::TimeDelta;

use crate::config::Config;
use crate::crypto::session_token::SessionTokenCodec;
use crate::repositories::session::PgSessionStore;

/// The application's state, generic over where sessions live.
pub struct AppState<S = PgSessionStore> {
    /// The application's configuration.
    pub config: Config,
    /// Signs and verifies session tokens.
    pub codec: Arc<SessionTokenCodec>,
    /// Session persistence.
    pub store: Arc<S>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            codec: Arc::clone(&self.codec),
            store: Arc::clone(&self.store),
        }
    }
}

impl AppState {
    /// Creates a new `AppState` backed by PostgreSQL.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let db = crate::db::create_pool(&config.database_url)?;
        tracing::info!("✅ PostgreSQL Pool initialized with deadpool-postgres");

        let codec = config.session_token_codec()?;
        tracing::info!("✅ Session token codec initialized");

        Ok(Self::with_store(config.clone(), codec, Arc::new(PgSessionStore::new(db))))
    }
}

impl<S> AppState<S> {
    /// Assembles a state around an existing session store.
    pub fn with_store(config: Config, codec: SessionTokenCodec, store: Arc<S>) -> Self {
        Self {
            config,
            codec: Arc::new(codec),
            store,
        }
    }

    /// How long each refresh extends a session.
    pub fn session_lifetime(&self) -> TimeDelta {
        TimeDelta::days(self.config.session_duration_days)
    }
}
