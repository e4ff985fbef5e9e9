use deadpool_postgres::Pool;
use std::future::Future;
use tokio_postgres::Row;
use tokio_postgres::error::SqlState;

use crate::{
    error::{AppError, Result},
    models::session::Session,
};

/// How often a locked update is attempted before a serialization failure
/// is surfaced.
const MAX_TX_ATTEMPTS: usize = 3;

/// Storage for federated sessions.
pub trait SessionStore: Send + Sync {
    /// Loads the session with an exclusive lock, lets `apply` modify it and
    /// persists the new expiry and metadata in the same transaction.
    ///
    /// `apply` may run more than once if the transaction is retried. If it
    /// fails nothing is written.
    fn update_locked<F>(
        &self,
        id: &str,
        apply: F,
    ) -> impl Future<Output = Result<Session>> + Send
    where
        F: FnMut(&mut Session) -> Result<()> + Send;

    /// Deletes the session. Deleting a missing session is not an error.
    fn delete(&self, id: &str) -> impl Future<Output = Result<()>> + Send;
}

/// One attempt of a locked read-modify-write.
///
/// Attempts report lost serialization races as [`AppError::Conflict`].
trait LockedUpdate: Sync {
    fn attempt<F>(
        &self,
        id: &str,
        apply: &mut F,
    ) -> impl Future<Output = Result<Session>> + Send
    where
        F: FnMut(&mut Session) -> Result<()> + Send;
}

/// Runs `apply` through `target`, starting over on conflicts.
async fn update_with_retry<T, F>(target: &T, id: &str, mut apply: F) -> Result<Session>
where
    T: LockedUpdate,
    F: FnMut(&mut Session) -> Result<()> + Send,
{
    let mut attempt = 1;
    loop {
        match target.attempt(id, &mut apply).await {
            Err(AppError::Conflict) if attempt < MAX_TX_ATTEMPTS => {
                tracing::debug!(
                    "🔁 Serialization failure updating session, retrying (attempt {})",
                    attempt
                );
                attempt += 1;
            }
            result => return result,
        }
    }
}

fn conflict_or_database(e: tokio_postgres::Error) -> AppError {
    if e.code() == Some(&SqlState::T_R_SERIALIZATION_FAILURE) {
        AppError::Conflict
    } else {
        AppError::Database(e)
    }
}

fn column<'r, T>(row: &'r Row, name: &str) -> Result<T>
where
    T: tokio_postgres::types::FromSql<'r>,
{
    row.try_get(name)
        .map_err(|_| AppError::MissingData(name.to_string()))
}

/// A helper function to map a `tokio_postgres::Row` to a `Session`.
fn row_to_session(id: &str, row: &Row) -> Result<Session> {
    Ok(Session {
        id: id.to_string(),
        account_id: column(row, "account_id")?,
        account_creation_time: column(row, "account_creation_time")?,
        issuer: column(row, "issuer")?,
        id_at_issuer: column(row, "id_at_issuer")?,
        creation_time: column(row, "creation_time")?,
        expiration_time: column(row, "expiration_time")?,
        metadata: column(row, "metadata")?,
    })
}

/// PostgreSQL-backed [`SessionStore`].
#[derive(Clone)]
pub struct PgSessionStore {
    pool: Pool,
}

impl PgSessionStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

impl LockedUpdate for PgSessionStore {
    async fn attempt<F>(&self, id: &str, apply: &mut F) -> Result<Session>
    where
        F: FnMut(&mut Session) -> Result<()> + Send,
    {
        let mut client = self.pool.get().await?;
        let transaction = client.transaction().await.map_err(conflict_or_database)?;

        let row = transaction
            .query_opt(
                r#"
                SELECT
                    acc.id AS account_id,
                    acc.creation_time AS account_creation_time,
                    acc_fed.issuer,
                    acc_fed.id_at_issuer,
                    acc_fed_sess.creation_time,
                    acc_fed_sess.expiration_time,
                    acc_fed_sess.metadata
                FROM account_federation_sessions acc_fed_sess
                INNER JOIN account_federations acc_fed
                ON acc_fed_sess.issuer = acc_fed.issuer
                AND acc_fed_sess.id_at_issuer = acc_fed.id_at_issuer
                INNER JOIN accounts acc
                ON acc_fed.account_id = acc.id
                WHERE acc_fed_sess.id = $1
                FOR UPDATE OF acc_fed_sess
                "#,
                &[&id],
            )
            .await
            .map_err(conflict_or_database)?
            .ok_or(AppError::NotFound)?;

        // dropping the transaction without commit rolls it back
        let mut session = row_to_session(id, &row)?;
        apply(&mut session)?;

        transaction
            .execute(
                r#"
                UPDATE account_federation_sessions
                SET expiration_time = $2, metadata = $3
                WHERE id = $1
                "#,
                &[&id, &session.expiration_time, &session.metadata],
            )
            .await
            .map_err(conflict_or_database)?;

        transaction.commit().await.map_err(conflict_or_database)?;
        Ok(session)
    }
}

impl SessionStore for PgSessionStore {
    async fn update_locked<F>(&self, id: &str, apply: F) -> Result<Session>
    where
        F: FnMut(&mut Session) -> Result<()> + Send,
    {
        update_with_retry(self, id, apply).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "DELETE FROM account_federation_sessions WHERE id = $1",
                &[&id],
            )
            .await?;
        Ok(())
    }
}
