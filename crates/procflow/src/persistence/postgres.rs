//! PostgreSQL implementation of SubscriptionStore
//!
//! Production persistence using PostgreSQL with:
//! - A unique constraint enforcing one live entry per `(token_id, kind, name)`
//! - Transactions for upsert and replace so readers never see a half swap

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;
use crate::execution::TokenId;
use crate::scope::ScopeId;
use crate::subscription::{OccurrenceKind, SubscriptionEntry};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS procflow_event_subscriptions (
        id UUID PRIMARY KEY,
        token_id UUID NOT NULL,
        kind TEXT NOT NULL,
        name TEXT NOT NULL,
        scope_id TEXT,
        asynchronous BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CONSTRAINT procflow_event_subscriptions_key UNIQUE (token_id, kind, name)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_procflow_event_subscriptions_occurrence
        ON procflow_event_subscriptions (kind, name)
    "#,
];

/// PostgreSQL implementation of SubscriptionStore
///
/// Uses a connection pool for efficient database access.
///
/// # Example
///
/// ```ignore
/// use procflow::PostgresSubscriptionStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/mydb").await?;
/// let store = PostgresSubscriptionStore::new(pool);
/// store.ensure_schema().await?;
/// ```
#[derive(Clone)]
pub struct PostgresSubscriptionStore {
    pool: PgPool,
}

impl PostgresSubscriptionStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the subscription table and indexes if they do not exist
    #[instrument(skip(self))]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    error!("Failed to create subscription schema: {}", e);
                    StoreError::Database(e.to_string())
                })?;
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for PostgresSubscriptionStore {
    #[instrument(skip(self, entry), fields(token_id = %entry.token_id, kind = %entry.kind, name = %entry.name))]
    async fn insert(&self, entry: SubscriptionEntry) -> Result<(), StoreError> {
        insert_row(&self.pool, &entry).await?;

        debug!(subscription_id = %entry.id, "inserted subscription");
        Ok(())
    }

    #[instrument(skip(self, entry), fields(token_id = %entry.token_id, kind = %entry.kind, name = %entry.name))]
    async fn upsert(
        &self,
        entry: SubscriptionEntry,
    ) -> Result<Option<SubscriptionEntry>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let previous = sqlx::query(
            r#"
            DELETE FROM procflow_event_subscriptions
            WHERE token_id = $1 AND kind = $2 AND name = $3
            RETURNING id, token_id, kind, name, scope_id, asynchronous, created_at
            "#,
        )
        .bind(entry.token_id.as_uuid())
        .bind(entry.kind.as_str())
        .bind(&entry.name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .map(|row| entry_from_row(&row))
        .transpose()?;

        insert_row(&mut *tx, &entry).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        debug!(subscription_id = %entry.id, replaced = previous.is_some(), "upserted subscription");
        Ok(previous)
    }

    #[instrument(skip(self, entry), fields(token_id = %entry.token_id))]
    async fn replace(&self, old_id: Uuid, entry: SubscriptionEntry) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let deleted = sqlx::query(
            r#"
            DELETE FROM procflow_event_subscriptions
            WHERE id = $1 AND token_id = $2
            "#,
        )
        .bind(old_id)
        .bind(entry.token_id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .rows_affected();

        if deleted == 0 {
            return Err(StoreError::SubscriptionNotFound(old_id));
        }

        insert_row(&mut *tx, &entry).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        debug!(%old_id, new_id = %entry.id, "replaced subscription");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, token_id: TokenId, subscription_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM procflow_event_subscriptions
            WHERE id = $1 AND token_id = $2
            "#,
        )
        .bind(subscription_id)
        .bind(token_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to delete subscription: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn delete_for_token(&self, token_id: TokenId) -> Result<usize, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM procflow_event_subscriptions
            WHERE token_id = $1
            "#,
        )
        .bind(token_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to delete token subscriptions: {}", e);
            StoreError::Database(e.to_string())
        })?;

        debug!(%token_id, removed = result.rows_affected(), "deleted token subscriptions");
        Ok(result.rows_affected() as usize)
    }

    #[instrument(skip(self))]
    async fn lookup(
        &self,
        kind: OccurrenceKind,
        name: &str,
        token_id: TokenId,
    ) -> Result<Option<SubscriptionEntry>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, token_id, kind, name, scope_id, asynchronous, created_at
            FROM procflow_event_subscriptions
            WHERE token_id = $1 AND kind = $2 AND name = $3
            "#,
        )
        .bind(token_id.as_uuid())
        .bind(kind.as_str())
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to look up subscription: {}", e);
            StoreError::Database(e.to_string())
        })?;

        row.map(|r| entry_from_row(&r)).transpose()
    }

    #[instrument(skip(self))]
    async fn entries_for(&self, token_id: TokenId) -> Result<Vec<SubscriptionEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, token_id, kind, name, scope_id, asynchronous, created_at
            FROM procflow_event_subscriptions
            WHERE token_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(token_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to load token subscriptions: {}", e);
            StoreError::Database(e.to_string())
        })?;

        rows.iter().map(entry_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn find_by_occurrence(
        &self,
        kind: OccurrenceKind,
        name: &str,
    ) -> Result<Vec<SubscriptionEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, token_id, kind, name, scope_id, asynchronous, created_at
            FROM procflow_event_subscriptions
            WHERE kind = $1 AND name = $2
            ORDER BY created_at, id
            "#,
        )
        .bind(kind.as_str())
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to find subscriptions: {}", e);
            StoreError::Database(e.to_string())
        })?;

        rows.iter().map(entry_from_row).collect()
    }
}

// =========================================================================
// Helper Functions
// =========================================================================

async fn insert_row<'e, E>(executor: E, entry: &SubscriptionEntry) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO procflow_event_subscriptions
            (id, token_id, kind, name, scope_id, asynchronous, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(entry.id)
    .bind(entry.token_id.as_uuid())
    .bind(entry.kind.as_str())
    .bind(&entry.name)
    .bind(entry.scope_id.as_ref().map(|s| s.as_str()))
    .bind(entry.asynchronous)
    .bind(entry.created_at)
    .execute(executor)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::duplicate(entry),
        _ => {
            error!("Failed to insert subscription: {}", e);
            StoreError::Database(e.to_string())
        }
    })?;

    Ok(())
}

fn entry_from_row(row: &PgRow) -> Result<SubscriptionEntry, StoreError> {
    let kind_str: String = row.get("kind");
    let kind = kind_str
        .parse::<OccurrenceKind>()
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    let scope_id: Option<String> = row.get("scope_id");
    let created_at: DateTime<Utc> = row.get("created_at");

    Ok(SubscriptionEntry {
        id: row.get("id"),
        kind,
        name: row.get("name"),
        token_id: TokenId::from_uuid(row.get("token_id")),
        scope_id: scope_id.map(ScopeId::from),
        asynchronous: row.get("asynchronous"),
        created_at,
    })
}
