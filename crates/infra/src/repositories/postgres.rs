//! Postgres-backed repositories.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | RepositoryError |
//! |------------|----------------------|-----------------|
//! | Database (unique violation) | `23505` | `Domain(Conflict)` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / Io / other | N/A | `Storage` |
//!
//! The settle write is a single conditional `UPDATE ... WHERE payment_status =
//! 'pending'`, so concurrent workers applying the same outcome cannot both win.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::instrument;

use marketdesk_content::{PlatformEntry, Post};
use marketdesk_core::{DomainError, OrderId, PostId};
use marketdesk_orders::{Order, PaymentStatus, SettleOutcome};

use super::{OrderRepository, PostRepository, RepositoryError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    id BIGINT PRIMARY KEY CHECK (id > 0),
    payment_status TEXT NOT NULL DEFAULT 'pending'
        CHECK (payment_status IN ('pending', 'success', 'failed')),
    checkout_session_id TEXT,
    mini_app_id TEXT,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS posts (
    id UUID PRIMARY KEY,
    title TEXT NOT NULL,
    platforms JSONB NOT NULL DEFAULT '[]'::jsonb,
    scheduled_at TIMESTAMPTZ,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS posts_scheduled_at_idx ON posts (scheduled_at)
    WHERE scheduled_at IS NOT NULL;
"#;

/// Create tables and indexes if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), RepositoryError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;
    Ok(())
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => RepositoryError::Domain(DomainError::conflict(msg)),
                _ => RepositoryError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            RepositoryError::Storage(format!("connection pool closed in {}", operation))
        }
        other => RepositoryError::Storage(format!("{} failed: {}", operation, other)),
    }
}

fn decode_error(operation: &str, err: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Storage(format!("failed to decode row in {}: {}", operation, err))
}

fn order_from_row(row: &PgRow) -> Result<Order, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(|e| decode_error("order", e))?;
    let status: String = row.try_get("payment_status").map_err(|e| decode_error("order", e))?;
    Ok(Order {
        id: OrderId::new(id)?,
        payment_status: PaymentStatus::parse(&status)?,
        checkout_session_id: row.try_get("checkout_session_id").map_err(|e| decode_error("order", e))?,
        mini_app_id: row.try_get("mini_app_id").map_err(|e| decode_error("order", e))?,
        updated_at: row.try_get("updated_at").map_err(|e| decode_error("order", e))?,
    })
}

fn post_from_row(row: &PgRow) -> Result<Post, RepositoryError> {
    let id: uuid::Uuid = row.try_get("id").map_err(|e| decode_error("post", e))?;
    let Json(platforms): Json<Vec<PlatformEntry>> =
        row.try_get("platforms").map_err(|e| decode_error("post", e))?;
    Ok(Post {
        id: PostId::from_uuid(id),
        title: row.try_get("title").map_err(|e| decode_error("post", e))?,
        platforms,
        scheduled_at: row.try_get("scheduled_at").map_err(|e| decode_error("post", e))?,
        updated_at: row.try_get("updated_at").map_err(|e| decode_error("post", e))?,
    })
}

#[derive(Debug, Clone)]
pub struct PostgresOrderRepository {
    pool: Arc<PgPool>,
}

impl PostgresOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    #[instrument(skip(self), fields(order_id = %id), err)]
    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, payment_status, checkout_session_id, mini_app_id, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_order", e))?;

        row.as_ref().map(order_from_row).transpose()
    }

    #[instrument(skip(self, order), fields(order_id = %order.id), err)]
    async fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, payment_status, checkout_session_id, mini_app_id, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(order.id.get())
        .bind(order.payment_status.as_str())
        .bind(order.checkout_session_id.as_deref())
        .bind(order.mini_app_id.as_deref())
        .bind(order.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_order", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(order_id = %id), err)]
    async fn link_checkout(
        &self,
        id: OrderId,
        checkout_session_id: &str,
        mini_app_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Order, RepositoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("link_checkout", e))?;

        let row = sqlx::query(
            r#"
            SELECT id, payment_status, checkout_session_id, mini_app_id, updated_at
            FROM orders
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("link_checkout", e))?
        .ok_or_else(|| RepositoryError::order_not_found(id))?;

        let mut order = order_from_row(&row)?;
        order.link_checkout(checkout_session_id, mini_app_id, now)?;

        sqlx::query(
            r#"
            UPDATE orders
            SET checkout_session_id = $2, mini_app_id = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .bind(order.checkout_session_id.as_deref())
        .bind(order.mini_app_id.as_deref())
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("link_checkout", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("link_checkout", e))?;
        Ok(order)
    }

    #[instrument(skip(self), fields(order_id = %id, outcome = %outcome), err)]
    async fn settle(
        &self,
        id: OrderId,
        outcome: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<SettleOutcome, RepositoryError> {
        if !outcome.is_terminal() {
            return Err(DomainError::invariant("an order can only be settled to success or failed").into());
        }

        let applied = sqlx::query(
            r#"
            UPDATE orders
            SET payment_status = $2, updated_at = $3
            WHERE id = $1 AND payment_status = 'pending'
            "#,
        )
        .bind(id.get())
        .bind(outcome.as_str())
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("settle", e))?
        .rows_affected();

        if applied > 0 {
            return Ok(SettleOutcome::Applied(outcome));
        }

        let current = self
            .get(id)
            .await?
            .ok_or_else(|| RepositoryError::order_not_found(id))?;
        Ok(SettleOutcome::AlreadySettled(current.payment_status))
    }
}

#[derive(Debug, Clone)]
pub struct PostgresPostRepository {
    pool: Arc<PgPool>,
}

impl PostgresPostRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

#[async_trait]
impl PostRepository for PostgresPostRepository {
    #[instrument(skip(self), err)]
    async fn list_all(&self) -> Result<Vec<Post>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, platforms, scheduled_at, updated_at
            FROM posts
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_posts", e))?;

        rows.iter().map(post_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Post>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, platforms, scheduled_at, updated_at
            FROM posts
            WHERE scheduled_at <= $1
              AND platforms @> '[{"status": "scheduled"}]'::jsonb
            ORDER BY scheduled_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_due_posts", e))?;

        rows.iter().map(post_from_row).collect()
    }

    #[instrument(skip(self), fields(post_id = %id), err)]
    async fn get(&self, id: PostId) -> Result<Option<Post>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, title, platforms, scheduled_at, updated_at
            FROM posts
            WHERE id = $1
            "#,
        )
        .bind(*id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_post", e))?;

        row.as_ref().map(post_from_row).transpose()
    }

    #[instrument(skip(self, post), fields(post_id = %post.id), err)]
    async fn insert(&self, post: &Post) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO posts (id, title, platforms, scheduled_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(*post.id.as_uuid())
        .bind(&post.title)
        .bind(Json(&post.platforms))
        .bind(post.scheduled_at)
        .bind(post.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_post", e))?;
        Ok(())
    }

    #[instrument(skip(self, platforms), fields(post_id = %id), err)]
    async fn update_platforms(
        &self,
        id: PostId,
        platforms: &[PlatformEntry],
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE posts
            SET platforms = $2, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(*id.as_uuid())
        .bind(Json(platforms))
        .bind(updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_platforms", e))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::post_not_found(id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_closed_maps_to_storage() {
        assert!(matches!(
            map_sqlx_error("settle", sqlx::Error::PoolClosed),
            RepositoryError::Storage(msg) if msg.contains("settle")
        ));
    }

    #[test]
    fn row_not_found_maps_to_storage() {
        assert!(matches!(
            map_sqlx_error("get_order", sqlx::Error::RowNotFound),
            RepositoryError::Storage(_)
        ));
    }

    #[test]
    fn schema_declares_both_tables() {
        assert!(SCHEMA.contains("CREATE TABLE IF NOT EXISTS orders"));
        assert!(SCHEMA.contains("CREATE TABLE IF NOT EXISTS posts"));
    }
}
