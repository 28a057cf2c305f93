//! Persistence ports for orders and posts.
//!
//! Both stores only promise per-record atomicity. There is no multi-record
//! transaction; workflows rely on guarded single-record writes instead.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use marketdesk_content::{PlatformEntry, Post};
use marketdesk_core::{DomainError, OrderId, PostId};
use marketdesk_orders::{Order, PaymentStatus, SettleOutcome};

pub use memory::{InMemoryOrderRepository, InMemoryPostRepository};
pub use postgres::{ensure_schema, PostgresOrderRepository, PostgresPostRepository};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage error: {0}")]
    Storage(String),
}

impl RepositoryError {
    pub fn order_not_found(id: OrderId) -> Self {
        Self::NotFound(format!("order {id}"))
    }

    pub fn post_not_found(id: PostId) -> Self {
        Self::NotFound(format!("post {id}"))
    }
}

#[async_trait]
pub trait OrderRepository: Send + Sync + 'static {
    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;

    /// Fails with a conflict when the id is already taken.
    async fn insert(&self, order: &Order) -> Result<(), RepositoryError>;

    /// Attach a checkout session and return the updated order.
    async fn link_checkout(
        &self,
        id: OrderId,
        checkout_session_id: &str,
        mini_app_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Order, RepositoryError>;

    /// Conditional write: only an order still in `pending` is changed.
    ///
    /// Safe to repeat; a second call reports `AlreadySettled`.
    async fn settle(
        &self,
        id: OrderId,
        outcome: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<SettleOutcome, RepositoryError>;
}

#[async_trait]
pub trait PostRepository: Send + Sync + 'static {
    async fn list_all(&self) -> Result<Vec<Post>, RepositoryError>;

    /// Posts whose release time has passed and that still have at least one
    /// `scheduled` platform entry.
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Post>, RepositoryError>;

    async fn get(&self, id: PostId) -> Result<Option<Post>, RepositoryError>;

    async fn insert(&self, post: &Post) -> Result<(), RepositoryError>;

    /// Replace the platform entries of one post.
    async fn update_platforms(
        &self,
        id: PostId,
        platforms: &[PlatformEntry],
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}
