//! In-memory repositories for tests/dev.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use marketdesk_content::{PlatformEntry, Post};
use marketdesk_core::{DomainError, OrderId, PostId};
use marketdesk_orders::{Order, PaymentStatus, SettleOutcome};

use super::{OrderRepository, PostRepository, RepositoryError};

fn poisoned() -> RepositoryError {
    RepositoryError::Storage("repository lock poisoned".to_string())
}

#[derive(Debug, Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<OrderId, Order>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<OrderId, Order>>, RepositoryError> {
        self.orders.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<OrderId, Order>>, RepositoryError> {
        self.orders.write().map_err(|_| poisoned())
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.read()?.get(&id).cloned())
    }

    async fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut orders = self.write()?;
        if orders.contains_key(&order.id) {
            return Err(DomainError::conflict(format!("order {} already exists", order.id)).into());
        }
        orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn link_checkout(
        &self,
        id: OrderId,
        checkout_session_id: &str,
        mini_app_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Order, RepositoryError> {
        let mut orders = self.write()?;
        let order = orders
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::order_not_found(id))?;
        order.link_checkout(checkout_session_id, mini_app_id, now)?;
        Ok(order.clone())
    }

    async fn settle(
        &self,
        id: OrderId,
        outcome: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<SettleOutcome, RepositoryError> {
        let mut orders = self.write()?;
        let order = orders
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::order_not_found(id))?;
        Ok(order.settle(outcome, now)?)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPostRepository {
    posts: RwLock<HashMap<PostId, Post>>,
}

impl InMemoryPostRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<PostId, Post>>, RepositoryError> {
        self.posts.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<PostId, Post>>, RepositoryError> {
        self.posts.write().map_err(|_| poisoned())
    }
}

#[async_trait]
impl PostRepository for InMemoryPostRepository {
    async fn list_all(&self) -> Result<Vec<Post>, RepositoryError> {
        let mut posts: Vec<Post> = self.read()?.values().cloned().collect();
        posts.sort_by_key(|p| p.id);
        Ok(posts)
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Post>, RepositoryError> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|p| p.is_due(now) && p.has_scheduled_entries())
            .collect())
    }

    async fn get(&self, id: PostId) -> Result<Option<Post>, RepositoryError> {
        Ok(self.read()?.get(&id).cloned())
    }

    async fn insert(&self, post: &Post) -> Result<(), RepositoryError> {
        let mut posts = self.write()?;
        if posts.contains_key(&post.id) {
            return Err(DomainError::conflict(format!("post {} already exists", post.id)).into());
        }
        posts.insert(post.id, post.clone());
        Ok(())
    }

    async fn update_platforms(
        &self,
        id: PostId,
        platforms: &[PlatformEntry],
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut posts = self.write()?;
        let post = posts
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::post_not_found(id))?;
        post.platforms = platforms.to_vec();
        post.updated_at = updated_at;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use marketdesk_content::PublicationStatus;

    fn order_id(n: i64) -> OrderId {
        OrderId::new(n).unwrap()
    }

    #[tokio::test]
    async fn settle_is_a_guarded_write() {
        let repo = InMemoryOrderRepository::new();
        let now = Utc::now();
        repo.insert(&Order::pending(order_id(42), now)).await.unwrap();

        let first = repo.settle(order_id(42), PaymentStatus::Success, now).await.unwrap();
        let again = repo.settle(order_id(42), PaymentStatus::Failed, now).await.unwrap();

        assert_eq!(first, SettleOutcome::Applied(PaymentStatus::Success));
        assert_eq!(again, SettleOutcome::AlreadySettled(PaymentStatus::Success));
        assert!(repo.get(order_id(42)).await.unwrap().unwrap().is_paid());
    }

    #[tokio::test]
    async fn missing_order_is_not_found() {
        let repo = InMemoryOrderRepository::new();
        let now = Utc::now();
        assert!(matches!(
            repo.link_checkout(order_id(7), "cs_1", None, now).await,
            Err(RepositoryError::NotFound(_))
        ));
        assert!(matches!(
            repo.settle(order_id(7), PaymentStatus::Success, now).await,
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() {
        let repo = InMemoryOrderRepository::new();
        let order = Order::pending(order_id(1), Utc::now());
        repo.insert(&order).await.unwrap();
        assert!(matches!(
            repo.insert(&order).await,
            Err(RepositoryError::Domain(DomainError::Conflict(_)))
        ));
    }

    #[tokio::test]
    async fn list_due_filters_on_time_and_status() {
        let repo = InMemoryPostRepository::new();
        let now = Utc::now();

        let due = Post::schedule("due", &["facebook"], now - Duration::minutes(1), now).unwrap();
        let future = Post::schedule("future", &["facebook"], now + Duration::minutes(1), now).unwrap();
        let mut done = Post::schedule("done", &["x"], now - Duration::minutes(1), now).unwrap();
        done.platforms[0].status = PublicationStatus::Published;

        for post in [&due, &future, &done] {
            repo.insert(post).await.unwrap();
        }

        let listed = repo.list_due(now).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, due.id);
        assert_eq!(repo.list_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn update_platforms_replaces_entries() {
        let repo = InMemoryPostRepository::new();
        let now = Utc::now();
        let post = Post::schedule("p", &["facebook"], now, now).unwrap();
        repo.insert(&post).await.unwrap();

        let later = now + Duration::seconds(5);
        let mut entries = post.platforms.clone();
        entries[0].status = PublicationStatus::Published;
        repo.update_platforms(post.id, &entries, later).await.unwrap();

        let stored = repo.get(post.id).await.unwrap().unwrap();
        assert_eq!(stored.platforms[0].status, PublicationStatus::Published);
        assert_eq!(stored.updated_at, later);
        assert!(matches!(
            repo.update_platforms(PostId::new(), &entries, later).await,
            Err(RepositoryError::NotFound(_))
        ));
    }
}
