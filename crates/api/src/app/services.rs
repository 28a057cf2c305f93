//! Infrastructure wiring for the HTTP API and its background workers.

use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;
use tracing::{info, warn};

use marketdesk_core::{Clock, SystemClock};
use marketdesk_infra::config::{AppConfig, TaskTransportConfig};
use marketdesk_infra::payments::{HttpPaymentGateway, InMemoryPaymentGateway, PaymentGateway};
use marketdesk_infra::repositories::{
    ensure_schema, InMemoryOrderRepository, InMemoryPostRepository, OrderRepository, PostRepository,
    PostgresOrderRepository, PostgresPostRepository,
};
use marketdesk_infra::tasks::{
    DeliveryVerifier, HttpPushQueue, InMemoryTaskQueue, RedisTaskQueue, Scheduler, TaskExecutor, TaskExecutorConfig,
    TaskExecutorHandle, TaskSource,
};
use marketdesk_infra::workflows::{
    PaymentCheckHandler, PaymentReconciliation, ScheduledPostPublisher, CHECK_PAYMENT_STATUS,
    PAYMENT_STATUS_QUEUE,
};

/// Everything the handlers and workers share.
pub struct AppServices {
    pub orders: Arc<dyn OrderRepository>,
    pub posts: Arc<dyn PostRepository>,
    pub scheduler: Scheduler,
    pub reconciliation: Arc<PaymentReconciliation>,
    pub publisher: Arc<ScheduledPostPublisher>,
    pub executor: Arc<TaskExecutor>,
    /// Worker side of the transport; `None` when the transport pushes tasks
    /// to `POST /tasks/deliver` instead.
    pub task_source: Option<Arc<dyn TaskSource>>,
    /// Authenticates `POST /tasks/deliver`; deliveries are refused when unset.
    pub delivery: Option<DeliveryVerifier>,
    pub clock: Arc<dyn Clock>,
}

/// Handles to the in-memory adapters behind `AppServices::in_memory`.
#[derive(Debug, Clone)]
pub struct InMemoryBackends {
    pub queue: Arc<InMemoryTaskQueue>,
    pub gateway: Arc<InMemoryPaymentGateway>,
    pub orders: Arc<InMemoryOrderRepository>,
    pub posts: Arc<InMemoryPostRepository>,
}

impl AppServices {
    fn assemble(
        orders: Arc<dyn OrderRepository>,
        posts: Arc<dyn PostRepository>,
        gateway: Arc<dyn PaymentGateway>,
        scheduler: Scheduler,
        task_source: Option<Arc<dyn TaskSource>>,
        delivery: Option<DeliveryVerifier>,
        config: &AppConfig,
    ) -> Self {
        let reconciliation = Arc::new(
            PaymentReconciliation::new(orders.clone(), gateway, scheduler.clone())
                .with_recheck_delay(config.payment_recheck_delay),
        );
        let publisher = Arc::new(ScheduledPostPublisher::new(posts.clone()));

        let mut executor = TaskExecutor::new();
        executor.register_handler(
            CHECK_PAYMENT_STATUS,
            Arc::new(PaymentCheckHandler::new(reconciliation.clone())),
        );

        Self {
            orders,
            posts,
            scheduler,
            reconciliation,
            publisher,
            executor: Arc::new(executor),
            task_source,
            delivery,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_delivery_verifier(mut self, verifier: DeliveryVerifier) -> Self {
        self.delivery = Some(verifier);
        self
    }

    /// Fully in-process wiring for tests and local runs.
    pub fn in_memory() -> (Self, InMemoryBackends) {
        let backends = InMemoryBackends {
            queue: InMemoryTaskQueue::arc(),
            gateway: Arc::new(InMemoryPaymentGateway::new()),
            orders: Arc::new(InMemoryOrderRepository::new()),
            posts: Arc::new(InMemoryPostRepository::new()),
        };
        let services = Self::assemble(
            backends.orders.clone(),
            backends.posts.clone(),
            backends.gateway.clone(),
            Scheduler::new(backends.queue.clone()),
            Some(backends.queue.clone()),
            None,
            &AppConfig::default(),
        );
        (services, backends)
    }

    /// Start the polling executor when the transport has a worker side.
    pub fn spawn_executor(&self, config: &AppConfig) -> Option<TaskExecutorHandle> {
        let source = self.task_source.clone()?;
        Some(self.executor.clone().spawn(
            source,
            TaskExecutorConfig::default()
                .with_name("payment-status-worker")
                .with_queue(PAYMENT_STATUS_QUEUE)
                .with_poll_interval(config.task_poll_interval),
        ))
    }
}

pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let (orders, posts): (Arc<dyn OrderRepository>, Arc<dyn PostRepository>) = match &config.database_url {
        Some(url) => {
            let pool = PgPool::connect(url)
                .await
                .context("failed to connect to Postgres")?;
            ensure_schema(&pool).await.context("failed to prepare database schema")?;
            info!("using Postgres repositories");
            (
                Arc::new(PostgresOrderRepository::new(pool.clone())),
                Arc::new(PostgresPostRepository::new(pool)),
            )
        }
        None => {
            warn!("DATABASE_URL not set; orders and posts are kept in memory");
            (
                Arc::new(InMemoryOrderRepository::new()),
                Arc::new(InMemoryPostRepository::new()),
            )
        }
    };

    let gateway: Arc<dyn PaymentGateway> = match &config.payment_api_url {
        Some(url) => {
            let mut gateway = HttpPaymentGateway::new(url.clone());
            if let Some(key) = &config.payment_api_key {
                gateway = gateway.with_api_key(key.clone());
            }
            Arc::new(gateway)
        }
        None => {
            warn!("PAYMENT_API_URL not set; every payment check reports pending");
            Arc::new(InMemoryPaymentGateway::new())
        }
    };

    let (scheduler, task_source, delivery): (Scheduler, Option<Arc<dyn TaskSource>>, Option<DeliveryVerifier>) =
        match &config.task_transport {
            TaskTransportConfig::InMemory => {
                warn!("no task transport configured; tasks are lost on restart");
                let queue = InMemoryTaskQueue::arc();
                (Scheduler::new(queue.clone()), Some(queue), None)
            }
            TaskTransportConfig::Redis { url } => {
                let queue = Arc::new(RedisTaskQueue::new(url).context("invalid REDIS_URL")?);
                (Scheduler::new(queue.clone()), Some(queue), None)
            }
            TaskTransportConfig::HttpPush(settings) => {
                let queue = Arc::new(HttpPushQueue::new(settings.clone().into()));
                (Scheduler::new(queue), None, Some(settings.delivery_verifier()))
            }
        };
    info!(transport = scheduler.transport_name(), "task scheduler ready");

    Ok(AppServices::assemble(
        orders,
        posts,
        gateway,
        scheduler,
        task_source,
        delivery,
        config,
    ))
}
