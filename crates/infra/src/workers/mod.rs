pub mod publisher_worker;

pub use publisher_worker::{PublisherWorker, WorkerHandle, DEFAULT_PUBLISH_INTERVAL};
