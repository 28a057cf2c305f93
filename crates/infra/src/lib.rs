//! Infrastructure layer: storage, task transports, external services, and the
//! workflows that tie them together.

pub mod config;
pub mod payments;
pub mod repositories;
pub mod tasks;
pub mod workers;
pub mod workflows;
