//! `marketdesk-core`: shared domain building blocks.
//!
//! Identifiers, the domain error model and the clock abstraction. No IO here.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{OrderId, PostId, TaskId};
