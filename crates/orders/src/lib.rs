//! Orders domain module (payment-relevant subset).
//!
//! Business rules for linking an order to a provider checkout session and for
//! settling its payment status, implemented as deterministic domain logic
//! (no IO, no HTTP, no storage).

pub mod order;

pub use order::{Order, PaymentStatus, ProviderStatus, SettleOutcome};
