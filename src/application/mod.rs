//! Application layer - orchestration of domain logic.
//!
//! This layer decides admission and talks to the counter store:
//! - Quota ledger (monthly read-check-write against the store)
//! - Admission policy (bypass, anonymous, authenticated routing)
//! - Circuit breaker and metrics around the store
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod admission;
pub mod circuit_breaker;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod ports;
