//! Infrastructure layer - external adapters and integrations.
//!
//! This layer provides adapters for:
//! - Clock abstraction (system time vs mock)
//! - Counter stores (Redis, in-memory)
//! - Configuration and limit sources
//! - HTTP integration (Tower layer for axum)

pub mod clock;
pub mod config;
pub mod memory_store;

#[cfg(feature = "redis-store")]
pub mod redis_store;

#[cfg(feature = "axum")]
pub mod layer;

/// Mock implementations for testing.
///
/// This module is only available when the `test-helpers` feature is enabled,
/// or during test builds. It provides controllable test doubles for driving
/// month rollover and store failures.
///
/// To use these mocks in integration tests, add to your `Cargo.toml`:
/// ```toml
/// [dev-dependencies]
/// anon-quota = { version = "*", features = ["test-helpers"] }
/// ```
#[cfg(any(test, feature = "test-helpers"))]
pub mod mocks;
