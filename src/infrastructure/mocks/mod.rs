//! Mock implementations for testing.
//!
//! Test doubles for the clock, the counter store and log output.

pub mod clock;
pub mod layer;
pub mod store;

pub use clock::MockClock;
pub use layer::{CapturedEvent, MockCaptureLayer};
pub use store::{FailingStore, StallingStore, StoreOp};
