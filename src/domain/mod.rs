//! Domain layer - pure types with no I/O.
//!
//! - Anonymous identity derivation
//! - Monthly windows and usage keys
//! - Request context and caller classification
//! - Admission decisions and the denial signal
//!
//! Everything here is synchronous and side-effect free.

pub mod decision;
pub mod identity;
pub mod request;
pub mod window;
