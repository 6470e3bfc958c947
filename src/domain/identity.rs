//! Anonymous caller fingerprinting.
//!
//! Callers who present no credentials are identified by a digest of the
//! network address they connect from and the agent string they declare:
//!
//! ```text
//! SHA-256("<address>:<user-agent>")  ->  64 lowercase hex characters
//! ```
//!
//! This is a heuristic, not authentication. Several people behind one NAT
//! with the same browser collapse into one identity, and anyone can change
//! their agent string. The goal is only to make clearing cookies insufficient
//! to reset a quota.

use sha2::{Digest, Sha256};
use std::fmt;

/// Length of an identity digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// A stable, non-reversible identity for an anonymous caller.
///
/// Two requests with the same `(address, agent)` pair always produce the same
/// identity, in this process or any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnonymousIdentity([u8; DIGEST_LEN]);

impl AnonymousIdentity {
    /// Derive the identity for a caller.
    ///
    /// A missing agent string is hashed as the empty string.
    ///
    /// # Example
    /// ```
    /// use anon_quota::AnonymousIdentity;
    ///
    /// let a = AnonymousIdentity::derive("203.0.113.9", Some("curl/8.5"));
    /// let b = AnonymousIdentity::derive("203.0.113.9", Some("curl/8.5"));
    /// assert_eq!(a, b);
    /// assert_eq!(a.to_hex().len(), 64);
    /// ```
    pub fn derive(address: &str, agent: Option<&str>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(address.as_bytes());
        hasher.update(b":");
        hasher.update(agent.unwrap_or("").as_bytes());
        AnonymousIdentity(hasher.finalize().into())
    }

    /// Wrap an already computed digest.
    pub fn from_digest(digest: [u8; DIGEST_LEN]) -> Self {
        AnonymousIdentity(digest)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Lowercase hex encoding, as written into counter keys.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for AnonymousIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
