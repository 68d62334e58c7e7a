//! Rule reader service contract
//!
//! The rule reader is the authoritative authorization backend that the rule
//! cache wraps. It is usually a remote service and may be slow, so every call
//! is async and fallible.
//!
//! # Contract
//!
//! - `get_access_info` and `get_admin_authorization` receive an owned
//!   [`RuleFilter`]. Implementations may normalise or otherwise mutate it;
//!   callers must pass a copy of any filter they keep.
//! - `authorize` returns `Ok(None)` for rejected credentials. That is an
//!   expected outcome, not a failure.
//! - Transport problems are reported as [`RuleReaderError`].

use async_trait::async_trait;
use thiserror::Error;

pub mod models;

pub use models::*;

/// Rule reader service errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleReaderError {
    /// Backend unreachable or refusing connections
    #[error("Rule service unavailable: {0}")]
    Unavailable(String),

    /// Request did not complete in time
    #[error("Rule service request timed out")]
    Timeout,

    /// The backend rejected the filter
    #[error("Invalid rule filter: {0}")]
    InvalidFilter(String),

    /// Any other backend fault
    #[error("Rule service internal error: {0}")]
    Internal(String),
}

impl From<&str> for RuleReaderError {
    fn from(s: &str) -> Self {
        RuleReaderError::Unavailable(s.to_string())
    }
}

/// Authoritative authorization backend
#[async_trait]
pub trait RuleReaderService: Send + Sync {
    /// Resolve the access rules matching `filter`
    async fn get_access_info(&self, filter: RuleFilter) -> Result<AccessInfo, RuleReaderError>;

    /// Resolve the administrative rights matching `filter`
    async fn get_admin_authorization(
        &self,
        filter: RuleFilter,
    ) -> Result<AccessInfo, RuleReaderError>;

    /// Check credentials, `Ok(None)` when they are not valid
    async fn authorize(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<AuthUser>, RuleReaderError>;
}
