//! External scanner access.
//!
//! The scanner answers form-encoded scan queries with JSON candidate lists.
//! Every request must carry an anti-forgery token taken from the scanner's
//! homepage cookie; the token expires without notice, so [`ScannerClient`]
//! refreshes it and retries once when a request is rejected.

mod client;

pub use client::{ScannerClient, XSRF_COOKIE};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::data::ScanCandidate;

/// Errors from the scanner.
#[derive(Debug, Error)]
pub enum ScannerError {
    /// Homepage response carried no XSRF cookie
    #[error("XSRF token not found in scanner homepage response")]
    TokenNotFound,
    /// Non-success status after the single retry
    #[error("Scanner returned HTTP {code}")]
    Status { code: u16 },
    /// Body was not the expected JSON
    #[error("Failed to decode scanner response: {0}")]
    Decode(String),
    /// Connection failed or timed out
    #[error("Scanner request failed: {0}")]
    Network(String),
}

impl ScannerError {
    /// HTTP 419: the scanner's token-mismatch status
    pub fn is_token_mismatch(&self) -> bool {
        matches!(self, Self::Status { code: 419 })
    }
}

/// Anything that can turn a scan clause into candidates.
#[async_trait]
pub trait ScanSource: Send + Sync {
    /// Run a scan clause and return the matching candidates.
    async fn fetch_candidates(&self, clause: &str) -> Result<Vec<ScanCandidate>, ScannerError>;
}

#[async_trait]
impl<S: ScanSource + ?Sized> ScanSource for Arc<S> {
    async fn fetch_candidates(&self, clause: &str) -> Result<Vec<ScanCandidate>, ScannerError> {
        (**self).fetch_candidates(clause).await
    }
}
