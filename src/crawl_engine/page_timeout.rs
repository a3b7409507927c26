//! Timeout utilities for page operations
//!
//! Bounds navigation and other long page operations so a hung tab turns into
//! a per-item `Timeout` failure instead of stalling a worker.

use std::future::Future;
use std::time::Duration;

use crate::page_source::PageError;

/// Wrap an async page operation with an explicit timeout
///
/// # Arguments
/// * `operation` - The async Future to execute with a timeout
/// * `timeout_secs` - Timeout duration in seconds
/// * `operation_name` - Human-readable name for error messages
///
/// # Returns
/// * `Ok(T)` - Operation completed successfully
/// * `Err` - Either the operation failed or `PageError::Timeout` was reached
pub async fn with_page_timeout<F, T>(
    operation: F,
    timeout_secs: u64,
    operation_name: &str,
) -> Result<T, PageError>
where
    F: Future<Output = Result<T, PageError>>,
{
    match tokio::time::timeout(Duration::from_secs(timeout_secs), operation).await {
        Ok(result) => result,
        Err(_) => Err(PageError::Timeout {
            operation: operation_name.to_string(),
            secs: timeout_secs,
        }),
    }
}
