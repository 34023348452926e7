//! Retry policy: is a given failure worth retrying, and how long to wait.
//!
//! Deliberately not wired automatically into the PE Manager's `send`/
//! `subscribe` paths -- callers decide whether and when to retry, this
//! module only answers the two questions consistently.

use crate::error::{NakDetails, PeError};
use std::future::Future;
use std::time::Duration;

/// Suggested backoff for each retryable failure, per the PE core's error
/// handling design.
pub const TIMEOUT_RETRY_DELAY: Duration = Duration::from_millis(100);
pub const TRANSPORT_ERROR_RETRY_DELAY: Duration = Duration::from_millis(200);
pub const NAK_BUSY_RETRY_DELAY: Duration = Duration::from_millis(500);
pub const NAK_TOO_MANY_REQUESTS_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Whether `err` represents a condition worth retrying.
///
/// Retryable: `Timeout`, `TransportError`, `InvalidResponse` (possible
/// corruption), a NAK whose detail code is `busy` or `too-many-requests`,
/// and a device error with status >= 500. Everything else (validation
/// failures, `DeviceNotFound`, a NAK carrying any other detail code,
/// `Cancelled`, `RequestIdExhausted`) is not.
pub fn is_retryable(err: &PeError) -> bool {
    match err {
        PeError::Timeout { .. } | PeError::TransportError { .. } | PeError::InvalidResponse { .. } => true,
        PeError::Nak(details) => is_retryable_nak(details),
        PeError::DeviceError { status, .. } => *status >= 500,
        _ => false,
    }
}

fn is_retryable_nak(details: &NakDetails) -> bool {
    details.detail_code == NakDetails::DETAIL_BUSY || details.detail_code == NakDetails::DETAIL_TOO_MANY_REQUESTS
}

/// Suggested wait before retrying `err`, or `None` if it is not retryable.
pub fn suggested_retry_delay(err: &PeError) -> Option<Duration> {
    match err {
        PeError::Timeout { .. } => Some(TIMEOUT_RETRY_DELAY),
        PeError::TransportError { .. } => Some(TRANSPORT_ERROR_RETRY_DELAY),
        PeError::Nak(details) if details.detail_code == NakDetails::DETAIL_BUSY => Some(NAK_BUSY_RETRY_DELAY),
        PeError::Nak(details) if details.detail_code == NakDetails::DETAIL_TOO_MANY_REQUESTS => {
            Some(NAK_TOO_MANY_REQUESTS_RETRY_DELAY)
        }
        _ => None,
    }
}

/// Run `attempt` up to `max_attempts` times, sleeping the suggested delay
/// between retryable failures. Returns the first success or the last error.
pub async fn retry_with_policy<F, Fut, T>(max_attempts: u32, mut attempt: F) -> Result<T, PeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PeError>>,
{
    let mut last_err = PeError::Cancelled;
    for attempt_no in 0..max_attempts.max(1) {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let retryable = is_retryable(&err);
                let delay = suggested_retry_delay(&err);
                last_err = err;
                if !retryable || attempt_no + 1 >= max_attempts {
                    break;
                }
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(last_err)
}
