//! The closed error taxonomy from the PE core's error handling design.
//!
//! Every public operation surfaces one of these; nothing is swallowed except
//! the two documented exceptions (late replies to a non-pending ID, inbound
//! frames not addressed to this engine) which are logged and dropped at the
//! point of receipt rather than returned here.

use crate::ids::Duid;
use std::fmt;

/// A protocol-level NAK, parsed from a MIDI-CI negative-acknowledgement frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NakDetails {
    pub original_transaction: u8,
    pub status_code: u8,
    pub detail_code: String,
    pub extra: Vec<u8>,
    pub text: Option<String>,
}

impl NakDetails {
    pub const DETAIL_BUSY: &'static str = "busy";
    pub const DETAIL_TOO_MANY_REQUESTS: &'static str = "too-many-requests";
    pub const DETAIL_PERMISSION_DENIED: &'static str = "permission-denied";
}

/// Why a request failed pre-send structural validation (`validate()`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestValidationError {
    #[error("resource name must not be empty")]
    EmptyResource,
    #[error("SET requires a body")]
    MissingBody,
    #[error("channel {0} out of range [0, 255]")]
    ChannelOutOfRange(i32),
    #[error("offset {0} must be >= 0")]
    NegativeOffset(i64),
    #[error("limit {0} must be >= 1")]
    InvalidLimit(i64),
}

/// Why a pre-SET payload failed schema/size validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("payload of {actual} bytes exceeds the {limit}-byte size limit")]
    TooLarge { actual: usize, limit: usize },
    #[error("registered validator for '{resource}' rejected the payload: {reason}")]
    ValidatorRejected { resource: String, reason: String },
    #[error("payload did not match the fallback schema for '{resource}': {reason}")]
    SchemaMismatch { resource: String, reason: String },
}

/// The closed error set surfaced by every public PE Manager / Subscription
/// Manager operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeError {
    /// Local deadline fired before a reply arrived.
    #[error("timed out waiting for a reply to resource '{resource}'")]
    Timeout { resource: String },

    /// Caller-initiated or engine `stop()`-initiated cancellation.
    #[error("request was cancelled")]
    Cancelled,

    /// The Transaction Manager could not allocate a Request ID.
    #[error("request ID exhausted")]
    RequestIdExhausted,

    /// Remote status >= 400 arrived in a PE Reply header.
    #[error("device returned status {status}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    DeviceError { status: u16, message: Option<String> },

    /// The destination resolver could not find a route for this DUID.
    #[error("device {duid} not found")]
    DeviceNotFound { duid: Duid },

    /// A header could not be parsed, or a decoded body did not match the
    /// expected structure.
    #[error("invalid response: {reason}")]
    InvalidResponse { reason: String },

    /// The underlying transport send failed.
    #[error("transport error: {cause}")]
    TransportError { cause: String },

    /// No route is available: empty custom resolver result, or a cache-only
    /// miss under the `Learned` strategy.
    #[error("no destination available for this request")]
    NoDestination,

    /// Pre-send structural validation failed.
    #[error("validation failed: {0}")]
    ValidationFailed(RequestValidationError),

    /// Pre-SET payload/schema validation failed.
    #[error("payload validation failed: {0}")]
    PayloadValidationFailed(SchemaError),

    /// A remote protocol-level negative acknowledgement arrived.
    #[error("NAK: status={} detail={}", .0.status_code, .0.detail_code)]
    Nak(NakDetails),
}

impl fmt::Display for NakDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NAK(original_transaction={:#04X}, status={:#04X}, detail={})",
            self.original_transaction, self.status_code, self.detail_code
        )
    }
}
