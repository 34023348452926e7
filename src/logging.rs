//! Thin `tracing` event helpers shared across the engine's components.
//!
//! The crate only emits events; wiring up a subscriber is the host's job.

use crate::ids::{Duid, RequestId};

/// Log a late or unroutable inbound frame at the point of receipt, since
/// these are dropped rather than surfaced as an error to any caller.
pub fn log_dropped_frame(reason: &'static str, source: Duid, request_id: Option<RequestId>) {
    match request_id {
        Some(id) => tracing::warn!(source = %source, request_id = %id, reason, "dropping inbound frame"),
        None => tracing::warn!(source = %source, reason, "dropping inbound frame"),
    }
}
