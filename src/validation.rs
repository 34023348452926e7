//! Pre-send structural validation and pre-SET payload/schema validation.

use crate::error::{RequestValidationError, SchemaError};
use crate::request::{PeRequest, PeRequestKind};
use std::collections::HashMap;
use std::sync::Arc;

/// Pure structural check run before any Request ID is reserved. Calling this
/// twice on the same request gives identical results.
pub fn validate_request(req: &PeRequest) -> Result<(), RequestValidationError> {
    if req.resource.is_empty() {
        return Err(RequestValidationError::EmptyResource);
    }
    if req.kind == PeRequestKind::Set && req.body.is_none() {
        return Err(RequestValidationError::MissingBody);
    }
    if let Some(channel) = req.channel {
        if !(0..=255).contains(&channel) {
            return Err(RequestValidationError::ChannelOutOfRange(channel));
        }
    }
    if let Some(offset) = req.offset {
        if offset < 0 {
            return Err(RequestValidationError::NegativeOffset(offset));
        }
    }
    if let Some(limit) = req.limit {
        if limit < 1 {
            return Err(RequestValidationError::InvalidLimit(limit));
        }
    }
    Ok(())
}

/// A registered per-resource payload validator.
pub trait PayloadValidator: Send + Sync {
    fn validate(&self, body: &[u8]) -> Result<(), String>;
}

/// Pre-SET payload validation: a global size limit, then either a
/// resource-specific registered validator or a JSON-object-or-array schema
/// fallback.
pub struct ValidationRegistry {
    size_limit: usize,
    validators: HashMap<String, Arc<dyn PayloadValidator>>,
}

impl ValidationRegistry {
    pub fn new(size_limit: usize) -> Self {
        ValidationRegistry {
            size_limit,
            validators: HashMap::new(),
        }
    }

    pub fn register(&mut self, resource: impl Into<String>, validator: Arc<dyn PayloadValidator>) {
        self.validators.insert(resource.into(), validator);
    }

    pub fn validate_payload(&self, resource: &str, body: &[u8]) -> Result<(), SchemaError> {
        if body.len() > self.size_limit {
            return Err(SchemaError::TooLarge {
                actual: body.len(),
                limit: self.size_limit,
            });
        }
        match self.validators.get(resource) {
            Some(validator) => validator.validate(body).map_err(|reason| SchemaError::ValidatorRejected {
                resource: resource.to_owned(),
                reason,
            }),
            None => serde_json::from_slice::<serde_json::Value>(body)
                .map(|_| ())
                .map_err(|e| SchemaError::SchemaMismatch {
                    resource: resource.to_owned(),
                    reason: e.to_string(),
                }),
        }
    }
}
