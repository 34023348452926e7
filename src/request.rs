//! The shape of an outbound PE request, shared between validation and the
//! PE Manager.

use crate::ids::Duid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeRequestKind {
    Get,
    Set,
}

/// A GET/SET request before it is validated, ID-allocated, and sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeRequest {
    pub kind: PeRequestKind,
    pub resource: String,
    pub target: Duid,
    pub body: Option<Vec<u8>>,
    pub channel: Option<i32>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

impl PeRequest {
    pub fn get(resource: impl Into<String>, target: Duid) -> Self {
        PeRequest {
            kind: PeRequestKind::Get,
            resource: resource.into(),
            target,
            body: None,
            channel: None,
            offset: None,
            limit: None,
        }
    }

    pub fn set(resource: impl Into<String>, target: Duid, body: Vec<u8>) -> Self {
        PeRequest {
            kind: PeRequestKind::Set,
            resource: resource.into(),
            target,
            body: Some(body),
            channel: None,
            offset: None,
            limit: None,
        }
    }

    pub fn with_channel(mut self, channel: i32) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}
