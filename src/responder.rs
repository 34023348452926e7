//! PE Responder: serves inbound GET/SET/Subscribe Inquiries against
//! locally registered resources and tracks that resource's subscriber list
//! for Notify fan-out.

use crate::ids::{Destination, Duid, RequestId};
use crate::transport::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

/// A locally-registered resource's GET/SET/subscribe behavior. `get`/`set`
/// are the data-plane operations; `supports_set`/`supports_subscription`
/// gate which Inquiry kinds this resource accepts.
pub trait ResourceHandler: Send + Sync {
    fn supports_set(&self) -> bool {
        false
    }

    fn supports_subscription(&self) -> bool {
        false
    }

    fn get<'a>(&'a self, request: &'a InquiryRequest) -> BoxFuture<'a, Result<Vec<u8>, String>>;

    fn set<'a>(&'a self, request: &'a InquiryRequest, body: &'a [u8]) -> BoxFuture<'a, Result<(), String>> {
        let _ = (request, body);
        Box::pin(async { Err("SET not supported".to_owned()) })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InquiryKind {
    Capabilities,
    Get,
    Set,
    Subscribe,
    Unsubscribe,
}

/// An inbound PE Inquiry, already chunk-reassembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InquiryRequest {
    pub source: Duid,
    pub resource: String,
    pub request_id: RequestId,
    pub channel: Option<i32>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

/// Result of dispatching one Inquiry: a status code and, on success, a body
/// to send back in the Reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InquiryOutcome {
    pub status: u16,
    pub message: Option<String>,
    pub body: Option<Vec<u8>>,
    pub subscribe_id: Option<String>,
}

impl InquiryOutcome {
    fn ok(body: Option<Vec<u8>>) -> Self {
        InquiryOutcome {
            status: 200,
            message: None,
            body,
            subscribe_id: None,
        }
    }

    fn not_found() -> Self {
        InquiryOutcome {
            status: 404,
            message: Some("resource not registered".to_owned()),
            body: None,
            subscribe_id: None,
        }
    }

    fn method_not_allowed(reason: &str) -> Self {
        InquiryOutcome {
            status: 405,
            message: Some(reason.to_owned()),
            body: None,
            subscribe_id: None,
        }
    }

    fn internal_error(reason: String) -> Self {
        InquiryOutcome {
            status: 500,
            message: Some(reason),
            body: None,
            subscribe_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Subscriber {
    subscribe_id: String,
    duid: Duid,
    destination: Option<Destination>,
}

/// Where a Notify fan-out should be sent: the registry only records whether
/// the subscriber's destination is known at subscribe time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyTarget {
    To(Destination),
    /// No destination was recorded for this subscriber; the caller should
    /// broadcast or resolve one fresh via device discovery.
    Unresolved(Duid),
}

pub struct Responder {
    handlers: HashMap<String, Arc<dyn ResourceHandler>>,
    subscribers: HashMap<String, Vec<Subscriber>>,
    next_subscribe_id: u64,
}

impl Default for Responder {
    fn default() -> Self {
        Self::new()
    }
}

impl Responder {
    pub fn new() -> Self {
        Responder {
            handlers: HashMap::new(),
            subscribers: HashMap::new(),
            next_subscribe_id: 0,
        }
    }

    pub fn register(&mut self, resource: impl Into<String>, handler: Arc<dyn ResourceHandler>) {
        self.handlers.insert(resource.into(), handler);
    }

    fn next_subscribe_id(&mut self) -> String {
        let id = self.next_subscribe_id;
        self.next_subscribe_id += 1;
        format!("sub-{id}")
    }

    /// Dispatch one Inquiry, returning the status/body to reply with.
    pub async fn dispatch(&mut self, kind: InquiryKind, request: &InquiryRequest, body: Option<&[u8]>, destination: Option<Destination>) -> InquiryOutcome {
        let handler = match self.handlers.get(&request.resource).cloned() {
            Some(handler) => handler,
            None => return InquiryOutcome::not_found(),
        };

        match kind {
            InquiryKind::Capabilities => InquiryOutcome::ok(Some(
                format!(
                    r#"{{"supportsSet":{},"supportsSubscription":{}}}"#,
                    handler.supports_set(),
                    handler.supports_subscription()
                )
                .into_bytes(),
            )),
            InquiryKind::Get => match handler.get(request).await {
                Ok(body) => InquiryOutcome::ok(Some(body)),
                Err(reason) => InquiryOutcome::internal_error(reason),
            },
            InquiryKind::Set => {
                if !handler.supports_set() {
                    return InquiryOutcome::method_not_allowed("resource does not support SET");
                }
                let body = body.unwrap_or(&[]);
                match handler.set(request, body).await {
                    Ok(()) => InquiryOutcome::ok(None),
                    Err(reason) => InquiryOutcome::internal_error(reason),
                }
            }
            InquiryKind::Subscribe => {
                if !handler.supports_subscription() {
                    return InquiryOutcome::method_not_allowed("resource does not support subscription");
                }
                let subscribe_id = self.next_subscribe_id();
                self.subscribers
                    .entry(request.resource.clone())
                    .or_default()
                    .push(Subscriber {
                        subscribe_id: subscribe_id.clone(),
                        duid: request.source,
                        destination,
                    });
                InquiryOutcome {
                    status: 200,
                    message: None,
                    body: None,
                    subscribe_id: Some(subscribe_id),
                }
            }
            InquiryKind::Unsubscribe => {
                if let Some(list) = self.subscribers.get_mut(&request.resource) {
                    list.retain(|s| s.duid != request.source);
                }
                InquiryOutcome::ok(None)
            }
        }
    }

    /// Subscribers for `resource`, excluding any whose subscribe ID appears
    /// in `exclude`. Used when a local resource mutation should fan a
    /// Notify out to everyone *except* whoever triggered it via SET.
    pub fn notify_targets(&self, resource: &str, exclude: &[String]) -> Vec<NotifyTarget> {
        self.subscribers
            .get(resource)
            .into_iter()
            .flatten()
            .filter(|s| !exclude.contains(&s.subscribe_id))
            .map(|s| match &s.destination {
                Some(dest) => NotifyTarget::To(dest.clone()),
                None => NotifyTarget::Unresolved(s.duid),
            })
            .collect()
    }

    pub fn subscriber_count(&self, resource: &str) -> usize {
        self.subscribers.get(resource).map(Vec::len).unwrap_or(0)
    }
}
