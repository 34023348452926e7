//! PE Manager: the Initiator side. Owns the Transaction Manager, the
//! Destination Cache, the Validation Registry, and the waiter table that
//! lets an async caller `.await` a reply to a request it sent.
//!
//! Mutable state lives behind a single `tokio::sync::Mutex`, matching the
//! "serialised actor" concurrency model: every method takes `&self`, so a
//! manager can be shared (typically behind an `Arc`) between the task
//! calling `send`/`subscribe` and the long-lived task feeding it inbound
//! frames via `handle_inbound`. The lock is never held across the final
//! reply-or-timeout wait -- only `send`/`subscribe`'s bookkeeping and
//! `handle_inbound`'s dispatch take it.

use crate::codec::{self, Response};
use crate::config::EngineConfig;
use crate::destination_cache::DestinationCache;
use crate::error::PeError;
use crate::ids::{Destination, Duid, RequestId};
use crate::request::{PeRequest, PeRequestKind};
use crate::retry;
use crate::send_strategy::SendStrategy;
use crate::transaction::{TransactionManager, TransactionManagerConfig};
use crate::transport::{DeviceDiscovery, Mcoded7Codec, ParsedMessage, Transport};
use crate::validation::{validate_request, PayloadValidator, ValidationRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;

/// Builds the wire bytes for an outbound Inquiry. Actual SysEx framing is an
/// external collaborator's job, same as [`Transport`] and [`Mcoded7Codec`].
pub trait MessageBuilder: Send + Sync {
    fn build_get(&self, request_id: RequestId, req: &PeRequest) -> Vec<u8>;
    fn build_set(&self, request_id: RequestId, req: &PeRequest) -> Vec<u8>;
    fn build_subscribe(&self, request_id: RequestId, resource: &str, target: Duid) -> Vec<u8>;
    fn build_unsubscribe(&self, request_id: RequestId, resource: &str, target: Duid, subscribe_id: &str) -> Vec<u8>;
}

/// `true` for a decoded JSON array with no elements, the empty-decode
/// fallback trigger for extended-resource-name GETs.
fn is_empty_array(value: &serde_json::Value) -> bool {
    matches!(value, serde_json::Value::Array(items) if items.is_empty())
}

enum Waiter {
    Reply(oneshot::Sender<Result<Response, PeError>>),
    SubscribeAck(oneshot::Sender<Result<(u16, Option<String>), PeError>>),
}

/// Which resource name an extended/standard fallback settled on, and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFallbackPath {
    /// The extended resource answered with a non-empty decoded value.
    Extended,
    /// The standard resource was used, either because the extended resource
    /// errored or decoded to an empty array.
    FallbackToStandard,
}

/// Diagnostics for an extended-resource-name-falls-back-to-standard-name GET,
/// e.g. `X-ChannelList` falling back to `ChannelList`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListFallbackDiagnostics {
    pub path: ListFallbackPath,
    pub attempted_resources: Vec<&'static str>,
    /// `true` if the extended resource was reached and decoded successfully
    /// but yielded an empty array -- as opposed to erroring outright.
    pub extended_was_empty: bool,
}

/// Result of an inbound frame being fed to the manager.
#[derive(Debug)]
pub enum InboundOutcome {
    /// Matched a pending waiter or an in-progress assembly; nothing further
    /// to do.
    Handled,
    /// No pending state matched this frame (late reply, or a frame not
    /// addressed to any request this manager sent). Dropped, not an error.
    Dropped { reason: &'static str },
    /// A Notify assembly completed. The caller routes this into its
    /// Subscription Manager; the PE Manager does not own that component.
    NotifyReady {
        source: Duid,
        subscribe_id: Option<String>,
        header: Vec<u8>,
        body: Vec<u8>,
    },
}

struct State {
    transactions: TransactionManager,
    notify_assembler: crate::notify::NotifyAssemblyManager,
    destination_cache: DestinationCache,
    validation: ValidationRegistry,
    pending: HashMap<(Duid, RequestId), Waiter>,
    /// The destination a still-pending request was actually sent to, so a
    /// successful PE/Subscribe Reply can record it in the Destination Cache
    /// once the device has actually answered, rather than at send time.
    pending_destination: HashMap<(Duid, RequestId), Destination>,
}

pub struct PeManager {
    transport: Arc<dyn Transport>,
    discovery: Arc<dyn DeviceDiscovery>,
    codec: Arc<dyn Mcoded7Codec>,
    builder: Arc<dyn MessageBuilder>,
    send_strategy: SendStrategy,
    config: EngineConfig,
    state: Mutex<State>,
}

impl PeManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        discovery: Arc<dyn DeviceDiscovery>,
        codec: Arc<dyn Mcoded7Codec>,
        builder: Arc<dyn MessageBuilder>,
        send_strategy: SendStrategy,
        config: EngineConfig,
    ) -> Self {
        let transactions = TransactionManager::new(TransactionManagerConfig {
            cooldown: config.cooldown,
            per_device_in_flight_cap: config.per_device_in_flight_cap,
            chunk_timeout: config.chunk_timeout,
        });
        let notify_assembler = crate::notify::NotifyAssemblyManager::new(config.chunk_timeout);
        let destination_cache = DestinationCache::new(config.destination_cache_ttl);
        let validation = ValidationRegistry::new(config.payload_size_limit_bytes);
        PeManager {
            transport,
            discovery,
            codec,
            builder,
            send_strategy,
            config,
            state: Mutex::new(State {
                transactions,
                notify_assembler,
                destination_cache,
                validation,
                pending: HashMap::new(),
                pending_destination: HashMap::new(),
            }),
        }
    }

    /// Register a per-resource payload validator ahead of sending SETs to it.
    pub async fn register_validator(&self, resource: impl Into<String>, validator: Arc<dyn PayloadValidator>) {
        self.state.lock().await.validation.register(resource, validator);
    }

    /// Validate, allocate a Request ID, send, and await the reply -- or a
    /// local timeout, whichever comes first. The state lock is released
    /// before this final wait, so a concurrent `handle_inbound` call can
    /// resolve it.
    pub async fn send(&self, req: PeRequest) -> Result<Response, PeError> {
        validate_request(&req).map_err(PeError::ValidationFailed)?;
        if req.kind == PeRequestKind::Set {
            let body = req.body.as_deref().unwrap_or(&[]);
            let mut state = self.state.lock().await;
            state
                .validation
                .validate_payload(&req.resource, body)
                .map_err(PeError::PayloadValidationFailed)?;
        }

        let now = Instant::now();
        let (id, cached) = {
            let mut state = self.state.lock().await;
            let id = state
                .transactions
                .begin(&req.resource, req.target, now)
                .ok_or(PeError::RequestIdExhausted)?;
            let cached = state.destination_cache.get_cached(req.target, now);
            (id, cached)
        };

        let resolved = match cached {
            Some(dest) => Some(dest),
            None => self.discovery.destination_for(req.target).await,
        };

        let bytes = match req.kind {
            PeRequestKind::Get => self.builder.build_get(id, &req),
            PeRequestKind::Set => self.builder.build_set(id, &req),
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            state.pending.insert((req.target, id), Waiter::Reply(tx));
        }

        let send_result = {
            let mut state = self.state.lock().await;
            self.send_strategy
                .send(self.transport.as_ref(), &mut state.destination_cache, &bytes, req.target, resolved.clone(), now)
                .await
        };

        if let Err(err) = send_result {
            tracing::warn!(target = %req.target, request_id = %id, error = %err, "send failed before a reply could be awaited");
            let mut state = self.state.lock().await;
            state.pending.remove(&(req.target, id));
            state.transactions.cancel(id, now);
            return Err(err);
        }
        // Recorded in the Destination Cache only once the device actually
        // replies (see `dispatch_chunk_outcome`'s `Complete` arm) -- a
        // request the device never answers should not poison the cache with
        // a "last-known-good" destination it never confirmed.
        if let Some(dest) = resolved {
            let mut state = self.state.lock().await;
            state.pending_destination.insert((req.target, id), dest);
        }

        match tokio::time::timeout(self.config.reply_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PeError::Cancelled),
            Err(_) => {
                tracing::debug!(target = %req.target, request_id = %id, resource = %req.resource, "reply timed out");
                let mut state = self.state.lock().await;
                state.pending.remove(&(req.target, id));
                state.pending_destination.remove(&(req.target, id));
                state.transactions.cancel(id, Instant::now());
                Err(PeError::Timeout { resource: req.resource })
            }
        }
    }

    /// Cancel an in-flight request this manager sent, if still pending.
    pub async fn cancel(&self, target: Duid, id: RequestId) {
        let mut state = self.state.lock().await;
        if let Some(waiter) = state.pending.remove(&(target, id)) {
            match waiter {
                Waiter::Reply(tx) => {
                    let _ = tx.send(Err(PeError::Cancelled));
                }
                Waiter::SubscribeAck(tx) => {
                    let _ = tx.send(Err(PeError::Cancelled));
                }
            }
        }
        state.pending_destination.remove(&(target, id));
        state.transactions.cancel(id, Instant::now());
    }

    /// Terminal stop: cancel every pending request and refuse new sends
    /// until [`Self::reset`].
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        for (_, waiter) in state.pending.drain() {
            match waiter {
                Waiter::Reply(tx) => {
                    let _ = tx.send(Err(PeError::Cancelled));
                }
                Waiter::SubscribeAck(tx) => {
                    let _ = tx.send(Err(PeError::Cancelled));
                }
            }
        }
        state.pending_destination.clear();
        state.transactions.cancel_all(now);
        state.notify_assembler.cancel_all();
    }

    pub async fn reset(&self) {
        self.state.lock().await.transactions.reset();
    }

    pub async fn get(&self, resource: impl Into<String>, target: Duid) -> Result<Response, PeError> {
        self.send(PeRequest::get(resource, target)).await
    }

    pub async fn set(&self, resource: impl Into<String>, target: Duid, body: Vec<u8>) -> Result<Response, PeError> {
        self.send(PeRequest::set(resource, target, body)).await
    }

    pub async fn get_json(&self, resource: impl Into<String>, target: Duid) -> Result<serde_json::Value, PeError> {
        let resp = self.get(resource, target).await?;
        serde_json::from_slice(&resp.decoded_body).map_err(|e| PeError::InvalidResponse { reason: e.to_string() })
    }

    pub async fn set_json(&self, resource: impl Into<String>, target: Duid, value: &serde_json::Value) -> Result<Response, PeError> {
        let body = serde_json::to_vec(value).map_err(|e| PeError::InvalidResponse { reason: e.to_string() })?;
        self.set(resource, target, body).await
    }

    pub async fn get_device_info(&self, target: Duid) -> Result<serde_json::Value, PeError> {
        self.get_json("DeviceInfo", target).await
    }

    /// Retries up to [`EngineConfig::resource_list_max_retries`] times,
    /// waiting the suggested timeout backoff between attempts -- a
    /// ResourceList GET is the one PE operation expected to race a device's
    /// own startup enumeration.
    pub async fn get_resource_list(&self, target: Duid) -> Result<serde_json::Value, PeError> {
        let max = self.config.resource_list_max_retries;
        retry::retry_with_policy(max, || self.get_json("ResourceList", target)).await
    }

    /// Try `extended` first, falling back to `standard` on error OR on a
    /// successfully-decoded but empty array -- some devices answer the
    /// extended resource name but never populate it.
    async fn get_with_extended_fallback(
        &self,
        extended: &'static str,
        standard: &'static str,
        target: Duid,
    ) -> Result<(serde_json::Value, ListFallbackDiagnostics), PeError> {
        match self.get_json(extended, target).await {
            Ok(value) if !is_empty_array(&value) => Ok((
                value,
                ListFallbackDiagnostics {
                    path: ListFallbackPath::Extended,
                    attempted_resources: vec![extended],
                    extended_was_empty: false,
                },
            )),
            Ok(_empty) => {
                let value = self.get_json(standard, target).await?;
                Ok((
                    value,
                    ListFallbackDiagnostics {
                        path: ListFallbackPath::FallbackToStandard,
                        attempted_resources: vec![extended, standard],
                        extended_was_empty: true,
                    },
                ))
            }
            Err(_extended_err) => {
                let value = self.get_json(standard, target).await?;
                Ok((
                    value,
                    ListFallbackDiagnostics {
                        path: ListFallbackPath::FallbackToStandard,
                        attempted_resources: vec![extended, standard],
                        extended_was_empty: false,
                    },
                ))
            }
        }
    }

    pub async fn get_channel_list(&self, target: Duid) -> Result<serde_json::Value, PeError> {
        self.get_json("ChannelList", target).await
    }

    /// `X-ChannelList` (extended) falling back to `ChannelList` for devices
    /// that only implement the older resource name, or whose extended
    /// resource decodes to an empty array.
    pub async fn get_channel_list_with_diagnostics(&self, target: Duid) -> Result<(serde_json::Value, ListFallbackDiagnostics), PeError> {
        self.get_with_extended_fallback("X-ChannelList", "ChannelList", target).await
    }

    /// `ChCtrlList` (extended, per-channel controller list) falling back to
    /// `CtrlList` for devices that only implement the older resource name.
    pub async fn get_controller_list(&self, target: Duid) -> Result<(serde_json::Value, ListFallbackDiagnostics), PeError> {
        self.get_with_extended_fallback("ChCtrlList", "CtrlList", target).await
    }

    pub async fn get_program_list(&self, target: Duid) -> Result<serde_json::Value, PeError> {
        self.get_json("ProgramList", target).await
    }

    pub async fn subscribe(&self, resource: impl Into<String>, target: Duid) -> Result<String, PeError> {
        let resource = resource.into();
        let now = Instant::now();
        let (id, cached) = {
            let mut state = self.state.lock().await;
            let id = state
                .transactions
                .begin(&resource, target, now)
                .ok_or(PeError::RequestIdExhausted)?;
            let cached = state.destination_cache.get_cached(target, now);
            (id, cached)
        };
        let resolved = match cached {
            Some(dest) => Some(dest),
            None => self.discovery.destination_for(target).await,
        };
        let bytes = self.builder.build_subscribe(id, &resource, target);

        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            state.pending.insert((target, id), Waiter::SubscribeAck(tx));
        }

        let send_result = {
            let mut state = self.state.lock().await;
            self.send_strategy
                .send(self.transport.as_ref(), &mut state.destination_cache, &bytes, target, resolved.clone(), now)
                .await
        };

        if let Err(err) = send_result {
            let mut state = self.state.lock().await;
            state.pending.remove(&(target, id));
            state.transactions.cancel(id, now);
            return Err(err);
        }
        if let Some(dest) = resolved {
            let mut state = self.state.lock().await;
            state.destination_cache.record_success(target, dest, now);
        }

        match tokio::time::timeout(self.config.reply_timeout, rx).await {
            Ok(Ok(Ok((status, subscribe_id)))) => {
                if status >= 400 {
                    Err(PeError::DeviceError { status, message: None })
                } else {
                    subscribe_id.ok_or(PeError::InvalidResponse {
                        reason: "subscribe reply missing subscribeId".into(),
                    })
                }
            }
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_)) => Err(PeError::Cancelled),
            Err(_) => {
                let mut state = self.state.lock().await;
                state.pending.remove(&(target, id));
                state.transactions.cancel(id, Instant::now());
                Err(PeError::Timeout { resource })
            }
        }
    }

    pub async fn unsubscribe(&self, resource: impl Into<String>, target: Duid, subscribe_id: &str) -> Result<(), PeError> {
        let resource = resource.into();
        let now = Instant::now();
        let (id, cached) = {
            let mut state = self.state.lock().await;
            let id = state
                .transactions
                .begin(&resource, target, now)
                .ok_or(PeError::RequestIdExhausted)?;
            let cached = state.destination_cache.get_cached(target, now);
            (id, cached)
        };
        let resolved = match cached {
            Some(dest) => Some(dest),
            None => self.discovery.destination_for(target).await,
        };
        let bytes = self.builder.build_unsubscribe(id, &resource, target, subscribe_id);
        let result = {
            let mut state = self.state.lock().await;
            self.send_strategy
                .send(self.transport.as_ref(), &mut state.destination_cache, &bytes, target, resolved, now)
                .await
        };
        self.state.lock().await.transactions.cancel(id, now);
        result
    }

    /// Feed one inbound PE/Notify frame, already parsed and source-tagged by
    /// the (external) message parser, to the manager.
    pub async fn handle_inbound(&self, now: Instant, source: Duid, msg: ParsedMessage) -> InboundOutcome {
        match msg {
            ParsedMessage::Nak { destination_duid, details } => {
                // NAK frames carry no Request ID of their own. Per policy: if
                // exactly one waiter is pending for this destination, resume
                // it with the NAK; otherwise there is no way to tell which
                // request it answers, so log and leave every pending waiter
                // to its own timeout.
                let mut state = self.state.lock().await;
                let matching: Vec<RequestId> = state
                    .pending
                    .keys()
                    .filter(|(duid, _)| *duid == destination_duid)
                    .map(|(_, id)| *id)
                    .collect();
                match matching.as_slice() {
                    [id] => {
                        let id = *id;
                        let waiter = state.pending.remove(&(destination_duid, id)).expect("just matched above");
                        state.pending_destination.remove(&(destination_duid, id));
                        state.transactions.cancel(id, now);
                        match waiter {
                            Waiter::Reply(tx) => {
                                let _ = tx.send(Err(PeError::Nak(details)));
                            }
                            Waiter::SubscribeAck(tx) => {
                                let _ = tx.send(Err(PeError::Nak(details)));
                            }
                        }
                        InboundOutcome::Handled
                    }
                    _ => {
                        drop(state);
                        crate::logging::log_dropped_frame(
                            "NAK with zero or multiple pending waiters for this destination",
                            destination_duid,
                            None,
                        );
                        InboundOutcome::Dropped {
                            reason: "NAK with zero or multiple pending waiters for this destination",
                        }
                    }
                }
            }
            ParsedMessage::SubscribeReply {
                source,
                request_id,
                status,
                subscribe_id,
            } => {
                let mut state = self.state.lock().await;
                match state.pending.remove(&(source, request_id)) {
                    Some(Waiter::SubscribeAck(tx)) => {
                        state.transactions.cancel(request_id, now);
                        let _ = tx.send(Ok((status, subscribe_id)));
                        InboundOutcome::Handled
                    }
                    Some(Waiter::Reply(tx)) => {
                        state.transactions.cancel(request_id, now);
                        state.pending_destination.remove(&(source, request_id));
                        let _ = tx.send(Err(PeError::InvalidResponse {
                            reason: "subscribe reply received for a GET/SET request".into(),
                        }));
                        InboundOutcome::Handled
                    }
                    None => {
                        drop(state);
                        crate::logging::log_dropped_frame("subscribe reply for unknown request id", source, Some(request_id));
                        InboundOutcome::Dropped {
                            reason: "subscribe reply for unknown request id",
                        }
                    }
                }
            }
            ParsedMessage::PeReply {
                source,
                request_id,
                this_chunk,
                num_chunks,
                header,
                property,
            } => {
                let outcome = {
                    let mut state = self.state.lock().await;
                    state
                        .transactions
                        .process_chunk(now, source, request_id, this_chunk, num_chunks, &header, &property)
                };
                self.dispatch_chunk_outcome(now, source, outcome).await
            }
            ParsedMessage::Notify {
                source: notify_source,
                request_id,
                this_chunk,
                num_chunks,
                header,
                property,
                subscribe_id,
                resource: _,
            } => {
                let outcome = {
                    let mut state = self.state.lock().await;
                    state
                        .notify_assembler
                        .process_chunk(now, notify_source, request_id, this_chunk, num_chunks, &header, &property)
                };
                match outcome {
                    crate::chunk::ChunkOutcome::Complete { header, body, .. } => InboundOutcome::NotifyReady {
                        source: notify_source,
                        subscribe_id,
                        header,
                        body,
                    },
                    crate::chunk::ChunkOutcome::Incomplete => InboundOutcome::Handled,
                    crate::chunk::ChunkOutcome::Timeout { .. } => InboundOutcome::Dropped { reason: "notify assembly timed out" },
                    crate::chunk::ChunkOutcome::UnknownRequestId { .. } => InboundOutcome::Dropped {
                        reason: "notify chunk for unknown request id",
                    },
                }
            }
            ParsedMessage::Other => {
                crate::logging::log_dropped_frame("frame not addressed to this manager", source, None);
                InboundOutcome::Dropped { reason: "frame not addressed to this manager" }
            }
        }
    }

    async fn dispatch_chunk_outcome(&self, now: Instant, source: Duid, outcome: crate::chunk::ChunkOutcome) -> InboundOutcome {
        match outcome {
            crate::chunk::ChunkOutcome::Complete { request_id, header, body } => {
                let key = (source, request_id);
                let mut state = self.state.lock().await;
                match state.pending.remove(&key) {
                    Some(Waiter::Reply(tx)) => {
                        state.transactions.cancel(request_id, now);
                        if let Some(dest) = state.pending_destination.remove(&key) {
                            state.destination_cache.record_success(source, dest, now);
                        }
                        let response = codec::build_response(&header, &body, self.codec.as_ref()).and_then(|response| {
                            if response.status >= 400 {
                                Err(PeError::DeviceError {
                                    status: response.status,
                                    message: response.header.message.clone(),
                                })
                            } else {
                                Ok(response)
                            }
                        });
                        let _ = tx.send(response);
                        InboundOutcome::Handled
                    }
                    Some(other) => {
                        // Not a data-reply waiter; put it back untouched, id stays reserved.
                        state.pending.insert(key, other);
                        InboundOutcome::Dropped { reason: "completed reply for a non-GET/SET waiter" }
                    }
                    None => {
                        // No caller is waiting any more (e.g. it already timed out
                        // locally), but the transaction itself did reach a terminal
                        // state here -- release the id so it enters cooldown.
                        state.transactions.cancel(request_id, now);
                        drop(state);
                        crate::logging::log_dropped_frame("completed reply with no pending waiter", source, Some(request_id));
                        InboundOutcome::Dropped { reason: "completed reply with no pending waiter" }
                    }
                }
            }
            crate::chunk::ChunkOutcome::Incomplete => InboundOutcome::Handled,
            crate::chunk::ChunkOutcome::Timeout { request_id, .. } => {
                let mut state = self.state.lock().await;
                if let Some(waiter) = state.pending.remove(&(source, request_id)) {
                    if let Waiter::Reply(tx) = waiter {
                        let _ = tx.send(Err(PeError::Timeout { resource: String::new() }));
                    }
                }
                state.pending_destination.remove(&(source, request_id));
                state.transactions.cancel(request_id, now);
                InboundOutcome::Dropped { reason: "reply assembly timed out" }
            }
            crate::chunk::ChunkOutcome::UnknownRequestId { .. } => InboundOutcome::Dropped {
                reason: "reply chunk for unknown request id",
            },
        }
    }

    /// Prune assemblies (both PE Reply and Notify) that have gone idle longer
    /// than their configured chunk timeout, independent of any per-request
    /// `reply_timeout`. Per the Chunk Assembler's contract this is a
    /// host-driven poll -- call it on a recurring tick alongside feeding
    /// inbound frames, the same way the Notify Assembly Manager's
    /// `pollTimeouts` is meant to be driven. Returns one [`InboundOutcome`]
    /// per pruned assembly so callers can observe what was dropped.
    pub async fn poll_timeouts(&self, now: Instant) -> Vec<InboundOutcome> {
        let (reply_timeouts, notify_timeouts) = {
            let mut state = self.state.lock().await;
            let reply_timeouts = state.transactions.poll_chunk_timeouts(now);
            let notify_timeouts = state.notify_assembler.poll_timeouts(now);
            (reply_timeouts, notify_timeouts)
        };

        let mut out = Vec::with_capacity(reply_timeouts.len() + notify_timeouts.len());
        for outcome in reply_timeouts {
            // The Chunk Assembler doesn't know which source a PE Reply
            // assembly belongs to on its own -- but every entry it tracks was
            // seeded by a request this manager itself allocated, so every
            // pending waiter keyed by request id shares exactly one source.
            // We recover it by scanning `pending`, same approach used for NAK
            // destination matching.
            let request_id = match &outcome {
                crate::chunk::ChunkOutcome::Timeout { request_id, .. } => *request_id,
                _ => continue,
            };
            let source = {
                let state = self.state.lock().await;
                state.pending.keys().find(|(_, id)| *id == request_id).map(|(duid, _)| *duid)
            };
            let Some(source) = source else {
                // No pending waiter at all (already resolved or never one);
                // still release the id so cooldown starts.
                let mut state = self.state.lock().await;
                state.transactions.cancel(request_id, now);
                out.push(InboundOutcome::Dropped { reason: "reply assembly timed out with no pending waiter" });
                continue;
            };
            out.push(self.dispatch_chunk_outcome(now, source, outcome).await);
        }
        for (source, outcome) in notify_timeouts {
            out.push(match outcome {
                crate::chunk::ChunkOutcome::Timeout { .. } => InboundOutcome::Dropped { reason: "notify assembly timed out" },
                _ => continue,
            });
            crate::logging::log_dropped_frame("notify assembly timed out", source, None);
        }
        out
    }
}
