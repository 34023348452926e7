// midi-ci-pe: MIDI-CI Property Exchange engine core.
//
// Initiator-side request/response and publish/subscribe protocol on top of
// an externally-provided MIDI transport and CI message codec, plus a
// lightweight Responder for answering inbound Inquiries. Bit-exact SysEx
// framing, the Mcoded7 codec internals, and device discovery are consumed
// through the traits in `transport`, not implemented here.

pub mod chunk;
pub mod codec;
pub mod config;
pub mod destination_cache;
pub mod error;
pub mod ids;
pub mod logging;
pub mod manager;
pub mod notify;
pub mod request;
pub mod responder;
pub mod retry;
pub mod send_strategy;
pub mod subscription;
pub mod testutil;
pub mod transaction;
pub mod transport;
pub mod validation;

pub use config::{ConfigError, EngineConfig, EngineConfigBuilder};
pub use error::{NakDetails, PeError, RequestValidationError, SchemaError};
pub use ids::{DeviceHandle, DeviceIdentity, Destination, Duid, RequestId};
pub use manager::{InboundOutcome, ListFallbackDiagnostics, ListFallbackPath, MessageBuilder, PeManager};
pub use request::{PeRequest, PeRequestKind};
pub use responder::{InquiryKind, InquiryOutcome, InquiryRequest, NotifyTarget, ResourceHandler, Responder};
pub use send_strategy::SendStrategy;
pub use subscription::{SubscriptionEvent, SubscriptionId, SubscriptionManager, SubscriptionManagerConfig};
pub use transport::{DeviceDiscovery, DiscoveredDevice, DiscoveryEvent, Mcoded7Codec, ParsedHeader, ParsedMessage, Transport, TransportError};

use std::sync::Arc;

/// Ties the Initiator core and the Responder together under one lifecycle,
/// per the "Ownership and cycles" design: both are single-owner, and
/// `start`/`stop`/`reset` on the engine cascade to both halves. The
/// Subscription Manager is constructed separately by the host (it only
/// needs a borrowed/weak path back into the PE Manager to re-send
/// Subscribe Inquiries on restore) and is not owned here.
pub struct PeEngine {
    manager: PeManager,
    responder: Responder,
    started: bool,
}

impl PeEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        discovery: Arc<dyn DeviceDiscovery>,
        codec: Arc<dyn Mcoded7Codec>,
        builder: Arc<dyn MessageBuilder>,
        send_strategy: SendStrategy,
        config: EngineConfig,
    ) -> Self {
        PeEngine {
            manager: PeManager::new(transport, discovery, codec, builder, send_strategy, config),
            responder: Responder::new(),
            started: true,
        }
    }

    pub fn manager(&self) -> &PeManager {
        &self.manager
    }

    pub fn responder(&self) -> &Responder {
        &self.responder
    }

    pub fn responder_mut(&mut self) -> &mut Responder {
        &mut self.responder
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Terminal stop: cancels every pending Initiator request with
    /// `cancelled`, drops all Notify assemblies, and refuses new `send`s
    /// until [`Self::reset`]. The Responder's registrations and subscriber
    /// table are left intact -- an inbound Inquiry after `stop` is still a
    /// question the host may reasonably want answered even while the
    /// Initiator side is down; callers that want a harder shutdown can drop
    /// the engine entirely.
    pub async fn stop(&mut self) {
        self.manager.stop().await;
        self.started = false;
    }

    /// Reverse of [`Self::stop`]: clears the Transaction Manager's stopped
    /// flag so `send`/`subscribe` may allocate Request IDs again.
    pub async fn reset(&mut self) {
        self.manager.reset().await;
        self.started = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::BoxFuture;
    use std::sync::Mutex;

    struct NullTransport;
    impl Transport for NullTransport {
        fn send<'a>(&'a self, _bytes: &'a [u8], _to: &'a Destination) -> BoxFuture<'a, Result<(), TransportError>> {
            Box::pin(async { Ok(()) })
        }
        fn broadcast<'a>(&'a self, _bytes: &'a [u8]) -> BoxFuture<'a, Result<(), TransportError>> {
            Box::pin(async { Ok(()) })
        }
        fn destinations(&self) -> Vec<Destination> {
            Vec::new()
        }
    }

    struct NullDiscovery;
    impl DeviceDiscovery for NullDiscovery {
        fn destination_for<'a>(&'a self, _duid: Duid) -> BoxFuture<'a, Option<Destination>> {
            Box::pin(async { None })
        }
        fn discovered_devices(&self) -> Vec<DiscoveredDevice> {
            Vec::new()
        }
    }

    struct NullCodec;
    impl Mcoded7Codec for NullCodec {
        fn decode(&self, data: &[u8]) -> Result<Vec<u8>, String> {
            Ok(data.to_vec())
        }
        fn encode(&self, data: &[u8]) -> Vec<u8> {
            data.to_vec()
        }
    }

    struct NullBuilder {
        built: Mutex<u32>,
    }
    impl MessageBuilder for NullBuilder {
        fn build_get(&self, _request_id: RequestId, _req: &PeRequest) -> Vec<u8> {
            *self.built.lock().unwrap() += 1;
            Vec::new()
        }
        fn build_set(&self, _request_id: RequestId, _req: &PeRequest) -> Vec<u8> {
            Vec::new()
        }
        fn build_subscribe(&self, _request_id: RequestId, _resource: &str, _target: Duid) -> Vec<u8> {
            Vec::new()
        }
        fn build_unsubscribe(&self, _request_id: RequestId, _resource: &str, _target: Duid, _subscribe_id: &str) -> Vec<u8> {
            Vec::new()
        }
    }

    fn engine() -> PeEngine {
        PeEngine::new(
            Arc::new(NullTransport),
            Arc::new(NullDiscovery),
            Arc::new(NullCodec),
            Arc::new(NullBuilder { built: Mutex::new(0) }),
            SendStrategy::Broadcast,
            EngineConfig::default(),
        )
    }

    #[test]
    fn new_engine_starts_in_the_started_state() {
        let e = engine();
        assert!(e.is_started());
        assert_eq!(e.responder().subscriber_count("Anything"), 0);
    }

    #[tokio::test]
    async fn stop_then_reset_round_trips_the_started_flag() {
        let mut e = engine();
        e.stop().await;
        assert!(!e.is_started());
        e.reset().await;
        assert!(e.is_started());
    }
}
