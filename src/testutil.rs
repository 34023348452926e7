//! Shared test fakes for `Transport`, `DeviceDiscovery`, `Mcoded7Codec`, and
//! `MessageBuilder`, used by this crate's own integration suite under
//! `tests/`. Always-compiled rather than `#[cfg(test)]`-gated, since
//! `tests/*.rs` binaries only see `pub` items.

use crate::ids::{Destination, Duid, RequestId};
use crate::manager::MessageBuilder;
use crate::request::PeRequest;
use crate::transport::{BoxFuture, DeviceDiscovery, DiscoveredDevice, Mcoded7Codec, Transport, TransportError};
use std::collections::HashMap;
use std::sync::Mutex;

/// Records every `send`/`broadcast` call; replies are injected by the test
/// via [`FakeTransport::queue_reply`] and delivered out-of-band by the test
/// itself feeding them back into a [`crate::manager::PeManager`].
#[derive(Default)]
pub struct FakeTransport {
    pub sent: Mutex<Vec<(Vec<u8>, Destination)>>,
    pub broadcasts: Mutex<Vec<Vec<u8>>>,
    pub known_destinations: Vec<Destination>,
    pub fail_send: bool,
}

impl FakeTransport {
    pub fn new(known_destinations: Vec<Destination>) -> Self {
        FakeTransport {
            sent: Mutex::new(Vec::new()),
            broadcasts: Mutex::new(Vec::new()),
            known_destinations,
            fail_send: false,
        }
    }

    pub fn failing() -> Self {
        FakeTransport {
            fail_send: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl Transport for FakeTransport {
    fn send<'a>(&'a self, bytes: &'a [u8], to: &'a Destination) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            if self.fail_send {
                return Err(TransportError("fake transport send failure".into()));
            }
            self.sent.lock().unwrap().push((bytes.to_vec(), to.clone()));
            Ok(())
        })
    }

    fn broadcast<'a>(&'a self, bytes: &'a [u8]) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            if self.fail_send {
                return Err(TransportError("fake transport broadcast failure".into()));
            }
            self.broadcasts.lock().unwrap().push(bytes.to_vec());
            Ok(())
        })
    }

    fn destinations(&self) -> Vec<Destination> {
        self.known_destinations.clone()
    }
}

/// A fixed DUID -> destination map, standing in for real device discovery.
#[derive(Default)]
pub struct FakeDiscovery {
    pub routes: HashMap<Duid, Destination>,
    pub devices: Vec<DiscoveredDevice>,
}

impl FakeDiscovery {
    pub fn new() -> Self {
        FakeDiscovery::default()
    }

    pub fn with_route(mut self, duid: Duid, destination: Destination) -> Self {
        self.routes.insert(duid, destination);
        self
    }
}

impl DeviceDiscovery for FakeDiscovery {
    fn destination_for<'a>(&'a self, duid: Duid) -> BoxFuture<'a, Option<Destination>> {
        let found = self.routes.get(&duid).cloned();
        Box::pin(async move { found })
    }

    fn discovered_devices(&self) -> Vec<DiscoveredDevice> {
        self.devices.clone()
    }
}

/// Passes bytes through unchanged; `decode` can be made to fail via
/// [`IdentityCodec::failing`] for testing the raw-bytes-on-decode-failure
/// fallback path.
#[derive(Default)]
pub struct IdentityCodec {
    pub fail_decode: bool,
}

impl IdentityCodec {
    pub fn failing() -> Self {
        IdentityCodec { fail_decode: true }
    }
}

impl Mcoded7Codec for IdentityCodec {
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, String> {
        if self.fail_decode {
            Err("fake codec decode failure".into())
        } else {
            Ok(data.to_vec())
        }
    }

    fn encode(&self, data: &[u8]) -> Vec<u8> {
        data.to_vec()
    }
}

/// Builds trivial, fixed-shape wire bytes that embed the request ID as the
/// first byte -- enough for a test to thread a request/reply pair through
/// without a real CI byte-framer.
pub struct FakeMessageBuilder;

impl MessageBuilder for FakeMessageBuilder {
    fn build_get(&self, request_id: RequestId, req: &PeRequest) -> Vec<u8> {
        let mut out = vec![request_id.get(), 0];
        out.extend_from_slice(req.resource.as_bytes());
        out
    }

    fn build_set(&self, request_id: RequestId, req: &PeRequest) -> Vec<u8> {
        let mut out = vec![request_id.get(), 1];
        out.extend_from_slice(req.resource.as_bytes());
        out
    }

    fn build_subscribe(&self, request_id: RequestId, resource: &str, _target: Duid) -> Vec<u8> {
        let mut out = vec![request_id.get(), 2];
        out.extend_from_slice(resource.as_bytes());
        out
    }

    fn build_unsubscribe(&self, request_id: RequestId, resource: &str, _target: Duid, _subscribe_id: &str) -> Vec<u8> {
        let mut out = vec![request_id.get(), 3];
        out.extend_from_slice(resource.as_bytes());
        out
    }
}
