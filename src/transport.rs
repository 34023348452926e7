//! External collaborator interfaces: MIDI transport, device discovery, and
//! the CI message codec. None of these are implemented here -- the engine
//! only consumes them. Object-safe async traits follow the
//! `Pin<Box<dyn Future>>` pattern rather than `async-trait`, so the engine
//! can hold `Arc<dyn Transport>` / `Arc<dyn DeviceDiscovery>` trait objects.

use crate::error::NakDetails;
use crate::ids::{DeviceIdentity, Destination, Duid};
use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// The MIDI transport: sending/receiving raw byte frames and enumerating
/// send endpoints. Bit-exact SysEx framing is a host concern; this trait is
/// consumed here, not implemented.
pub trait Transport: Send + Sync {
    fn send<'a>(&'a self, bytes: &'a [u8], to: &'a Destination) -> BoxFuture<'a, Result<(), TransportError>>;

    fn broadcast<'a>(&'a self, bytes: &'a [u8]) -> BoxFuture<'a, Result<(), TransportError>>;

    fn destinations(&self) -> Vec<Destination>;
}

/// A device discovered on the bus, as produced by the discovery service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub duid: Duid,
    pub destination: Destination,
    pub identity: DeviceIdentity,
    pub name: Option<String>,
}

/// Device discovery events, consumed by the Subscription Manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    DeviceDiscovered(DiscoveredDevice),
    DeviceLost(Duid),
    DeviceUpdated(DiscoveredDevice),
}

/// The device discovery collaborator: produces `(DUID, destination)` pairs
/// and exposes a resolver plus an enumeration of currently-known devices.
pub trait DeviceDiscovery: Send + Sync {
    fn destination_for<'a>(&'a self, duid: Duid) -> BoxFuture<'a, Option<Destination>>;

    fn discovered_devices(&self) -> Vec<DiscoveredDevice>;
}

/// Header fields the PE Manager needs out of a parsed PE Reply/Notify
/// header. Built by the (external) message parser.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct ParsedHeader {
    #[serde(default = "default_status")]
    pub status: u16,
    pub message: Option<String>,
    pub resource: Option<String>,
    #[serde(rename = "resId")]
    pub res_id: Option<String>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
    #[serde(rename = "totalCount")]
    pub total_count: Option<i64>,
    #[serde(rename = "mediaType")]
    pub media_type: Option<String>,
    #[serde(rename = "mutualEncoding")]
    pub mutual_encoding: Option<String>,
}

fn default_status() -> u16 {
    200
}

impl ParsedHeader {
    /// `isMcoded7` is true iff `mutualEncoding` or `mediaType` equals
    /// (case-insensitive) "mcoded7".
    pub fn is_mcoded7(&self) -> bool {
        [&self.mutual_encoding, &self.media_type]
            .into_iter()
            .flatten()
            .any(|v| v.eq_ignore_ascii_case("mcoded7"))
    }
}

/// The kind of inbound message the (external) parser classified a frame as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedMessage {
    Nak {
        destination_duid: Duid,
        details: NakDetails,
    },
    SubscribeReply {
        source: Duid,
        request_id: crate::ids::RequestId,
        status: u16,
        subscribe_id: Option<String>,
    },
    Notify {
        source: Duid,
        request_id: crate::ids::RequestId,
        this_chunk: u32,
        num_chunks: u32,
        header: Vec<u8>,
        property: Vec<u8>,
        subscribe_id: Option<String>,
        resource: Option<String>,
    },
    PeReply {
        source: Duid,
        request_id: crate::ids::RequestId,
        this_chunk: u32,
        num_chunks: u32,
        header: Vec<u8>,
        property: Vec<u8>,
    },
    Other,
}

/// Mcoded7 codec seam. Actual bit-packing is out of scope; the engine only
/// needs the decode direction to implement the `decodedBody` fallback.
pub trait Mcoded7Codec: Send + Sync {
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, String>;
    fn encode(&self, data: &[u8]) -> Vec<u8>;
}
