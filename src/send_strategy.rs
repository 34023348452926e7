//! Send Strategy: policy object choosing how to route a request, plus the
//! target-DUID-from-message-bytes helper that feeds the Destination Cache.

use crate::destination_cache::DestinationCache;
use crate::error::PeError;
use crate::ids::{Destination, Duid};
use crate::transport::Transport;
use std::sync::Arc;
use tokio::time::Instant;

/// Closed variant set for routing policy.
#[derive(Clone)]
pub enum SendStrategy {
    /// Send once to the resolved destination.
    Single,
    /// Send once via the transport's broadcast primitive, reaching every
    /// known destination.
    Broadcast,
    /// Cache, falling back to the resolved destination (no broadcast at this
    /// layer -- a higher-level retry escalates on timeout).
    Fallback,
    /// Cache only; fails with `NoDestination` on a miss.
    Learned,
    /// User-supplied closure chooses destinations from the enumerated set.
    Custom(Arc<dyn Fn(&[Destination]) -> Vec<Destination> + Send + Sync>),
}

impl std::fmt::Debug for SendStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendStrategy::Single => write!(f, "SendStrategy::Single"),
            SendStrategy::Broadcast => write!(f, "SendStrategy::Broadcast"),
            SendStrategy::Fallback => write!(f, "SendStrategy::Fallback"),
            SendStrategy::Learned => write!(f, "SendStrategy::Learned"),
            SendStrategy::Custom(_) => write!(f, "SendStrategy::Custom(..)"),
        }
    }
}

impl SendStrategy {
    /// Send `bytes` to `duid` according to this policy.
    pub async fn send(
        &self,
        transport: &dyn Transport,
        cache: &mut DestinationCache,
        bytes: &[u8],
        duid: Duid,
        resolved: Option<Destination>,
        now: Instant,
    ) -> Result<(), PeError> {
        match self {
            SendStrategy::Single => {
                let dest = resolved.ok_or(PeError::NoDestination)?;
                transport
                    .send(bytes, &dest)
                    .await
                    .map_err(|e| PeError::TransportError { cause: e.0 })
            }
            SendStrategy::Broadcast => transport
                .broadcast(bytes)
                .await
                .map_err(|e| PeError::TransportError { cause: e.0 }),
            SendStrategy::Learned => {
                let dest = cache.get_cached(duid, now).ok_or(PeError::NoDestination)?;
                transport
                    .send(bytes, &dest)
                    .await
                    .map_err(|e| PeError::TransportError { cause: e.0 })
            }
            SendStrategy::Fallback => {
                let dest = cache
                    .get_cached(duid, now)
                    .or(resolved)
                    .ok_or(PeError::NoDestination)?;
                transport
                    .send(bytes, &dest)
                    .await
                    .map_err(|e| PeError::TransportError { cause: e.0 })
            }
            SendStrategy::Custom(choose) => {
                let candidates = transport.destinations();
                let chosen = choose(&candidates);
                if chosen.is_empty() {
                    return Err(PeError::NoDestination);
                }
                for dest in &chosen {
                    transport
                        .send(bytes, dest)
                        .await
                        .map_err(|e| PeError::TransportError { cause: e.0 })?;
                }
                Ok(())
            }
        }
    }
}

/// Recover the target DUID from a built message's bytes, enabling the
/// caller to record it in the Destination Cache after a successful send.
///
/// The DUID occupies the 4-byte, 7-bit-packed field at offset 9 (the
/// standard MIDI-CI MUID field position); this is the concrete byte range
/// implied by "bytes 9..12" in the wire description once read as a 4-byte,
/// 28-bit MUID rather than a 3-byte field (see DESIGN.md).
pub fn extract_target_duid(message: &[u8]) -> Option<Duid> {
    if message.len() < 13 {
        return None;
    }
    let b = &message[9..13];
    let value = (b[0] as u32 & 0x7F)
        | ((b[1] as u32 & 0x7F) << 7)
        | ((b[2] as u32 & 0x7F) << 14)
        | ((b[3] as u32 & 0x7F) << 21);
    Some(Duid::new(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{BoxFuture, TransportError};
    use std::sync::Mutex;

    struct FakeTransport {
        known: Vec<Destination>,
        sent: Mutex<Vec<(Vec<u8>, Destination)>>,
        broadcasts: Mutex<Vec<Vec<u8>>>,
        fail_send: bool,
    }

    impl FakeTransport {
        fn new(known: Vec<Destination>) -> Self {
            FakeTransport {
                known,
                sent: Mutex::new(Vec::new()),
                broadcasts: Mutex::new(Vec::new()),
                fail_send: false,
            }
        }
    }

    impl Transport for FakeTransport {
        fn send<'a>(&'a self, bytes: &'a [u8], to: &'a Destination) -> BoxFuture<'a, Result<(), TransportError>> {
            Box::pin(async move {
                if self.fail_send {
                    return Err(TransportError("boom".into()));
                }
                self.sent.lock().unwrap().push((bytes.to_vec(), to.clone()));
                Ok(())
            })
        }

        fn broadcast<'a>(&'a self, bytes: &'a [u8]) -> BoxFuture<'a, Result<(), TransportError>> {
            Box::pin(async move {
                self.broadcasts.lock().unwrap().push(bytes.to_vec());
                Ok(())
            })
        }

        fn destinations(&self) -> Vec<Destination> {
            self.known.clone()
        }
    }

    #[tokio::test]
    async fn single_sends_to_resolved_destination() {
        let t = FakeTransport::new(vec![]);
        let mut cache = DestinationCache::new(std::time::Duration::from_secs(30));
        let d = Destination::new("ep1");
        SendStrategy::Single
            .send(&t, &mut cache, b"hi", Duid::new(1), Some(d.clone()), Instant::now())
            .await
            .unwrap();
        assert_eq!(t.sent.lock().unwrap()[0].1, d);
    }

    #[tokio::test]
    async fn single_without_resolved_destination_fails() {
        let t = FakeTransport::new(vec![]);
        let mut cache = DestinationCache::new(std::time::Duration::from_secs(30));
        let err = SendStrategy::Single
            .send(&t, &mut cache, b"hi", Duid::new(1), None, Instant::now())
            .await
            .unwrap_err();
        assert_eq!(err, PeError::NoDestination);
    }

    #[tokio::test]
    async fn broadcast_uses_transport_broadcast_primitive() {
        let t = FakeTransport::new(vec![]);
        let mut cache = DestinationCache::new(std::time::Duration::from_secs(30));
        SendStrategy::Broadcast
            .send(&t, &mut cache, b"hi", Duid::new(1), None, Instant::now())
            .await
            .unwrap();
        assert_eq!(t.broadcasts.lock().unwrap().len(), 1);
        assert!(t.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn learned_fails_without_destination_not_broadcast() {
        let t = FakeTransport::new(vec![]);
        let mut cache = DestinationCache::new(std::time::Duration::from_secs(30));
        let err = SendStrategy::Learned
            .send(&t, &mut cache, b"hi", Duid::new(1), None, Instant::now())
            .await
            .unwrap_err();
        assert_eq!(err, PeError::NoDestination);
        assert!(t.broadcasts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn learned_uses_cache_when_present() {
        let t = FakeTransport::new(vec![]);
        let mut cache = DestinationCache::new(std::time::Duration::from_secs(30));
        let now = Instant::now();
        let d = Destination::new("cached");
        cache.record_success(Duid::new(1), d.clone(), now);
        SendStrategy::Learned
            .send(&t, &mut cache, b"hi", Duid::new(1), None, now)
            .await
            .unwrap();
        assert_eq!(t.sent.lock().unwrap()[0].1, d);
    }

    #[tokio::test]
    async fn fallback_prefers_cache_over_resolved() {
        let t = FakeTransport::new(vec![]);
        let mut cache = DestinationCache::new(std::time::Duration::from_secs(30));
        let now = Instant::now();
        let cached = Destination::new("cached");
        let resolved = Destination::new("resolved");
        cache.record_success(Duid::new(1), cached.clone(), now);
        SendStrategy::Fallback
            .send(&t, &mut cache, b"hi", Duid::new(1), Some(resolved), now)
            .await
            .unwrap();
        assert_eq!(t.sent.lock().unwrap()[0].1, cached);
    }

    #[tokio::test]
    async fn fallback_uses_resolved_on_cache_miss() {
        let t = FakeTransport::new(vec![]);
        let mut cache = DestinationCache::new(std::time::Duration::from_secs(30));
        let resolved = Destination::new("resolved");
        SendStrategy::Fallback
            .send(&t, &mut cache, b"hi", Duid::new(1), Some(resolved.clone()), Instant::now())
            .await
            .unwrap();
        assert_eq!(t.sent.lock().unwrap()[0].1, resolved);
    }

    #[tokio::test]
    async fn custom_sends_to_each_chosen_destination() {
        let known = vec![Destination::new("a"), Destination::new("b")];
        let t = FakeTransport::new(known.clone());
        let mut cache = DestinationCache::new(std::time::Duration::from_secs(30));
        let strategy = SendStrategy::Custom(Arc::new(|candidates: &[Destination]| candidates.to_vec()));
        strategy
            .send(&t, &mut cache, b"hi", Duid::new(1), None, Instant::now())
            .await
            .unwrap();
        assert_eq!(t.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn custom_with_empty_result_fails() {
        let t = FakeTransport::new(vec![Destination::new("a")]);
        let mut cache = DestinationCache::new(std::time::Duration::from_secs(30));
        let strategy = SendStrategy::Custom(Arc::new(|_: &[Destination]| Vec::new()));
        let err = strategy
            .send(&t, &mut cache, b"hi", Duid::new(1), None, Instant::now())
            .await
            .unwrap_err();
        assert_eq!(err, PeError::NoDestination);
    }

    #[tokio::test]
    async fn transport_failure_surfaces_as_transport_error() {
        let mut t = FakeTransport::new(vec![]);
        t.fail_send = true;
        let mut cache = DestinationCache::new(std::time::Duration::from_secs(30));
        let err = SendStrategy::Single
            .send(&t, &mut cache, b"hi", Duid::new(1), Some(Destination::new("x")), Instant::now())
            .await
            .unwrap_err();
        assert!(matches!(err, PeError::TransportError { .. }));
    }

    #[test]
    fn extract_target_duid_reads_4_byte_7_bit_packed_field_at_offset_9() {
        let mut msg = vec![0u8; 13];
        msg[9] = 0x01;
        msg[10] = 0x02;
        msg[11] = 0x03;
        msg[12] = 0x04;
        let duid = extract_target_duid(&msg).unwrap();
        let expected = 0x01 | (0x02 << 7) | (0x03 << 14) | (0x04 << 21);
        assert_eq!(duid.value(), expected);
    }

    #[test]
    fn extract_target_duid_none_when_too_short() {
        assert!(extract_target_duid(&[0u8; 5]).is_none());
    }
}
