//! Transaction Manager: allocates and releases 7-bit Request IDs, enforces
//! the per-destination in-flight cap, and applies a cooldown before an ID
//! may be reissued.

use crate::chunk::{ChunkAssembler, ChunkOutcome};
use crate::ids::{Duid, RequestId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Reservation {
    duid: Duid,
    #[allow(dead_code)]
    resource: String,
}

/// Configuration for the Transaction Manager, injected at construction.
#[derive(Debug, Clone)]
pub struct TransactionManagerConfig {
    /// Interval a released ID sits in cooldown before it may be reissued.
    /// Default 2s; tests typically pass `Duration::ZERO`.
    pub cooldown: Duration,
    /// Maximum concurrently-reserved IDs for a single destination DUID.
    pub per_device_in_flight_cap: u32,
    /// Idle timeout handed to the inner Chunk Assembler for Initiator-owned
    /// PE Reply assemblies.
    pub chunk_timeout: Duration,
}

impl Default for TransactionManagerConfig {
    fn default() -> Self {
        TransactionManagerConfig {
            cooldown: Duration::from_secs(2),
            per_device_in_flight_cap: 2,
            chunk_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug)]
pub struct TransactionManager {
    config: TransactionManagerConfig,
    reserved: HashMap<RequestId, Reservation>,
    in_flight_by_duid: HashMap<Duid, u32>,
    released_at: HashMap<RequestId, Instant>,
    last_handed_out: u8,
    stopped: bool,
    chunk_assembler: ChunkAssembler,
}

impl TransactionManager {
    pub fn new(config: TransactionManagerConfig) -> Self {
        TransactionManager {
            config,
            reserved: HashMap::new(),
            in_flight_by_duid: HashMap::new(),
            released_at: HashMap::new(),
            last_handed_out: RequestId::MAX,
            stopped: false,
            chunk_assembler: ChunkAssembler::new(),
        }
    }

    fn is_in_cooldown(&self, id: RequestId, now: Instant) -> bool {
        match self.released_at.get(&id) {
            Some(released) => now < *released + self.config.cooldown,
            None => false,
        }
    }

    /// Reserve a Request ID for `resource` targeting `destination_duid`.
    ///
    /// Fails when every ID is reserved or in cooldown, or when the
    /// destination's in-flight cap has been reached.
    pub fn begin(&mut self, resource: &str, destination_duid: Duid, now: Instant) -> Option<RequestId> {
        if self.stopped {
            return None;
        }
        let in_flight = self
            .in_flight_by_duid
            .get(&destination_duid)
            .copied()
            .unwrap_or(0);
        if in_flight >= self.config.per_device_in_flight_cap {
            return None;
        }

        let start = (self.last_handed_out as u16 + 1) % RequestId::COUNT as u16;
        for offset in 0..RequestId::COUNT as u16 {
            let candidate = ((start + offset) % RequestId::COUNT as u16) as u8;
            let id = RequestId::new(candidate).expect("candidate is always < 128");
            if self.reserved.contains_key(&id) {
                continue;
            }
            if self.is_in_cooldown(id, now) {
                continue;
            }

            self.reserved.insert(
                id,
                Reservation {
                    duid: destination_duid,
                    resource: resource.to_owned(),
                },
            );
            *self.in_flight_by_duid.entry(destination_duid).or_insert(0) += 1;
            self.last_handed_out = candidate;
            return Some(id);
        }
        None
    }

    /// Release a reserved ID, starting its cooldown from `now`. Also
    /// discards any partial Chunk Assembler state for `(destination, id)` so
    /// a future transaction reissued this id after cooldown never collides
    /// with a leftover assembly from this one.
    pub fn cancel(&mut self, id: RequestId, now: Instant) {
        if let Some(reservation) = self.reserved.remove(&id) {
            if let Some(count) = self.in_flight_by_duid.get_mut(&reservation.duid) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.in_flight_by_duid.remove(&reservation.duid);
                }
            }
            self.chunk_assembler.discard(reservation.duid, id);
        }
        self.released_at.insert(id, now);
    }

    /// Terminal stop: release every reserved ID into cooldown and refuse all
    /// further `begin` calls until `reset`.
    pub fn cancel_all(&mut self, now: Instant) {
        let ids: Vec<RequestId> = self.reserved.keys().copied().collect();
        for id in ids {
            self.cancel(id, now);
        }
        self.chunk_assembler.cancel_all();
        self.stopped = true;
    }

    /// Clear the stopped flag so the manager may be reused. Cooldowns already
    /// in effect are preserved.
    pub fn reset(&mut self) {
        self.stopped = false;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn in_flight_count(&self, duid: Duid) -> u32 {
        self.in_flight_by_duid.get(&duid).copied().unwrap_or(0)
    }

    pub fn reserved_count(&self) -> usize {
        self.reserved.len()
    }

    /// Delegate a PE Reply chunk to the Initiator-owned Chunk Assembler.
    #[allow(clippy::too_many_arguments)]
    pub fn process_chunk(
        &mut self,
        now: Instant,
        source: Duid,
        request_id: RequestId,
        this_chunk: u32,
        num_chunks: u32,
        header: &[u8],
        property: &[u8],
    ) -> ChunkOutcome {
        let timeout = self.config.chunk_timeout;
        self.chunk_assembler.add(
            now,
            source,
            request_id,
            this_chunk,
            num_chunks,
            header,
            property,
            timeout,
        )
    }

    pub fn poll_chunk_timeouts(&mut self, now: Instant) -> Vec<ChunkOutcome> {
        self.chunk_assembler.poll_timeouts(now)
    }
}
