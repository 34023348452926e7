//! Chunk Assembler: reconstructs a multi-chunk PE Reply or Notify body from
//! ordered chunks keyed by `(source DUID, Request ID)`.

use crate::ids::{Duid, RequestId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of feeding one chunk into the assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// All chunks received; the assembly has been purged from the assembler.
    Complete {
        request_id: RequestId,
        header: Vec<u8>,
        body: Vec<u8>,
    },
    /// More chunks expected; the assembly's deadline has been refreshed.
    Incomplete,
    /// The assembly had been idle longer than its configured timeout.
    Timeout {
        request_id: RequestId,
        received: usize,
        expected: usize,
        resource: Option<String>,
    },
    /// Chunk N > 1 arrived with no prior state for this key (or the prior
    /// state was just discarded due to a `numChunks` mismatch).
    UnknownRequestId { request_id: RequestId },
}

#[derive(Debug)]
struct Assembly {
    expected: u32,
    received: HashSet<u32>,
    property: BTreeMap<u32, Vec<u8>>,
    header: Option<Vec<u8>>,
    resource: Option<String>,
    deadline: Instant,
    timeout: Duration,
}

impl Assembly {
    fn refresh_deadline(&mut self, now: Instant) {
        self.deadline = now + self.timeout;
    }

    fn is_complete(&self) -> bool {
        self.received.len() == self.expected as usize
    }

    fn concatenated_property(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for idx in 1..=self.expected {
            if let Some(bytes) = self.property.get(&idx) {
                out.extend_from_slice(bytes);
            }
        }
        out
    }
}

fn best_effort_resource(header: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(header).ok()?;
    value
        .get("resource")
        .and_then(|v| v.as_str())
        .map(|s| s.to_owned())
}

/// Buffers any number of concurrent assemblies keyed by `(source DUID,
/// Request ID)`.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    assemblies: HashMap<(Duid, RequestId), Assembly>,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        ChunkAssembler {
            assemblies: HashMap::new(),
        }
    }

    /// Feed one chunk into the assembler.
    ///
    /// `this_chunk` and `num_chunks` are 1-based per the wire invariant;
    /// `header` is only meaningful (and only stored) on chunk 1.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        now: Instant,
        source: Duid,
        request_id: RequestId,
        this_chunk: u32,
        num_chunks: u32,
        header: &[u8],
        property: &[u8],
        timeout: Duration,
    ) -> ChunkOutcome {
        let key = (source, request_id);

        match self.assemblies.get_mut(&key) {
            None => {
                if this_chunk != 1 {
                    return ChunkOutcome::UnknownRequestId { request_id };
                }
                if this_chunk < 1 || this_chunk > num_chunks {
                    // No assembly exists yet to "continue" -- drop silently.
                    return ChunkOutcome::Incomplete;
                }
                let mut received = HashSet::new();
                received.insert(this_chunk);
                let mut prop_map = BTreeMap::new();
                prop_map.insert(this_chunk, property.to_vec());
                let assembly = Assembly {
                    expected: num_chunks,
                    received,
                    property: prop_map,
                    header: Some(header.to_vec()),
                    resource: best_effort_resource(header),
                    deadline: now + timeout,
                    timeout,
                };
                let complete = assembly.is_complete();
                self.assemblies.insert(key, assembly);
                if complete {
                    self.finish(key)
                } else {
                    ChunkOutcome::Incomplete
                }
            }
            Some(assembly) => {
                if num_chunks != assembly.expected {
                    self.assemblies.remove(&key);
                    return ChunkOutcome::UnknownRequestId { request_id };
                }
                if this_chunk < 1 || this_chunk > assembly.expected {
                    return ChunkOutcome::Incomplete;
                }
                if assembly.received.contains(&this_chunk) {
                    // Duplicate: accept-once semantics, but it's still an
                    // arrival for idle-timeout purposes.
                    assembly.refresh_deadline(now);
                    return ChunkOutcome::Incomplete;
                }
                assembly.received.insert(this_chunk);
                assembly.property.insert(this_chunk, property.to_vec());
                if this_chunk == 1 {
                    assembly.header = Some(header.to_vec());
                    if assembly.resource.is_none() {
                        assembly.resource = best_effort_resource(header);
                    }
                }
                assembly.refresh_deadline(now);
                if assembly.is_complete() {
                    self.finish(key)
                } else {
                    ChunkOutcome::Incomplete
                }
            }
        }
    }

    fn finish(&mut self, key: (Duid, RequestId)) -> ChunkOutcome {
        let assembly = self.assemblies.remove(&key).expect("just completed");
        ChunkOutcome::Complete {
            request_id: key.1,
            header: assembly.header.unwrap_or_default(),
            body: assembly.concatenated_property(),
        }
    }

    /// Prune assemblies that have been idle longer than their configured
    /// timeout, returning a timeout outcome for each.
    pub fn poll_timeouts(&mut self, now: Instant) -> Vec<ChunkOutcome> {
        let stale: Vec<(Duid, RequestId)> = self
            .assemblies
            .iter()
            .filter(|(_, a)| now >= a.deadline)
            .map(|(k, _)| *k)
            .collect();

        let mut out = Vec::with_capacity(stale.len());
        for key in stale {
            if let Some(assembly) = self.assemblies.remove(&key) {
                out.push(ChunkOutcome::Timeout {
                    request_id: key.1,
                    received: assembly.received.len(),
                    expected: assembly.expected as usize,
                    resource: assembly.resource,
                });
            }
        }
        out
    }

    /// Drop every pending assembly without producing timeout events.
    pub fn cancel_all(&mut self) {
        self.assemblies.clear();
    }

    /// Drop a single assembly (if any) without producing a timeout event.
    /// Used when the owning transaction reaches a terminal state some other
    /// way (local reply timeout, cancellation) before the assembly itself
    /// either completed or went idle -- otherwise a leftover partial assembly
    /// would still be sitting here keyed by an id that may be reissued to an
    /// unrelated transaction once its cooldown elapses.
    pub fn discard(&mut self, source: Duid, request_id: RequestId) {
        self.assemblies.remove(&(source, request_id));
    }

    pub fn is_empty(&self) -> bool {
        self.assemblies.is_empty()
    }
}
