//! Notify Assembly Manager: one Chunk Assembler per source device.
//!
//! Notify Request IDs are owned by the device, not allocated by the
//! Transaction Manager, so this component never touches ID allocation.

use crate::chunk::{ChunkAssembler, ChunkOutcome};
use crate::ids::{Duid, RequestId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct NotifyAssemblyManager {
    per_source: HashMap<Duid, ChunkAssembler>,
    timeout: Duration,
}

impl NotifyAssemblyManager {
    pub fn new(timeout: Duration) -> Self {
        NotifyAssemblyManager {
            per_source: HashMap::new(),
            timeout,
        }
    }

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
        let timeout = self.timeout;
        self.per_source.entry(source).or_default().add(
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

    /// Walk every source's assembler and prune stale assemblies.
    pub fn poll_timeouts(&mut self, now: Instant) -> Vec<(Duid, ChunkOutcome)> {
        let mut out = Vec::new();
        for (source, assembler) in self.per_source.iter_mut() {
            for outcome in assembler.poll_timeouts(now) {
                out.push((*source, outcome));
            }
        }
        self.per_source.retain(|_, a| !a.is_empty());
        out
    }

    /// Drop every pending assembly across all sources.
    pub fn cancel_all(&mut self) {
        for assembler in self.per_source.values_mut() {
            assembler.cancel_all();
        }
        self.per_source.clear();
    }
}
