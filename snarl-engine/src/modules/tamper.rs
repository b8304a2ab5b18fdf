use std::sync::Arc;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, trace};

use snarl_common::{fraction, roll_chance};
use snarl_packet::PacketQueue;

use crate::{config::ModuleConfig, divert::Checksum};

use super::{Impairment, ProcessResult};

/// Corrupts selected payloads in place by flipping random bits, then hands
/// the damaged bytes to the capture driver's checksum engine so the packet
/// still parses at the receiver.
pub struct TamperModule {
    inbound: bool,
    outbound: bool,
    chance: f32,
    max_bit_flips: u32,
    checksums: Arc<dyn Checksum>,
}

impl std::fmt::Debug for TamperModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TamperModule")
            .field("inbound", &self.inbound)
            .field("outbound", &self.outbound)
            .field("chance", &self.chance)
            .field("max_bit_flips", &self.max_bit_flips)
            .finish_non_exhaustive()
    }
}

impl TamperModule {
    pub fn new(checksums: Arc<dyn Checksum>) -> Self {
        Self { inbound: true, outbound: true, chance: 10.0, max_bit_flips: 1, checksums }
    }
}

impl Impairment for TamperModule {
    fn name(&self) -> &'static str {
        "tamper"
    }

    fn enable(&mut self) {
        debug!(module = self.name(), "enabling");
    }

    fn disable(&mut self, _queue: &mut PacketQueue) {
        debug!(module = self.name(), "disabling");
    }

    fn apply_config(&mut self, config: &ModuleConfig) {
        self.inbound = config.inbound;
        self.outbound = config.outbound;
        self.chance = config.chance.clamp(0.0, 100.0);
        self.max_bit_flips = config.max_bit_flips;
    }

    fn process(&mut self, queue: &mut PacketQueue, now: Instant) -> ProcessResult {
        let _ = now;
        if self.max_bit_flips == 0 {
            return ProcessResult::default();
        }

        let mut rng = rand::thread_rng();
        let total = queue.len();
        let mut tampered = 0usize;

        for packet in queue.iter_mut() {
            if !packet.eligible(self.inbound, self.outbound)
                || packet.payload.is_empty()
                || !roll_chance(&mut rng, self.chance)
            {
                continue;
            }

            // Detaches the payload from its shared arena before writing, so
            // sibling records captured in the same batch stay intact.
            let data = packet.payload.make_mut();
            let flips = rng.gen_range(1..=self.max_bit_flips);
            for _ in 0..flips {
                let byte = rng.gen_range(0..data.len());
                data[byte] ^= 1u8 << rng.gen_range(0..8);
            }
            self.checksums.recompute(data);

            trace!(flips, len = data.len(), direction = ?packet.direction, "tampered packet");
            tampered += 1;
        }

        ProcessResult {
            wake_after: None,
            changed: tampered > 0,
            indicator: fraction(tampered, total),
        }
    }
}
