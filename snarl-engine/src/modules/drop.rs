use tokio::time::Instant;
use tracing::{debug, trace};

use snarl_common::{check_chance, fraction};
use snarl_packet::PacketQueue;

use crate::config::ModuleConfig;

use super::{Impairment, ProcessResult};

/// Removes eligible records from the queue with a configurable
/// per-record probability. Dropped bytes are never delivered.
#[derive(Debug)]
pub struct DropModule {
    inbound: bool,
    outbound: bool,
    chance: f32,
}

impl DropModule {
    pub fn new() -> Self {
        Self { inbound: true, outbound: true, chance: 10.0 }
    }
}

impl Default for DropModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Impairment for DropModule {
    fn name(&self) -> &'static str {
        "drop"
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
    }

    fn process(&mut self, queue: &mut PacketQueue, _now: Instant) -> ProcessResult {
        let total = queue.len();
        let mut dropped = 0usize;

        queue.retain(|packet| {
            if packet.eligible(self.inbound, self.outbound) && check_chance(self.chance) {
                trace!(
                    chance = self.chance,
                    direction = ?packet.direction,
                    len = packet.payload.len(),
                    "dropped packet"
                );
                dropped += 1;
                false
            } else {
                true
            }
        });

        ProcessResult {
            wake_after: None,
            changed: dropped > 0,
            indicator: fraction(dropped, total),
        }
    }
}
