use tokio::time::Instant;
use tracing::{debug, trace};

use snarl_common::{constants::KiB, fraction};
use snarl_packet::PacketQueue;

use crate::{bucket::TokenBucket, config::ModuleConfig};

use super::{Impairment, ProcessResult};

/// Caps eligible traffic at a configured rate using a token bucket.
///
/// Admission is greedy and order-preserving: each eligible record is
/// admitted if its byte length fits the current token balance, otherwise it
/// is dropped on the spot. Packets over the budget are discarded, never
/// delayed.
#[derive(Debug)]
pub struct BandwidthModule {
    inbound: bool,
    outbound: bool,
    /// Rate cap in KiB/s. Zero drops all eligible traffic; negative leaves
    /// the module inert.
    limit: i64,
    bucket: TokenBucket,
}

impl BandwidthModule {
    pub fn new() -> Self {
        Self { inbound: true, outbound: true, limit: 10, bucket: TokenBucket::new(0.0) }
    }
}

impl Default for BandwidthModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Impairment for BandwidthModule {
    fn name(&self) -> &'static str {
        "bandwidth"
    }

    fn enable(&mut self) {
        debug!(module = self.name(), limit = self.limit, "enabling");
    }

    fn disable(&mut self, _queue: &mut PacketQueue) {
        debug!(module = self.name(), "disabling");
        self.bucket.reset();
    }

    fn apply_config(&mut self, config: &ModuleConfig) {
        self.inbound = config.inbound;
        self.outbound = config.outbound;
        self.limit = config.limit;
    }

    fn process(&mut self, queue: &mut PacketQueue, now: Instant) -> ProcessResult {
        if self.limit < 0 {
            return ProcessResult::default();
        }

        let rate = (self.limit as usize * KiB) as f64;
        self.bucket.set_capacity(rate);
        self.bucket.refill(now, rate);

        let total = queue.len();
        let mut dropped = 0usize;

        queue.retain(|packet| {
            if !packet.eligible(self.inbound, self.outbound) {
                return true;
            }

            if self.bucket.try_consume(packet.payload.len()) {
                true
            } else {
                trace!(
                    limit = self.limit,
                    len = packet.payload.len(),
                    direction = ?packet.direction,
                    "dropped packet over bandwidth budget"
                );
                dropped += 1;
                false
            }
        });

        ProcessResult {
            wake_after: None,
            changed: dropped > 0,
            indicator: fraction(dropped, total),
        }
    }
}
