use tokio::time::Instant;
use tracing::{debug, trace};

use snarl_common::{check_chance, fraction};
use snarl_packet::PacketQueue;

use crate::config::ModuleConfig;

use super::{Impairment, ProcessResult};

/// Inserts extra copies of eligible records immediately adjacent to the
/// original. Inserted copies are skipped by the same pass, so they are
/// never duplicated again.
#[derive(Debug)]
pub struct DuplicateModule {
    inbound: bool,
    outbound: bool,
    chance: f32,
    /// Extra copies per selected record. Zero is a no-op.
    count: usize,
}

impl DuplicateModule {
    pub fn new() -> Self {
        Self { inbound: true, outbound: true, chance: 10.0, count: 1 }
    }
}

impl Default for DuplicateModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Impairment for DuplicateModule {
    fn name(&self) -> &'static str {
        "duplicate"
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
        self.count = config.count.max(0) as usize;
    }

    fn process(&mut self, queue: &mut PacketQueue, _now: Instant) -> ProcessResult {
        if self.count == 0 {
            return ProcessResult::default();
        }

        let total = queue.len();
        let mut duplicated = 0usize;

        for packet in queue.take() {
            if packet.eligible(self.inbound, self.outbound) && check_chance(self.chance) {
                trace!(
                    chance = self.chance,
                    count = self.count,
                    direction = ?packet.direction,
                    "duplicated packet"
                );
                for _ in 0..self.count {
                    queue.push_back(packet.clone());
                }
                duplicated += 1;
            }
            queue.push_back(packet);
        }

        ProcessResult {
            wake_after: None,
            changed: duplicated > 0,
            indicator: fraction(duplicated, total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testutil::*;
    use snarl_packet::Direction;

    fn module(count: i64, chance: f32) -> DuplicateModule {
        let mut module = DuplicateModule::new();
        module.apply_config(&ModuleConfig { count, chance, ..ModuleConfig::default() });
        module
    }

    #[test]
    fn every_selected_record_becomes_count_plus_one_copies() {
        let mut queue = queue_of([
            packet(0, Direction::Inbound),
            packet(1, Direction::Outbound),
        ]);
        let result = module(2, 100.0).process(&mut queue, Instant::now());

        assert_eq!(tags(&queue), vec![0, 0, 0, 1, 1, 1]);
        assert!(result.changed);
        assert_eq!(result.indicator, 1.0);
    }

    #[test]
    fn ineligible_records_keep_their_place() {
        let mut module = module(1, 100.0);
        module.apply_config(&ModuleConfig {
            count: 1,
            chance: 100.0,
            inbound: false,
            ..ModuleConfig::default()
        });

        let mut queue = queue_of([
            packet(0, Direction::Inbound),
            packet(1, Direction::Outbound),
            packet(2, Direction::Inbound),
        ]);
        module.process(&mut queue, Instant::now());

        assert_eq!(tags(&queue), vec![0, 1, 1, 2]);
    }

    #[test]
    fn zero_and_negative_counts_are_no_ops() {
        for count in [0, -3] {
            let mut queue = queue_of([packet(0, Direction::Inbound)]);
            let result = module(count, 100.0).process(&mut queue, Instant::now());
            assert_eq!(queue.len(), 1);
            assert!(!result.changed);
        }
    }
}
