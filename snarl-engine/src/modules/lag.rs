use std::{collections::VecDeque, time::Duration};

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use snarl_common::{check_chance, fraction};
use snarl_packet::{Packet, PacketQueue};

use crate::config::ModuleConfig;

use super::{flush_held, min_wake, Impairment, ProcessResult, MAX_HELD};

/// Delays eligible records by a fixed duration.
///
/// Selected records move into a private hold-list and return to the queue
/// tail once `captured_at + lag` has elapsed. The hold-list stays sorted by
/// capture time, so delayed records are released in their original capture
/// order. A full hold-list fails open: everything is flushed at once rather
/// than growing without bound.
pub struct LagModule {
    inbound: bool,
    outbound: bool,
    chance: f32,
    lag: Duration,
    held: VecDeque<Packet>,
}

impl std::fmt::Debug for LagModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LagModule")
            .field("chance", &self.chance)
            .field("lag", &self.lag)
            .field("held", &self.held.len())
            .finish_non_exhaustive()
    }
}

impl LagModule {
    pub fn new() -> Self {
        Self {
            inbound: true,
            outbound: true,
            chance: 10.0,
            lag: Duration::from_millis(200),
            held: VecDeque::new(),
        }
    }
}

impl Default for LagModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Impairment for LagModule {
    fn name(&self) -> &'static str {
        "lag"
    }

    fn enable(&mut self) {
        debug!(module = self.name(), "enabling");
        assert!(self.held.is_empty(), "lag hold-list must be empty on enable");
    }

    fn disable(&mut self, queue: &mut PacketQueue) {
        debug!(module = self.name(), flushing = self.held.len(), "disabling");
        flush_held(queue, &mut self.held);
    }

    fn apply_config(&mut self, config: &ModuleConfig) {
        self.inbound = config.inbound;
        self.outbound = config.outbound;
        self.chance = config.chance.clamp(0.0, 100.0);
        self.lag = Duration::from_millis(config.lag_time);
    }

    fn process(&mut self, queue: &mut PacketQueue, now: Instant) -> ProcessResult {
        let total = queue.len();

        // Pass 1: pull chance-selected eligible records into the hold-list.
        // The queue is capture-ordered, so the hold-list stays capture-
        // ordered too.
        let selected = queue
            .drain_where(|p| p.eligible(self.inbound, self.outbound) && check_chance(self.chance));
        let delayed = selected.len();
        self.held.extend(selected);

        // Pass 2: release overdue records to the queue tail, oldest first.
        let mut changed = delayed > 0;
        let mut wake = None;
        for packet in std::mem::take(&mut self.held) {
            let deadline = packet.captured_at + self.lag;
            if now >= deadline {
                trace!(lag = ?self.lag, "releasing delayed packet");
                queue.push_back(packet);
                changed = true;
            } else {
                wake = min_wake(wake, Some(deadline.duration_since(now)));
                self.held.push_back(packet);
            }
        }

        // Fail open rather than hold unbounded memory.
        if self.held.len() > MAX_HELD {
            warn!(module = self.name(), held = self.held.len(), "hold-list full, flushing");
            flush_held(queue, &mut self.held);
            wake = None;
            changed = true;
        }

        ProcessResult { wake_after: wake, changed, indicator: fraction(delayed, total) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testutil::*;
    use snarl_packet::Direction;

    fn module(lag_time: u64, chance: f32) -> LagModule {
        let mut module = LagModule::new();
        module.apply_config(&ModuleConfig { lag_time, chance, ..ModuleConfig::default() });
        module
    }

    #[test]
    fn holds_records_until_the_delay_elapses() {
        let mut module = module(50, 100.0);
        let t0 = Instant::now();
        let mut queue = queue_of([packet_at(1, Direction::Outbound, t0)]);

        let result = module.process(&mut queue, t0);
        assert!(queue.is_empty());
        assert_eq!(result.wake_after, Some(Duration::from_millis(50)));

        // Still held just before the deadline.
        let result = module.process(&mut queue, t0 + Duration::from_millis(49));
        assert!(queue.is_empty());
        assert_eq!(result.wake_after, Some(Duration::from_millis(1)));

        // Released exactly once, at the deadline.
        let result = module.process(&mut queue, t0 + Duration::from_millis(50));
        assert_eq!(tags(&queue), vec![1]);
        assert_eq!(result.wake_after, None);

        module.process(&mut queue, t0 + Duration::from_millis(100));
        assert_eq!(tags(&queue), vec![1]);
    }

    #[test]
    fn releases_in_capture_order() {
        let mut module = module(30, 100.0);
        let t0 = Instant::now();

        let mut queue = queue_of([packet_at(1, Direction::Inbound, t0)]);
        module.process(&mut queue, t0);

        let mut queue = queue_of([packet_at(2, Direction::Inbound, t0 + Duration::from_millis(10))]);
        module.process(&mut queue, t0 + Duration::from_millis(10));
        assert!(queue.is_empty());

        module.process(&mut queue, t0 + Duration::from_millis(60));
        assert_eq!(tags(&queue), vec![1, 2]);
    }

    #[test]
    fn wake_is_the_minimum_remaining_delay() {
        let mut module = module(100, 100.0);
        let t0 = Instant::now();

        let mut queue = queue_of([packet_at(1, Direction::Inbound, t0)]);
        module.process(&mut queue, t0);

        let mut queue =
            queue_of([packet_at(2, Direction::Inbound, t0 + Duration::from_millis(40))]);
        let result = module.process(&mut queue, t0 + Duration::from_millis(40));
        assert_eq!(result.wake_after, Some(Duration::from_millis(60)));
    }

    #[test]
    fn overflowing_the_hold_list_flushes_everything() {
        let mut module = module(60_000, 100.0);
        let t0 = Instant::now();

        let mut queue = queue_of((0..=MAX_HELD).map(|_| packet_at(0, Direction::Inbound, t0)));
        let result = module.process(&mut queue, t0);

        assert_eq!(queue.len(), MAX_HELD + 1);
        assert_eq!(result.wake_after, None);
        assert!(module.held.is_empty());
    }

    #[test]
    fn disable_flushes_held_records_in_order() {
        let mut module = module(60_000, 100.0);
        let t0 = Instant::now();
        let mut queue = queue_of([
            packet_at(1, Direction::Inbound, t0),
            packet_at(2, Direction::Inbound, t0),
        ]);
        module.process(&mut queue, t0);
        assert!(queue.is_empty());

        module.disable(&mut queue);
        assert_eq!(tags(&queue), vec![1, 2]);
        // The hold-list is empty again: re-enabling must not trip the
        // invariant.
        module.enable();
    }
}
