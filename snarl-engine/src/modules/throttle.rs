use std::{collections::VecDeque, time::Duration};

use tokio::time::Instant;
use tracing::{debug, trace};

use snarl_common::check_chance;
use snarl_packet::{Packet, PacketQueue};

use crate::config::ModuleConfig;

use super::{flush_held, Impairment, ProcessResult, MAX_HELD};

/// Impounds eligible traffic in short bursts.
///
/// The module alternates between `idle` and `throttling`. Each idle tick
/// rolls the chance; on success a window opens and every eligible record is
/// impounded into the batch list, across ticks, until the window's
/// timeframe elapses or the batch hits its ceiling. The flush releases the
/// whole batch in original order, or discards it when configured to drop.
pub struct ThrottleModule {
    inbound: bool,
    outbound: bool,
    chance: f32,
    timeframe: Duration,
    drop_throttled: bool,

    throttling: bool,
    started_at: Option<Instant>,
    held: VecDeque<Packet>,
}

impl std::fmt::Debug for ThrottleModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottleModule")
            .field("chance", &self.chance)
            .field("timeframe", &self.timeframe)
            .field("throttling", &self.throttling)
            .field("held", &self.held.len())
            .finish_non_exhaustive()
    }
}

impl ThrottleModule {
    pub fn new() -> Self {
        Self {
            inbound: true,
            outbound: true,
            chance: 10.0,
            timeframe: Duration::from_millis(200),
            drop_throttled: false,
            throttling: false,
            started_at: None,
            held: VecDeque::new(),
        }
    }

    fn flush(&mut self, queue: &mut PacketQueue) {
        if self.drop_throttled {
            debug!(module = self.name(), dropped = self.held.len(), "discarding throttled batch");
            self.held.clear();
        } else {
            debug!(module = self.name(), released = self.held.len(), "releasing throttled batch");
            flush_held(queue, &mut self.held);
        }

        self.throttling = false;
        self.started_at = None;
    }
}

impl Default for ThrottleModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Impairment for ThrottleModule {
    fn name(&self) -> &'static str {
        "throttle"
    }

    fn enable(&mut self) {
        debug!(module = self.name(), "enabling");
        assert!(
            self.held.is_empty() && !self.throttling,
            "throttle batch must be empty on enable"
        );
    }

    fn disable(&mut self, queue: &mut PacketQueue) {
        debug!(module = self.name(), "disabling");
        self.flush(queue);
    }

    fn apply_config(&mut self, config: &ModuleConfig) {
        self.inbound = config.inbound;
        self.outbound = config.outbound;
        self.chance = config.chance.clamp(0.0, 100.0);
        self.timeframe = Duration::from_millis(config.timeframe);
        self.drop_throttled = config.drop_throttled;
    }

    fn process(&mut self, queue: &mut PacketQueue, now: Instant) -> ProcessResult {
        let mut changed = false;

        if !self.throttling && check_chance(self.chance) {
            trace!(chance = self.chance, timeframe = ?self.timeframe, "throttle window opened");
            self.throttling = true;
            self.started_at = Some(now);
            changed = true;
        }

        if !self.throttling {
            return ProcessResult { wake_after: None, changed, indicator: 0.0 };
        }

        // Keep impounding while the window is open, up to the ceiling.
        let mut room = MAX_HELD.saturating_sub(self.held.len());
        let impounded = queue.drain_where(|p| {
            if room > 0 && p.eligible(self.inbound, self.outbound) {
                room -= 1;
                true
            } else {
                false
            }
        });
        changed |= !impounded.is_empty();
        self.held.extend(impounded);

        let started = self.started_at.expect("throttling without a start instant");
        let elapsed = now.duration_since(started);
        if self.held.len() >= MAX_HELD || elapsed >= self.timeframe {
            self.flush(queue);
            return ProcessResult { wake_after: None, changed: true, indicator: 0.0 };
        }

        ProcessResult {
            wake_after: Some(self.timeframe - elapsed),
            changed,
            indicator: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testutil::*;
    use snarl_packet::Direction;

    fn module(timeframe: u64, drop_throttled: bool) -> ThrottleModule {
        let mut module = ThrottleModule::new();
        module.apply_config(&ModuleConfig {
            chance: 100.0,
            timeframe,
            drop_throttled,
            ..ModuleConfig::default()
        });
        module
    }

    #[test]
    fn impounds_until_the_timeframe_elapses() {
        let mut module = module(100, false);
        let t0 = Instant::now();

        let mut queue = queue_of([packet(1, Direction::Inbound)]);
        let result = module.process(&mut queue, t0);
        assert!(queue.is_empty());
        assert_eq!(result.wake_after, Some(Duration::from_millis(100)));
        assert_eq!(result.indicator, 1.0);

        // Impounding continues on later ticks within the window.
        let mut queue = queue_of([packet(2, Direction::Inbound)]);
        let result = module.process(&mut queue, t0 + Duration::from_millis(40));
        assert!(queue.is_empty());
        assert_eq!(result.wake_after, Some(Duration::from_millis(60)));

        // Past the timeframe the whole batch is released in order.
        let result = module.process(&mut queue, t0 + Duration::from_millis(101));
        assert_eq!(tags(&queue), vec![1, 2]);
        assert_eq!(result.wake_after, None);
        assert!(!module.throttling);
    }

    #[test]
    fn drop_on_throttle_discards_the_batch() {
        let mut module = module(50, true);
        let t0 = Instant::now();

        let mut queue = queue_of([packet(1, Direction::Inbound), packet(2, Direction::Inbound)]);
        module.process(&mut queue, t0);
        assert!(queue.is_empty());

        module.process(&mut queue, t0 + Duration::from_millis(51));
        assert!(queue.is_empty(), "drop-on-throttle must not release the batch");
    }

    #[test]
    fn hitting_the_ceiling_flushes_immediately() {
        let mut module = module(60_000, false);
        let t0 = Instant::now();

        let mut queue = queue_of((0..MAX_HELD).map(|_| packet(0, Direction::Inbound)));
        let result = module.process(&mut queue, t0);

        assert_eq!(queue.len(), MAX_HELD);
        assert_eq!(result.wake_after, None);
        assert!(!module.throttling);
    }

    #[test]
    fn ineligible_records_pass_through_the_window() {
        let mut module = module(60_000, false);
        module.apply_config(&ModuleConfig {
            chance: 100.0,
            timeframe: 60_000,
            inbound: false,
            ..ModuleConfig::default()
        });
        let t0 = Instant::now();

        let mut queue = queue_of([packet(1, Direction::Inbound), packet(2, Direction::Outbound)]);
        module.process(&mut queue, t0);

        assert_eq!(tags(&queue), vec![1], "only the outbound record is impounded");
    }

    #[test]
    fn disable_mid_window_flushes() {
        let mut module = module(60_000, false);
        let t0 = Instant::now();
        let mut queue = queue_of([packet(1, Direction::Inbound)]);
        module.process(&mut queue, t0);
        assert!(queue.is_empty());

        module.disable(&mut queue);
        assert_eq!(tags(&queue), vec![1]);
        module.enable();
    }
}
