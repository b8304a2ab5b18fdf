//! The impairment modules and the chain that runs them.
//!
//! Every module implements the [`Impairment`] capability set and is carried
//! in the closed [`Module`] sum type. A [`ModuleChain`] owns the modules in
//! their fixed processing order together with the [`ModuleShared`] control
//! blocks that the UI/scripting-facing [`ModuleHandle`]s write to.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::RwLock;
use tokio::{sync::Notify, time::Instant};
use tracing::debug;

use snarl_packet::PacketQueue;

use crate::{config::ModuleConfig, divert::Checksum};

mod bandwidth;
mod drop;
mod duplicate;
mod lag;
mod tamper;
mod throttle;

pub use bandwidth::BandwidthModule;
pub use drop::DropModule;
pub use duplicate::DuplicateModule;
pub use lag::LagModule;
pub use tamper::TamperModule;
pub use throttle::ThrottleModule;

/// How many records a module may hold back before failing open.
pub(crate) const MAX_HELD: usize = 1024;

/// Outcome of one `process` tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessResult {
    /// Soonest relative instant at which the module must run again
    /// regardless of new arrivals, or `None` when it has no timed work.
    pub wake_after: Option<Duration>,
    /// Whether visible state (queue contents, indicator) changed.
    pub changed: bool,
    /// Fraction of scanned records affected this tick; 0.0 when nothing
    /// was scanned.
    pub indicator: f32,
}

/// The capability set every impairment module implements.
pub trait Impairment {
    fn name(&self) -> &'static str;

    /// Invoked on the first processing step after the module is turned on.
    /// Private buffers must be empty at this point; a leftover record is a
    /// logic error, not a runtime condition.
    fn enable(&mut self);

    /// Invoked once when the module is turned off. Flushes held-back
    /// records to the queue tail in their original relative order (or
    /// discards them per configuration) and resets rate and indicator
    /// state.
    fn disable(&mut self, queue: &mut PacketQueue);

    /// Replaces the direction mask, chance and numeric parameters.
    /// Out-of-range values are clamped, never rejected.
    fn apply_config(&mut self, config: &ModuleConfig);

    /// Scans and mutates the shared queue for one tick. The module has
    /// exclusive mutation rights over the queue for the duration of the
    /// call and must leave it fully processed or exactly as found.
    fn process(&mut self, queue: &mut PacketQueue, now: Instant) -> ProcessResult;
}

/// The closed set of impairments.
#[derive(Debug)]
pub enum Module {
    Drop(DropModule),
    Lag(LagModule),
    Duplicate(DuplicateModule),
    Throttle(ThrottleModule),
    Bandwidth(BandwidthModule),
    Tamper(TamperModule),
}

macro_rules! dispatch {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            Module::Drop($inner) => $body,
            Module::Lag($inner) => $body,
            Module::Duplicate($inner) => $body,
            Module::Throttle($inner) => $body,
            Module::Bandwidth($inner) => $body,
            Module::Tamper($inner) => $body,
        }
    };
}

impl Impairment for Module {
    fn name(&self) -> &'static str {
        dispatch!(self, m => m.name())
    }

    fn enable(&mut self) {
        dispatch!(self, m => m.enable())
    }

    fn disable(&mut self, queue: &mut PacketQueue) {
        dispatch!(self, m => m.disable(queue))
    }

    fn apply_config(&mut self, config: &ModuleConfig) {
        dispatch!(self, m => m.apply_config(config))
    }

    fn process(&mut self, queue: &mut PacketQueue, now: Instant) -> ProcessResult {
        dispatch!(self, m => m.process(queue, now))
    }
}

/// Returns the earlier of two optional wake delays.
pub(crate) fn min_wake(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Control state shared between a module slot and its [`ModuleHandle`].
#[derive(Debug)]
pub(crate) struct ModuleShared {
    name: &'static str,
    enabled: AtomicBool,
    dirty: AtomicBool,
    /// `f32` bit pattern of the indicator fraction.
    indicator: AtomicU32,
    /// Bumped by handle writes; the chain re-applies the config when it
    /// observes a new generation.
    generation: AtomicU64,
    config: RwLock<ModuleConfig>,
}

impl ModuleShared {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            enabled: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            indicator: AtomicU32::new(0f32.to_bits()),
            generation: AtomicU64::new(0),
            config: RwLock::new(ModuleConfig::default()),
        }
    }
}

/// The read/write surface the UI and scripting collaborators see for one
/// module. Cheap to clone; writes are picked up by the engine on its next
/// tick.
#[derive(Debug, Clone)]
pub struct ModuleHandle {
    shared: Arc<ModuleShared>,
    notify: Arc<Notify>,
}

impl ModuleHandle {
    pub(crate) fn new(shared: Arc<ModuleShared>, notify: Arc<Notify>) -> Self {
        Self { shared, notify }
    }

    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    pub fn enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.shared.enabled.store(enabled, Ordering::Release);
        self.notify.notify_one();
    }

    /// Snapshot of the module configuration.
    pub fn config(&self) -> ModuleConfig {
        self.shared.config.read().clone()
    }

    /// Replaces the whole configuration, including the enabled flag.
    pub fn set_config(&self, config: ModuleConfig) {
        let enabled = config.enabled;
        self.update(|current| *current = config);
        self.set_enabled(enabled);
    }

    /// Applies an in-place edit to the configuration and notifies the
    /// engine.
    pub fn update(&self, edit: impl FnOnce(&mut ModuleConfig)) {
        edit(&mut self.shared.config.write());
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        self.notify.notify_one();
    }

    pub fn chance(&self) -> f32 {
        self.shared.config.read().chance
    }

    pub fn set_chance(&self, chance: f32) {
        self.update(|config| config.chance = chance);
    }

    pub fn lag_time(&self) -> u64 {
        self.shared.config.read().lag_time
    }

    pub fn set_lag_time(&self, millis: u64) {
        self.update(|config| config.lag_time = millis);
    }

    pub fn timeframe(&self) -> u64 {
        self.shared.config.read().timeframe
    }

    pub fn set_timeframe(&self, millis: u64) {
        self.update(|config| config.timeframe = millis);
    }

    pub fn limit(&self) -> i64 {
        self.shared.config.read().limit
    }

    pub fn set_limit(&self, kib_per_sec: i64) {
        self.update(|config| config.limit = kib_per_sec);
    }

    pub fn count(&self) -> i64 {
        self.shared.config.read().count
    }

    pub fn set_count(&self, count: i64) {
        self.update(|config| config.count = count);
    }

    pub fn max_bit_flips(&self) -> u32 {
        self.shared.config.read().max_bit_flips
    }

    pub fn set_max_bit_flips(&self, flips: u32) {
        self.update(|config| config.max_bit_flips = flips);
    }

    /// Read-only fraction of recently affected packets.
    pub fn indicator(&self) -> f32 {
        f32::from_bits(self.shared.indicator.load(Ordering::Acquire))
    }

    /// Returns and clears the module's redraw flag.
    pub fn take_dirty(&self) -> bool {
        self.shared.dirty.swap(false, Ordering::AcqRel)
    }
}

struct ChainSlot {
    module: Module,
    shared: Arc<ModuleShared>,
    was_enabled: bool,
    applied_generation: u64,
}

impl ChainSlot {
    fn new(module: Module) -> Self {
        let shared = Arc::new(ModuleShared::new(module.name()));
        Self { module, shared, was_enabled: false, applied_generation: 0 }
    }
}

/// Aggregate outcome of one chain pass.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ChainTick {
    pub(crate) wake: Option<Duration>,
    pub(crate) changed: bool,
}

/// The ordered list of modules. Processing order is significant and fixed
/// at construction.
pub struct ModuleChain {
    slots: Vec<ChainSlot>,
}

impl std::fmt::Debug for ModuleChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.slots.iter().map(|s| s.module.name())).finish()
    }
}

impl ModuleChain {
    /// The standard chain in its fixed order: lag, drop, throttle,
    /// bandwidth, duplicate, tamper.
    pub fn standard(checksums: Arc<dyn Checksum>) -> Self {
        Self::from_modules(vec![
            Module::Lag(LagModule::new()),
            Module::Drop(DropModule::new()),
            Module::Throttle(ThrottleModule::new()),
            Module::Bandwidth(BandwidthModule::new()),
            Module::Duplicate(DuplicateModule::new()),
            Module::Tamper(TamperModule::new(checksums)),
        ])
    }

    /// Builds a chain out of an explicit module list, in processing order.
    pub fn from_modules(modules: Vec<Module>) -> Self {
        Self { slots: modules.into_iter().map(ChainSlot::new).collect() }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn shared(&self) -> Vec<Arc<ModuleShared>> {
        self.slots.iter().map(|slot| Arc::clone(&slot.shared)).collect()
    }

    /// Runs one tick over every module in chain order: applies pending
    /// config changes, handles enable/disable transitions, processes, and
    /// coalesces wake requests into their minimum.
    pub(crate) fn run(&mut self, queue: &mut PacketQueue, now: Instant) -> ChainTick {
        let mut tick = ChainTick::default();

        for slot in &mut self.slots {
            let generation = slot.shared.generation.load(Ordering::Acquire);
            if generation != slot.applied_generation {
                let config = slot.shared.config.read().clone();
                slot.module.apply_config(&config);
                slot.applied_generation = generation;
                tick.changed = true;
            }

            let enabled = slot.shared.enabled.load(Ordering::Acquire);
            if enabled && !slot.was_enabled {
                slot.module.enable();
                slot.was_enabled = true;
                tick.changed = true;
            } else if !enabled && slot.was_enabled {
                slot.module.disable(queue);
                slot.was_enabled = false;
                slot.shared.indicator.store(0f32.to_bits(), Ordering::Release);
                tick.changed = true;
            }

            if !enabled {
                continue;
            }

            let result = slot.module.process(queue, now);
            slot.shared.indicator.store(result.indicator.to_bits(), Ordering::Release);
            tick.wake = min_wake(tick.wake, result.wake_after);
            if result.changed {
                slot.shared.dirty.store(true, Ordering::Release);
                tick.changed = true;
            }
        }

        tick
    }

    /// Disables every still-enabled module, flushing their hold-lists into
    /// `queue`. Called when the engine stops.
    pub(crate) fn disable_all(&mut self, queue: &mut PacketQueue) {
        for slot in &mut self.slots {
            if slot.was_enabled {
                debug!(module = slot.module.name(), "disabling at shutdown");
                slot.module.disable(queue);
                slot.was_enabled = false;
                slot.shared.indicator.store(0f32.to_bits(), Ordering::Release);
            }
        }
    }
}

/// Flushes a hold-list back to the queue tail, preserving order.
pub(crate) fn flush_held(queue: &mut PacketQueue, held: &mut VecDeque<snarl_packet::Packet>) {
    queue.append(held.drain(..));
}
