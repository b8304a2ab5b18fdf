//! The engine front-end and its driver task.
//!
//! [`Engine`] is the handle applications hold: it opens the capture driver,
//! moves the module chain into a spawned [`EngineDriver`] task, and gets the
//! chain back when the task stops. All module control while running goes
//! through the lock-free [`ModuleHandle`]s, so the front-end never blocks
//! the packet path.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures::FutureExt;
use tokio::{sync::Notify, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    config::Profile,
    divert::{Divert, DivertError},
    modules::{ModuleChain, ModuleHandle},
};

mod driver;
use driver::EngineDriver;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Divert(#[from] DivertError),
    #[error("engine is already running")]
    AlreadyRunning,
    #[error("engine is not running")]
    NotRunning,
    /// The driver task ended abnormally and took the module chain with it.
    #[error("engine task failed: {0}")]
    TaskFailed(String),
}

/// The shaping engine.
///
/// Lifecycle: `stopped -> start(filter) -> running -> stop().await ->
/// stopped`. Open failures (bad filter, device busy) surface once from
/// [`start`](Engine::start) and leave the engine stopped.
pub struct Engine<D: Divert> {
    divert: D,
    /// Present while stopped; lives inside the driver task while running.
    chain: Option<ModuleChain>,
    handles: Vec<ModuleHandle>,
    notify: Arc<Notify>,
    stop: Arc<AtomicBool>,
    running: Option<JoinHandle<(ModuleChain, Result<(), DivertError>)>>,
}

impl<D: Divert> std::fmt::Debug for Engine<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("running", &self.is_running())
            .field("modules", &self.handles.iter().map(|h| h.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<D: Divert> Engine<D> {
    /// Creates an engine with the standard module chain.
    pub fn new(divert: D) -> Self {
        let checksums = divert.checksums();
        Self::with_chain(divert, ModuleChain::standard(checksums))
    }

    /// Creates an engine around an explicit chain, in processing order.
    pub fn with_chain(divert: D, chain: ModuleChain) -> Self {
        let notify = Arc::new(Notify::new());
        let handles = chain
            .shared()
            .into_iter()
            .map(|shared| ModuleHandle::new(shared, Arc::clone(&notify)))
            .collect();

        Self {
            divert,
            chain: Some(chain),
            handles,
            notify,
            stop: Arc::new(AtomicBool::new(false)),
            running: None,
        }
    }

    /// Control handles for every module, in chain order.
    pub fn modules(&self) -> &[ModuleHandle] {
        &self.handles
    }

    /// Control handle for one module by name.
    pub fn module(&self, name: &str) -> Option<&ModuleHandle> {
        self.handles.iter().find(|handle| handle.name() == name)
    }

    pub fn is_running(&self) -> bool {
        self.running.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Returns and clears the aggregate redraw flag: whether any module
    /// changed visible state since the last call.
    pub fn take_dirty(&self) -> bool {
        let mut dirty = false;
        for handle in &self.handles {
            dirty |= handle.take_dirty();
        }
        dirty
    }

    /// Pushes a profile's module tables through the handles. Tables naming
    /// a module the chain does not carry are skipped with a warning.
    pub fn apply_profile(&self, profile: &Profile) {
        for (name, config) in &profile.modules {
            match self.module(name) {
                Some(handle) => handle.set_config(config.clone()),
                None => warn!(module = %name, "profile references an unknown module"),
            }
        }
    }

    /// Opens the driver with `filter` and starts the packet worker.
    pub fn start(&mut self, filter: &str) -> Result<(), EngineError> {
        if let Some(task) = self.running.take() {
            if !task.is_finished() {
                self.running = Some(task);
                return Err(EngineError::AlreadyRunning);
            }
            self.reap(task)?;
        }

        let chain = self
            .chain
            .take()
            .ok_or_else(|| EngineError::TaskFailed("module chain lost in a failed run".into()))?;

        let (rx, tx) = match self.divert.open(filter) {
            Ok(halves) => halves,
            Err(e) => {
                self.chain = Some(chain);
                return Err(e.into());
            }
        };

        self.stop.store(false, Ordering::Release);
        let driver =
            EngineDriver::new(chain, rx, tx, Arc::clone(&self.notify), Arc::clone(&self.stop));
        info!(filter, "engine started");
        self.running = Some(tokio::spawn(driver.run()));

        Ok(())
    }

    /// Signals the worker to drain and waits for it to stop. Returns the
    /// fatal driver error if the run ended on one.
    pub async fn stop(&mut self) -> Result<(), EngineError> {
        let task = self.running.take().ok_or(EngineError::NotRunning)?;
        self.stop.store(true, Ordering::Release);
        self.notify.notify_one();

        let (chain, result) =
            task.await.map_err(|e| EngineError::TaskFailed(e.to_string()))?;
        self.stop.store(false, Ordering::Release);
        self.chain = Some(chain);
        info!("engine stopped");

        result.map_err(EngineError::from)
    }

    /// Recovers the chain from a task that ended on its own, e.g. after a
    /// fatal handle error.
    fn reap(
        &mut self,
        task: JoinHandle<(ModuleChain, Result<(), DivertError>)>,
    ) -> Result<(), EngineError> {
        match task.now_or_never() {
            Some(Ok((chain, result))) => {
                self.chain = Some(chain);
                if let Err(e) = result {
                    warn!(%e, "previous run ended with an error");
                }
                Ok(())
            }
            Some(Err(e)) => Err(EngineError::TaskFailed(e.to_string())),
            None => Err(EngineError::TaskFailed("finished task was not joinable".into())),
        }
    }
}
