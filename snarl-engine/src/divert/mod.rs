//! The capture/injection driver boundary.
//!
//! The engine treats the packet-filter driver as an opaque collaborator: it
//! opens a handle with a filter expression, receives batches of raw frames
//! with per-frame direction and address metadata, and re-injects bytes it
//! decided to let through. [`MemoryDivert`] implements the boundary over
//! in-process channels for tests and examples.

use std::{io, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;

use snarl_packet::{Arena, Direction};

mod memory;
pub use memory::{memory_pair, Injected, MemoryDivert, MemoryHarness, MemoryRx, MemoryTx, NoopChecksum};

/// Errors surfaced by the driver boundary.
#[derive(Debug, thiserror::Error)]
pub enum DivertError {
    /// The filter expression was rejected at open time.
    #[error("filter syntax error: {0}")]
    FilterSyntax(String),
    /// The capture device could not be opened.
    #[error("failed to open capture device: {0}")]
    Device(io::Error),
    /// The handle became invalid, e.g. it was closed externally.
    #[error("capture handle closed")]
    HandleClosed,
    /// A single failed capture or injection call; retried next iteration.
    #[error("driver i/o error: {0}")]
    Io(#[from] io::Error),
}

impl DivertError {
    /// Whether the engine must stop rather than retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::HandleClosed)
    }
}

/// One frame inside a capture batch, described by its position in the batch
/// arena.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub offset: usize,
    pub len: usize,
    pub direction: Direction,
    /// Opaque driver address metadata, returned verbatim on injection.
    pub addr: Bytes,
}

/// Everything one capture completion delivered: a dense byte region plus
/// frame descriptors into it.
#[derive(Debug, Clone)]
pub struct CaptureBatch {
    pub arena: Arena,
    pub frames: Vec<CapturedFrame>,
}

/// Per-frame metadata accompanying an injection write. Frame boundaries
/// within the written bytes are given by the `len` fields, in order.
#[derive(Debug, Clone)]
pub struct SendFrame {
    pub len: usize,
    pub direction: Direction,
    pub addr: Bytes,
}

/// Recomputes transport/network checksum fields over a mutated frame.
///
/// Checksum layout knowledge lives with the driver, not the engine; the
/// tamper module calls this exactly once per mutated record.
pub trait Checksum: Send + Sync {
    fn recompute(&self, frame: &mut [u8]);
}

/// A capture/injection driver.
pub trait Divert: Send + 'static {
    type Rx: DivertRx;
    type Tx: DivertTx;

    /// Opens the driver with a filter expression, returning the receive and
    /// send halves. Open failures are configuration errors: they are
    /// surfaced once and the engine stays stopped.
    fn open(&mut self, filter: &str) -> Result<(Self::Rx, Self::Tx), DivertError>;

    /// The driver's checksum helper, handed to payload-mutating modules.
    fn checksums(&self) -> Arc<dyn Checksum>;
}

/// The receive half of an open driver handle.
#[async_trait]
pub trait DivertRx: Send + 'static {
    /// Waits for the next capture completion.
    async fn recv(&mut self) -> Result<CaptureBatch, DivertError>;
}

/// The send half of an open driver handle.
#[async_trait]
pub trait DivertTx: Send + 'static {
    /// Submits one injection write and waits for its completion, returning
    /// the number of bytes written.
    async fn send(&mut self, bytes: Bytes, frames: Vec<SendFrame>) -> Result<usize, DivertError>;
}
