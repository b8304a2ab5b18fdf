use std::{fmt, sync::Arc};

use bytes::Bytes;
use tokio::sync::mpsc;

use super::{CaptureBatch, Checksum, Divert, DivertError, DivertRx, DivertTx, SendFrame};

const CHANNEL_CAPACITY: usize = 64;

/// An in-process driver backed by channels.
///
/// Tests and examples feed capture batches in through the
/// [`MemoryHarness`] and observe what the engine re-injected on the other
/// side. Closing either harness end makes the corresponding handle half
/// report [`DivertError::HandleClosed`], which is how fatal-handle behavior
/// is exercised.
pub struct MemoryDivert {
    endpoints: Option<(MemoryRx, MemoryTx)>,
    checksums: Arc<dyn Checksum>,
}

/// The test-facing side of a [`MemoryDivert`].
#[derive(Debug)]
pub struct MemoryHarness {
    /// Feeds capture batches to the engine.
    pub captures: mpsc::Sender<CaptureBatch>,
    /// Receives everything the engine injected.
    pub injected: mpsc::Receiver<Injected>,
}

/// One completed injection write.
#[derive(Debug, Clone)]
pub struct Injected {
    pub bytes: Bytes,
    pub frames: Vec<SendFrame>,
}

/// Creates a connected driver/harness pair with no-op checksums.
pub fn memory_pair() -> (MemoryDivert, MemoryHarness) {
    MemoryDivert::with_checksums(Arc::new(NoopChecksum))
}

impl MemoryDivert {
    /// Creates a driver/harness pair using the given checksum helper.
    pub fn with_checksums(checksums: Arc<dyn Checksum>) -> (Self, MemoryHarness) {
        let (capture_tx, capture_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (inject_tx, inject_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let divert = Self {
            endpoints: Some((MemoryRx { rx: capture_rx }, MemoryTx { tx: inject_tx })),
            checksums,
        };
        let harness = MemoryHarness { captures: capture_tx, injected: inject_rx };

        (divert, harness)
    }
}

impl fmt::Debug for MemoryDivert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDivert")
            .field("open", &self.endpoints.is_none())
            .finish_non_exhaustive()
    }
}

impl Divert for MemoryDivert {
    type Rx = MemoryRx;
    type Tx = MemoryTx;

    fn open(&mut self, filter: &str) -> Result<(Self::Rx, Self::Tx), DivertError> {
        if filter.trim().is_empty() {
            return Err(DivertError::FilterSyntax("empty filter expression".to_string()));
        }

        self.endpoints.take().ok_or_else(|| {
            DivertError::Device(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                "memory driver already opened",
            ))
        })
    }

    fn checksums(&self) -> Arc<dyn Checksum> {
        Arc::clone(&self.checksums)
    }
}

/// Receive half of a [`MemoryDivert`].
#[derive(Debug)]
pub struct MemoryRx {
    rx: mpsc::Receiver<CaptureBatch>,
}

#[async_trait::async_trait]
impl DivertRx for MemoryRx {
    async fn recv(&mut self) -> Result<CaptureBatch, DivertError> {
        self.rx.recv().await.ok_or(DivertError::HandleClosed)
    }
}

/// Send half of a [`MemoryDivert`].
#[derive(Debug)]
pub struct MemoryTx {
    tx: mpsc::Sender<Injected>,
}

#[async_trait::async_trait]
impl DivertTx for MemoryTx {
    async fn send(&mut self, bytes: Bytes, frames: Vec<SendFrame>) -> Result<usize, DivertError> {
        let written = bytes.len();
        self.tx
            .send(Injected { bytes, frames })
            .await
            .map_err(|_| DivertError::HandleClosed)?;

        Ok(written)
    }
}

/// A checksum helper that leaves frames untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopChecksum;

impl Checksum for NoopChecksum {
    fn recompute(&self, _frame: &mut [u8]) {}
}
