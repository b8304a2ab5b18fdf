use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use bytes::Bytes;
use futures::{future::BoxFuture, FutureExt};
use tokio::{
    sync::Notify,
    time::{sleep_until, Instant},
};
use tracing::{debug, error, trace, warn};

use snarl_packet::{Packet, PacketQueue};

use crate::{
    divert::{CaptureBatch, DivertError, DivertRx, DivertTx, SendFrame},
    modules::ModuleChain,
};

/// A write handed to the send half, resolving to the half and its outcome so
/// the driver can reuse the handle afterwards.
type PendingWrite<T> = BoxFuture<'static, (T, Result<usize, DivertError>)>;

/// The single worker that pumps records from capture, through the module
/// chain, to re-injection. Owns the chain and the queue for its whole life
/// and returns the chain when it stops.
pub(super) struct EngineDriver<R, T> {
    chain: ModuleChain,
    rx: R,
    /// Parked here between writes; moved into the pending write future while
    /// one is in flight.
    tx: Option<T>,
    queue: PacketQueue,
    notify: Arc<Notify>,
    stop: Arc<AtomicBool>,
}

impl<R: DivertRx, T: DivertTx> EngineDriver<R, T> {
    pub(super) fn new(
        chain: ModuleChain,
        rx: R,
        tx: T,
        notify: Arc<Notify>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self { chain, rx, tx: Some(tx), queue: PacketQueue::new(), notify, stop }
    }

    pub(super) async fn run(mut self) -> (ModuleChain, Result<(), DivertError>) {
        let result = self.pump().await;
        match &result {
            Ok(()) => debug!("driver drained and stopped"),
            Err(e) => {
                error!(%e, discarded = self.queue.len(), "driver stopped on a fatal error");
                self.queue.clear();
            }
        }

        // A clean drain has already disabled everything; after a fatal error
        // the flushed records have no driver left to take them.
        self.chain.disable_all(&mut self.queue);
        if !self.queue.is_empty() {
            debug!(discarded = self.queue.len(), "dropping records flushed after the handle died");
            self.queue.clear();
        }

        (self.chain, result)
    }

    /// The event loop. Each iteration first reacts to accumulated state
    /// (stop request, chain tick, write staging), then blocks on the next
    /// event: capture completion, write completion, a control notification,
    /// or the chain's earliest wake deadline.
    async fn pump(&mut self) -> Result<(), DivertError> {
        let mut pending: Option<PendingWrite<T>> = None;
        let mut wake: Option<Instant> = None;
        let mut draining = false;

        loop {
            if !draining && self.stop.load(Ordering::Acquire) {
                draining = true;
                wake = None;
                debug!(queued = self.queue.len(), "stop requested, draining");
                self.chain.disable_all(&mut self.queue);
            }

            if !draining {
                let now = Instant::now();
                wake = self.chain.run(&mut self.queue, now).wake.map(|after| now + after);
            }

            if pending.is_none() {
                if let Some((bytes, frames)) = self.stage() {
                    let tx = self.tx.take().expect("send half parked while no write in flight");
                    trace!(bytes = bytes.len(), frames = frames.len(), "staging injection write");
                    pending = Some(
                        async move {
                            let mut tx = tx;
                            let result = tx.send(bytes, frames).await;
                            (tx, result)
                        }
                        .boxed(),
                    );
                }
            }

            if draining && self.queue.is_empty() && pending.is_none() {
                return Ok(());
            }

            tokio::select! {
                biased;

                _ = self.notify.notified() => {}

                Some((tx, result)) = futures::future::OptionFuture::from(pending.as_mut()),
                    if pending.is_some() =>
                {
                    pending = None;
                    self.tx = Some(tx);
                    match result {
                        Ok(written) => trace!(written, "injection write completed"),
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => warn!(%e, "injection write failed"),
                    }
                }

                batch = self.rx.recv(), if !draining => match batch {
                    Ok(batch) => self.ingest(batch),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => warn!(%e, "capture failed"),
                },

                _ = sleep_until(wake.unwrap_or_else(Instant::now)),
                    if wake.is_some() && !draining => {}
            }
        }
    }

    /// Turns one capture completion into queue records, slicing the batch
    /// arena without copying.
    fn ingest(&mut self, batch: CaptureBatch) {
        let CaptureBatch { arena, frames } = batch;
        let now = Instant::now();
        trace!(frames = frames.len(), bytes = arena.len(), "capture batch");

        for frame in frames {
            let payload = arena.slice(frame.offset, frame.len);
            self.queue.push_back(Packet::new(payload, frame.direction, frame.addr, now));
        }
    }

    /// Removes the longest head run of same-arena, offset-adjacent records
    /// and returns one write covering all of them. A detached (tampered)
    /// payload shares an arena with nothing and is staged on its own.
    fn stage(&mut self) -> Option<(Bytes, Vec<SendFrame>)> {
        let mut iter = self.queue.iter();
        let first = iter.next()?;

        let Some(arena) = first.payload.arena() else {
            let packet = self.queue.pop_front()?;
            let frame = SendFrame {
                len: packet.payload.len(),
                direction: packet.direction,
                addr: packet.addr,
            };
            return Some((packet.payload.into_bytes(), vec![frame]));
        };

        let start = first.payload.offset();
        let mut end = first.payload.end_offset();
        let mut count = 1;

        for packet in iter {
            if packet.payload.same_arena(&first.payload) && packet.payload.offset() == end {
                end = packet.payload.end_offset();
                count += 1;
            } else {
                break;
            }
        }

        let frames = self
            .queue
            .drain_front(count)
            .map(|packet| SendFrame {
                len: packet.payload.len(),
                direction: packet.direction,
                addr: packet.addr,
            })
            .collect();

        Some((arena.slice(start..end), frames))
    }
}
