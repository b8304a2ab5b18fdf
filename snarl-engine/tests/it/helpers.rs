use bytes::Bytes;
use snarl_engine::divert::{CaptureBatch, CapturedFrame};
use snarl_packet::{Arena, Direction};

/// Builds one dense capture batch out of `(payload, direction)` frames, the
/// way a real driver completion lays them out.
pub fn batch(frames: &[(&[u8], Direction)]) -> CaptureBatch {
    let mut bytes = Vec::new();
    let mut descs = Vec::with_capacity(frames.len());

    for (payload, direction) in frames {
        descs.push(CapturedFrame {
            offset: bytes.len(),
            len: payload.len(),
            direction: *direction,
            addr: Bytes::new(),
        });
        bytes.extend_from_slice(payload);
    }

    CaptureBatch { arena: Arena::from(bytes), frames: descs }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}
