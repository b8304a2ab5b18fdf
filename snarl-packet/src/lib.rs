//! Zero-copy packet buffers for the snarl shaping pipeline.
//!
//! A capture batch arrives as one dense byte region (an [`Arena`]) holding
//! several packets back to back. Each packet is handed around as a cheap
//! reference-counted [`Payload`] slice over that region, wrapped in a
//! [`Packet`] record carrying direction, driver address metadata and the
//! capture timestamp. Records move between the engine and the impairment
//! modules through a [`PacketQueue`].

mod arena;
mod queue;
mod record;

pub use arena::{Arena, Payload};
pub use queue::PacketQueue;
pub use record::{Direction, Packet};
