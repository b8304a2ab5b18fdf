//! Umbrella crate re-exporting the whole snarl surface: the packet buffer
//! model, the impairment modules, and the shaping engine.

pub use snarl_common::*;
pub use snarl_engine::*;
pub use snarl_packet::*;
