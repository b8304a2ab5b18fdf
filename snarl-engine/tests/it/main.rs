//! End-to-end tests driving a full engine over the in-memory driver with a
//! paused clock.

mod helpers;
mod lifecycle;
mod pipeline;
