//! Network-condition emulation engine.
//!
//! A [`engine::Engine`] pumps captured packets through an ordered chain of
//! impairment [`modules`] (lag, drop, throttle, bandwidth, duplicate,
//! tamper) and re-injects whatever survives. Capture and injection go
//! through the [`divert`] driver boundary; [`divert::MemoryDivert`] backs
//! the whole pipeline with in-process channels for tests and examples.

mod bucket;
pub mod config;
pub mod divert;
pub mod engine;
pub mod modules;

pub use config::{load_profiles, parse_profiles, ConfigError, ModuleConfig, Profile};
pub use engine::{Engine, EngineError};
pub use modules::{Module, ModuleChain, ModuleHandle};
