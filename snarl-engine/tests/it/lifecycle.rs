use std::time::Duration;

use snarl_engine::{
    divert::{memory_pair, DivertError},
    Engine, EngineError, ModuleConfig,
};
use snarl_packet::Direction;
use tokio::time::Instant;

use crate::helpers::{batch, init_tracing};

#[tokio::test(start_paused = true)]
async fn stop_flushes_held_records_before_returning() {
    init_tracing();
    let (divert, mut harness) = memory_pair();
    let mut engine = Engine::new(divert);
    engine.module("lag").unwrap().set_config(ModuleConfig {
        enabled: true,
        chance: 100.0,
        lag_time: 60_000,
        ..ModuleConfig::default()
    });
    engine.start("true").unwrap();

    harness
        .captures
        .send(batch(&[(b"aaaa", Direction::Inbound), (b"bbbb", Direction::Inbound)]))
        .await
        .unwrap();
    // Let the driver impound both records under the long lag.
    tokio::time::sleep(Duration::from_millis(1)).await;

    let started = Instant::now();
    engine.stop().await.unwrap();
    // The drain flushed the hold-list instead of waiting out the timer.
    assert!(started.elapsed() < Duration::from_secs(60));

    let injected = harness.injected.recv().await.unwrap();
    assert_eq!(&injected.bytes[..], b"aaaabbbb");
    assert_eq!(injected.frames.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn dead_capture_handle_stops_the_engine() {
    init_tracing();
    let (divert, harness) = memory_pair();
    let mut engine = Engine::new(divert);
    engine.start("true").unwrap();

    drop(harness.captures);
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(!engine.is_running());

    let err = engine.stop().await.unwrap_err();
    assert!(matches!(err, EngineError::Divert(DivertError::HandleClosed)));
}

#[tokio::test(start_paused = true)]
async fn restart_reuses_the_chain_configuration() {
    init_tracing();
    let (divert, _harness) = memory_pair();
    let mut engine = Engine::new(divert);
    engine.module("lag").unwrap().set_lag_time(75);

    engine.start("true").unwrap();
    engine.stop().await.unwrap();

    // Handles survive the run; the memory driver is single-open, so a
    // restart surfaces a device error without losing the chain.
    assert_eq!(engine.module("lag").unwrap().lag_time(), 75);
    assert!(matches!(
        engine.start("true"),
        Err(EngineError::Divert(DivertError::Device(_)))
    ));
    assert!(!engine.is_running());
}
