use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use snarl_engine::{
    divert::{memory_pair, Checksum, MemoryDivert},
    Engine, ModuleConfig,
};
use snarl_packet::Direction;
use tokio::time::Instant;

use crate::helpers::{batch, init_tracing};

#[tokio::test(start_paused = true)]
async fn disabled_chain_reinjects_batches_whole() {
    init_tracing();
    let (divert, mut harness) = memory_pair();
    let mut engine = Engine::new(divert);
    engine.start("true").unwrap();

    harness
        .captures
        .send(batch(&[
            (b"aaaa", Direction::Inbound),
            (b"bbbb", Direction::Outbound),
            (b"cccc", Direction::Inbound),
        ]))
        .await
        .unwrap();

    // All three frames are offset-adjacent slices of one arena, so they go
    // back out as a single write.
    let injected = harness.injected.recv().await.unwrap();
    assert_eq!(&injected.bytes[..], b"aaaabbbbcccc");
    assert_eq!(injected.frames.len(), 3);
    assert!(injected.frames[1].direction.is_outbound());

    engine.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn lag_shapes_only_the_masked_direction() {
    init_tracing();
    let (divert, mut harness) = memory_pair();
    let mut engine = Engine::new(divert);

    engine.module("drop").unwrap().set_config(ModuleConfig {
        enabled: true,
        chance: 0.0,
        ..ModuleConfig::default()
    });
    engine.module("lag").unwrap().set_config(ModuleConfig {
        enabled: true,
        chance: 100.0,
        lag_time: 50,
        inbound: false,
        ..ModuleConfig::default()
    });
    engine.start("true").unwrap();

    let payloads: Vec<(Vec<u8>, Direction)> = (0u8..10)
        .map(|i| {
            let direction =
                if i % 2 == 0 { Direction::Inbound } else { Direction::Outbound };
            (vec![i; 4], direction)
        })
        .collect();
    let frames: Vec<(&[u8], Direction)> =
        payloads.iter().map(|(p, d)| (p.as_slice(), *d)).collect();

    let started = Instant::now();
    harness.captures.send(batch(&frames)).await.unwrap();

    // The five inbound frames pass untouched, immediately, in order.
    for expected in [0u8, 2, 4, 6, 8] {
        let injected = harness.injected.recv().await.unwrap();
        assert_eq!(injected.bytes[0], expected);
        assert!(injected.frames[0].direction.is_inbound());
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    // The five outbound frames follow after the lag, still in capture order.
    for expected in [1u8, 3, 5, 7, 9] {
        let injected = harness.injected.recv().await.unwrap();
        assert_eq!(injected.bytes[0], expected);
        assert!(injected.frames[0].direction.is_outbound());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    engine.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn throttle_impounds_and_releases_after_the_window() {
    init_tracing();
    let (divert, mut harness) = memory_pair();
    let mut engine = Engine::new(divert);
    engine.module("throttle").unwrap().set_config(ModuleConfig {
        enabled: true,
        chance: 100.0,
        timeframe: 100,
        ..ModuleConfig::default()
    });
    engine.start("true").unwrap();

    let started = Instant::now();
    harness
        .captures
        .send(batch(&[(b"aaaa", Direction::Inbound), (b"bbbb", Direction::Outbound)]))
        .await
        .unwrap();

    // Nothing comes out until the window closes; then the whole impounded
    // batch is released in order as one contiguous write.
    let injected = harness.injected.recv().await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(&injected.bytes[..], b"aaaabbbb");
    assert_eq!(injected.frames.len(), 2);

    engine.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn tamper_recomputes_checksums_on_the_wire() {
    init_tracing();

    struct MarkingChecksum(AtomicUsize);

    impl Checksum for MarkingChecksum {
        fn recompute(&self, frame: &mut [u8]) {
            frame[0] = 0xee;
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    let checksums = Arc::new(MarkingChecksum(AtomicUsize::new(0)));
    let (divert, mut harness) =
        MemoryDivert::with_checksums(Arc::clone(&checksums) as Arc<dyn Checksum>);
    let mut engine = Engine::new(divert);
    engine.module("tamper").unwrap().set_config(ModuleConfig {
        enabled: true,
        chance: 100.0,
        max_bit_flips: 1,
        ..ModuleConfig::default()
    });
    engine.start("true").unwrap();

    harness
        .captures
        .send(batch(&[(b"aaaa", Direction::Inbound), (b"bbbb", Direction::Inbound)]))
        .await
        .unwrap();

    // Tampered payloads detach from the batch arena, so each frame arrives
    // in its own write, checksummed exactly once.
    for _ in 0..2 {
        let injected = harness.injected.recv().await.unwrap();
        assert_eq!(injected.frames.len(), 1);
        assert_eq!(injected.bytes[0], 0xee);
    }
    assert_eq!(checksums.0.load(Ordering::Relaxed), 2);

    engine.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn full_drop_suppresses_injection() {
    init_tracing();
    let (divert, mut harness) = memory_pair();
    let mut engine = Engine::new(divert);
    engine.module("drop").unwrap().set_config(ModuleConfig {
        enabled: true,
        chance: 100.0,
        ..ModuleConfig::default()
    });
    engine.start("true").unwrap();

    harness
        .captures
        .send(batch(&[(b"aaaa", Direction::Inbound), (b"bbbb", Direction::Outbound)]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    engine.stop().await.unwrap();
    assert!(harness.injected.recv().await.is_none(), "dropped records must never re-inject");
}
