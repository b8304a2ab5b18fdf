use bytes::Bytes;

use snarl::{
    divert::{memory_pair, CaptureBatch, CapturedFrame},
    Arena, Direction, Engine,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let (divert, mut harness) = memory_pair();
    let mut engine = Engine::new(divert);

    // Lag all outbound traffic by 150 ms and drop a quarter of inbound.
    let profiles = snarl::parse_profiles(
        r#"
        [demo]
        filter = "udp"

        [demo.lag]
        enabled = true
        chance = 100.0
        lag_time = 150
        inbound = false

        [demo.drop]
        enabled = true
        chance = 25.0
        outbound = false
        "#,
    )
    .unwrap();
    let profile = &profiles["demo"];
    engine.apply_profile(profile);
    engine.start(&profile.filter).unwrap();

    // Feed one hand-built capture batch through the in-memory driver.
    let payload = b"hello from the wire".to_vec();
    let frames = vec![CapturedFrame {
        offset: 0,
        len: payload.len(),
        direction: Direction::Outbound,
        addr: Bytes::new(),
    }];
    harness.captures.send(CaptureBatch { arena: Arena::from(payload), frames }).await.unwrap();

    // The outbound frame re-appears after the configured lag.
    let injected = harness.injected.recv().await.unwrap();
    println!("re-injected {} bytes: {:?}", injected.bytes.len(), injected.bytes);

    engine.stop().await.unwrap();
}
