//! Same input, same output.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use str0m_bwe::{BandwidthUsage, Bitrate, BitrateUpdate};

use crate::common::{init_log, BweTest, StreamGenerator};

fn jittered_run(seed: u64) -> Vec<BitrateUpdate> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut t = BweTest::new();
    let (mut send_ms, mut seq_no) = (0_u64, 0_u16);

    for _ in 0..2000 {
        send_ms += 10;
        // Up to 5ms of jitter on top of the send spacing.
        let jitter_us: i64 = rng.random_range(0..5_000);
        t.clock.set_us(send_ms as i64 * 1000 + jitter_us);

        let size = rng.random_range(300..1200);
        let now_ms = t.clock.now_ms();
        t.incoming_feedback(now_ms, send_ms, seq_no, size, None);
        seq_no = seq_no.wrapping_add(1);
    }

    t.bwe.observer().history().to_vec()
}

#[test]
fn identical_input_gives_identical_estimates() {
    init_log();

    let a = jittered_run(42);
    let b = jittered_run(42);

    assert_eq!(a.len(), 2000);
    assert!(a.iter().any(|u| u.updated));
    assert_eq!(a, b);
}

#[test]
fn estimate_never_decreases_without_congestion() {
    init_log();

    let mut t = BweTest::new();
    // 500kbit/s over a 10Mbit/s link never queues.
    let mut gen = StreamGenerator::new(
        1,
        30,
        Bitrate::kbps(500),
        Bitrate::mbps(10),
        Duration::ZERO,
    );

    t.run(&mut gen, Duration::from_secs(20), 0, false);

    let updates: Vec<_> = t
        .bwe
        .observer()
        .history()
        .iter()
        .filter(|u| u.updated)
        .map(|u| u.bitrate)
        .collect();

    assert!(!updates.is_empty());
    for w in updates.windows(2) {
        assert!(w[1] >= w[0], "Estimate decreased: {} -> {}", w[0], w[1]);
    }
    assert_eq!(t.bwe.usage(), BandwidthUsage::Normal);
}
