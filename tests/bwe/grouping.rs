//! Packets sent close together are grouped before the delay trend is computed.

use str0m_bwe::{BandwidthUsage, Bitrate};

use crate::common::{init_log, BweTest};

#[test]
fn timestamp_grouping() {
    init_log();

    let mut t = BweTest::new();
    let (mut send_ms, mut seq_no) = (0_u64, 0_u16);

    // 50 frames per second, 1000 bytes each, for 6 seconds.
    for _ in 0..300 {
        t.clock.advance(20);
        send_ms += 20;
        let now_ms = t.clock.now_ms();
        t.incoming_feedback(now_ms, send_ms, seq_no, 1000, None);
        seq_no += 1;
    }

    assert!(t.updated());
    let before = t.latest_bitrate().expect("estimate");
    assert!(before >= Bitrate::kbps(380), "Got {before}");

    t.reset_observer();

    // Batches of small packets sent 1ms apart. Each batch arrives 5ms later than the
    // previous, which is what a link at capacity looks like.
    for _ in 0..100 {
        for _ in 0..15 {
            t.clock.advance(1);
            send_ms += 1;
            let now_ms = t.clock.now_ms();
            t.incoming_feedback(now_ms, send_ms, seq_no, 100, None);
            seq_no += 1;
        }
        t.clock.advance(10);
        send_ms += 5;
    }

    assert!(t.updated());
    let after = t.latest_bitrate().expect("estimate");
    assert!(after < before, "Expected decrease: {before} -> {after}");
    assert!(after < Bitrate::kbps(450), "Got {after}");
}

#[test]
fn bursts_with_constant_delay_are_normal() {
    init_log();

    let mut t = BweTest::new();
    let (mut send_ms, mut seq_no) = (0_u64, 0_u16);

    // Bursts of 5 packets, 1ms apart, every 30ms. No queue builds up.
    for _ in 0..200 {
        for _ in 0..5 {
            t.clock.advance(1);
            send_ms += 1;
            let now_ms = t.clock.now_ms();
            t.incoming_feedback(now_ms, send_ms, seq_no, 1000, None);
            seq_no += 1;
        }
        t.clock.advance(25);
        send_ms += 25;
    }

    assert_eq!(t.bwe.usage(), BandwidthUsage::Normal);
    assert!(t.bwe.latest_estimate().is_some());
}
