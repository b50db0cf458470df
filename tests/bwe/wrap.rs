//! Send time wraparound and stream restarts.

use str0m_bwe::Bitrate;

use crate::common::{init_log, BweTest};

const PACKETS: usize = 3000;
const PACKET_SIZE: u64 = 1000;

/// 100 packets per second, arriving with the same spacing as sent.
fn steady_stream(t: &mut BweTest, send_ms: &mut u64, seq_no: &mut u16, count: usize) {
    for _ in 0..count {
        t.clock.advance(10);
        *send_ms += 10;
        let now_ms = t.clock.now_ms();
        t.incoming_feedback(now_ms, *send_ms, *seq_no, PACKET_SIZE, None);
        *seq_no = seq_no.wrapping_add(1);
    }
}

fn resume_after_silence(silence_ms: u64) -> (Bitrate, Bitrate) {
    let mut t = BweTest::new();
    let (mut send_ms, mut seq_no) = (0, 0);

    steady_stream(&mut t, &mut send_ms, &mut seq_no, PACKETS);
    let before = t.bwe.latest_estimate().expect("estimate before silence");

    t.clock.advance(silence_ms as i64);
    send_ms += silence_ms;

    steady_stream(&mut t, &mut send_ms, &mut seq_no, 100);
    let after = t.bwe.latest_estimate().expect("estimate after silence");

    (before, after)
}

#[test]
fn wraparound_after_short_silence() {
    init_log();

    // 30s of stream and 35s of silence crosses the 64s wrap.
    let (before, after) = resume_after_silence(35_000);

    assert!(
        after.as_f64() >= before.as_f64() * 0.95,
        "Estimate dropped after wrap: {before} -> {after}"
    );
}

#[test]
fn wraparound_after_long_silence() {
    init_log();

    // Several wraps while silent.
    let (before, after) = resume_after_silence(640_000);

    assert!(
        after.as_f64() >= before.as_f64() * 0.95,
        "Estimate dropped after wrap: {before} -> {after}"
    );
}

#[test]
fn overuse_detected_after_wraparound() {
    init_log();

    let mut t = BweTest::new();
    let (mut send_ms, mut seq_no) = (0, 0);

    steady_stream(&mut t, &mut send_ms, &mut seq_no, PACKETS);
    let before = t.bwe.latest_estimate().expect("estimate before silence");

    t.clock.advance(35_000);
    send_ms += 35_000;

    // Sent every 10ms, arriving every 20ms. The queue grows 10ms per packet.
    for _ in 0..150 {
        t.clock.advance(20);
        send_ms += 10;
        let now_ms = t.clock.now_ms();
        t.incoming_feedback(now_ms, send_ms, seq_no, PACKET_SIZE, None);
        seq_no = seq_no.wrapping_add(1);
    }

    let after = t.bwe.latest_estimate().expect("estimate after silence");
    assert!(after < before, "Expected a decrease: {before} -> {after}");
}
