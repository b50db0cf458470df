//! Probe cluster detection.

use str0m_bwe::Bitrate;

use crate::common::{init_log, BweTest};

const NUM_PROBES: usize = 5;
const MIN_PROBE_PACKET_SIZE: u64 = 200;

fn assert_near(actual: Option<Bitrate>, expected: u64, tolerance: u64) {
    let actual = actual.map(|b| b.as_u64()).unwrap_or(0);
    assert!(
        actual.abs_diff(expected) <= tolerance,
        "Expected {expected} +/- {tolerance}, got {actual}"
    );
}

/// Send a probe burst. Each packet is sent `send_spacing` ms after the previous and arrives
/// `arrival_spacing` ms after the previous.
fn burst(
    t: &mut BweTest,
    send_ms: &mut u64,
    seq_no: &mut u16,
    send_spacing: u64,
    arrival_spacing: i64,
    size: u64,
    cluster: u32,
) {
    for _ in 0..NUM_PROBES {
        t.clock.advance(arrival_spacing);
        *send_ms += send_spacing;
        let now_ms = t.clock.now_ms();
        t.incoming_feedback(now_ms, *send_ms, *seq_no, size, Some(cluster));
        *seq_no += 1;
    }
}

#[test]
fn probe_detection() {
    init_log();
    let mut t = BweTest::new();
    let (mut send_ms, mut seq_no) = (0, 0);

    // 1000 bytes every 10ms.
    burst(&mut t, &mut send_ms, &mut seq_no, 10, 10, 1000, 0);
    assert!(t.updated());
    assert_near(t.latest_bitrate(), 800_000, 10_000);

    // 1000 bytes every 5ms.
    t.reset_observer();
    burst(&mut t, &mut send_ms, &mut seq_no, 5, 5, 1000, 1);
    assert!(t.updated());
    assert!(t.latest_bitrate() > Some(Bitrate::kbps(1500)));
}

#[test]
fn probe_detection_non_paced_packets() {
    init_log();
    let mut t = BweTest::new();
    let mut seq_no = 0;

    // Every other packet is not paced, but sent and received together with a probe.
    for _ in 0..NUM_PROBES {
        t.clock.advance(5);
        let now_ms = t.clock.now_ms();
        t.incoming_feedback(now_ms, now_ms as u64, seq_no, 1000, Some(0));
        seq_no += 1;

        t.clock.advance(5);
        t.incoming_feedback(now_ms, now_ms as u64, seq_no, MIN_PROBE_PACKET_SIZE + 1, None);
        seq_no += 1;
    }

    assert!(t.updated());
    assert_near(t.latest_bitrate(), 800_000, 10_000);
}

#[test]
fn probe_detection_dispersed_by_bottleneck() {
    init_log();
    let mut t = BweTest::new();
    let (mut send_ms, mut seq_no) = (0, 0);

    burst(&mut t, &mut send_ms, &mut seq_no, 10, 10, 1000, 0);

    // Sent every 5ms, but a bottleneck makes them arrive every 8ms. 4000 bytes in 32ms is
    // 1Mbit/s.
    burst(&mut t, &mut send_ms, &mut seq_no, 5, 8, 1000, 1);

    assert!(t.updated());
    assert_near(t.latest_bitrate(), 1_000_000, 10_000);
}

#[test]
fn probe_detection_slightly_faster_arrival() {
    init_log();
    let mut t = BweTest::new();
    let (mut send_ms, mut seq_no) = (0, 0);

    // Sent at 10ms, arriving at 5ms. The send rate is what the link is known to carry.
    burst(&mut t, &mut send_ms, &mut seq_no, 10, 5, 1000, 23);

    assert!(t.updated());
    assert_near(t.latest_bitrate(), 800_000, 10_000);
}

#[test]
fn probe_detection_faster_arrival() {
    init_log();
    let mut t = BweTest::new();
    let (mut send_ms, mut seq_no) = (0, 0);

    // Sent at 10ms, arriving at 1ms. Nothing can arrive ten times faster than sent.
    burst(&mut t, &mut send_ms, &mut seq_no, 10, 1, 1000, 0);

    assert!(!t.updated());
    assert_eq!(t.bwe.latest_estimate(), None);
}

#[test]
fn probe_detection_slower_arrival() {
    init_log();
    let mut t = BweTest::new();
    let (mut send_ms, mut seq_no) = (0, 0);

    // Sent at 5ms, arriving at 7ms.
    burst(&mut t, &mut send_ms, &mut seq_no, 5, 7, 1000, 1);

    assert!(t.updated());
    assert_near(t.latest_bitrate(), 1_140_000, 10_000);
}

#[test]
fn probe_detection_slower_arrival_high_bitrate() {
    init_log();
    let mut t = BweTest::new();
    let (mut send_ms, mut seq_no) = (0, 0);

    // Sent at 1ms, arriving at 2ms.
    burst(&mut t, &mut send_ms, &mut seq_no, 1, 2, 1000, 1);

    assert!(t.updated());
    assert_near(t.latest_bitrate(), 4_000_000, 10_000);
}

#[test]
fn probing_ignores_small_packets() {
    init_log();
    let mut t = BweTest::new();
    let (mut send_ms, mut seq_no) = (0, 0);

    burst(
        &mut t,
        &mut send_ms,
        &mut seq_no,
        10,
        10,
        MIN_PROBE_PACKET_SIZE,
        1,
    );
    assert!(!t.updated());

    // The same cluster with large packets is detected.
    burst(&mut t, &mut send_ms, &mut seq_no, 10, 10, 1000, 1);
    assert!(t.updated());
    assert_near(t.latest_bitrate(), 800_000, 10_000);
}

#[test]
fn lower_probe_does_not_reduce_estimate() {
    init_log();
    let mut t = BweTest::new();
    let (mut send_ms, mut seq_no) = (0, 0);

    // 4000 bytes in 8ms.
    burst(&mut t, &mut send_ms, &mut seq_no, 2, 2, 1000, 0);
    let high = t.latest_bitrate();
    assert_near(high, 4_000_000, 40_000);

    t.reset_observer();
    burst(&mut t, &mut send_ms, &mut seq_no, 10, 10, 1000, 1);

    assert!(!t.updated());
    assert_eq!(t.bwe.latest_estimate(), high);
}
