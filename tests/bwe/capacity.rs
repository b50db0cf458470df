//! The estimate follows the capacity of a simulated link.

use std::time::Duration;

use str0m_bwe::Bitrate;

use crate::common::{init_log, BweTest, StreamGenerator};

const FPS: u32 = 30;

fn rate_drop(num_streams: usize, send_time_offset: Duration, arrival_offset_ms: i64) {
    init_log();

    let mut t = BweTest::new();
    let mut gen = StreamGenerator::new(
        num_streams,
        FPS,
        Bitrate::kbps(900),
        Bitrate::mbps(1),
        send_time_offset,
    );

    let ramp_up = t.run(&mut gen, Duration::from_secs(10), 0, true);
    let (_, settled) = ramp_up.last().copied().expect("samples");
    let settled = settled.expect("estimate after ramp up");
    assert!(
        settled >= Bitrate::kbps(600) && settled <= Bitrate::kbps(1400),
        "{num_streams} streams, estimate at 1Mbit/s capacity: {settled}"
    );

    gen.set_capacity(Bitrate::kbps(500));
    let start_ms = t.clock.now_ms();
    let dropped = t.run(&mut gen, Duration::from_secs(20), arrival_offset_ms, true);

    let reached = dropped
        .iter()
        .find(|(_, b)| b.map(|b| b <= Bitrate::kbps(550)).unwrap_or(false))
        .map(|(ms, _)| ms - start_ms);

    match reached {
        Some(ms) => assert!(
            ms < 10_000,
            "{num_streams} streams, took {ms}ms to adapt to 500kbit/s"
        ),
        None => panic!("{num_streams} streams, never adapted to 500kbit/s"),
    }

    let (_, last) = dropped.last().copied().expect("samples");
    let last = last.expect("estimate");
    assert!(
        last >= Bitrate::kbps(250) && last <= Bitrate::kbps(700),
        "{num_streams} streams, estimate at 500kbit/s capacity: {last}"
    );
}

#[test]
fn rate_drop_one_stream() {
    rate_drop(1, Duration::ZERO, 0);
}

#[test]
fn rate_drop_two_streams() {
    rate_drop(2, Duration::ZERO, 0);
}

#[test]
fn rate_drop_three_streams() {
    rate_drop(3, Duration::ZERO, 0);
}

#[test]
fn rate_drop_thirteen_streams() {
    rate_drop(13, Duration::ZERO, 0);
}

#[test]
fn rate_drop_nineteen_streams() {
    rate_drop(19, Duration::ZERO, 0);
}

#[test]
fn rate_drop_thirty_streams() {
    rate_drop(30, Duration::ZERO, 0);
}

#[test]
fn rate_drop_across_send_time_wrap() {
    // The abs-send-time wraps 9 seconds in.
    rate_drop(1, Duration::from_secs(55), 0);
}

#[test]
fn rate_drop_with_receiver_clock_jump_forward() {
    rate_drop(1, Duration::ZERO, 30_000);
}

#[test]
fn rate_drop_with_receiver_clock_jump_backward() {
    rate_drop(1, Duration::ZERO, -30_000);
}
