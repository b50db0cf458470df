//! The abs-send-time format and its unwrapping.
//!
//! `http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time` is a 24 bit fixed point
//! value with 6 bits for seconds and 18 for the decimals. It wraps around every 64 seconds.

use std::fmt;
use std::time::{Duration, Instant};

const MASK: u32 = 0x00FF_FFFF;
const WRAP: u64 = 1 << 24;
const HALF_WRAP: u64 = 1 << 23;
const FRACTION_BITS: u32 = 18;

/// A 24 bit abs-send-time value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AbsSendTime(u32);

impl AbsSendTime {
    /// How often the value wraps around.
    pub const WRAP_PERIOD: Duration = Duration::from_secs(64);

    /// Create from a raw value. Bits above the low 24 are ignored.
    pub const fn new(raw: u32) -> Self {
        AbsSendTime(raw & MASK)
    }

    /// Convert a send time, rounding to the nearest tick. The value wraps every 64 seconds.
    pub fn from_duration(d: Duration) -> Self {
        let us = d.as_micros();
        let ticks = ((us << FRACTION_BITS) + 500_000) / 1_000_000;

        AbsSendTime((ticks & MASK as u128) as u32)
    }

    /// The raw 24 bit value.
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// The time within the current 64 second period.
    pub fn to_duration(&self) -> Duration {
        ticks_to_duration(self.0 as u64)
    }
}

impl From<u32> for AbsSendTime {
    fn from(value: u32) -> Self {
        AbsSendTime::new(value)
    }
}

impl fmt::Debug for AbsSendTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AbsSendTime({:06x})", self.0)
    }
}

fn ticks_to_duration(ticks: u64) -> Duration {
    let nanos = ((ticks as u128) * 1_000_000_000 + (1 << (FRACTION_BITS - 1))) >> FRACTION_BITS;
    Duration::from_nanos(nanos as u64)
}

/// A send time placed on the unwrapped sender timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnwrappedSendTime {
    /// Offset on the sender's timeline. Only differences between values are meaningful.
    pub send_time: Duration,
    /// The stream was silent for longer than the stream timeout before this packet.
    ///
    /// State derived from earlier packets should not be compared with this one.
    pub restarted: bool,
}

/// "extend" 24 bit abs-send-time values into a monotonic 64 bit timeline.
///
/// Each new value is placed on the wrap that is nearest to the previous value, which handles
/// both forward wraps and reordering across a wrap. When the stream has been silent longer
/// than the timeout the nearest wrap can't be trusted (a 64 second silence looks like no time
/// passed at all), so the timeline is instead continued from the next wrap boundary.
#[derive(Debug)]
pub struct SendTimeUnwrapper {
    stream_timeout: Duration,
    /// The last extended value in ticks.
    last_ticks: Option<u64>,
    /// The latest arrival time seen.
    last_arrival: Option<Instant>,
}

impl SendTimeUnwrapper {
    /// Create an unwrapper that restarts after `stream_timeout` of silence.
    pub fn new(stream_timeout: Duration) -> Self {
        SendTimeUnwrapper {
            stream_timeout,
            last_ticks: None,
            last_arrival: None,
        }
    }

    /// Place `raw` on the unwrapped timeline.
    pub fn unwrap(&mut self, raw: AbsSendTime, arrival: Instant) -> UnwrappedSendTime {
        let raw_ticks = raw.as_u32() as u64;

        let restarted = self
            .last_arrival
            .map(|last| arrival.saturating_duration_since(last) > self.stream_timeout)
            .unwrap_or(false);

        let ticks = match self.last_ticks {
            // Start one wrap in so reordering across the first wrap stays representable.
            None => WRAP + raw_ticks,
            Some(prev) if restarted => {
                let candidate = (prev & !(WRAP - 1)) + raw_ticks;
                if candidate < prev {
                    candidate + WRAP
                } else {
                    candidate
                }
            }
            Some(prev) => extend_nearest(prev, raw_ticks),
        };

        if restarted {
            warn!(
                "Send time stream restarted after {:?} of silence",
                self.last_arrival
                    .map(|last| arrival.saturating_duration_since(last))
                    .unwrap_or_default()
            );
        }

        self.last_ticks = Some(ticks);
        self.last_arrival = self.last_arrival.max(Some(arrival));

        UnwrappedSendTime {
            send_time: ticks_to_duration(ticks),
            restarted,
        }
    }

    /// Forget all history. The next value starts a new timeline.
    pub fn reset(&mut self) {
        self.last_ticks = None;
        self.last_arrival = None;
    }
}

fn extend_nearest(prev: u64, raw: u64) -> u64 {
    let roc = prev >> 24; // how many wrap-arounds.
    let prev_low = prev & (WRAP - 1);

    let roc = if prev_low < HALF_WRAP {
        if raw > HALF_WRAP + prev_low {
            roc.saturating_sub(1)
        } else {
            roc
        }
    } else if prev_low > raw + HALF_WRAP {
        roc + 1
    } else {
        roc
    };

    roc * WRAP + raw
}
