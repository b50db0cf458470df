//! Delay-based send bandwidth estimation in Sans-IO style.
//!
//! This crate estimates how fast a sender may transmit by watching how the one-way delay of
//! received packets evolves. It is the delay-based half of a GCC style congestion controller:
//! the loss-based half, the pacer and the transport that carries feedback live elsewhere.
//!
//! # Sans I/O
//!
//! The estimator does no networking and never reads a clock. Every call is given the packet
//! feedback together with the current time, and the estimator reports back through a
//! [`BandwidthObserver`] before the call returns. This makes it easy to drive from any
//! runtime and fully deterministic to test.
//!
//! ```
//! use std::time::{Duration, Instant};
//! use str0m_bwe::{AbsSendTime, BitrateUpdate, BweConfig, DataSize, DelayBasedBwe};
//! use str0m_bwe::PacketFeedback;
//!
//! let mut latest = None;
//! let mut bwe = DelayBasedBwe::new(BweConfig::new(), |u: BitrateUpdate| {
//!     if u.updated {
//!         println!("new estimate {}", u.bitrate);
//!     }
//! })
//! .expect("valid config");
//!
//! let start = Instant::now();
//!
//! // A probe cluster of 5 packets, 1000 bytes each, sent and received 10ms apart.
//! for i in 0..5_u64 {
//!     let at = start + Duration::from_millis(10 * i);
//!     let send_time = AbsSendTime::from_duration(Duration::from_millis(10 * i));
//!     let packet = PacketFeedback::new(at, send_time, i as u16, DataSize::bytes(1000))
//!         .with_probe_cluster(0);
//!
//!     bwe.incoming_packet_feedback(packet, at);
//!     latest = bwe.latest_estimate();
//! }
//!
//! assert!(latest.is_some());
//! ```
//!
//! # Pipeline
//!
//! Each [`PacketFeedback`] goes through
//!
//! 1. A [`SendTimeUnwrapper`] that extends the 24 bit abs-send-time into a monotonic timeline.
//! 2. A probe estimator that measures explicit probe clusters.
//! 3. Arrival-time grouping that turns the packet stream into per-burst delay deltas.
//! 4. A trendline detector classifying the delay trend as normal, overuse or underuse.
//! 5. An AIMD rate controller producing the target bitrate.
//!
//! The [`DelayBasedBwe`] orchestrates the above and decides whether a probe result or the
//! trend driven rate controller gets to set the estimate.

#![forbid(unsafe_code)]
#![allow(clippy::new_without_default)]
#![allow(clippy::manual_range_contains)]
#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod abs_send_time;
pub use abs_send_time::{AbsSendTime, SendTimeUnwrapper, UnwrappedSendTime};

mod bwe;
pub use bwe::{BandwidthObserver, BandwidthUsage, BitrateUpdate, DelayBasedBwe};

mod config;
pub use config::BweConfig;

mod error;
pub use error::BweError;

mod feedback;
pub use feedback::{PacketFeedback, ProbeClusterId};

mod time;

mod units;
pub use units::{Bitrate, DataSize};

mod util;

/// Log a CSV like stat to stdout.
///
/// ```ignore
/// log_stat!("MY_STAT", 1, "hello", 3);
/// ```
///
/// will result in the following being printed
///
/// ```text
/// MY_STAT 1, hello, 3, {unix_timestamp_ms}
/// ````
///
/// These logs can be easily grepped for, parsed and graphed, or otherwise analyzed.
///
/// This macro turns into a NO-OP if the `_internal_dont_use_log_stats` feature is not enabled
macro_rules! log_stat {
    ($name:expr, $($arg:expr),+) => {
        #[cfg(feature = "_internal_dont_use_log_stats")]
        {
            use std::time::SystemTime;
            use std::io::{self, Write};

            let unix_time_ms = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or_default();
            let mut lock = io::stdout().lock();
            let _ = write!(lock, "{} ", $name);

            $(
                let _ = write!(lock, "{},", $arg);
            )+
            let _ = writeln!(lock, "{}", unix_time_ms);
        }
    };
}
pub(crate) use log_stat;
