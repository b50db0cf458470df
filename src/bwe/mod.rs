//! Delay based bandwidth estimation.
//!
//! The estimator is inspired by the delay-based part of Google Congestion Control (GCC).
//! See <https://datatracker.ietf.org/doc/html/draft-ietf-rmcat-gcc-02>.
//!
//! Packets are grouped in bursts by send time, the delay variation between bursts is fed to a
//! trendline estimator, and the resulting overuse signal drives an AIMD rate controller.
//! Probe clusters sent by the pacer are measured on the side and may move the estimate up
//! directly.

use std::fmt;
use std::time::{Duration, Instant};

use crate::{Bitrate, BweConfig, BweError, DataSize, PacketFeedback, ProbeClusterId};
use crate::{SendTimeUnwrapper, UnwrappedSendTime};

mod delay;
mod incoming_bitrate;
mod macros;
mod probe;

use delay::{ArrivalGroupAccumulator, RateControl, TrendlineEstimator};
use incoming_bitrate::IncomingBitrate;
use macros::{log_bitrate_estimate, log_delay_variation};
use probe::ProbeEstimator;

/// Receives the outcome of every feedback report given to [`DelayBasedBwe`].
///
/// Any `FnMut(BitrateUpdate)` closure is an observer.
pub trait BandwidthObserver {
    /// Called once per non-empty feedback report, before the feedback call returns.
    fn on_bitrate_update(&mut self, update: BitrateUpdate);
}

impl<F> BandwidthObserver for F
where
    F: FnMut(BitrateUpdate),
{
    fn on_bitrate_update(&mut self, update: BitrateUpdate) {
        (self)(update)
    }
}

/// Notification given to a [`BandwidthObserver`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BitrateUpdate {
    /// Whether the estimate was updated by this feedback report.
    pub updated: bool,
    /// The current target bitrate.
    ///
    /// Only meaningful once any update has been reported.
    pub bitrate: Bitrate,
}

/// Delay based bandwidth estimator.
///
/// Feed it packet feedback using [`DelayBasedBwe::incoming_packet_feedback_vector`]. The
/// observer is told about the outcome of every report.
pub struct DelayBasedBwe<O> {
    observer: O,
    unwrapper: SendTimeUnwrapper,
    incoming_bitrate: IncomingBitrate,
    probe_estimator: ProbeEstimator,
    arrival_group_accumulator: ArrivalGroupAccumulator,
    trendline_estimator: TrendlineEstimator,
    rate_control: RateControl,
    /// The last time the rate controller was run, or a probe result applied.
    last_update: Option<Instant>,
}

impl<O: BandwidthObserver> DelayBasedBwe<O> {
    /// Create a new estimator.
    ///
    /// Fails if the config is invalid.
    pub fn new(config: BweConfig, observer: O) -> Result<Self, BweError> {
        config.validate()?;

        Ok(Self {
            observer,
            unwrapper: SendTimeUnwrapper::new(config.stream_timeout()),
            incoming_bitrate: IncomingBitrate::new(),
            probe_estimator: ProbeEstimator::new(&config),
            arrival_group_accumulator: ArrivalGroupAccumulator::new(config.burst_threshold()),
            trendline_estimator: TrendlineEstimator::new(&config),
            rate_control: RateControl::new(&config),
            last_update: None,
        })
    }

    /// Process one feedback report.
    ///
    /// The observer is called exactly once, unless `packets` is empty.
    pub fn incoming_packet_feedback_vector(&mut self, packets: &[PacketFeedback], now: Instant) {
        if packets.is_empty() {
            return;
        }

        let mut updated = false;
        for feedback in packets {
            updated |= self.incoming_packet(feedback, now);
        }

        let update = BitrateUpdate {
            updated,
            bitrate: self.rate_control.estimated_bitrate(),
        };
        self.observer.on_bitrate_update(update);
    }

    /// Process a feedback report of a single packet.
    pub fn incoming_packet_feedback(&mut self, packet: PacketFeedback, now: Instant) {
        self.incoming_packet_feedback_vector(std::slice::from_ref(&packet), now);
    }

    /// The current estimate, if any.
    pub fn latest_estimate(&self) -> Option<Bitrate> {
        self.rate_control
            .valid()
            .then(|| self.rate_control.estimated_bitrate())
    }

    /// The latest classification of the delay trend.
    pub fn usage(&self) -> BandwidthUsage {
        self.trendline_estimator.hypothesis()
    }

    /// The measured bitrate of incoming packets.
    pub fn incoming_bitrate(&self) -> Option<Bitrate> {
        self.incoming_bitrate.estimate()
    }

    /// Set the estimate to start from.
    ///
    /// This makes the estimate valid without waiting for a probe or measured bitrate.
    pub fn set_start_bitrate(&mut self, bitrate: Bitrate, now: Instant) {
        debug!("Start bitrate set to {bitrate}");
        self.rate_control.set_estimate(bitrate, now);
    }

    /// Change the lowest estimate we produce.
    pub fn set_min_bitrate(&mut self, bitrate: Bitrate) {
        self.rate_control.set_min_bitrate(bitrate);
    }

    /// The observer.
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Mutable access to the observer.
    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    /// Returns whether the estimate was updated.
    fn incoming_packet(&mut self, feedback: &PacketFeedback, now: Instant) -> bool {
        let UnwrappedSendTime {
            send_time,
            restarted,
        } = self
            .unwrapper
            .unwrap(feedback.send_time, feedback.arrival_time);

        if restarted {
            self.arrival_group_accumulator.reset();
            self.probe_estimator.reset();
        }

        let packet = ReceivedPacket {
            seq_no: feedback.seq_no,
            send_time,
            arrival_time: feedback.arrival_time,
            size: feedback.payload_size,
            probe_cluster: feedback.probe_cluster,
        };

        self.incoming_bitrate
            .update(packet.arrival_time, packet.size);

        let probe_bitrate = self.probe_estimator.update(&packet);

        if let Some(delta) = self.arrival_group_accumulator.accumulate_packet(&packet) {
            log_delay_variation!(delta.arrival_delta);
            self.trendline_estimator.add_delay_observation(delta);
        }

        let updated = self.maybe_update_estimate(probe_bitrate, now);
        if updated {
            log_bitrate_estimate!(self.rate_control.estimated_bitrate().as_f64());
        }

        updated
    }

    /// Returns true only if the estimate changed value, or became valid.
    fn maybe_update_estimate(&mut self, probe_bitrate: Option<Bitrate>, now: Instant) -> bool {
        let current = self.latest_estimate();

        // A probe result takes precedence if it's the first estimate or raises the estimate.
        if let Some(probe_bitrate) = probe_bitrate {
            if current.map(|c| probe_bitrate > c).unwrap_or(true) {
                debug!(
                    "Probe result {probe_bitrate} replaces estimate {}",
                    current.map(|c| c.to_string()).unwrap_or_default()
                );
                self.rate_control.set_estimate(probe_bitrate, now);
                self.last_update = Some(now);
                return true;
            }
        }

        let Some(incoming_bitrate) = self.incoming_bitrate.estimate() else {
            return false;
        };

        let usage = self.trendline_estimator.hypothesis();

        let interval_passed = self
            .last_update
            .map(|last| now.saturating_duration_since(last) > self.rate_control.feedback_interval())
            .unwrap_or(true);

        let reduce_now = usage == BandwidthUsage::Overuse
            && self
                .rate_control
                .time_to_reduce_further(now, incoming_bitrate);

        if !interval_passed && !reduce_now {
            return false;
        }

        let estimate = self
            .rate_control
            .update(usage.into(), incoming_bitrate, now);
        self.last_update = Some(now);

        trace!(
            %usage,
            %incoming_bitrate,
            %estimate,
            noise_var = self.trendline_estimator.noise_variance(),
            threshold = self.trendline_estimator.threshold(),
            "Rate control updated"
        );

        current != Some(estimate)
    }
}

/// A received packet with the send time on the unwrapped timeline.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReceivedPacket {
    pub(crate) seq_no: u16,
    /// Send time on the sender's unwrapped timeline.
    pub(crate) send_time: Duration,
    pub(crate) arrival_time: Instant,
    pub(crate) size: DataSize,
    pub(crate) probe_cluster: Option<ProbeClusterId>,
}

/// Classification of the delay trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandwidthUsage {
    /// Delay is growing, queues are building.
    Overuse,
    /// Delay is stable.
    Normal,
    /// Delay is shrinking, queues are draining.
    Underuse,
}

impl fmt::Display for BandwidthUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BandwidthUsage::Overuse => write!(f, "overuse"),
            BandwidthUsage::Normal => write!(f, "normal"),
            BandwidthUsage::Underuse => write!(f, "underuse"),
        }
    }
}
