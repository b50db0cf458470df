use std::fmt;
use std::time::{Duration, Instant};

use super::super::macros::log_rate_control_applied_change;
use super::super::macros::log_rate_control_observed_bitrate;
use super::super::macros::log_rate_control_state;
use super::super::BandwidthUsage;
use crate::util::MovingAverage;
use crate::{Bitrate, BweConfig, DataSize};

/// Smoothing factor applied to moving stats for observed bitrates when we are in the decreasing
/// state.
const OBSERVED_BIT_RATE_SMOOTHING_FACTOR: f64 = 0.95;
/// The coefficient used for multiplicative rate increase.
const MULTIPLICATIVE_INCREASE_COEF: f64 = 1.08;
/// The maximal ratio of the observed bitrate that we allow estimating in a single increase.
const MAX_ESTIMATE_RATIO: f64 = 1.5;
/// Headroom on top of the observed ratio, so tiny rates can still grow.
const MAX_ESTIMATE_HEADROOM: Bitrate = Bitrate::kbps(10);
/// Assumed round trip time. Nothing feeds us RTT, so this is fixed.
const DEFAULT_RTT: Duration = Duration::from_millis(200);
/// Added to the RTT for the response time used in additive increase.
const DEFAULT_BACKOFF_TIME: Duration = Duration::from_millis(100);
/// Number of standard deviations used for the convergence checks of the observed bitrate.
const OBSERVED_BITRATE_STD_RANGE: f64 = 3.0;
/// Size of a feedback report, used to derive how often we act on feedback.
const FEEDBACK_REPORT_SIZE: DataSize = DataSize::bytes(80);
/// Share of the estimate that feedback reports are allowed to use.
const FEEDBACK_SHARE: f64 = 0.05;
/// Assumed dominant frame rate when estimating packet sizes.
const FRAMES_PER_SECOND: f64 = 30.0;
/// Assumed maximum packet size when estimating packet sizes.
const PACKET_SIZE: DataSize = DataSize::bytes(1200);

/// AIMD rate controller.
///
/// Inputs to the rate controller are:
/// * The observed incoming bitrate.
/// * The usage classification from the trendline estimator.
///
/// There is no valid estimate until either [`RateControl::set_estimate`] is called, or the
/// first update with an observed bitrate initialises the estimate to that bitrate.
pub(crate) struct RateControl {
    state: State,

    estimated_bitrate: Bitrate,
    min_bitrate: Bitrate,
    max_bitrate: Bitrate,
    beta: f64,
    min_feedback_interval: Duration,
    max_feedback_interval: Duration,

    /// Whether `estimated_bitrate` has been initialised.
    valid: bool,

    /// The last observed bitrate.
    last_observed_bitrate: Option<Bitrate>,
    /// The averaged observed bitrate when we have been in the decrease state.
    averaged_observed_bitrate: MovingAverage,
    /// The last time we updated the estimated bitrate.
    last_estimate_update: Option<Instant>,
}

impl RateControl {
    pub(crate) fn new(config: &BweConfig) -> Self {
        log_rate_control_state!(State::Increase as i8);

        Self {
            state: State::Increase,

            estimated_bitrate: config.start_bitrate(),
            min_bitrate: config.min_bitrate(),
            max_bitrate: config.max_bitrate(),
            beta: config.beta(),
            min_feedback_interval: config.min_feedback_interval(),
            max_feedback_interval: config.max_feedback_interval(),

            valid: false,

            last_observed_bitrate: None,
            averaged_observed_bitrate: MovingAverage::new(OBSERVED_BIT_RATE_SMOOTHING_FACTOR),
            last_estimate_update: None,
        }
    }

    /// Update with input from the trendline estimator and return the new estimate.
    pub(crate) fn update(&mut self, signal: Signal, observed_bitrate: Bitrate, now: Instant) -> Bitrate {
        self.last_observed_bitrate = Some(observed_bitrate);

        if !self.valid {
            debug!("Initialising rate control from observed bitrate {observed_bitrate}");
            self.set_estimate(observed_bitrate, now);
            return self.estimated_bitrate;
        }

        self.state = self.state.transition(signal);
        log_rate_control_observed_bitrate!(
            observed_bitrate.as_f64(),
            self.averaged_observed_bitrate
                .get()
                .map(|avg| avg.to_string())
                .unwrap_or_default()
        );

        match self.state {
            State::Increase => {
                self.increase(observed_bitrate, now);
            }
            State::Decrease => {
                // Observed bitrate statistics are gathered on every decrease signal, the
                // reduction itself is gated.
                self.update_observed_bitrate(observed_bitrate);

                if self.time_to_reduce_further(now, observed_bitrate) {
                    self.decrease(observed_bitrate, now);
                }
            }
            State::Hold => {
                // Do nothing
            }
        }

        self.estimated_bitrate
    }

    fn update_observed_bitrate(&mut self, observed_bitrate: Bitrate) {
        if self
            .averaged_observed_bitrate
            .lower_range(OBSERVED_BITRATE_STD_RANGE)
            .map(|lower| observed_bitrate.as_f64() < lower)
            .unwrap_or(false)
        {
            self.averaged_observed_bitrate.reset();
        }
        self.averaged_observed_bitrate
            .update(observed_bitrate.as_f64());
    }

    /// Whether enough time has passed since the last change to reduce again.
    ///
    /// Returns true if:
    /// 1. One RTT, clamped to 10-200ms, has passed since the last change, OR
    /// 2. Throughput is critically low (< 50% of current estimate)
    pub(crate) fn time_to_reduce_further(&self, now: Instant, observed_bitrate: Bitrate) -> bool {
        let Some(last_change) = self.last_estimate_update else {
            return true;
        };

        let reduction_interval =
            DEFAULT_RTT.clamp(Duration::from_millis(10), Duration::from_millis(200));

        if now.saturating_duration_since(last_change) >= reduction_interval {
            return true;
        }

        if self.valid {
            let threshold = self.estimated_bitrate * 0.5;
            return observed_bitrate < threshold;
        }

        false
    }

    /// How long to wait between regular updates.
    ///
    /// Derived from the share of the estimate that feedback reports may use.
    pub(crate) fn feedback_interval(&self) -> Duration {
        let report_bits = FEEDBACK_REPORT_SIZE.as_bytes_f64() * 8.0;
        let share = self.estimated_bitrate.as_f64() * FEEDBACK_SHARE;
        if share <= 0.0 {
            return self.max_feedback_interval;
        }

        Duration::try_from_secs_f64(report_bits / share)
            .unwrap_or(self.max_feedback_interval)
            .clamp(self.min_feedback_interval, self.max_feedback_interval)
    }

    /// The current estimated bitrate.
    pub(crate) fn estimated_bitrate(&self) -> Bitrate {
        self.estimated_bitrate
    }

    pub(crate) fn valid(&self) -> bool {
        self.valid
    }

    /// Set the estimate directly, e.g. from a probe result or a configured start bitrate.
    ///
    /// The state is left unchanged. The update time is moved so the next regular update
    /// doesn't immediately override the value.
    pub(crate) fn set_estimate(&mut self, bitrate: Bitrate, now: Instant) {
        self.valid = true;
        self.update_estimate(bitrate, now);
    }

    pub(crate) fn set_min_bitrate(&mut self, min_bitrate: Bitrate) {
        self.min_bitrate = min_bitrate.min(self.max_bitrate);
        self.estimated_bitrate = self.estimated_bitrate.max(self.min_bitrate);
    }

    fn increase(&mut self, observed_bitrate: Bitrate, now: Instant) {
        let increase_limit = observed_bitrate * MAX_ESTIMATE_RATIO + MAX_ESTIMATE_HEADROOM;

        if self.estimated_bitrate >= increase_limit {
            // Time of last change moves even without increase, so a stale timestamp
            // can't allow a premature decrease.
            self.last_estimate_update = Some(now);
            return;
        }

        let last_estimate_update = *self.last_estimate_update.get_or_insert(now);

        if self
            .averaged_observed_bitrate
            .upper_range(OBSERVED_BITRATE_STD_RANGE)
            .map(|upper| observed_bitrate.as_f64() > upper)
            .unwrap_or(false)
        {
            self.averaged_observed_bitrate.reset();
        }

        let since_last_update = now.saturating_duration_since(last_estimate_update);

        let new_estimate = if self.is_near_convergence() {
            // Additive increase
            log_rate_control_applied_change!("increase_additive");
            let response_time = DEFAULT_RTT + DEFAULT_BACKOFF_TIME;

            let alpha =
                0.5 * (since_last_update.as_secs_f64() / response_time.as_secs_f64()).min(1.0);
            let expected_packet_size = self.estimated_packet_size();
            self.estimated_bitrate.as_f64() + (alpha * expected_packet_size).max(1000.0)
        } else {
            // Multiplicative increase
            log_rate_control_applied_change!("increase_multiplicative");
            let eta = MULTIPLICATIVE_INCREASE_COEF.powf(since_last_update.as_secs_f64().min(1.0));
            let increase = ((eta - 1.0) * self.estimated_bitrate.as_f64()).max(1_000.0);

            self.estimated_bitrate.as_f64() + increase
        };

        // Never lower the estimate while increasing.
        let new_estimate = Bitrate::from(new_estimate)
            .min(increase_limit)
            .max(self.estimated_bitrate);

        self.update_estimate(new_estimate, now);
    }

    fn decrease(&mut self, observed_bitrate: Bitrate, now: Instant) {
        log_rate_control_applied_change!("decrease");
        let mut new_estimate = observed_bitrate * self.beta;

        if self.estimated_bitrate < new_estimate {
            // Avoid increasing the bitrate on overuse
            new_estimate = self.estimated_bitrate;
        }

        #[allow(unused)]
        if let Some(observed_average) = self.averaged_observed_bitrate.get() {
            log_rate_control_observed_bitrate!(
                observed_bitrate.as_u64(),
                observed_average.round() as u64
            );
        }

        // Go straight to hold after a decrease, the next normal signal resumes increase.
        self.state = State::Hold;
        log_rate_control_state!(self.state as i8);
        debug!("Rate control decreased estimate to {new_estimate}");
        self.update_estimate(new_estimate, now);
    }

    fn is_near_convergence(&self) -> bool {
        if !self.averaged_observed_bitrate.valid() {
            return false;
        }
        let Some(last_observed_bitrate) = self.last_observed_bitrate else {
            return false;
        };

        // Near convergence if the observed bandwidth is within 3 standard deviations of
        // the moving average when we have been in the decrease state.
        self.averaged_observed_bitrate
            .within_std(last_observed_bitrate.as_f64(), OBSERVED_BITRATE_STD_RANGE)
    }

    fn update_estimate(&mut self, bitrate: Bitrate, now: Instant) {
        self.estimated_bitrate = bitrate.clamp(self.min_bitrate, self.max_bitrate);
        self.last_estimate_update = Some(now);
    }

    /// Average packet size in bits.
    fn estimated_packet_size(&self) -> f64 {
        let bits_per_frame = self.estimated_bitrate.as_f64() / FRAMES_PER_SECOND;
        let packets_per_frame = (bits_per_frame / (PACKET_SIZE.as_bytes_f64() * 8.0))
            .ceil()
            .max(1.0);

        bits_per_frame / packets_per_frame
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    Overuse,
    Underuse,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Increase = 1,
    Hold = 0,
    Decrease = -1,
}

impl State {
    fn transition(&self, signal: Signal) -> Self {
        let new_state = match (self, signal) {
            (_, Signal::Overuse) => Self::Decrease,
            (_, Signal::Underuse) => Self::Hold,
            // Backing off, wait for the next normal before increasing.
            (Self::Decrease, Signal::Normal) => Self::Hold,
            (Self::Hold | Self::Increase, Signal::Normal) => Self::Increase,
        };

        if new_state != *self {
            log_rate_control_state!(new_state as i8);
            debug!("Rate control state {} -> {} on {}", self, new_state, signal);
        }

        new_state
    }
}

impl From<BandwidthUsage> for Signal {
    fn from(value: BandwidthUsage) -> Self {
        match value {
            BandwidthUsage::Overuse => Signal::Overuse,
            BandwidthUsage::Normal => Signal::Normal,
            BandwidthUsage::Underuse => Signal::Underuse,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Hold => write!(f, "hold"),
            State::Increase => write!(f, "increase"),
            State::Decrease => write!(f, "decrease"),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Overuse => write!(f, "overuse"),
            Signal::Underuse => write!(f, "underuse"),
            Signal::Normal => write!(f, "normal"),
        }
    }
}
