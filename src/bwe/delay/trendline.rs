use std::collections::VecDeque;
use std::time::Instant;

use super::super::macros::{log_trendline_estimate, log_trendline_modified_trend};
use super::super::BandwidthUsage;
use super::arrival_group::InterGroupDelayDelta;
use crate::util::MovingAverage;
use crate::BweConfig;

const OVER_USE_THRESHOLD_DEFAULT_MS: f64 = 12.5;
const OVER_USE_TIME_THRESHOLD_MS: f64 = 10.0;
const MAX_TIME_DELTA_MS: f64 = 100.0;
const THRESHOLD_MIN_MS: f64 = 6.0;
/// Ceiling for the threshold after long periods of normal usage.
const THRESHOLD_MAX_MS: f64 = 25.0;
/// Trend is scaled by the number of deltas seen, up to this many.
const DELAY_COUNT_CAP: usize = 60;
const MAX_DELAY_COUNT: usize = 1000;
/// Dropped observations in a row before the regression window is re-anchored.
const REORDERED_RESET_THRESHOLD: usize = 3;

/// Classifies the delay trend over the last few arrival groups.
///
/// The accumulated delay variation is smoothed and a line is fitted through the smoothed values
/// against arrival time. A positive slope means queues are building.
pub(crate) struct TrendlineEstimator {
    /// The window size in groups.
    window_size: usize,
    smoothing_coef: f64,
    threshold_gain: f64,
    k_up: f64,
    k_down: f64,

    /// The first instant we saw, used as zero point.
    zero_time: Option<Instant>,

    /// The latest arrival time in the history.
    last_arrival_time: Option<Instant>,

    /// The history of observed delay variations.
    history: VecDeque<Timing>,

    /// The total number of observed delay variations.
    num_delay_variations: usize,

    /// Accumulated delay.
    accumulated_delay: f64,

    /// Last smoothed delay.
    smoothed_delay: f64,

    /// Variance of the per-group delay variation.
    noise: MovingAverage,

    /// The adaptive delay threshold.
    delay_threshold: f64,

    /// Previous trend
    previous_trend: f64,

    /// If we are overusing, this contains data about the overuse.
    overuse: Option<Overuse>,

    /// The last time we updated the adaptive threshold.
    last_threshold_update: Option<Instant>,

    /// Observations dropped in a row due to arrival time going backwards.
    consecutive_dropped: usize,

    /// Our current hypothesis about the bandwidth usage.
    hypothesis: BandwidthUsage,
}

impl TrendlineEstimator {
    pub(crate) fn new(config: &BweConfig) -> Self {
        Self {
            window_size: config.trendline_window_size(),
            smoothing_coef: config.trendline_smoothing(),
            threshold_gain: config.threshold_gain(),
            k_up: config.k_up(),
            k_down: config.k_down(),
            zero_time: None,
            last_arrival_time: None,
            history: VecDeque::with_capacity(config.trendline_window_size() + 1),
            num_delay_variations: 0,
            accumulated_delay: 0.0,
            smoothed_delay: 0.0,
            noise: MovingAverage::new(1.0 - config.trendline_smoothing()),
            delay_threshold: OVER_USE_THRESHOLD_DEFAULT_MS,
            previous_trend: 0.0,
            overuse: None,
            last_threshold_update: None,
            consecutive_dropped: 0,
            hypothesis: BandwidthUsage::Normal,
        }
    }

    /// Add the delay delta between two groups and return the updated classification.
    pub(crate) fn add_delay_observation(&mut self, delta: InterGroupDelayDelta) -> BandwidthUsage {
        let now = delta.last_arrival_time;

        if self.last_arrival_time.map(|l| now < l).unwrap_or(false) {
            self.consecutive_dropped += 1;
            debug!(
                dropped = self.consecutive_dropped,
                "Trendline: dropping observation with arrival time going backwards"
            );
            if self.consecutive_dropped < REORDERED_RESET_THRESHOLD {
                return self.hypothesis;
            }
            debug!("Trendline: re-anchoring regression window");
            self.history.clear();
            self.zero_time = None;
        }
        self.consecutive_dropped = 0;

        let send_delta_ms = delta.send_delta.as_millis_f64();
        let delay_ms = delta.arrival_delta.as_millis_f64() - send_delta_ms;

        self.do_add_to_history(delay_ms, now);
        while self.history.len() > self.window_size {
            let _ = self.history.pop_front();
        }

        if self.history.len() == self.window_size {
            self.update_trendline(send_delta_ms, now);
        }

        trace!(
            delay_ms,
            size = %delta.size,
            noise_var = self.noise.variance(),
            threshold = self.delay_threshold,
            "Trendline observation"
        );

        self.hypothesis
    }

    pub(crate) fn hypothesis(&self) -> BandwidthUsage {
        self.hypothesis
    }

    /// Variance of the delay variation between groups, in ms².
    pub(crate) fn noise_variance(&self) -> f64 {
        self.noise.variance()
    }

    pub(crate) fn threshold(&self) -> f64 {
        self.delay_threshold
    }

    fn do_add_to_history(&mut self, delay_ms: f64, arrival_time: Instant) {
        let zero_time = *self.zero_time.get_or_insert(arrival_time);

        self.num_delay_variations = (self.num_delay_variations + 1).min(MAX_DELAY_COUNT);
        self.accumulated_delay += delay_ms;
        self.smoothed_delay = self.smoothed_delay * self.smoothing_coef
            + (1.0 - self.smoothing_coef) * self.accumulated_delay;
        self.noise.update(delay_ms);

        let arrival_ms = arrival_time.saturating_duration_since(zero_time).as_secs_f64() * 1000.0;
        self.history.push_back(Timing {
            arrival_ms,
            smoothed_delay: self.smoothed_delay,
        });
        self.last_arrival_time = Some(arrival_time);
    }

    fn update_trendline(&mut self, send_delta_ms: f64, now: Instant) {
        let trend = self.linear_fit().unwrap_or(self.previous_trend);
        trace!("Computed trend {:?}", trend);
        log_trendline_estimate!(trend);

        self.detect(trend, send_delta_ms, now);
    }

    fn linear_fit(&self) -> Option<f64> {
        // Simple linear regression to compute slope.
        if self.history.len() < 2 {
            return None;
        }

        let (sum_x, sum_y) = self.history.iter().fold((0.0, 0.0), |acc, t| {
            (acc.0 + t.arrival_ms, acc.1 + t.smoothed_delay)
        });

        let avg_x = sum_x / self.history.len() as f64;
        let avg_y = sum_y / self.history.len() as f64;

        let (numerator, denominator) = self.history.iter().fold((0.0, 0.0), |acc, t| {
            let x = t.arrival_ms;
            let y = t.smoothed_delay;

            (
                acc.0 + (x - avg_x) * (y - avg_y),
                acc.1 + (x - avg_x).powi(2),
            )
        });

        if denominator == 0.0 {
            return None;
        }

        Some(numerator / denominator)
    }

    fn detect(&mut self, trend: f64, send_delta_ms: f64, now: Instant) {
        if self.num_delay_variations < 2 {
            self.update_hypothesis(BandwidthUsage::Normal);
            return;
        }

        let modified_trend =
            self.num_delay_variations.min(DELAY_COUNT_CAP) as f64 * trend * self.threshold_gain;

        log_trendline_modified_trend!(modified_trend, self.delay_threshold);

        if modified_trend > self.delay_threshold {
            // Assume that we've been over-using half of the time since the previous sample.
            let overuse = self.overuse.get_or_insert(Overuse {
                count: 0,
                time_overusing: -send_delta_ms / 2.0,
            });
            overuse.time_overusing += send_delta_ms;
            overuse.count += 1;

            trace!(
                time_overusing = overuse.time_overusing,
                trend,
                previous_trend = self.previous_trend,
                "Trendline Estimator: Maybe overusing"
            );

            if overuse.time_overusing > OVER_USE_TIME_THRESHOLD_MS
                && overuse.count > 1
                && trend >= self.previous_trend
            {
                self.overuse = None;
                self.update_hypothesis(BandwidthUsage::Overuse);
            }
        } else if modified_trend < -self.delay_threshold {
            self.overuse = None;
            self.update_hypothesis(BandwidthUsage::Underuse);
        } else {
            self.overuse = None;
            self.update_hypothesis(BandwidthUsage::Normal);
        }

        self.previous_trend = trend;
        self.update_threshold(now);
    }

    /// The threshold creeps up while usage is normal and drops quickly during overuse, so a
    /// recent congestion event is re-detected sooner.
    fn update_threshold(&mut self, now: Instant) {
        let last = self.last_threshold_update.replace(now).unwrap_or(now);
        let time_delta_ms =
            (now.saturating_duration_since(last).as_secs_f64() * 1000.0).min(MAX_TIME_DELTA_MS);

        let threshold = match self.hypothesis {
            BandwidthUsage::Normal => {
                (self.delay_threshold + self.k_up * time_delta_ms).min(THRESHOLD_MAX_MS)
            }
            BandwidthUsage::Overuse => {
                (self.delay_threshold - self.k_down * time_delta_ms).max(THRESHOLD_MIN_MS)
            }
            BandwidthUsage::Underuse => self.delay_threshold,
        };

        if threshold != self.delay_threshold {
            trace!("Adaptive delay variation threshold changed to: {threshold}");
            self.delay_threshold = threshold;
        }
    }

    fn update_hypothesis(&mut self, new_hypothesis: BandwidthUsage) {
        if self.hypothesis == new_hypothesis {
            return;
        }

        debug!("TrendLineEstimator: Setting hypothesis to {new_hypothesis}");
        self.hypothesis = new_hypothesis;
    }
}

#[derive(Debug)]
struct Timing {
    arrival_ms: f64,
    smoothed_delay: f64,
}

#[derive(Debug)]
struct Overuse {
    count: usize,
    time_overusing: f64,
}
