use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Bitrate, BweError, DataSize};

/// Customized config for creating a [`DelayBasedBwe`][crate::DelayBasedBwe] instance.
///
/// ```
/// use str0m_bwe::{Bitrate, BweConfig};
///
/// let config = BweConfig::new()
///     .set_start_bitrate(Bitrate::kbps(900))
///     .set_min_bitrate(Bitrate::kbps(30));
///
/// assert!(config.validate().is_ok());
/// ```
///
/// Configs implement [`Clone`] to help create multiple estimator instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BweConfig {
    pub(crate) start_bitrate: Bitrate,
    pub(crate) min_bitrate: Bitrate,
    pub(crate) max_bitrate: Bitrate,
    pub(crate) min_probe_packets: usize,
    pub(crate) min_probe_packet_size: DataSize,
    pub(crate) max_probe_ratio: f64,
    pub(crate) probe_cluster_history: Duration,
    pub(crate) beta: f64,
    pub(crate) min_feedback_interval: Duration,
    pub(crate) max_feedback_interval: Duration,
    pub(crate) burst_threshold: Duration,
    pub(crate) trendline_window_size: usize,
    pub(crate) trendline_smoothing: f64,
    pub(crate) threshold_gain: f64,
    pub(crate) k_up: f64,
    pub(crate) k_down: f64,
    pub(crate) stream_timeout: Duration,
}

impl BweConfig {
    /// Creates a new default config.
    pub fn new() -> Self {
        BweConfig::default()
    }

    /// The bitrate the rate controller reports until it has seen probes or traffic.
    pub fn start_bitrate(&self) -> Bitrate {
        self.start_bitrate
    }

    /// Set the start bitrate.
    ///
    /// Defaults to 300kbit/s.
    pub fn set_start_bitrate(mut self, bitrate: Bitrate) -> Self {
        self.start_bitrate = bitrate;
        self
    }

    /// The lowest estimate ever reported.
    pub fn min_bitrate(&self) -> Bitrate {
        self.min_bitrate
    }

    /// Set the lowest estimate.
    ///
    /// Defaults to 10kbit/s.
    pub fn set_min_bitrate(mut self, bitrate: Bitrate) -> Self {
        self.min_bitrate = bitrate;
        self
    }

    /// The highest estimate ever reported.
    pub fn max_bitrate(&self) -> Bitrate {
        self.max_bitrate
    }

    /// Set the highest estimate.
    ///
    /// Defaults to 30Mbit/s.
    pub fn set_max_bitrate(mut self, bitrate: Bitrate) -> Self {
        self.max_bitrate = bitrate;
        self
    }

    /// Number of probe packets needed before a cluster produces an estimate.
    pub fn min_probe_packets(&self) -> usize {
        self.min_probe_packets
    }

    /// Set the number of probe packets needed for an estimate.
    ///
    /// Defaults to 5.
    pub fn set_min_probe_packets(mut self, count: usize) -> Self {
        self.min_probe_packets = count;
        self
    }

    /// Probe packets must be larger than this to count.
    pub fn min_probe_packet_size(&self) -> DataSize {
        self.min_probe_packet_size
    }

    /// Set the probe packet size threshold.
    ///
    /// Defaults to 200 bytes. Packets of exactly this size are ignored.
    pub fn set_min_probe_packet_size(mut self, size: DataSize) -> Self {
        self.min_probe_packet_size = size;
        self
    }

    /// The largest receive rate / send rate ratio a probe may show.
    pub fn max_probe_ratio(&self) -> f64 {
        self.max_probe_ratio
    }

    /// Set the largest allowed receive rate / send rate ratio for probes. Probes arriving
    /// faster than this are discarded.
    ///
    /// Defaults to 2.5.
    pub fn set_max_probe_ratio(mut self, ratio: f64) -> Self {
        self.max_probe_ratio = ratio;
        self
    }

    /// How long a probe cluster is kept after its last packet.
    pub fn probe_cluster_history(&self) -> Duration {
        self.probe_cluster_history
    }

    /// Set how long an idle probe cluster is kept.
    ///
    /// Defaults to 1s.
    pub fn set_probe_cluster_history(mut self, history: Duration) -> Self {
        self.probe_cluster_history = history;
        self
    }

    /// The multiplicative decrease factor.
    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// Set the multiplicative decrease factor applied to the incoming bitrate on overuse.
    ///
    /// Defaults to 0.85.
    pub fn set_beta(mut self, beta: f64) -> Self {
        self.beta = beta;
        self
    }

    /// The shortest interval between two trend driven updates.
    pub fn min_feedback_interval(&self) -> Duration {
        self.min_feedback_interval
    }

    /// Set the shortest interval between two trend driven updates.
    ///
    /// Defaults to 200ms.
    pub fn set_min_feedback_interval(mut self, interval: Duration) -> Self {
        self.min_feedback_interval = interval;
        self
    }

    /// The longest interval between two trend driven updates.
    pub fn max_feedback_interval(&self) -> Duration {
        self.max_feedback_interval
    }

    /// Set the longest interval between two trend driven updates.
    ///
    /// Defaults to 1s.
    pub fn set_max_feedback_interval(mut self, interval: Duration) -> Self {
        self.max_feedback_interval = interval;
        self
    }

    /// Packets sent within this time of the first packet in a group belong to the group.
    pub fn burst_threshold(&self) -> Duration {
        self.burst_threshold
    }

    /// Set the burst threshold used for grouping.
    ///
    /// Defaults to 5ms.
    pub fn set_burst_threshold(mut self, threshold: Duration) -> Self {
        self.burst_threshold = threshold;
        self
    }

    /// Number of groups in the trend regression window.
    pub fn trendline_window_size(&self) -> usize {
        self.trendline_window_size
    }

    /// Set the number of groups in the trend regression window.
    ///
    /// Defaults to 20.
    pub fn set_trendline_window_size(mut self, size: usize) -> Self {
        self.trendline_window_size = size;
        self
    }

    /// Smoothing coefficient for the accumulated delay.
    pub fn trendline_smoothing(&self) -> f64 {
        self.trendline_smoothing
    }

    /// Set the smoothing coefficient for the accumulated delay.
    ///
    /// Defaults to 0.9.
    pub fn set_trendline_smoothing(mut self, coef: f64) -> Self {
        self.trendline_smoothing = coef;
        self
    }

    /// Gain applied to the trend before comparing it with the threshold.
    pub fn threshold_gain(&self) -> f64 {
        self.threshold_gain
    }

    /// Set the trend gain.
    ///
    /// Defaults to 4.0.
    pub fn set_threshold_gain(mut self, gain: f64) -> Self {
        self.threshold_gain = gain;
        self
    }

    /// Rate at which the overuse threshold grows while usage is normal, in ms per ms of
    /// arrival time.
    pub fn k_up(&self) -> f64 {
        self.k_up
    }

    /// Set the threshold growth rate.
    ///
    /// Defaults to 0.0087.
    pub fn set_k_up(mut self, k: f64) -> Self {
        self.k_up = k;
        self
    }

    /// Rate at which the overuse threshold shrinks while overusing, in ms per ms of arrival
    /// time.
    pub fn k_down(&self) -> f64 {
        self.k_down
    }

    /// Set the threshold shrink rate.
    ///
    /// Defaults to 0.039.
    pub fn set_k_down(mut self, k: f64) -> Self {
        self.k_down = k;
        self
    }

    /// Arrival gap after which the stream is considered restarted.
    pub fn stream_timeout(&self) -> Duration {
        self.stream_timeout
    }

    /// Set the stream timeout.
    ///
    /// Defaults to 2s.
    pub fn set_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    /// Check that the values can be used together.
    pub fn validate(&self) -> Result<(), BweError> {
        if self.min_bitrate > self.max_bitrate {
            return Err(BweError::Config(format!(
                "min bitrate {} is above max bitrate {}",
                self.min_bitrate, self.max_bitrate
            )));
        }
        if self.start_bitrate < self.min_bitrate || self.start_bitrate > self.max_bitrate {
            return Err(BweError::Config(format!(
                "start bitrate {} outside [{}, {}]",
                self.start_bitrate, self.min_bitrate, self.max_bitrate
            )));
        }
        if !(self.beta > 0.0 && self.beta < 1.0) {
            return Err(BweError::Config(format!(
                "beta {} must be in (0, 1)",
                self.beta
            )));
        }
        if self.min_probe_packets < 2 {
            return Err(BweError::Config(format!(
                "min probe packets {} must be at least 2",
                self.min_probe_packets
            )));
        }
        if self.max_probe_ratio.is_nan() || self.max_probe_ratio <= 1.0 {
            return Err(BweError::Config(format!(
                "max probe ratio {} must be above 1",
                self.max_probe_ratio
            )));
        }
        if self.trendline_window_size < 3 {
            return Err(BweError::Config(format!(
                "trendline window size {} must be at least 3",
                self.trendline_window_size
            )));
        }
        if !(self.trendline_smoothing >= 0.0 && self.trendline_smoothing < 1.0) {
            return Err(BweError::Config(format!(
                "trendline smoothing {} must be in [0, 1)",
                self.trendline_smoothing
            )));
        }
        for (name, value) in [
            ("threshold gain", self.threshold_gain),
            ("k_up", self.k_up),
            ("k_down", self.k_down),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(BweError::Config(format!(
                    "{name} {value} must be finite and positive"
                )));
            }
        }
        if self.burst_threshold.is_zero() {
            return Err(BweError::Config("burst threshold must not be zero".into()));
        }
        if self.stream_timeout.is_zero() {
            return Err(BweError::Config("stream timeout must not be zero".into()));
        }
        if self.min_feedback_interval > self.max_feedback_interval {
            return Err(BweError::Config(format!(
                "min feedback interval {:?} is above max {:?}",
                self.min_feedback_interval, self.max_feedback_interval
            )));
        }

        Ok(())
    }
}

impl Default for BweConfig {
    fn default() -> Self {
        Self {
            start_bitrate: Bitrate::kbps(300),
            min_bitrate: Bitrate::kbps(10),
            max_bitrate: Bitrate::mbps(30),
            min_probe_packets: 5,
            min_probe_packet_size: DataSize::bytes(200),
            max_probe_ratio: 2.5,
            probe_cluster_history: Duration::from_secs(1),
            beta: 0.85,
            min_feedback_interval: Duration::from_millis(200),
            max_feedback_interval: Duration::from_secs(1),
            burst_threshold: Duration::from_millis(5),
            trendline_window_size: 20,
            trendline_smoothing: 0.9,
            threshold_gain: 4.0,
            k_up: 0.0087,
            k_down: 0.039,
            stream_timeout: Duration::from_secs(2),
        }
    }
}
