use std::time::{Duration, Instant};

use super::macros::log_incoming_bitrate;
use crate::{Bitrate, DataSize};

/// Window used until the first estimate is made.
const INITIAL_WINDOW: Duration = Duration::from_millis(500);
/// Window used once we have an estimate.
const WINDOW: Duration = Duration::from_millis(150);
const SMALL_SAMPLE_THRESHOLD: DataSize = DataSize::bytes(2000);
const SMALL_SAMPLE_UNCERTAINTY: f64 = 25.0;
const UNCERTAINTY: f64 = 10.0;
/// Uncertainty added per sample to model the rate changing over time.
const PROCESS_NOISE: f64 = 5.0;
const ESTIMATE_FLOOR: Bitrate = Bitrate::kbps(40);

/// Measures the bitrate of received packets by arrival time.
///
/// Bytes are summed per window and each window sample is folded into a bayesian estimate
/// where samples far from the current estimate carry less weight.
#[derive(Debug)]
pub(crate) struct IncomingBitrate {
    estimate: Option<Bitrate>,
    /// Variance of the estimate.
    estimate_var: f64,
    /// Bytes received in the current window.
    sum: DataSize,
    /// How much of the current window has elapsed.
    current_window: Duration,
    last_arrival: Option<Instant>,
}

impl IncomingBitrate {
    pub(crate) fn new() -> Self {
        Self {
            estimate: None,
            estimate_var: 50.0,
            sum: DataSize::ZERO,
            current_window: Duration::ZERO,
            last_arrival: None,
        }
    }

    pub(crate) fn update(&mut self, arrival_time: Instant, size: DataSize) {
        let window = if self.estimate.is_none() {
            INITIAL_WINDOW
        } else {
            WINDOW
        };

        let Some((sample, is_small)) = self.update_window(arrival_time, size, window) else {
            return;
        };

        let Some(estimate) = self.estimate else {
            debug!("First incoming bitrate sample: {sample}");
            self.estimate = Some(sample);
            log_incoming_bitrate!(sample.as_f64());
            return;
        };

        let scale = if is_small && sample < estimate {
            SMALL_SAMPLE_UNCERTAINTY
        } else {
            UNCERTAINTY
        };

        let sample_bps = sample.as_f64();
        let estimate_bps = estimate.as_f64();

        // Samples far away from the current estimate are less certain.
        let sample_var = (scale * (estimate_bps - sample_bps).abs() / estimate_bps).powi(2);
        let pred_var = self.estimate_var + PROCESS_NOISE;

        let new_estimate =
            (sample_var * estimate_bps + pred_var * sample_bps) / (sample_var + pred_var);
        let new_estimate = Bitrate::from(new_estimate.ceil()).max(ESTIMATE_FLOOR);

        trace!(%sample, %new_estimate, "Incoming bitrate updated");
        log_incoming_bitrate!(new_estimate.as_f64());

        self.estimate = Some(new_estimate);
        self.estimate_var = (sample_var * pred_var) / (sample_var + pred_var);
    }

    pub(crate) fn estimate(&self) -> Option<Bitrate> {
        self.estimate
    }

    fn update_window(
        &mut self,
        arrival_time: Instant,
        size: DataSize,
        window: Duration,
    ) -> Option<(Bitrate, bool)> {
        if let Some(last) = self.last_arrival {
            let Some(elapsed) = arrival_time.checked_duration_since(last) else {
                trace!("Incoming bitrate: arrival time went backwards, restarting window");
                self.restart_window(arrival_time);
                return None;
            };

            if elapsed >= window {
                // Nothing received for a whole window, the sum is stale.
                self.restart_window(arrival_time);
            } else {
                self.current_window += elapsed;
            }
        }
        self.last_arrival = Some(arrival_time);

        let mut sample = None;
        if self.current_window >= window {
            let is_small = self.sum < SMALL_SAMPLE_THRESHOLD;
            sample = Some((self.sum / window, is_small));
            self.sum = DataSize::ZERO;
            self.current_window -= window;
        }

        self.sum += size;

        sample
    }

    fn restart_window(&mut self, arrival_time: Instant) {
        self.sum = DataSize::ZERO;
        self.current_window = Duration::ZERO;
        self.last_arrival = Some(arrival_time);
    }
}
