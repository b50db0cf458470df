macro_rules! log_delay_variation {
    ($($arg:expr),+) => {
        crate::log_stat!("DELAY_VARIATION", $($arg),+);
    }
}

macro_rules! log_trendline_estimate {
    ($($arg:expr),+) => {
        crate::log_stat!("TRENDLINE_ESTIMATE", $($arg),+);
    }
}

macro_rules! log_trendline_modified_trend {
    ($($arg:expr),+) => {
        crate::log_stat!("TRENDLINE_MODIFIED_TREND", $($arg),+);
    }
}

macro_rules! log_bitrate_estimate {
    ($($arg:expr),+) => {
        crate::log_stat!("BITRATE_ESTIMATE", $($arg),+);
    }
}

macro_rules! log_probe_bitrate_estimate {
    ($($arg:expr),+) => {
        crate::log_stat!("PROBE_BITRATE_ESTIMATE", $($arg),+);
    }
}

macro_rules! log_incoming_bitrate {
    ($($arg:expr),+) => {
        crate::log_stat!("INCOMING_BITRATE", $($arg),+);
    }
}

macro_rules! log_rate_control_state {
    ($($arg:expr),+) => {
        crate::log_stat!("RATE_CONTROL_STATE", $($arg),+);
    }
}

macro_rules! log_rate_control_observed_bitrate {
    ($($arg:expr),+) => {
        crate::log_stat!("RATE_CONTROL_OBSERVED_BITRATE", $($arg),+);
    }
}

macro_rules! log_rate_control_applied_change {
    ($($arg:expr),+) => {
        crate::log_stat!("RATE_CONTROL_APPLIED_CHANGE", $($arg),+);
    }
}

pub(crate) use log_bitrate_estimate;
pub(crate) use log_delay_variation;
pub(crate) use log_incoming_bitrate;
pub(crate) use log_probe_bitrate_estimate;
pub(crate) use log_rate_control_applied_change;
pub(crate) use log_rate_control_observed_bitrate;
pub(crate) use log_rate_control_state;
pub(crate) use log_trendline_estimate;
pub(crate) use log_trendline_modified_trend;
