mod arrival_group;
mod rate_control;
mod trendline;

pub(crate) use arrival_group::ArrivalGroupAccumulator;
pub(crate) use rate_control::RateControl;
pub(crate) use trendline::TrendlineEstimator;
