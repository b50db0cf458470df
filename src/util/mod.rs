mod average;
pub(crate) use average::MovingAverage;
