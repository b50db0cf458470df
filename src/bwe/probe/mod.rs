mod estimator;

pub(crate) use estimator::ProbeEstimator;
