use std::time::{Duration, Instant};

use str0m_bwe::{AbsSendTime, Bitrate, BitrateUpdate, BweConfig, BweError, DataSize};
use str0m_bwe::{DelayBasedBwe, PacketFeedback};

use crate::common::{init_log, BweTest};

#[test]
fn config_serde_round_trip() -> Result<(), serde_json::Error> {
    let config = BweConfig::new()
        .set_start_bitrate(Bitrate::kbps(900))
        .set_beta(0.8)
        .set_burst_threshold(Duration::from_millis(4));

    let json = serde_json::to_string(&config)?;
    let back: BweConfig = serde_json::from_str(&json)?;

    assert_eq!(config, back);
    Ok(())
}

#[test]
fn partial_config_uses_defaults() -> Result<(), serde_json::Error> {
    let config: BweConfig = serde_json::from_str(r#"{"beta":0.8}"#)?;

    assert_eq!(config.beta(), 0.8);
    assert_eq!(config, BweConfig::new().set_beta(0.8));
    Ok(())
}

#[test]
fn invalid_config_is_rejected() {
    let config = BweConfig::new().set_beta(1.5);
    let bwe = DelayBasedBwe::new(config, |_: BitrateUpdate| {});

    assert!(matches!(bwe, Err(BweError::Config(_))));
}

#[test]
fn non_finite_config_is_rejected() {
    let configs = [
        BweConfig::new().set_max_probe_ratio(f64::NAN),
        BweConfig::new().set_k_up(f64::NAN),
        BweConfig::new().set_k_up(-0.01),
        BweConfig::new().set_threshold_gain(0.0),
        BweConfig::new().set_k_down(f64::INFINITY),
    ];

    for config in configs {
        let bwe = DelayBasedBwe::new(config.clone(), |_: BitrateUpdate| {});
        assert!(
            matches!(bwe, Err(BweError::Config(_))),
            "Accepted {config:?}"
        );
    }
}

#[test]
fn closure_observer() -> Result<(), BweError> {
    init_log();

    let mut updates = 0;
    let now = Instant::now();
    let mut bwe = DelayBasedBwe::new(BweConfig::new(), |u: BitrateUpdate| {
        if u.updated {
            updates += 1;
        }
    })?;

    bwe.set_start_bitrate(Bitrate::kbps(500), now);
    assert_eq!(bwe.latest_estimate(), Some(Bitrate::kbps(500)));

    // A single packet is not enough to estimate anything.
    let packet = PacketFeedback::new(now, AbsSendTime::new(0), 0, DataSize::bytes(1000));
    bwe.incoming_packet_feedback(packet, now);
    drop(bwe);

    assert_eq!(updates, 0);
    Ok(())
}

#[test]
fn custom_probe_packet_count() -> Result<(), BweError> {
    init_log();

    let config = BweConfig::new().set_min_probe_packets(3);
    let mut t = BweTest::with_config(config)?;

    for i in 0..3_u16 {
        t.clock.advance(10);
        let now_ms = t.clock.now_ms();
        t.incoming_feedback(now_ms, now_ms as u64, i, 1000, Some(1));
    }

    assert!(t.updated());
    Ok(())
}
