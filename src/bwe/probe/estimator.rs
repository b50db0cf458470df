use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use super::super::macros::log_probe_bitrate_estimate;
use super::super::ReceivedPacket;
use crate::{Bitrate, BweConfig, DataSize, ProbeClusterId};

/// The maximum valid duration between first and last probe packet on send/receive side.
const MAX_PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Minimum |receive rate| / |send rate| ratio to consider the link unsaturated.
const MIN_RATIO_FOR_UNSATURATED_LINK: f64 = 0.9;

/// Measures the bitrate achieved by probe clusters.
///
/// Only packets tagged with a [`ProbeClusterId`] and larger than the minimum probe packet
/// size take part. Once a cluster holds enough packets, every further packet yields a new
/// attempt at an estimate.
#[derive(Debug)]
pub(crate) struct ProbeEstimator {
    min_packets: usize,
    min_packet_size: DataSize,
    max_ratio: f64,
    history: Duration,

    /// Open clusters, oldest first.
    clusters: VecDeque<ProbeCluster>,
}

#[derive(Debug)]
struct ProbeCluster {
    id: ProbeClusterId,

    /// Arrival of the latest packet, used to expire the cluster.
    last_seen: Instant,

    first_send_time: Duration,
    last_send_time: Duration,
    /// Size of the packet with the last send time (excluded from the send rate).
    size_last_send: DataSize,

    first_recv_time: Instant,
    last_recv_time: Instant,
    /// Size of the packet with the first receive time (excluded from the receive rate).
    size_first_receive: DataSize,

    total_bytes: DataSize,
    packet_count: usize,
}

impl ProbeEstimator {
    pub(crate) fn new(config: &BweConfig) -> Self {
        Self {
            min_packets: config.min_probe_packets(),
            min_packet_size: config.min_probe_packet_size(),
            max_ratio: config.max_probe_ratio(),
            history: config.probe_cluster_history(),
            clusters: VecDeque::new(),
        }
    }

    /// Add a received packet. Returns a bitrate if the packet completed a valid estimate.
    pub(crate) fn update(&mut self, packet: &ReceivedPacket) -> Option<Bitrate> {
        let id = packet.probe_cluster?;

        if packet.size <= self.min_packet_size {
            trace!(%id, size = %packet.size, "Ignoring small probe packet");
            return None;
        }

        self.expire(packet.arrival_time);

        let position = self.clusters.iter().position(|c| c.id == id);
        let cluster = match position {
            Some(i) => &mut self.clusters[i],
            None => {
                let newest = self.clusters.back().map(|c| c.id);
                if newest.map(|n| *id < *n).unwrap_or(false) {
                    trace!(%id, "Ignoring packet for closed probe cluster");
                    return None;
                }

                // A newer cluster closes all older ones.
                for closed in self.clusters.drain(..) {
                    debug!(
                        id = %closed.id,
                        packets = closed.packet_count,
                        result = %closed.calculate(self.max_ratio),
                        "Probe cluster closed"
                    );
                }
                self.clusters.push_back(ProbeCluster::new(id, packet));

                return None;
            }
        };

        cluster.update(packet);

        if cluster.packet_count < self.min_packets {
            return None;
        }

        let result = cluster.calculate(self.max_ratio);
        let ProbeResult::Estimate(bitrate) = result else {
            trace!(%id, %result, "Probe result");
            return None;
        };

        debug!(%id, %result, "Probe result");
        log_probe_bitrate_estimate!(bitrate.as_f64());

        Some(bitrate)
    }

    /// Drop all open clusters.
    pub(crate) fn reset(&mut self) {
        self.clusters.clear();
    }

    fn expire(&mut self, now: Instant) {
        let history = self.history;
        self.clusters
            .retain(|c| now.saturating_duration_since(c.last_seen) <= history);
    }
}

impl ProbeCluster {
    fn new(id: ProbeClusterId, packet: &ReceivedPacket) -> Self {
        Self {
            id,
            last_seen: packet.arrival_time,
            first_send_time: packet.send_time,
            last_send_time: packet.send_time,
            size_last_send: packet.size,
            first_recv_time: packet.arrival_time,
            last_recv_time: packet.arrival_time,
            size_first_receive: packet.size,
            total_bytes: packet.size,
            packet_count: 1,
        }
    }

    fn update(&mut self, packet: &ReceivedPacket) {
        self.last_seen = self.last_seen.max(packet.arrival_time);

        self.first_send_time = self.first_send_time.min(packet.send_time);
        if packet.send_time >= self.last_send_time {
            self.last_send_time = packet.send_time;
            self.size_last_send = packet.size;
        }

        if packet.arrival_time < self.first_recv_time {
            self.first_recv_time = packet.arrival_time;
            self.size_first_receive = packet.size;
        }
        self.last_recv_time = self.last_recv_time.max(packet.arrival_time);

        self.total_bytes += packet.size;
        self.packet_count += 1;
    }

    fn calculate(&self, max_ratio: f64) -> ProbeResult {
        let send_interval = self.last_send_time.saturating_sub(self.first_send_time);
        let recv_interval = self
            .last_recv_time
            .saturating_duration_since(self.first_recv_time);

        if send_interval.is_zero() || send_interval > MAX_PROBE_INTERVAL {
            return ProbeResult::SendIntervalInvalid {
                interval: send_interval,
            };
        }
        if recv_interval.is_zero() || recv_interval > MAX_PROBE_INTERVAL {
            return ProbeResult::RecvIntervalInvalid {
                interval: recv_interval,
            };
        }

        // The last packet sent and the first packet received only mark where the intervals
        // end and start, they take no time within them.
        let send_size = self.total_bytes.saturating_sub(self.size_last_send);
        let recv_size = self.total_bytes.saturating_sub(self.size_first_receive);
        if send_size == DataSize::ZERO || recv_size == DataSize::ZERO {
            return ProbeResult::InvalidDataSize;
        }

        let send_rate = send_size / send_interval;
        let recv_rate = recv_size / recv_interval;

        let ratio = recv_rate.as_f64() / send_rate.as_f64();
        if ratio > max_ratio {
            return ProbeResult::InvalidSendReceiveRatio {
                ratio,
                limit: max_ratio,
            };
        }

        if recv_rate < send_rate * MIN_RATIO_FOR_UNSATURATED_LINK {
            trace!(%send_rate, %recv_rate, "Probe dispersed by a bottleneck");
        }

        ProbeResult::Estimate(send_rate.min(recv_rate))
    }
}

/// Result of a probe cluster estimation.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ProbeResult {
    /// Successfully estimated bitrate
    Estimate(Bitrate),
    /// Send interval zero or too long
    SendIntervalInvalid { interval: Duration },
    /// Receive interval zero or too long
    RecvIntervalInvalid { interval: Duration },
    /// recv_rate / send_rate too high
    InvalidSendReceiveRatio { ratio: f64, limit: f64 },
    /// Nothing left after excluding the interval edge packets
    InvalidDataSize,
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeResult::Estimate(bitrate) => write!(f, "estimate={}", bitrate),
            ProbeResult::SendIntervalInvalid { interval } => {
                write!(f, "send interval invalid ({:?})", interval)
            }
            ProbeResult::RecvIntervalInvalid { interval } => {
                write!(f, "recv interval invalid ({:?})", interval)
            }
            ProbeResult::InvalidSendReceiveRatio { ratio, limit } => {
                write!(f, "invalid receive/send ratio ({ratio:.3} > {limit:.3})")
            }
            ProbeResult::InvalidDataSize => write!(f, "invalid data size"),
        }
    }
}
