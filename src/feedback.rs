use std::fmt;
use std::ops::Deref;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::{AbsSendTime, DataSize};

/// Identifies a probe cluster, i.e. a burst of packets deliberately sent by the pacer to
/// measure achievable bitrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProbeClusterId(u32);

impl Deref for ProbeClusterId {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<u32> for ProbeClusterId {
    fn from(v: u32) -> Self {
        ProbeClusterId(v)
    }
}

impl fmt::Display for ProbeClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Send and arrival information about one received packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketFeedback {
    /// When the packet arrived, on the local monotonic clock.
    pub arrival_time: Instant,
    /// The abs-send-time the sender stamped on the packet.
    pub send_time: AbsSendTime,
    /// The transport wide sequence number.
    pub seq_no: u16,
    /// Payload size.
    pub payload_size: DataSize,
    /// The probe cluster the packet was sent in. `None` when not part of a probe.
    pub probe_cluster: Option<ProbeClusterId>,
}

impl PacketFeedback {
    /// Feedback for a packet that is not part of a probe.
    pub fn new(
        arrival_time: Instant,
        send_time: AbsSendTime,
        seq_no: u16,
        payload_size: DataSize,
    ) -> Self {
        PacketFeedback {
            arrival_time,
            send_time,
            seq_no,
            payload_size,
            probe_cluster: None,
        }
    }

    /// Mark the packet as part of a probe cluster.
    pub fn with_probe_cluster(mut self, cluster: impl Into<ProbeClusterId>) -> Self {
        self.probe_cluster = Some(cluster.into());
        self
    }
}
