use std::mem;
use std::time::{Duration, Instant};

use crate::time::TimeDelta;
use crate::DataSize;

use super::super::ReceivedPacket;

const BURST_TIME_INTERVAL: Duration = Duration::from_millis(5);
const MAX_BURST_DURATION: Duration = Duration::from_millis(100);
/// Arrival deltas exceeding send deltas by this much means the receiver clock jumped.
const ARRIVAL_TIME_OFFSET_THRESHOLD: Duration = Duration::from_secs(3);
/// Consecutive group boundaries with arrival time going backwards before we start over.
const REORDERED_RESET_THRESHOLD: usize = 3;

#[derive(Debug, Default)]
struct ArrivalGroup {
    first: Option<(Duration, Instant)>,
    last_send_time: Option<Duration>,
    last_arrival_time: Option<Instant>,
    size: DataSize,
    count: usize,
}

impl ArrivalGroup {
    /// Maybe add a packet to the group.
    ///
    /// Returns [`true`] if a new group needs to be created and [`false`] otherwise.
    fn add_packet(&mut self, packet: &ReceivedPacket, group_length: Duration) -> bool {
        match self.belongs_to_group(packet, group_length) {
            Belongs::NewGroup => return true,
            Belongs::Skipped => return false,
            Belongs::Yes => {}
        }

        if self.first.is_none() {
            self.first = Some((packet.send_time, packet.arrival_time));
        }

        self.last_arrival_time = self.last_arrival_time.max(Some(packet.arrival_time));
        self.last_send_time = self.last_send_time.max(Some(packet.send_time));
        self.size += packet.size;
        self.count += 1;

        false
    }

    fn belongs_to_group(&self, packet: &ReceivedPacket, group_length: Duration) -> Belongs {
        let (Some((first_send_time, first_arrival_time)), Some(send_time), Some(arrival_time)) =
            (self.first, self.last_send_time, self.last_arrival_time)
        else {
            // Start of the group
            return Belongs::Yes;
        };

        let Some(first_send_delta) = packet.send_time.checked_sub(first_send_time) else {
            // Sent before the group started, i.e. reordered.
            return Belongs::Skipped;
        };

        let send_time_delta = TimeDelta::between_offsets(packet.send_time, send_time);
        if send_time_delta == TimeDelta::ZERO {
            return Belongs::Yes;
        }
        let arrival_time_delta = TimeDelta::between(packet.arrival_time, arrival_time);

        let propagation_delta = arrival_time_delta - send_time_delta;
        if propagation_delta < TimeDelta::ZERO
            && !arrival_time_delta.is_negative()
            && arrival_time_delta <= BURST_TIME_INTERVAL
            && packet
                .arrival_time
                .saturating_duration_since(first_arrival_time)
                < MAX_BURST_DURATION
        {
            Belongs::Yes
        } else if first_send_delta > group_length {
            Belongs::NewGroup
        } else {
            Belongs::Yes
        }
    }

    fn is_empty(&self) -> bool {
        self.first.is_none()
    }
}

/// Whether a given packet belongs to a group or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Belongs {
    /// The packet belongs to the group.
    Yes,
    /// The packet does not belong to the group, a new group should be created.
    NewGroup,
    /// The packet was skipped and a decision wasn't made.
    Skipped,
}

/// Splits the packet stream into groups of packets sent in the same burst and yields the
/// delay variation between consecutive groups.
#[derive(Debug)]
pub(crate) struct ArrivalGroupAccumulator {
    group_length: Duration,
    previous_group: Option<ArrivalGroup>,
    current_group: ArrivalGroup,
    consecutive_reordered: usize,
}

impl ArrivalGroupAccumulator {
    pub(crate) fn new(group_length: Duration) -> Self {
        Self {
            group_length,
            previous_group: None,
            current_group: ArrivalGroup::default(),
            consecutive_reordered: 0,
        }
    }

    /// Accumulate a packet.
    ///
    /// If adding this packet closed a group, the delay delta between the closed group and the
    /// one before it is returned.
    pub(crate) fn accumulate_packet(
        &mut self,
        packet: &ReceivedPacket,
    ) -> Option<InterGroupDelayDelta> {
        let need_new_group = self.current_group.add_packet(packet, self.group_length);

        if !need_new_group {
            return None;
        }

        // Variation between previous group and current.
        let deltas = self.deltas();
        let closed_arrival_time = self.current_group.last_arrival_time;
        let closed_size = self.current_group.size;
        let closed_count = self.current_group.count;

        let current_group = mem::take(&mut self.current_group);
        self.previous_group = Some(current_group);

        self.current_group.add_packet(packet, self.group_length);

        let (send_delta, arrival_delta) = deltas?;
        let last_arrival_time = closed_arrival_time?;

        if arrival_delta - send_delta >= TimeDelta::from(ARRIVAL_TIME_OFFSET_THRESHOLD) {
            warn!(
                "Arrival time jumped {} relative to send time, resetting arrival groups",
                arrival_delta - send_delta
            );
            self.reset_with(packet);
            return None;
        }

        if arrival_delta.is_negative() {
            self.consecutive_reordered += 1;
            debug!(
                count = self.consecutive_reordered,
                "Arrival time went backwards between groups"
            );
            if self.consecutive_reordered >= REORDERED_RESET_THRESHOLD {
                self.reset_with(packet);
            }
            return None;
        }
        self.consecutive_reordered = 0;

        trace!(
            seq_no = packet.seq_no,
            %send_delta,
            %arrival_delta,
            size = %closed_size,
            count = closed_count,
            "Closed arrival group"
        );

        Some(InterGroupDelayDelta {
            send_delta,
            arrival_delta,
            size: closed_size,
            last_arrival_time,
        })
    }

    /// Discard all groups.
    pub(crate) fn reset(&mut self) {
        self.previous_group = None;
        self.current_group = ArrivalGroup::default();
        self.consecutive_reordered = 0;
    }

    fn reset_with(&mut self, packet: &ReceivedPacket) {
        self.reset();
        self.current_group.add_packet(packet, self.group_length);
    }

    fn deltas(&self) -> Option<(TimeDelta, TimeDelta)> {
        let prev = self.previous_group.as_ref()?;
        let current = &self.current_group;
        if prev.is_empty() || current.is_empty() {
            return None;
        }

        let send_delta = TimeDelta::between_offsets(current.last_send_time?, prev.last_send_time?);
        let arrival_delta = TimeDelta::between(current.last_arrival_time?, prev.last_arrival_time?);

        Some((send_delta, arrival_delta))
    }
}

/// The delay delta between two groups of packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InterGroupDelayDelta {
    /// The delta between the send times of the two groups i.e. delta between the last packet
    /// sent in each group.
    pub(crate) send_delta: TimeDelta,
    /// The delta between the arrival times of the two groups.
    pub(crate) arrival_delta: TimeDelta,
    /// Total payload of the later group.
    pub(crate) size: DataSize,
    /// The arrival time of the last packet in the later group.
    pub(crate) last_arrival_time: Instant,
}
