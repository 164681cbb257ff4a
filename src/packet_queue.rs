//! Sensor packet hand-off between producer threads and the fusion tick
//!
//! Inertial packets come from one polling thread per device and optical packets from
//! the triangulation step (later, from per-camera threads). Both travel over
//! multi-producer channels; the fusion tick is the single consumer and always sees
//! packets in non-decreasing timestamp order.

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use nalgebra::{UnitQuaternion, Vector3};
use tracing::{debug, warn};

use crate::device::{DeviceState, DeviceType, SensorReading};
use crate::types::MulticamPoseEstimate;

/// Shortest time step a filter update will see (2500 Hz)
pub const MIN_TIME_DELTA_SECONDS: f32 = 1.0 / 2500.0;
/// Longest time step a filter update will see (30 Hz)
pub const MAX_TIME_DELTA_SECONDS: f32 = 1.0 / 30.0;
/// Default per-tick packet ceiling
pub const DEFAULT_MAX_PACKETS_PER_TICK: usize = 100;

/// Handle a camera-processing thread uses to post optical packets
pub type OpticalPacketSender = Sender<OpticalPacket>;

/// Inertial sample set from one hardware frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuPacket {
    pub timestamp: Instant,
    pub accelerometer: Option<SensorReading>,
    pub gyroscope: Option<SensorReading>,
    pub magnetometer: Option<SensorReading>,
}

impl ImuPacket {
    /// Packet carrying no readings, used to keep sensorless filters ticking
    pub fn empty(timestamp: Instant) -> Self {
        Self { timestamp, accelerometer: None, gyroscope: None, magnetometer: None }
    }
}

/// World-space optical observation produced by triangulation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpticalPacket {
    pub timestamp: Instant,
    pub position_cm: Vector3<f32>,
    pub orientation: Option<UnitQuaternion<f32>>,
    /// Projection area in px², zero when the observation should carry no weight
    pub projection_area: f32,
}

impl OpticalPacket {
    /// Shape a multicam estimate into the packet the device's filter expects.
    ///
    /// Only light-bar devices forward an optical orientation, and they report zero
    /// confidence below `min_screen_projection_area`.
    pub fn from_multicam(
        device_type: DeviceType,
        estimate: &MulticamPoseEstimate,
        min_screen_projection_area: f32,
        timestamp: Instant,
    ) -> Self {
        let mut packet = Self {
            timestamp,
            position_cm: estimate.position_cm,
            orientation: None,
            projection_area: estimate.screen_area,
        };

        if device_type == DeviceType::Gamepad {
            if estimate.orientation_valid {
                packet.orientation = Some(estimate.orientation);
            }
            if estimate.screen_area < min_screen_projection_area {
                packet.projection_area = 0.0;
            }
        }
        packet
    }
}

/// Either kind of packet, as fed to the filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorPacket {
    Imu(ImuPacket),
    Optical(OpticalPacket),
}

impl SensorPacket {
    pub fn timestamp(&self) -> Instant {
        match self {
            SensorPacket::Imu(packet) => packet.timestamp,
            SensorPacket::Optical(packet) => packet.timestamp,
        }
    }
}

/// Result of draining both queues for one tick
#[derive(Debug, Default)]
pub struct DrainedPackets {
    /// Packets to process, oldest first
    pub packets: Vec<SensorPacket>,
    /// Oldest packets discarded to respect the ceiling
    pub trimmed: usize,
}

/// Time step for a filter update, clamped into
/// `[MIN_TIME_DELTA_SECONDS, MAX_TIME_DELTA_SECONDS]`.
///
/// The very first packet has no predecessor and uses the longest step.
///
/// # Example
/// ```
/// use std::time::{Duration, Instant};
/// use controller_fusion::packet_queue::{clamp_time_delta, MAX_TIME_DELTA_SECONDS};
///
/// let now = Instant::now();
/// assert_eq!(clamp_time_delta(None, now), MAX_TIME_DELTA_SECONDS);
/// let dt = clamp_time_delta(Some(now), now + Duration::from_millis(10));
/// assert!((dt - 0.01).abs() < 1e-6);
/// ```
pub fn clamp_time_delta(previous: Option<Instant>, current: Instant) -> f32 {
    match previous {
        Some(previous) => current
            .saturating_duration_since(previous)
            .as_secs_f32()
            .clamp(MIN_TIME_DELTA_SECONDS, MAX_TIME_DELTA_SECONDS),
        None => MAX_TIME_DELTA_SECONDS,
    }
}

/// Per-controller inertial and optical packet queues
#[derive(Debug)]
pub struct SensorPacketQueue {
    imu_sender: Sender<ImuPacket>,
    imu_receiver: Receiver<ImuPacket>,
    optical_sender: Sender<OpticalPacket>,
    optical_receiver: Receiver<OpticalPacket>,
}

impl SensorPacketQueue {
    pub fn new() -> Self {
        let (imu_sender, imu_receiver) = unbounded();
        let (optical_sender, optical_receiver) = unbounded();
        Self { imu_sender, imu_receiver, optical_sender, optical_receiver }
    }

    /// Handle for an inertial producer thread
    pub fn imu_sender(&self) -> Sender<ImuPacket> {
        self.imu_sender.clone()
    }

    /// Handle for an optical producer
    pub fn optical_sender(&self) -> OpticalPacketSender {
        self.optical_sender.clone()
    }

    /// Packets waiting in both queues
    pub fn len(&self) -> usize {
        self.imu_receiver.len() + self.optical_receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take everything queued, merge by timestamp and keep at most
    /// `max_packets` of the newest.
    ///
    /// Logs one warning per call when packets had to be discarded.
    pub fn drain(&self, max_packets: usize) -> DrainedPackets {
        let mut packets: Vec<SensorPacket> = self
            .imu_receiver
            .try_iter()
            .map(SensorPacket::Imu)
            .chain(self.optical_receiver.try_iter().map(SensorPacket::Optical))
            .collect();

        // stable, so an inertial packet stays ahead of an optical one with the same stamp
        packets.sort_by_key(SensorPacket::timestamp);

        let max_packets = max_packets.max(1);
        let mut trimmed = 0;
        if packets.len() > max_packets {
            trimmed = packets.len() - max_packets;
            let span = match (packets.first(), packets.last()) {
                (Some(first), Some(last)) => last.timestamp().saturating_duration_since(first.timestamp()),
                _ => Duration::ZERO,
            };
            warn!(
                incoming = packets.len(),
                span_ms = span.as_secs_f32() * 1000.0,
                trimmed,
                "sensor packet backlog over the per-tick ceiling, discarding oldest"
            );
            packets.drain(..trimmed);
        }

        DrainedPackets { packets, trimmed }
    }

    /// Drop everything queued; returns how many packets were discarded
    pub fn discard_pending(&self) -> usize {
        let discarded = self.imu_receiver.try_iter().count() + self.optical_receiver.try_iter().count();
        if discarded > 0 {
            debug!(discarded, "discarded queued sensor packets");
        }
        discarded
    }
}

impl Default for SensorPacketQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Turns device polls into inertial packets.
///
/// Owned by a device's polling thread. A poll may carry several hardware-buffered
/// frames; they are spread evenly between the previous poll and this one. The
/// buffered frames of the very first poll have no reference time and are dropped.
#[derive(Debug, Clone)]
pub struct SensorPacketProducer {
    sender: Sender<ImuPacket>,
    last_poll_timestamp: Option<Instant>,
}

impl SensorPacketProducer {
    pub fn new(sender: Sender<ImuPacket>) -> Self {
        Self { sender, last_poll_timestamp: None }
    }

    /// Queue the packets for one poll; returns how many were sent
    pub fn post(&mut self, state: &DeviceState, now: Instant) -> usize {
        let previous = self.last_poll_timestamp.replace(now);
        let mut packets = Vec::with_capacity(state.frames.len().max(1));

        if state.device_type == DeviceType::Virtual || state.frames.is_empty() {
            packets.push(ImuPacket::empty(now));
        } else {
            let frame_count = state.frames.len();
            let span = previous.map(|p| now.saturating_duration_since(p));
            for (index, frame) in state.frames.iter().enumerate() {
                let remaining = frame_count - 1 - index;
                let timestamp = match span {
                    None if remaining > 0 => continue,
                    None => now,
                    Some(span) => now - span * remaining as u32 / frame_count as u32,
                };
                packets.push(ImuPacket {
                    timestamp,
                    accelerometer: frame.accelerometer,
                    gyroscope: frame.gyroscope,
                    magnetometer: state.magnetometer,
                });
            }
        }

        let mut sent = 0;
        for packet in packets {
            if self.sender.send(packet).is_err() {
                debug!("sensor packet queue closed, dropping packet");
                break;
            }
            sent += 1;
        }
        sent
    }
}
