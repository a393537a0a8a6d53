//! Producer-facing types and scheduler configuration.
//!
//! Points are submitted in normalized coordinates and converted to the
//! device's 12-bit space by [`convert_axis`].

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocols::easylase::{DevicePoint, ErrorInfo, MAX_ENCODABLE_POINTS};

/// Measured output rate of the device when driven at full speed (points/s).
pub const DEVICE_MAX_RATE: u16 = 59_899;

/// Rate parameter written into every data command.
pub const DEVICE_RATE: u16 = u16::MAX;

/// Default number of points per frame.
pub const DEFAULT_MAX_POINTS: usize = 8190;

/// Default re-arm delay of the ready-polling loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Largest value on either device axis.
pub const AXIS_MAX: u16 = 4095;

/// A device-agnostic laser point.
///
/// Coordinates are normalized:
/// - x: -1.0 (left) to 1.0 (right)
/// - y: -1.0 (bottom) to 1.0 (top)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LogicalPoint {
    /// X coordinate, -1.0 to 1.0
    pub x: f64,
    /// Y coordinate, -1.0 to 1.0
    pub y: f64,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl LogicalPoint {
    /// Creates a new point.
    pub fn new(x: f64, y: f64, r: u8, g: u8, b: u8) -> Self {
        Self { x, y, r, g, b }
    }

    /// Creates a blanked point (laser off) at the given position.
    pub fn blanked(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            ..Default::default()
        }
    }
}

/// Maps a normalized coordinate to the device axis.
///
/// `clamp(round((v + 1.0) * 2047.5), 0, 4095)`. NaN is treated as 0.0.
pub fn convert_axis(v: f64) -> u16 {
    let v = if v.is_nan() { 0.0 } else { v };
    ((v + 1.0) * 2047.5).round().clamp(0.0, f64::from(AXIS_MAX)) as u16
}

impl From<&LogicalPoint> for DevicePoint {
    fn from(p: &LogicalPoint) -> Self {
        DevicePoint {
            x: convert_axis(p.x),
            y: convert_axis(p.y),
            r: p.r,
            g: p.g,
            b: p.b,
            intensity: p.r.max(p.g).max(p.b),
        }
    }
}

/// Playback state of a [`PointScheduler`](crate::PointScheduler).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SchedulerState {
    /// Queue empty, device idled.
    #[default]
    Idle,
    /// Frames are consumed once, in order.
    ActiveOneShot,
    /// Frames are consumed as a ring.
    ActiveRepeating,
}

impl SchedulerState {
    /// Whether the scheduler is playing anything.
    pub fn is_active(self) -> bool {
        self != SchedulerState::Idle
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::ActiveOneShot => "one-shot",
            SchedulerState::ActiveRepeating => "repeating",
        };
        f.write_str(name)
    }
}

/// Scheduler configuration.
///
/// The defaults match the 8190-point hardware revision. Other revisions
/// differ in `max_points`; validate against the device in use.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SchedulerConfig {
    /// Maximum number of points in one frame (default: 8190).
    pub max_points: usize,

    /// Real output rate of the device at full speed (default: 59899).
    ///
    /// Replication factors are computed against this rate.
    pub device_max_rate: u16,

    /// Rate parameter sent with every frame (default: 65535).
    pub device_rate: u16,

    /// Delay before the next readiness check when the device is busy (default: 2ms).
    #[cfg_attr(feature = "serde", serde(with = "duration_millis"))]
    pub poll_interval: Duration,
}

#[cfg(feature = "serde")]
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis().min(u64::MAX as u128) as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_points: DEFAULT_MAX_POINTS,
            device_max_rate: DEVICE_MAX_RATE,
            device_rate: DEVICE_RATE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl SchedulerConfig {
    /// Create a configuration for a device with the given frame size.
    pub fn new(max_points: usize) -> Self {
        Self {
            max_points,
            ..Default::default()
        }
    }

    /// Set the measured full-speed output rate (builder pattern).
    pub fn with_device_max_rate(mut self, rate: u16) -> Self {
        self.device_max_rate = rate;
        self
    }

    /// Set the rate parameter sent with every frame (builder pattern).
    pub fn with_device_rate(mut self, rate: u16) -> Self {
        self.device_rate = rate;
        self
    }

    /// Set the polling interval (builder pattern).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Checks that the configuration can be expressed on the wire.
    pub fn validate(&self) -> Result<()> {
        if self.max_points == 0 {
            return Err(Error::invalid_config("max_points must be at least 1"));
        }
        if self.max_points > MAX_ENCODABLE_POINTS {
            return Err(Error::invalid_config(format!(
                "max_points {} exceeds the {} points a data command can carry",
                self.max_points, MAX_ENCODABLE_POINTS
            )));
        }
        if self.device_max_rate == 0 || self.device_rate == 0 {
            return Err(Error::invalid_config("device rates must be non-zero"));
        }
        Ok(())
    }

    /// Number of times each point is emitted to play at `rate`.
    ///
    /// `max(1, round(device_max_rate / rate))`. `rate` must be non-zero.
    pub fn replication(&self, rate: u16) -> usize {
        let factor = (f64::from(self.device_max_rate) / f64::from(rate)).round() as usize;
        factor.max(1)
    }

    /// How long one full frame plays on the device.
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(self.max_points as f64 / f64::from(self.device_max_rate))
    }
}

/// Counters kept by the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Frames handed to the device, sentinels included.
    pub frames_sent: u64,
    /// Points handed to the device.
    pub points_sent: u64,
    /// Readiness checks answered with "busy".
    pub busy_polls: u64,
    /// One-shot continuations that arrived after playback had ended.
    pub missed_deadlines: u64,
}

/// Snapshot of the scheduler, returned by
/// [`PointScheduler::status`](crate::PointScheduler::status).
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    /// Frames waiting in the queue (a pending sentinel counts).
    pub queued_frames: usize,
    /// Points waiting in the queue.
    pub queued_points: usize,
    /// Whether the device link holds an open transport.
    pub connected: bool,
    /// Whether the ready-polling loop is running.
    pub polling: bool,
    /// The latched device error, if any.
    pub error: Option<ErrorInfo>,
    pub stats: SchedulerStats,
}
