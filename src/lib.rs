//! Point-stream scheduler and wire protocol for EasyLase USB laser DACs.
//!
//! The EasyLase is a galvo DAC with two frame buffers and a fixed internal
//! output rate. This crate turns sequences of normalized points into
//! correctly sized, correctly timed device frames and keeps the device fed
//! from a dedicated scheduler thread.
//!
//! # Getting Started
//!
//! ```no_run
//! use easylase::{LogicalPoint, PointScheduler, SchedulerConfig};
//!
//! let scheduler = PointScheduler::open("/dev/easylase0", SchedulerConfig::default())?;
//! if scheduler.has_error() {
//!     eprintln!("cannot use laser: {}", scheduler.error_string());
//! }
//!
//! // A quarter-size circle, looped until replaced.
//! let circle: Vec<LogicalPoint> = (0..500)
//!     .map(|i| {
//!         let angle = i as f64 / 500.0 * std::f64::consts::TAU;
//!         LogicalPoint::new(angle.cos() / 4.0, angle.sin() / 4.0, 0, 45, 0)
//!     })
//!     .collect();
//!
//! scheduler.on()?;
//! scheduler.show(circle, true, 30_000)?;
//! # Ok::<(), easylase::Error>(())
//! ```
//!
//! # Playback Model
//!
//! The device always plays at full speed. Slower rates are produced by
//! emitting every point several times. Points are cut into frames of at most
//! [`SchedulerConfig::max_points`] points:
//!
//! - **One-shot** shows play once. A show issued while one-shot playback is
//!   running is appended without a gap, and the finished callback fires one
//!   frame before the end so a continuation can be supplied in time.
//! - **Repeating** shows loop until replaced. A single frame loops on the
//!   device itself; longer loops are fed frame by frame.
//!
//! # Coordinate System
//!
//! - X: -1.0 (left) to 1.0 (right)
//! - Y: -1.0 (bottom) to 1.0 (top)
//! - Colors: 0-255 for R, G and B; intensity is derived from the brightest
//!   channel
//!
//! # Transports
//!
//! - [`CharDevice`] - the EasyLase kernel driver's character device
//! - `transport::usb::UsbConnector` - user-space libusb access (feature: `usb`)

mod error;
pub mod protocols;
pub mod scheduler;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testutils;

// Crate-level error types
pub use error::{Error, Result};

// Device layer
pub use protocols::easylase::{DeviceLink, DevicePoint, DeviceSession, ErrorInfo, ErrorKind};

// Scheduler
pub use scheduler::PointScheduler;

// Transports
pub use transport::{CharDevice, Connector, Transport, DEFAULT_DEVICE_PATH};

// Core types
pub use types::{
    convert_axis, LogicalPoint, SchedulerConfig, SchedulerState, SchedulerStats,
    SchedulerStatus, DEFAULT_MAX_POINTS, DEVICE_MAX_RATE,
};

// Re-export rusb for consumers that need the Context type
#[cfg(feature = "usb")]
pub use transport::usb::rusb;
