//! Byte-channel transports for the EasyLase DAC.
//!
//! The device link only needs an exclusive, full-duplex byte channel:
//! blocking writes that report how many bytes went out, and blocking reads
//! that return at least one byte or fail. [`Connector`] opens such a channel
//! and [`Transport`] is the open channel itself.
//!
//! Two implementations ship with the crate:
//!
//! - [`CharDevice`] - the character device exposed by the EasyLase kernel
//!   driver (default `/dev/easylase0`).
//! - `usb::UsbConnector` - a user-space libusb transport that talks to the
//!   USB interface directly (feature: `usb`).

mod char_device;
#[cfg(feature = "usb")]
pub mod usb;

pub use char_device::{CharDevice, DEFAULT_DEVICE_PATH};

use std::io;

/// An open, exclusively owned byte channel to the device.
pub trait Transport: Send {
    /// Writes `data`, returning the number of bytes actually written.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Reads into `buf`, blocking until at least one byte is available.
    ///
    /// Returns the number of bytes read. `Ok(0)` means the channel closed.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Opens [`Transport`]s to one particular device.
pub trait Connector: Send {
    /// Opens the device exclusively.
    ///
    /// Fails with [`io::ErrorKind::ResourceBusy`] when the device is already
    /// owned by another session.
    fn connect(&mut self) -> io::Result<Box<dyn Transport>>;

    /// Human-readable name of the device, used in logs and errors.
    fn describe(&self) -> String;
}
