//! Connection to an EasyLase DAC over a byte transport.

use std::fmt;
use std::io;

use log::{info, trace, warn};

use crate::protocols::easylase::error::{Error, ErrorKind, Result};
use crate::protocols::easylase::protocol::{
    encode_show, encode_ttl, DevicePoint, DeviceStatus, IDLE_COMMAND, MAX_ENCODABLE_POINTS,
    STATUS_REQUEST, TTL_OFF, TTL_ON,
};
use crate::transport::{Connector, Transport};

/// Callback invoked when the link latches an error.
pub type ErrorCallback = Box<dyn FnMut(&ErrorInfo) + Send + 'static>;

/// The latched error of a [`DeviceSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for ErrorInfo {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Connection state of a [`DeviceLink`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSession {
    /// Whether a transport is open.
    pub connected: bool,
    /// First error of the current failure episode. Cleared by `connect()`.
    pub last_error: Option<ErrorInfo>,
}

/// A connection to an EasyLase DAC.
///
/// The device double-buffers frames: every [`show`](Self::show) queues one
/// frame, and after two frames [`is_ready`](Self::is_ready) reports `false`
/// until the first one has played. [`idle`](Self::idle) may be sent at any
/// time; it clears both buffers and blanks the output.
///
/// # Errors
///
/// Any transport or protocol failure latches the session: the error is
/// stored, the transport is closed, the error callback runs and the failing
/// call returns the error. While latched, every operation is a silent no-op
/// and the stored error is kept until [`connect`](Self::connect) is called
/// again. Caller errors (oversized frames) are returned without latching.
pub struct DeviceLink {
    connector: Box<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    session: DeviceSession,
    max_points: usize,
    on_error: Option<ErrorCallback>,
}

impl DeviceLink {
    /// Creates a disconnected link that opens transports with `connector`.
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self {
            connector: Box::new(connector),
            transport: None,
            session: DeviceSession::default(),
            max_points: MAX_ENCODABLE_POINTS,
            on_error: None,
        }
    }

    /// Limits frames to `max_points` points (builder pattern).
    ///
    /// Default: the largest frame a data command can encode.
    pub fn with_max_points(mut self, max_points: usize) -> Self {
        self.max_points = max_points.min(MAX_ENCODABLE_POINTS);
        self
    }

    /// Registers the callback invoked whenever an error latches.
    pub fn set_error_callback<F>(&mut self, f: F)
    where
        F: FnMut(&ErrorInfo) + Send + 'static,
    {
        self.on_error = Some(Box::new(f));
    }

    /// Returns the session state.
    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    /// Whether an error is latched.
    pub fn has_error(&self) -> bool {
        self.session.last_error.is_some()
    }

    /// Whether a transport is open.
    pub fn is_connected(&self) -> bool {
        self.session.connected
    }

    /// Name of the device this link talks to.
    pub fn describe(&self) -> String {
        self.connector.describe()
    }

    /// Opens the transport, closing any previous one first.
    ///
    /// Clears a latched error before trying.
    pub fn connect(&mut self) -> Result<()> {
        if self.transport.is_some() {
            self.disconnect();
        }
        self.session.last_error = None;

        let target = self.connector.describe();
        match self.connector.connect() {
            Ok(transport) => {
                self.transport = Some(transport);
                self.session.connected = true;
                info!("connected to EasyLase device {}", target);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::ResourceBusy => {
                Err(self.fail(Error::Busy { target }))
            }
            Err(source) => Err(self.fail(Error::Open { target, source })),
        }
    }

    /// Closes the transport. Idempotent.
    pub fn disconnect(&mut self) {
        if self.transport.take().is_some() {
            info!("disconnected from EasyLase device {}", self.connector.describe());
        }
        self.session.connected = false;
    }

    /// Switches the laser output on or off.
    pub fn set_output(&mut self, on: bool) -> Result<()> {
        self.set_ttl(if on { TTL_ON } else { TTL_OFF })
    }

    /// Sets the TTL output pins.
    ///
    /// Bit 0 drives pin 10 and bit 7 drives pin 3, which differs from the
    /// assignment printed in the EasyLase manual.
    pub fn set_ttl(&mut self, level: u8) -> Result<()> {
        if self.has_error() {
            return Ok(());
        }
        trace!("laser ttl 0x{:02x}", level);
        self.send("laser ttl", &encode_ttl(level))
    }

    /// Clears both device buffers and blanks the output.
    pub fn idle(&mut self) -> Result<()> {
        if self.has_error() {
            return Ok(());
        }
        trace!("laser idle");
        self.send("laser idle", &IDLE_COMMAND)
    }

    /// Asks the device whether it can take another frame.
    ///
    /// Returns `Ok(false)` while an error is latched.
    pub fn is_ready(&mut self) -> Result<bool> {
        if self.has_error() {
            return Ok(false);
        }
        self.send("write status request", &STATUS_REQUEST)?;
        let byte = self.read_status_byte()?;
        match DeviceStatus::from_byte(byte) {
            Ok(status) => Ok(status == DeviceStatus::Ready),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Sends one frame to the device.
    ///
    /// The rate is passed through to the device unchanged.
    pub fn show(&mut self, rate: u16, points: &[DevicePoint]) -> Result<()> {
        if self.has_error() {
            return Ok(());
        }
        if points.len() > self.max_points {
            let err = Error::TooManyPoints {
                len: points.len(),
                max: self.max_points,
            };
            warn!("rejected frame: {}", err);
            return Err(err);
        }
        let packet = encode_show(rate, points)?;
        trace!(
            "sending {} points at rate {} ({} bytes)",
            points.len(),
            rate,
            packet.len()
        );
        self.send("laser data", &packet)
    }

    fn read_status_byte(&mut self) -> Result<u8> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(self.fail(Error::NotConnected {
                command: "read status",
            }));
        };
        let mut byte = [0u8; 1];
        match transport.read(&mut byte) {
            Ok(1) => Ok(byte[0]),
            Ok(_) => Err(self.fail(Error::StatusRead)),
            Err(source) => Err(self.fail(Error::Io {
                command: "read status",
                source,
            })),
        }
    }

    fn send(&mut self, command: &'static str, data: &[u8]) -> Result<()> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(self.fail(Error::NotConnected { command }));
        };
        match transport.write(data) {
            Ok(written) if written == data.len() => Ok(()),
            Ok(written) => Err(self.fail(Error::ShortWrite {
                command,
                written,
                expected: data.len(),
            })),
            Err(source) => Err(self.fail(Error::Io { command, source })),
        }
    }

    /// Latches `err`, tears down the connection and notifies the callback.
    fn fail(&mut self, err: Error) -> Error {
        if self.session.last_error.is_none() {
            let info = ErrorInfo::from(&err);
            warn!("error: {}", info);
            self.session.last_error = Some(info.clone());
            self.disconnect();
            if let Some(callback) = self.on_error.as_mut() {
                callback(&info);
            }
        }
        err
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::easylase::protocol::{decode_show, STATUS_BUSY, STATUS_READY};
    use crate::testutils::MockDevice;
    use std::sync::{Arc, Mutex};

    fn connected_link(device: &MockDevice) -> DeviceLink {
        let mut link = DeviceLink::new(device.connector()).with_max_points(8190);
        link.connect().unwrap();
        link
    }

    #[test]
    fn test_connect_records_session() {
        let device = MockDevice::new();
        let link = connected_link(&device);
        assert!(link.is_connected());
        assert!(!link.has_error());
        assert!(device.is_open());
    }

    #[test]
    fn test_connect_fails_when_owned_elsewhere() {
        let device = MockDevice::new();
        let _first = connected_link(&device);

        let mut second = DeviceLink::new(device.connector());
        let err = second.connect().unwrap_err();
        assert!(matches!(err, Error::Busy { .. }));
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(!second.is_connected());
        assert!(second.has_error());
    }

    #[test]
    fn test_connect_failure_latches_open_error() {
        let device = MockDevice::new();
        device.set_open_failure(true);
        let mut link = DeviceLink::new(device.connector());
        assert!(matches!(link.connect(), Err(Error::Open { .. })));
        let message = &link.session().last_error.as_ref().unwrap().message;
        assert!(message.starts_with("cannot connect to EasyLase device"));
    }

    #[test]
    fn test_reconnect_clears_error() {
        let device = MockDevice::new();
        let mut link = connected_link(&device);
        device.push_status(0x42);
        assert!(link.is_ready().is_err());
        assert!(link.has_error());

        link.connect().unwrap();
        assert!(!link.has_error());
        assert!(link.is_connected());
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let device = MockDevice::new();
        let mut link = connected_link(&device);
        link.disconnect();
        link.disconnect();
        assert!(!link.is_connected());
        assert!(!device.is_open());
        assert!(!link.has_error());
    }

    #[test]
    fn test_output_and_idle_bytes() {
        let device = MockDevice::new();
        let mut link = connected_link(&device);
        link.set_output(true).unwrap();
        link.set_output(false).unwrap();
        link.idle().unwrap();

        let writes = device.writes();
        assert_eq!(writes[0], encode_ttl(TTL_ON).to_vec());
        assert_eq!(writes[1], encode_ttl(TTL_OFF).to_vec());
        assert_eq!(writes[2], IDLE_COMMAND.to_vec());
    }

    #[test]
    fn test_is_ready_reads_status_byte() {
        let device = MockDevice::new();
        let mut link = connected_link(&device);
        device.push_status(STATUS_BUSY);
        device.push_status(STATUS_READY);

        assert!(!link.is_ready().unwrap());
        assert!(link.is_ready().unwrap());
        assert_eq!(device.status_requests(), 2);
        assert!(!link.has_error());
    }

    #[test]
    fn test_unexpected_status_latches_protocol_error() {
        let device = MockDevice::new();
        let mut link = connected_link(&device);
        device.push_status(0x00);

        let err = link.is_ready().unwrap_err();
        assert!(matches!(err, Error::UnexpectedStatus(0x00)));
        let info = link.session().last_error.clone().unwrap();
        assert_eq!(info.kind, ErrorKind::Protocol);
        assert!(!link.is_connected());
    }

    #[test]
    fn test_failed_status_read_latches() {
        let device = MockDevice::new();
        let mut link = connected_link(&device);
        device.fail_reads(true);
        assert!(matches!(link.is_ready(), Err(Error::Io { .. })));
        assert!(link.has_error());
    }

    #[test]
    fn test_show_encodes_frame() {
        let device = MockDevice::new();
        let mut link = connected_link(&device);
        let points = vec![DevicePoint::new(1, 2, 3, 4, 5, 6), DevicePoint::default()];
        link.show(0xffff, &points).unwrap();

        let frames = device.frames();
        assert_eq!(frames, vec![(0xffff, points)]);
    }

    #[test]
    fn test_show_rejects_oversized_frame_without_latching() {
        let device = MockDevice::new();
        let mut link = connected_link(&device);
        let points = vec![DevicePoint::default(); 8191];

        let err = link.show(0xffff, &points).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Caller);
        assert!(!link.has_error());
        assert!(link.is_connected());
        assert!(device.writes().is_empty());
    }

    #[test]
    fn test_short_write_latches_once_and_notifies() {
        let device = MockDevice::new();
        let mut link = connected_link(&device);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        link.set_error_callback(move |info| seen_cb.lock().unwrap().push(info.clone()));

        device.short_write_frame(1);
        let err = link.show(0xffff, &[DevicePoint::default(); 4]).unwrap_err();
        assert!(matches!(err, Error::ShortWrite { .. }));
        assert!(!link.is_connected());

        // Latched: everything is a no-op and the first error is kept.
        link.set_output(true).unwrap();
        link.idle().unwrap();
        assert!(!link.is_ready().unwrap());
        link.show(0xffff, &[DevicePoint::default()]).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].message.starts_with("laser data: short write"));
        assert_eq!(link.session().last_error.as_ref(), Some(&seen[0]));
        assert_eq!(device.writes().len(), 1);
    }

    #[test]
    fn test_commands_without_connect_latch_not_connected() {
        let device = MockDevice::new();
        let mut link = DeviceLink::new(device.connector());
        let err = link.idle().unwrap_err();
        assert!(matches!(err, Error::NotConnected { .. }));
        assert!(link.has_error());
    }

    #[test]
    fn test_round_trip_through_wire() {
        let device = MockDevice::new();
        let mut link = connected_link(&device);
        let points: Vec<DevicePoint> = (0..300u16)
            .map(|i| DevicePoint::new(i * 13, 4095 - i * 13, i as u8, 0, 255, 128))
            .collect();
        link.show(1234, &points).unwrap();

        let raw = device.writes().pop().unwrap();
        let (rate, decoded) = decode_show(&raw).unwrap();
        assert_eq!(rate, 1234);
        assert_eq!(decoded, points);
    }
}
