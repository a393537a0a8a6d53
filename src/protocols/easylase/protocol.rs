//! Wire format of the EasyLase USB command set.
//!
//! The device understands four fixed commands. All multi-byte fields are
//! little-endian and the framing must match the firmware byte for byte:
//!
//! | Command        | Bytes                                                   |
//! |----------------|---------------------------------------------------------|
//! | status request | `a9 a9 a9 a9 a9 a9`                                     |
//! | TTL / output   | `a6 a6 a6 a6 a6 a6 00 01` + level (u16 LE)              |
//! | idle / clear   | `a5 a5 a5 a5 a5 a5 00 01 02 00 00 00`                   |
//! | data / show    | `a5 a5 a5 a5 a5 a5 00 01` + rate (u16 LE) + length (u16 LE) + points |

use std::io::Cursor;

use byteorder::{ReadBytesExt, LE};

use crate::protocols::easylase::error::{Error, Result};

/// Status request. The device answers with a single status byte.
pub const STATUS_REQUEST: [u8; 6] = [0xa9, 0xa9, 0xa9, 0xa9, 0xa9, 0xa9];

/// Marker preceding the TTL output level.
pub const TTL_MARKER: [u8; 8] = [0xa6, 0xa6, 0xa6, 0xa6, 0xa6, 0xa6, 0x00, 0x01];

/// Clears both device buffers and blanks the output.
pub const IDLE_COMMAND: [u8; 12] = [
    0xa5, 0xa5, 0xa5, 0xa5, 0xa5, 0xa5, 0x00, 0x01, 0x02, 0x00, 0x00, 0x00,
];

/// Marker preceding rate, byte length and point data.
pub const DATA_MARKER: [u8; 8] = [0xa5, 0xa5, 0xa5, 0xa5, 0xa5, 0xa5, 0x00, 0x01];

/// Status byte: the device can accept another frame.
pub const STATUS_READY: u8 = 0x33;

/// Status byte: both device buffers are occupied.
pub const STATUS_BUSY: u8 = 0xcc;

/// Size of one encoded [`DevicePoint`].
pub const POINT_SIZE_BYTES: usize = 8;

/// Length of a TTL command on the wire.
pub const TTL_COMMAND_LEN: usize = TTL_MARKER.len() + 2;

/// Length of the data command header (marker, rate and byte length).
pub const DATA_HEADER_LEN: usize = DATA_MARKER.len() + 4;

/// Largest number of points whose byte length still fits the u16 length field.
pub const MAX_ENCODABLE_POINTS: usize = u16::MAX as usize / POINT_SIZE_BYTES;

/// TTL level that switches the laser output on.
pub const TTL_ON: u8 = 0x03;

/// TTL level that switches the laser output off.
pub const TTL_OFF: u8 = 0x00;

/// A point in device coordinates.
///
/// Coordinates are 12-bit (0-4095), colours and intensity 8-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePoint {
    pub x: u16,
    pub y: u16,
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub intensity: u8,
}

impl Default for DevicePoint {
    /// Centred and blanked.
    fn default() -> Self {
        Self::blanked(2047, 2047)
    }
}

impl DevicePoint {
    /// Creates a new device point.
    pub fn new(x: u16, y: u16, r: u8, g: u8, b: u8, intensity: u8) -> Self {
        Self {
            x,
            y,
            r,
            g,
            b,
            intensity,
        }
    }

    /// Creates a blanked point (laser off) at the given position.
    pub fn blanked(x: u16, y: u16) -> Self {
        Self {
            x,
            y,
            r: 0,
            g: 0,
            b: 0,
            intensity: 0,
        }
    }

    /// Same position, laser off.
    pub fn to_blanked(self) -> Self {
        Self::blanked(self.x, self.y)
    }

    /// Encodes the point in wire order.
    pub fn to_bytes(self) -> [u8; POINT_SIZE_BYTES] {
        let x = self.x.to_le_bytes();
        let y = self.y.to_le_bytes();
        [x[0], x[1], y[0], y[1], self.r, self.g, self.b, self.intensity]
    }

    /// Decodes a point from its wire representation.
    pub fn from_bytes(bytes: [u8; POINT_SIZE_BYTES]) -> Self {
        Self {
            x: u16::from_le_bytes([bytes[0], bytes[1]]),
            y: u16::from_le_bytes([bytes[2], bytes[3]]),
            r: bytes[4],
            g: bytes[5],
            b: bytes[6],
            intensity: bytes[7],
        }
    }
}

/// Device readiness as reported by a status request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Device is ready to receive a frame.
    Ready,
    /// Two frames are buffered; the device cannot take another one.
    Busy,
}

impl DeviceStatus {
    /// Interprets a status byte.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            STATUS_READY => Ok(DeviceStatus::Ready),
            STATUS_BUSY => Ok(DeviceStatus::Busy),
            other => Err(Error::UnexpectedStatus(other)),
        }
    }
}

/// Encodes a TTL command.
///
/// The level travels in a 16-bit little-endian field, so the level byte is
/// followed by a zero byte.
pub fn encode_ttl(level: u8) -> [u8; TTL_COMMAND_LEN] {
    let mut packet = [0u8; TTL_COMMAND_LEN];
    packet[..TTL_MARKER.len()].copy_from_slice(&TTL_MARKER);
    packet[TTL_MARKER.len()..].copy_from_slice(&u16::from(level).to_le_bytes());
    packet
}

/// Encodes a data command carrying `points` at `rate`.
///
/// Fails with [`Error::TooManyPoints`] when the encoded byte length does
/// not fit the u16 length field.
pub fn encode_show(rate: u16, points: &[DevicePoint]) -> Result<Vec<u8>> {
    let byte_len = points
        .len()
        .checked_mul(POINT_SIZE_BYTES)
        .and_then(|len| u16::try_from(len).ok())
        .ok_or(Error::TooManyPoints {
            len: points.len(),
            max: MAX_ENCODABLE_POINTS,
        })?;

    let mut packet = Vec::with_capacity(DATA_HEADER_LEN + byte_len as usize);
    packet.extend_from_slice(&DATA_MARKER);
    packet.extend_from_slice(&rate.to_le_bytes());
    packet.extend_from_slice(&byte_len.to_le_bytes());
    for point in points {
        packet.extend_from_slice(&point.to_bytes());
    }
    Ok(packet)
}

/// Decodes a data command produced by [`encode_show`].
///
/// Returns the rate and points, or `None` if `bytes` is not a well-formed
/// data command.
pub fn decode_show(bytes: &[u8]) -> Option<(u16, Vec<DevicePoint>)> {
    // The idle command shares the data marker; its length field would be 2.
    if !bytes.starts_with(&DATA_MARKER) || bytes == IDLE_COMMAND {
        return None;
    }

    let mut cursor = Cursor::new(bytes);
    cursor.set_position(DATA_MARKER.len() as u64);
    let rate = cursor.read_u16::<LE>().ok()?;
    let byte_len = cursor.read_u16::<LE>().ok()? as usize;
    if bytes.len() - DATA_HEADER_LEN != byte_len || byte_len % POINT_SIZE_BYTES != 0 {
        return None;
    }

    let mut points = Vec::with_capacity(byte_len / POINT_SIZE_BYTES);
    for _ in 0..byte_len / POINT_SIZE_BYTES {
        points.push(DevicePoint {
            x: cursor.read_u16::<LE>().ok()?,
            y: cursor.read_u16::<LE>().ok()?,
            r: cursor.read_u8().ok()?,
            g: cursor.read_u8().ok()?,
            b: cursor.read_u8().ok()?,
            intensity: cursor.read_u8().ok()?,
        });
    }
    Some((rate, points))
}
