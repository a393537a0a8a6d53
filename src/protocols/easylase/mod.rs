//! EasyLase USB DAC protocol.
//!
//! The EasyLase is a double-buffered galvo DAC: it holds at most two frames
//! and plays them back at a fixed internal rate. The host asks whether a
//! buffer is free with a status request and then sends the next frame as a
//! single data command.

pub mod error;
mod link;
pub mod protocol;

pub use error::{Error, ErrorKind, Result};
pub use link::{DeviceLink, DeviceSession, ErrorCallback, ErrorInfo};
pub use protocol::{
    decode_show, encode_show, encode_ttl, DevicePoint, DeviceStatus, MAX_ENCODABLE_POINTS,
    POINT_SIZE_BYTES, STATUS_BUSY, STATUS_READY, TTL_OFF, TTL_ON,
};
