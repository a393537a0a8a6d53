//! User-space USB transport for the EasyLase DAC.
//!
//! The EasyLase USB interface is an FTDI bridge. This transport replaces the
//! kernel driver: it claims the interface through libusb, resets the bridge
//! on open, retries bulk writes that time out and strips the two-byte modem
//! status header the bridge puts in front of every IN packet.

use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

pub use rusb;

use rusb::{Context, DeviceHandle, Direction, TransferType, UsbContext};

use crate::transport::{Connector, Transport};

/// FTDI vendor id used by the EasyLase USB interface.
pub const EASYLASE_VENDOR_ID: u16 = 0x0403;

/// Product id of the EasyLase USB interface.
pub const EASYLASE_PRODUCT_ID: u16 = 0xdbd0;

const INTERFACE: u8 = 0;

/// Vendor request that resets the FTDI bridge.
const RESET_REQUEST_TYPE: u8 = 0x40;
const RESET_REQUEST: u8 = 0;

/// Bytes of modem status at the start of every IN packet.
const STATUS_HEADER_LEN: usize = 2;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const READ_POLL_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_WRITE_RETRY: u32 = 5;

/// Opens the first EasyLase USB interface found on the bus.
pub struct UsbConnector {
    context: Context,
    vendor_id: u16,
    product_id: u16,
    read_timeout: Duration,
}

impl UsbConnector {
    /// Creates a connector for the standard EasyLase vendor/product ids.
    pub fn new() -> rusb::Result<Self> {
        Ok(Self {
            context: Context::new()?,
            vendor_id: EASYLASE_VENDOR_ID,
            product_id: EASYLASE_PRODUCT_ID,
            read_timeout: Duration::from_secs(1),
        })
    }

    /// Overrides the USB ids to look for (builder pattern).
    pub fn with_ids(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self.product_id = product_id;
        self
    }

    /// How long a read may wait for a payload byte (builder pattern).
    ///
    /// Default: 1 second.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    fn find_device(&self) -> rusb::Result<rusb::Device<Context>> {
        for device in self.context.devices()?.iter() {
            let Ok(descriptor) = device.device_descriptor() else {
                continue;
            };
            if descriptor.vendor_id() == self.vendor_id
                && descriptor.product_id() == self.product_id
            {
                return Ok(device);
            }
        }
        Err(rusb::Error::NoDevice)
    }
}

impl Connector for UsbConnector {
    fn connect(&mut self) -> io::Result<Box<dyn Transport>> {
        let device = self.find_device().map_err(to_io)?;
        let endpoints = find_bulk_endpoints(&device).map_err(to_io)?;
        let mut handle = device.open().map_err(to_io)?;

        // Not supported on every platform.
        let _ = handle.set_auto_detach_kernel_driver(true);
        handle.claim_interface(INTERFACE).map_err(to_io)?;

        if let Err(e) = handle.write_control(
            RESET_REQUEST_TYPE,
            RESET_REQUEST,
            0,
            0,
            &[],
            CONTROL_TIMEOUT,
        ) {
            log::debug!("EasyLase USB: bridge reset failed: {}", e);
        }

        log::debug!(
            "EasyLase USB: opened {:04x}:{:04x} (in 0x{:02x}, out 0x{:02x}, packet {})",
            self.vendor_id,
            self.product_id,
            endpoints.input,
            endpoints.output,
            endpoints.packet_size
        );

        Ok(Box::new(UsbTransport {
            handle,
            endpoints,
            pending: VecDeque::new(),
            read_timeout: self.read_timeout,
        }))
    }

    fn describe(&self) -> String {
        format!("usb:{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

#[derive(Debug, Clone, Copy)]
struct BulkEndpoints {
    input: u8,
    output: u8,
    packet_size: usize,
}

fn find_bulk_endpoints(device: &rusb::Device<Context>) -> rusb::Result<BulkEndpoints> {
    let config = device.active_config_descriptor()?;
    let mut input = None;
    let mut output = None;
    let mut packet_size = 64;

    for interface in config.interfaces() {
        for descriptor in interface.descriptors() {
            if descriptor.interface_number() != INTERFACE {
                continue;
            }
            for endpoint in descriptor.endpoint_descriptors() {
                if endpoint.transfer_type() != TransferType::Bulk {
                    continue;
                }
                match endpoint.direction() {
                    Direction::In => {
                        input = Some(endpoint.address());
                        packet_size = endpoint.max_packet_size() as usize;
                    }
                    Direction::Out => output = Some(endpoint.address()),
                }
            }
        }
    }

    match (input, output) {
        (Some(input), Some(output)) => Ok(BulkEndpoints {
            input,
            output,
            packet_size: packet_size.max(STATUS_HEADER_LEN + 1),
        }),
        _ => Err(rusb::Error::NotFound),
    }
}

struct UsbTransport {
    handle: DeviceHandle<Context>,
    endpoints: BulkEndpoints,
    /// Payload bytes received but not yet handed out.
    pending: VecDeque<u8>,
    read_timeout: Duration,
}

impl UsbTransport {
    /// Moves the payload of a raw bulk transfer into `pending`.
    fn absorb(&mut self, raw: &[u8]) {
        for packet in raw.chunks(self.endpoints.packet_size) {
            if packet.len() <= STATUS_HEADER_LEN {
                continue;
            }
            self.pending.extend(&packet[STATUS_HEADER_LEN..]);
        }
    }
}

impl Transport for UsbTransport {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut written = 0;
        let mut retries = MAX_WRITE_RETRY;
        while written < data.len() {
            match self
                .handle
                .write_bulk(self.endpoints.output, &data[written..], WRITE_TIMEOUT)
            {
                Ok(0) => break,
                Ok(count) => {
                    written += count;
                    retries = MAX_WRITE_RETRY;
                }
                Err(rusb::Error::Timeout) if retries > 0 => {
                    retries -= 1;
                    log::debug!("EasyLase USB: write timed out, {} retries left", retries);
                }
                Err(e) if written == 0 => return Err(to_io(e)),
                Err(e) => {
                    log::warn!("EasyLase USB: write aborted after {} bytes: {}", written, e);
                    break;
                }
            }
        }
        Ok(written)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let deadline = Instant::now() + self.read_timeout;
        let mut raw = vec![0u8; self.endpoints.packet_size * 8];

        while self.pending.is_empty() {
            if Instant::now() >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "no data from EasyLase USB interface",
                ));
            }
            match self
                .handle
                .read_bulk(self.endpoints.input, &mut raw, READ_POLL_TIMEOUT)
            {
                Ok(count) => self.absorb(&raw[..count]),
                Err(rusb::Error::Timeout) => {}
                Err(e) => return Err(to_io(e)),
            }
        }

        let count = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        let _ = self.handle.release_interface(INTERFACE);
    }
}

fn to_io(err: rusb::Error) -> io::Error {
    let kind = match err {
        rusb::Error::Busy => io::ErrorKind::ResourceBusy,
        rusb::Error::NoDevice | rusb::Error::NotFound => io::ErrorKind::NotFound,
        rusb::Error::Access => io::ErrorKind::PermissionDenied,
        rusb::Error::Timeout => io::ErrorKind::TimedOut,
        rusb::Error::Interrupted => io::ErrorKind::Interrupted,
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, err)
}
