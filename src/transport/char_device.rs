//! Character device transport provided by the EasyLase kernel driver.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::transport::{Connector, Transport};

/// Device node created by the EasyLase kernel driver.
pub const DEFAULT_DEVICE_PATH: &str = "/dev/easylase0";

/// Connector for the EasyLase character device.
///
/// The driver allows a single open handle at a time and answers a second
/// `open()` with `EBUSY`, which gives the exclusive-ownership semantics the
/// device link relies on.
#[derive(Debug, Clone)]
pub struct CharDevice {
    path: PathBuf,
}

impl CharDevice {
    /// Creates a connector for the device node at `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Returns the device node path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for CharDevice {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE_PATH)
    }
}

impl Connector for CharDevice {
    fn connect(&mut self) -> io::Result<Box<dyn Transport>> {
        // Never create the node: a missing device must fail the open.
        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        Ok(Box::new(CharDeviceTransport { file }))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

struct CharDeviceTransport {
    file: File,
}

impl Transport for CharDeviceTransport {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        // A single write call; the driver either takes the whole command or
        // reports how far it got.
        self.file.write(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_path() {
        assert_eq!(CharDevice::default().path(), Path::new("/dev/easylase0"));
        assert_eq!(CharDevice::default().describe(), "/dev/easylase0");
    }

    #[test]
    fn test_missing_node_is_not_created() {
        let path = std::env::temp_dir().join(format!(
            "easylase-missing-{}",
            std::process::id()
        ));
        let mut device = CharDevice::new(&path);
        let err = device.connect().err().expect("open must fail");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!path.exists());
    }

    #[test]
    fn test_regular_file_round_trip() {
        let path = std::env::temp_dir().join(format!(
            "easylase-chardev-{}",
            std::process::id()
        ));
        std::fs::write(&path, [0x33]).unwrap();

        let mut device = CharDevice::new(&path);
        let mut transport = device.connect().unwrap();
        let mut status = [0u8; 1];
        assert_eq!(transport.read(&mut status).unwrap(), 1);
        assert_eq!(status[0], 0x33);
        assert_eq!(transport.write(&[0xa9; 6]).unwrap(), 6);

        drop(transport);
        std::fs::remove_file(&path).unwrap();
    }
}
