//! In-memory EasyLase device for unit tests.
//!
//! [`MockDevice`] records every command written to it and answers status
//! requests from a script (ready when the script is empty). Faults are
//! injected through the setters.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::protocols::easylase::protocol::{
    decode_show, DevicePoint, DATA_MARKER, IDLE_COMMAND, STATUS_READY, STATUS_REQUEST,
    TTL_MARKER,
};
use crate::transport::{Connector, Transport};

#[derive(Default)]
struct MockState {
    writes: Vec<Vec<u8>>,
    statuses: VecDeque<u8>,
    open: bool,
    opens: usize,
    open_failure: bool,
    fail_reads: bool,
    fail_writes: bool,
    /// Data commands left until one is cut short.
    short_write_in: Option<usize>,
}

/// Shared handle to a simulated device.
#[derive(Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector {
            device: self.clone(),
        }
    }

    /// Queues a status byte for the next status request.
    pub fn push_status(&self, byte: u8) {
        self.state().statuses.push_back(byte);
    }

    /// Queues `byte` `count` times.
    pub fn push_statuses(&self, byte: u8, count: usize) {
        let mut state = self.state();
        for _ in 0..count {
            state.statuses.push_back(byte);
        }
    }

    pub fn set_open_failure(&self, fail: bool) {
        self.state().open_failure = fail;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state().fail_reads = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    /// Cuts the `nth` data command from now short by one byte.
    pub fn short_write_frame(&self, nth: usize) {
        self.state().short_write_in = Some(nth);
    }

    pub fn is_open(&self) -> bool {
        self.state().open
    }

    /// Number of successful opens so far.
    pub fn opens(&self) -> usize {
        self.state().opens
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }

    /// Decoded data commands, in the order they were written.
    pub fn frames(&self) -> Vec<(u16, Vec<DevicePoint>)> {
        self.state()
            .writes
            .iter()
            .filter_map(|w| decode_show(w))
            .collect()
    }

    pub fn status_requests(&self) -> usize {
        self.count_writes(|w| w == STATUS_REQUEST)
    }

    pub fn idles(&self) -> usize {
        self.count_writes(|w| w == IDLE_COMMAND)
    }

    /// TTL levels written, in order.
    pub fn ttl_levels(&self) -> Vec<u8> {
        self.state()
            .writes
            .iter()
            .filter(|w| w.len() == TTL_MARKER.len() + 2 && w.starts_with(&TTL_MARKER))
            .map(|w| w[TTL_MARKER.len()])
            .collect()
    }

    /// Every command except status requests.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.state()
            .writes
            .iter()
            .filter(|w| w.as_slice() != STATUS_REQUEST)
            .cloned()
            .collect()
    }

    fn count_writes(&self, f: impl Fn(&[u8]) -> bool) -> usize {
        self.state().writes.iter().filter(|w| f(w.as_slice())).count()
    }
}

pub struct MockConnector {
    device: MockDevice,
}

impl Connector for MockConnector {
    fn connect(&mut self) -> io::Result<Box<dyn Transport>> {
        let mut state = self.device.state();
        if state.open_failure {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        if state.open {
            return Err(io::Error::from(io::ErrorKind::ResourceBusy));
        }
        state.open = true;
        state.opens += 1;
        drop(state);
        Ok(Box::new(MockTransport {
            device: self.device.clone(),
        }))
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

struct MockTransport {
    device: MockDevice,
}

impl Transport for MockTransport {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut state = self.device.state();
        if state.fail_writes {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        state.writes.push(data.to_vec());

        let is_frame = data.starts_with(&DATA_MARKER) && data != IDLE_COMMAND;
        if is_frame {
            if let Some(left) = state.short_write_in.as_mut() {
                *left -= 1;
                if *left == 0 {
                    state.short_write_in = None;
                    return Ok(data.len() - 1);
                }
            }
        }
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.device.state();
        if state.fail_reads {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        buf[0] = state.statuses.pop_front().unwrap_or(STATUS_READY);
        Ok(1)
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.device.state().open = false;
    }
}
