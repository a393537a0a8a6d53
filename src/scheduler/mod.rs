//! Threaded point scheduler.
//!
//! [`PointScheduler`] owns a dedicated thread that holds the device link and
//! all playback state. Every method on the handle is marshalled to that thread
//! over a channel, so calls from one caller are applied in the order issued.
//!
//! Mutating calls return as soon as the command is queued. Queries
//! ([`has_error`](PointScheduler::has_error),
//! [`error_string`](PointScheduler::error_string),
//! [`status`](PointScheduler::status)) and
//! [`wait_for_finish`](PointScheduler::wait_for_finish) block until the
//! scheduler thread has processed everything queued before them.
//!
//! # Callbacks
//!
//! Error, active and finished callbacks run on the scheduler thread. They
//! must return quickly and must not call the blocking queries of the same
//! scheduler, which would deadlock.
//!
//! # Example
//!
//! ```no_run
//! use easylase::{LogicalPoint, PointScheduler, SchedulerConfig};
//!
//! let scheduler = PointScheduler::open("/dev/easylase0", SchedulerConfig::default())?;
//! scheduler.set_error_callback(|msg| eprintln!("laser error: {}", msg))?;
//!
//! let square = vec![
//!     LogicalPoint::new(-0.5, -0.5, 0, 255, 0),
//!     LogicalPoint::new(0.5, -0.5, 0, 255, 0),
//!     LogicalPoint::new(0.5, 0.5, 0, 255, 0),
//!     LogicalPoint::new(-0.5, 0.5, 0, 255, 0),
//! ];
//! scheduler.on()?;
//! scheduler.show(square, true, 1000)?;
//! # Ok::<(), easylase::Error>(())
//! ```

mod engine;
pub mod queue;

pub use queue::{Frame, FrameQueue};

use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error};

use crate::error::{Error, Result};
use crate::protocols::easylase::DeviceLink;
use crate::scheduler::engine::{ActiveListener, Engine, ErrorListener, FinishedListener};
use crate::transport::{CharDevice, Connector};
use crate::types::{LogicalPoint, SchedulerConfig, SchedulerStatus};

// =============================================================================
// Commands
// =============================================================================

/// Messages handled by the scheduler thread.
enum Command {
    Reset,
    On,
    Off,
    Idle,
    Show {
        points: Vec<LogicalPoint>,
        repeat: bool,
        rate: u16,
    },
    SetErrorCallback(ErrorListener),
    SetActiveCallback(ActiveListener),
    SetFinishedCallback(FinishedListener),
    HasError(Sender<bool>),
    ErrorString(Sender<String>),
    Status(Sender<SchedulerStatus>),
    /// Answered once every earlier command has been applied.
    Barrier(Sender<()>),
    Shutdown,
}

// =============================================================================
// PointScheduler
// =============================================================================

/// Feeds point sequences to an EasyLase DAC from a dedicated thread.
///
/// Construction connects to the device and idles it. Dropping the scheduler
/// idles the device, stops the thread and waits for it to exit.
pub struct PointScheduler {
    commands: Sender<Command>,
    config: SchedulerConfig,
    handle: Option<JoinHandle<()>>,
}

impl PointScheduler {
    /// Starts a scheduler for the character device at `path`.
    pub fn open(path: impl AsRef<Path>, config: SchedulerConfig) -> Result<Self> {
        Self::new(CharDevice::new(path), config)
    }

    /// Starts a scheduler that opens the device through `connector`.
    ///
    /// Fails only if the configuration is invalid or the thread cannot be
    /// spawned. A device that cannot be opened is reported through
    /// [`has_error`](Self::has_error) and the error callback.
    pub fn new(connector: impl Connector + 'static, config: SchedulerConfig) -> Result<Self> {
        config.validate()?;

        let (commands, inbox) = mpsc::channel();
        let engine = Engine::new(DeviceLink::new(connector), config.clone());
        let poll_interval = config.poll_interval;
        let handle = thread::Builder::new()
            .name("easylase-scheduler".into())
            .spawn(move || run(engine, inbox, poll_interval))
            .map_err(|e| Error::context("failed to spawn scheduler thread", e))?;

        let scheduler = Self {
            commands,
            config,
            handle: Some(handle),
        };
        scheduler.reset()?;
        Ok(scheduler)
    }

    /// Returns the configuration the scheduler was started with.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Clears a latched error, reconnects and idles the device.
    pub fn reset(&self) -> Result<()> {
        self.send(Command::Reset)
    }

    /// Switches the laser output on. The frame queue is not touched.
    pub fn on(&self) -> Result<()> {
        self.send(Command::On)
    }

    /// Switches the laser output off. The frame queue is not touched.
    pub fn off(&self) -> Result<()> {
        self.send(Command::Off)
    }

    /// Stops playback, empties the queue and blanks the device.
    pub fn idle(&self) -> Result<()> {
        self.send(Command::Idle)
    }

    /// Plays `points` at `rate` points per second.
    ///
    /// A repeating show, or any show while a repeating one is active,
    /// replaces current playback. One-shot shows are appended to running
    /// one-shot playback without a gap. Empty `points` or a zero `rate` idle
    /// the device.
    pub fn show(&self, points: Vec<LogicalPoint>, repeat: bool, rate: u16) -> Result<()> {
        self.send(Command::Show {
            points,
            repeat,
            rate,
        })
    }

    /// Holds the beam on a single point.
    pub fn show_point(&self, point: LogicalPoint) -> Result<()> {
        self.show(vec![point], true, self.config.device_max_rate)
    }

    /// Sets the callback invoked with the message of each latched error.
    pub fn set_error_callback<F>(&self, f: F) -> Result<()>
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.send(Command::SetErrorCallback(Box::new(f)))
    }

    /// Sets the callback invoked when playback starts (`true`) or stops (`false`).
    pub fn set_active_callback<F>(&self, f: F) -> Result<()>
    where
        F: FnMut(bool) + Send + 'static,
    {
        self.send(Command::SetActiveCallback(Box::new(f)))
    }

    /// Sets the callback invoked one frame before one-shot playback ends.
    ///
    /// A show issued from here continues playback without a gap.
    pub fn set_finished_callback<F>(&self, f: F) -> Result<()>
    where
        F: FnMut() + Send + 'static,
    {
        self.send(Command::SetFinishedCallback(Box::new(f)))
    }

    /// Whether an error is latched. Also true once the thread has stopped.
    pub fn has_error(&self) -> bool {
        self.query(Command::HasError).unwrap_or(true)
    }

    /// The latched error message, or an empty string.
    pub fn error_string(&self) -> String {
        self.query(Command::ErrorString)
            .unwrap_or_else(|_| Error::SchedulerStopped.to_string())
    }

    /// Returns a snapshot of the scheduler.
    pub fn status(&self) -> Result<SchedulerStatus> {
        self.query(Command::Status)
    }

    /// Blocks until every previously issued command has been applied.
    ///
    /// This does not wait for playback to end.
    pub fn wait_for_finish(&self) -> Result<()> {
        self.query(Command::Barrier)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::SchedulerStopped)
    }

    fn query<T>(&self, make: impl FnOnce(Sender<T>) -> Command) -> Result<T> {
        let (reply, answer) = mpsc::channel();
        self.send(make(reply))?;
        answer.recv().map_err(|_| Error::SchedulerStopped)
    }
}

impl Drop for PointScheduler {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("scheduler thread panicked");
            }
        }
    }
}

// =============================================================================
// Scheduler thread
// =============================================================================

fn run(mut engine: Engine, inbox: Receiver<Command>, poll_interval: Duration) {
    debug!("scheduler thread started");
    let mut next_poll: Option<Instant> = None;

    loop {
        // A due poll goes first so a busy inbox cannot starve the device.
        if next_poll.is_some_and(|deadline| Instant::now() >= deadline) {
            engine.poll();
            next_poll = engine
                .is_polling()
                .then(|| Instant::now() + poll_interval);
        }

        let command = match next_poll {
            Some(deadline) => {
                match inbox.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match inbox.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        if !apply(&mut engine, command) {
            break;
        }
        if !engine.is_polling() {
            next_poll = None;
        } else if next_poll.is_none() {
            next_poll = Some(Instant::now());
        }
    }

    engine.shutdown();
    debug!("scheduler thread stopped");
}

/// Applies one command. Returns `false` when the thread should exit.
fn apply(engine: &mut Engine, command: Command) -> bool {
    match command {
        Command::Reset => engine.reset(),
        Command::On => engine.on(),
        Command::Off => engine.off(),
        Command::Idle => engine.idle(),
        Command::Show {
            points,
            repeat,
            rate,
        } => engine.show(&points, repeat, rate),
        Command::SetErrorCallback(f) => engine.listeners_mut().error = Some(f),
        Command::SetActiveCallback(f) => engine.listeners_mut().active = Some(f),
        Command::SetFinishedCallback(f) => engine.listeners_mut().finished = Some(f),
        Command::HasError(reply) => {
            let _ = reply.send(engine.has_error());
        }
        Command::ErrorString(reply) => {
            let _ = reply.send(engine.error_string());
        }
        Command::Status(reply) => {
            let _ = reply.send(engine.status());
        }
        Command::Barrier(reply) => {
            let _ = reply.send(());
        }
        Command::Shutdown => return false,
    }
    true
}
