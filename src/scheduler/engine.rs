//! Playback state machine.
//!
//! [`Engine`] owns the device link and the frame queue and is driven one
//! step at a time: commands mutate it directly and [`Engine::poll`] performs a
//! single readiness check. It never sleeps; timing is up to the caller.

use log::{debug, info, trace, warn};

use crate::protocols::easylase::{self, DeviceLink, DevicePoint};
use crate::scheduler::queue::FrameQueue;
use crate::types::{
    LogicalPoint, SchedulerConfig, SchedulerState, SchedulerStats, SchedulerStatus,
};

pub(crate) type ErrorListener = Box<dyn FnMut(&str) + Send + 'static>;
pub(crate) type ActiveListener = Box<dyn FnMut(bool) + Send + 'static>;
pub(crate) type FinishedListener = Box<dyn FnMut() + Send + 'static>;

#[derive(Default)]
pub(crate) struct Listeners {
    pub error: Option<ErrorListener>,
    pub active: Option<ActiveListener>,
    pub finished: Option<FinishedListener>,
}

pub(crate) struct Engine {
    link: DeviceLink,
    config: SchedulerConfig,
    queue: FrameQueue,
    state: SchedulerState,
    /// Ring index of the next frame in repeat mode.
    repeat_pos: usize,
    polling: bool,
    /// Set when the finished listener ran and no show has followed yet.
    awaiting_continuation: bool,
    stats: SchedulerStats,
    listeners: Listeners,
}

impl Engine {
    pub fn new(link: DeviceLink, config: SchedulerConfig) -> Self {
        Self {
            link: link.with_max_points(config.max_points),
            queue: FrameQueue::new(config.max_points),
            config,
            state: SchedulerState::Idle,
            repeat_pos: 0,
            polling: false,
            awaiting_continuation: false,
            stats: SchedulerStats::default(),
            listeners: Listeners::default(),
        }
    }

    pub fn listeners_mut(&mut self) -> &mut Listeners {
        &mut self.listeners
    }

    pub fn is_polling(&self) -> bool {
        self.polling
    }

    pub fn has_error(&self) -> bool {
        self.link.has_error()
    }

    pub fn error_string(&self) -> String {
        self.link
            .session()
            .last_error
            .as_ref()
            .map(|info| info.message.clone())
            .unwrap_or_default()
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            state: self.state,
            queued_frames: self.queue.len(),
            queued_points: self.queue.total_points(),
            connected: self.link.is_connected(),
            polling: self.polling,
            error: self.link.session().last_error.clone(),
            stats: self.stats.clone(),
        }
    }

    /// Clears the error, reconnects and idles the device.
    pub fn reset(&mut self) {
        info!("resetting {}", self.link.describe());
        let result = self.link.connect();
        if self.check(result).is_some() {
            self.idle();
        }
    }

    pub fn on(&mut self) {
        let result = self.link.set_output(true);
        self.check(result);
    }

    pub fn off(&mut self) {
        let result = self.link.set_output(false);
        self.check(result);
    }

    /// Stops playback and blanks the device.
    pub fn idle(&mut self) {
        self.polling = false;
        self.queue.clear();
        self.repeat_pos = 0;
        self.awaiting_continuation = false;
        let result = self.link.idle();
        self.check(result);
        self.set_state(SchedulerState::Idle);
    }

    pub fn show(&mut self, points: &[LogicalPoint], repeat: bool, rate: u16) {
        if points.is_empty() || rate == 0 {
            self.idle();
            return;
        }
        if self.has_error() {
            trace!("show ignored, error is latched");
            return;
        }

        if !repeat && self.state == SchedulerState::Idle && self.awaiting_continuation {
            warn!("missed deadline: continuation arrived after playback ended");
            self.stats.missed_deadlines += 1;
        }
        self.awaiting_continuation = false;

        let replication = self.config.replication(rate);
        if repeat || self.state == SchedulerState::ActiveRepeating {
            // The device may still hold frames, even when Idle after a one-shot.
            debug!("hard cut from {} playback", self.state);
            self.queue.clear();
            self.repeat_pos = 0;
            let result = self.link.idle();
            if self.check(result).is_none() {
                return;
            }
        } else if self.queue.remove_sentinel() {
            debug!("continuing one-shot playback");
        }

        self.queue
            .extend_replicated(points.iter().map(DevicePoint::from), replication);
        trace!(
            "queued {} points x{} in {} frames",
            points.len(),
            replication,
            self.queue.len()
        );

        if !repeat {
            self.queue.push_sentinel();
            self.set_state(SchedulerState::ActiveOneShot);
            self.polling = true;
            return;
        }

        if self.queue.len() == 1 {
            // A single frame loops on the device by itself.
            self.polling = false;
            if let Some(frame) = self.queue.pop_front() {
                let result = self.link.show(self.config.device_rate, frame.points());
                if self.check(result).is_none() {
                    return;
                }
                self.record_sent(frame.len());
            }
            self.set_state(SchedulerState::ActiveRepeating);
            return;
        }

        self.repeat_pos = 0;
        self.set_state(SchedulerState::ActiveRepeating);
        self.polling = true;
    }

    /// Performs one readiness check and feeds the device if it is ready.
    pub fn poll(&mut self) {
        if !self.polling {
            return;
        }
        let ready = match self.link.is_ready() {
            Ok(ready) => ready,
            Err(err) => {
                self.handle_error(err);
                return;
            }
        };
        if !ready {
            self.stats.busy_polls += 1;
            return;
        }

        match self.state {
            SchedulerState::ActiveRepeating => self.send_repeating(),
            SchedulerState::ActiveOneShot => self.send_one_shot(),
            SchedulerState::Idle => self.polling = false,
        }
    }

    /// Drops the connection after blanking the device.
    pub fn shutdown(&mut self) {
        self.idle();
        self.link.disconnect();
    }

    fn send_repeating(&mut self) {
        let len = self.queue.len();
        let Some(frame) = self.queue.get(self.repeat_pos) else {
            warn!("repeat position {} outside queue of {}", self.repeat_pos, len);
            self.repeat_pos = 0;
            return;
        };
        let sent = frame.len();
        let result = self.link.show(self.config.device_rate, frame.points());
        if self.check(result).is_none() {
            return;
        }
        self.record_sent(sent);

        self.repeat_pos = (self.repeat_pos + 1) % len;
        if let Some(removed) = self.queue.rebalance(self.repeat_pos) {
            if removed < self.repeat_pos {
                self.repeat_pos -= 1;
            }
            if self.repeat_pos >= self.queue.len() {
                self.repeat_pos = 0;
            }
        }
    }

    fn send_one_shot(&mut self) {
        let about_to_finish = self.queue.len() == 2
            && self.queue.front().is_some_and(|frame| !frame.is_sentinel());
        // The sentinel keeps the queue non-empty until the end of playback.
        let Some(frame) = self.queue.pop_front() else {
            warn!("missed deadline: queue ran dry before the end of playback");
            self.stats.missed_deadlines += 1;
            self.polling = false;
            self.set_state(SchedulerState::Idle);
            return;
        };

        let result = self.link.show(self.config.device_rate, frame.points());
        if self.check(result).is_none() {
            return;
        }
        self.record_sent(frame.len());

        if frame.is_sentinel() {
            // No idle command: the device plays out what it holds.
            debug!("playback complete");
            self.polling = false;
            self.set_state(SchedulerState::Idle);
        } else if about_to_finish {
            if let Some(finished) = self.listeners.finished.as_mut() {
                trace!(
                    "signaling finished, about {:?} of playback left",
                    self.config.frame_duration()
                );
                self.awaiting_continuation = true;
                finished();
            }
        }
    }

    fn record_sent(&mut self, points: usize) {
        self.stats.frames_sent += 1;
        self.stats.points_sent += points as u64;
    }

    fn set_state(&mut self, state: SchedulerState) {
        let was_active = self.state.is_active();
        self.state = state;
        if was_active != state.is_active() {
            debug!("laser {}", if state.is_active() { "active" } else { "inactive" });
            if let Some(active) = self.listeners.active.as_mut() {
                active(state.is_active());
            }
        }
    }

    /// Returns the value of a link call, halting playback on failure.
    fn check<T>(&mut self, result: easylase::Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.handle_error(err);
                None
            }
        }
    }

    fn handle_error(&mut self, err: easylase::Error) {
        if !err.is_device_fault() {
            warn!("command rejected: {}", err);
            return;
        }
        self.polling = false;
        self.queue.clear();
        self.repeat_pos = 0;
        self.awaiting_continuation = false;
        let message = self.error_string();
        if let Some(on_error) = self.listeners.error.as_mut() {
            on_error(&message);
        }
        self.set_state(SchedulerState::Idle);
    }
}
