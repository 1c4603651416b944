use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use derive_more::{Display, Error};
use gstreamer as gst;

use super::config::RecordMode;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    #[default]
    Idle,
    Recording,
    /// Stop requested, output not yet finalized.
    Stopping,
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecordState::Idle => "idle",
            RecordState::Recording => "recording",
            RecordState::Stopping => "stopping",
        })
    }
}

/// Requests the recording state machine refuses. These are reported and
/// ignored by the controller rather than ending the program.
#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
pub enum RecordError {
    #[display(fmt = "recording already in progress")]
    AlreadyRecording,
    #[display(fmt = "no recording in progress")]
    NotRecording,
    #[display(fmt = "previous recording is still being finalized")]
    Busy,
}

/// Idle -> Recording -> Stopping -> Idle.
#[derive(Debug, Default)]
pub struct Toggle {
    state: RecordState,
    stop_requested_at: Option<Instant>,
}

impl Toggle {
    pub fn state(&self) -> RecordState {
        self.state
    }

    pub fn begin_start(&mut self) -> Result<(), RecordError> {
        match self.state {
            RecordState::Idle => {
                self.state = RecordState::Recording;
                Ok(())
            }
            RecordState::Recording => Err(RecordError::AlreadyRecording),
            RecordState::Stopping => Err(RecordError::Busy),
        }
    }

    /// Undoes `begin_start` when the branch could not be attached.
    pub fn abort_start(&mut self) {
        if self.state == RecordState::Recording {
            self.state = RecordState::Idle;
        }
    }

    pub fn begin_stop(&mut self) -> Result<(), RecordError> {
        match self.state {
            RecordState::Recording => {
                self.state = RecordState::Stopping;
                self.stop_requested_at = Some(Instant::now());
                Ok(())
            }
            RecordState::Idle => Err(RecordError::NotRecording),
            RecordState::Stopping => Err(RecordError::Busy),
        }
    }

    /// Marks the output as finalized. Returns false if no stop was pending.
    pub fn finish(&mut self) -> bool {
        if self.state != RecordState::Stopping {
            return false;
        }
        self.state = RecordState::Idle;
        self.stop_requested_at = None;
        true
    }

    pub fn stopping_for(&self, now: Instant) -> Option<Duration> {
        self.stop_requested_at
            .map(|at| now.saturating_duration_since(at))
    }
}

/// A recording that has been closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    /// Last file written, if the muxer reported one.
    pub location: Option<PathBuf>,
    /// Torn down after the finalize timeout instead of a clean EOS.
    pub forced: bool,
}

/// A way of attaching an encoder and file writer to the tee and detaching it
/// again while the rest of the pipeline keeps playing.
pub trait RecordBranch: Send {
    fn mode(&self) -> RecordMode;

    fn toggle(&self) -> &Toggle;

    fn state(&self) -> RecordState {
        self.toggle().state()
    }

    fn start(&mut self) -> Result<()>;

    /// Requests the recording to end. Completion is reported later through
    /// `handle_message`.
    fn stop(&mut self) -> Result<()>;

    /// Inspects a message from the pipeline bus and returns the finished
    /// recording when it completes a pending stop.
    fn handle_message(&mut self, msg: &gst::MessageRef) -> Result<Option<Finished>>;

    /// Tears the branch down without waiting for the muxer any longer.
    fn force_finish(&mut self) -> Result<Finished>;
}
