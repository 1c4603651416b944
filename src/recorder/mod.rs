//! Live video display with a recording branch that can be switched on and
//! off while the pipeline keeps playing.
//!
//! ```text
//! source -> videoconvert -> tee -+-> queue -> videoconvert -> [overlay] -> display sink
//!                                +-> recording branch (valve, pad or rebuild)
//! ```

pub mod branch;
pub mod command;
pub mod config;
mod display;
mod padtoggle;
mod rebuild;
mod source;
pub mod splitmux;
mod valve;

use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::Result;
use gst::prelude::*;
use gstreamer as gst;
use log::*;

pub use branch::{Finished, RecordBranch, RecordError, RecordState};
pub use command::{Command, Schedule};
pub use config::{
    DisplayConfig, OutputConfig, RecordMode, RecorderConfig, SourceConfig, SourceKind,
};

use crate::bus::{self, ErrorMessage};
use crate::overlay::RecIndicator;
use splitmux::FragmentClosed;

/// How often a slow finalization is reported while waiting for it.
const FINALIZE_REPORT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    Started,
    Stopping,
    Finished(Finished),
    Eos,
    /// Quit was requested and no recording is left to finalize.
    Quit,
}

pub struct Recorder {
    pipeline: gst::Pipeline,
    bus: gst::Bus,
    branch: Box<dyn RecordBranch>,
    indicator: Option<RecIndicator>,
    commands: mpsc::Receiver<Command>,
    sender: mpsc::Sender<Command>,
    finalize_timeout: Duration,
    finalize_reported: Duration,
    display_sink: gst::Element,
    is_live: bool,
    quitting: bool,
    /// The display branch has drained, no more frames will arrive.
    source_finished: bool,
    eos_reported: bool,
}

impl Recorder {
    pub fn new(config: &RecorderConfig) -> Result<Self> {
        let pipeline = gst::Pipeline::with_name("recorder");
        // Branch EOS has to reach the bus before the whole pipeline is EOS.
        pipeline.set_property("message-forward", true);

        let head = gst::ElementFactory::make("videoconvert")
            .name("source-convert")
            .build()?;
        let tee = gst::ElementFactory::make("tee")
            .name("tee")
            .property("allow-not-linked", true)
            .build()?;
        pipeline.add_many(&[&head, &tee])?;
        head.link(&tee)?;

        source::add_source(&pipeline, &config.source, &head)?;

        let indicator = config
            .display
            .overlay
            .then(|| RecIndicator::new(config.source.label.clone()));
        let display_sink =
            display::add_display(&pipeline, &tee, &config.display, indicator.as_ref())?;

        let branch: Box<dyn RecordBranch> = match config.mode {
            RecordMode::Valve => Box::new(valve::ValveBranch::new(&pipeline, &tee, &config.output)?),
            RecordMode::Pad => Box::new(padtoggle::PadBranch::new(&pipeline, &tee, &config.output)?),
            RecordMode::Rebuild => {
                Box::new(rebuild::RebuildBranch::new(&pipeline, &tee, &config.output))
            }
        };
        info!(
            "recording mode {:?}, files {}",
            branch.mode(),
            config.output.location_pattern().display()
        );

        let bus = pipeline
            .bus()
            .expect("Pipeline without bus. Shouldn't happen!");
        let (sender, commands) = mpsc::channel();

        Ok(Recorder {
            pipeline,
            bus,
            branch,
            indicator,
            commands,
            sender,
            finalize_timeout: config.finalize_timeout,
            finalize_reported: Duration::ZERO,
            display_sink,
            is_live: false,
            quitting: false,
            source_finished: false,
            eos_reported: false,
        })
    }

    pub fn pipeline(&self) -> &gst::Pipeline {
        &self.pipeline
    }

    /// Channel feeding `poll`.
    pub fn commands(&self) -> mpsc::Sender<Command> {
        self.sender.clone()
    }

    pub fn state(&self) -> RecordState {
        self.branch.state()
    }

    pub fn play(&mut self) -> Result<()> {
        self.is_live = match self.pipeline.set_state(gst::State::Playing)? {
            gst::StateChangeSuccess::NoPreroll => {
                info!("source is live");
                true
            }
            _ => false,
        };
        Ok(())
    }

    /// Applies queued commands, checks on a pending finalization and then
    /// handles at most one bus message, waiting up to `timeout` for it.
    pub fn poll(&mut self, timeout: gst::ClockTime) -> Result<Vec<RecorderEvent>> {
        let mut events = Vec::new();

        while let Ok(command) = self.commands.try_recv() {
            events.extend(self.apply(command)?);
        }
        events.extend(self.check_finalize()?);
        events.extend(self.check_source_finished());

        if self.quitting && self.branch.state() == RecordState::Idle {
            events.push(RecorderEvent::Quit);
            return Ok(events);
        }

        let Some(msg) = self.bus.timed_pop(timeout) else {
            return Ok(events);
        };

        use gst::MessageView;
        match msg.view() {
            MessageView::Error(err) => {
                let err = ErrorMessage::from_view(err);
                error!("{err}");
                return Err(err.into());
            }
            MessageView::Eos(..) => {
                info!("End-Of-Stream reached");
                self.source_finished = true;
                if !self.eos_reported {
                    self.eos_reported = true;
                    events.push(RecorderEvent::Eos);
                }
            }
            MessageView::Buffering(buffering) => {
                let percent = buffering.percent();
                if let Some(state) = bus::buffering_action(percent, self.is_live) {
                    debug!("buffering {percent}%");
                    self.pipeline.set_state(state)?;
                }
            }
            MessageView::ClockLost(..) => {
                // Select a new clock
                self.pipeline.set_state(gst::State::Paused)?;
                self.pipeline.set_state(gst::State::Playing)?;
            }
            MessageView::StateChanged(..) => {
                bus::log_state_changed(self.pipeline.upcast_ref(), &msg)
            }
            MessageView::Element(..) => {
                if bus::forwarded_eos_source(&msg).is_some_and(|src| self.is_display(&src)) {
                    info!("display reached end of stream");
                    self.source_finished = true;
                } else if let Some(location) = splitmux::fragment_opened(&msg) {
                    info!("fragment opened: {}", location.display());
                } else if let Some(closed) = FragmentClosed::from_message(&msg) {
                    info!(
                        "fragment closed: {} (running time {})",
                        closed.location.display(),
                        closed.running_time.display()
                    );
                }
            }
            _ => (),
        }

        if let Some(finished) = self.branch.handle_message(&msg)? {
            events.push(self.finished(finished));
        }
        events.extend(self.check_source_finished());
        Ok(events)
    }

    /// Runs a single command. Requests the state machine refuses are logged
    /// and dropped.
    pub fn apply(&mut self, command: Command) -> Result<Option<RecorderEvent>> {
        let result = match command {
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::Toggle => match self.branch.state() {
                RecordState::Idle => self.start(),
                _ => self.stop(),
            },
            Command::Quit => {
                info!("quit requested");
                self.quitting = true;
                if self.branch.state() != RecordState::Recording {
                    return Ok(None);
                }
                self.stop()
            }
        };

        match result {
            Ok(event) => Ok(Some(event)),
            Err(err) => match err.downcast_ref::<RecordError>() {
                Some(refusal) => {
                    warn!("{command:?} ignored: {refusal}");
                    Ok(None)
                }
                None => Err(err),
            },
        }
    }

    fn start(&mut self) -> Result<RecorderEvent> {
        self.branch.start()?;
        if let Some(indicator) = &self.indicator {
            indicator.set_recording(true);
        }
        info!("recording started");
        Ok(RecorderEvent::Started)
    }

    fn stop(&mut self) -> Result<RecorderEvent> {
        self.branch.stop()?;
        self.finalize_reported = Duration::ZERO;
        info!("stopping recording, waiting for the file to be finalized");
        Ok(RecorderEvent::Stopping)
    }

    fn finished(&mut self, finished: Finished) -> RecorderEvent {
        if let Some(indicator) = &self.indicator {
            indicator.set_recording(false);
        }
        match &finished.location {
            Some(location) => info!("recording saved to {}", location.display()),
            None => info!("recording stopped"),
        }
        RecorderEvent::Finished(finished)
    }

    fn is_display(&self, object: &gst::Object) -> bool {
        object == self.display_sink.upcast_ref::<gst::Object>()
            || object.has_as_ancestor(&self.display_sink)
    }

    /// An idle recording branch left in the pipeline never sees EOS, so the
    /// pipeline itself cannot post it. Once the display has drained and no
    /// recording is pending the stream is over.
    fn check_source_finished(&mut self) -> Option<RecorderEvent> {
        if !self.source_finished || self.eos_reported || self.branch.state() != RecordState::Idle {
            return None;
        }
        info!("source finished");
        self.eos_reported = true;
        Some(RecorderEvent::Eos)
    }

    fn check_finalize(&mut self) -> Result<Option<RecorderEvent>> {
        let Some(waited) = self.branch.toggle().stopping_for(Instant::now()) else {
            return Ok(None);
        };
        if waited >= self.finalize_timeout {
            warn!("recording not finalized after {waited:?}, tearing the branch down");
            let finished = self.branch.force_finish()?;
            return Ok(Some(self.finished(finished)));
        }
        if waited >= self.finalize_reported + FINALIZE_REPORT_INTERVAL {
            self.finalize_reported += FINALIZE_REPORT_INTERVAL;
            warn!("still waiting for the recording to be finalized ({waited:?})");
        }
        Ok(None)
    }

    pub fn shutdown(&mut self) -> Result<()> {
        if self.branch.state() != RecordState::Idle {
            warn!("shutting down with a {} recording", self.branch.state());
        }
        self.pipeline.set_state(gst::State::Null)?;
        Ok(())
    }

    /// Plays until end of stream or until quit has been handled.
    pub fn run(mut self) -> Result<()> {
        self.play()?;
        let result = self.event_loop();
        self.shutdown()?;
        result
    }

    fn event_loop(&mut self) -> Result<()> {
        loop {
            for event in self.poll(gst::ClockTime::from_mseconds(100))? {
                if matches!(event, RecorderEvent::Eos | RecorderEvent::Quit) {
                    return Ok(());
                }
            }
        }
    }
}
