use std::path::PathBuf;

use anyhow::{Context, Result};
use gst::prelude::*;
use gstreamer as gst;
use log::*;

use super::branch::{Finished, RecordBranch, Toggle};
use super::config::{OutputConfig, RecordMode};
use super::splitmux::{self, FragmentClosed};
use crate::bus;
use crate::pads::link_tee_branch;

/// Recording branch that stays linked to the tee for the lifetime of the
/// pipeline. A `valve` in front of the encoder decides whether frames reach
/// the muxer.
pub struct ValveBranch {
    toggle: Toggle,
    valve: gst::Element,
    encoder: gst::Element,
    sink: gst::Element,
    last_location: Option<PathBuf>,
}

impl ValveBranch {
    pub fn new(pipeline: &gst::Pipeline, tee: &gst::Element, output: &OutputConfig) -> Result<Self> {
        let queue = gst::ElementFactory::make("queue").name("record-queue").build()?;
        let valve = gst::ElementFactory::make("valve")
            .name("record-valve")
            .property("drop", true)
            .build()?;
        // Keep caps and segment flowing so the encoder negotiates before the
        // first recording.
        if valve.find_property("drop-mode").is_some() {
            valve.set_property_from_str("drop-mode", "forward-sticky-events");
        }
        let convert = gst::ElementFactory::make("videoconvert")
            .name("record-convert")
            .build()?;
        let encoder = splitmux::encoder(output, "record-encoder")?;
        let parse = splitmux::h264parse("record-parse")?;
        let sink = splitmux::splitmuxsink(output, "record-sink")?;

        let elements = [&queue, &valve, &convert, &encoder, &parse, &sink];
        pipeline.add_many(&elements)?;
        gst::Element::link_many(&elements)?;
        link_tee_branch(tee, &queue)?;

        Ok(ValveBranch {
            toggle: Toggle::default(),
            valve,
            encoder,
            sink,
            last_location: None,
        })
    }

    fn request_key_unit(&self) -> Result<()> {
        let src = self
            .encoder
            .static_pad("src")
            .context("encoder without src pad")?;
        splitmux::request_key_unit(&src);
        Ok(())
    }

    fn set_open(&self, open: bool) {
        self.valve.set_property("drop", !open);
        debug!("valve {}", if open { "open" } else { "closed" });
    }
}

impl RecordBranch for ValveBranch {
    fn mode(&self) -> RecordMode {
        RecordMode::Valve
    }

    fn toggle(&self) -> &Toggle {
        &self.toggle
    }

    fn start(&mut self) -> Result<()> {
        self.toggle.begin_start()?;
        self.set_open(true);
        self.request_key_unit()
    }

    fn stop(&mut self) -> Result<()> {
        self.toggle.begin_stop()?;
        // The valve stays open until the muxer has closed the current file at
        // the next key frame.
        self.sink.emit_by_name::<()>("split-now", &[]);
        self.request_key_unit()
    }

    fn handle_message(&mut self, msg: &gst::MessageRef) -> Result<Option<Finished>> {
        if !bus::is_from(msg, &self.sink) {
            return Ok(None);
        }
        if let Some(location) = splitmux::fragment_opened(msg) {
            self.last_location = Some(location);
            return Ok(None);
        }
        let Some(closed) = FragmentClosed::from_message(msg) else {
            return Ok(None);
        };
        if !self.toggle.finish() {
            return Ok(None);
        }
        self.set_open(false);
        Ok(Some(Finished {
            location: Some(closed.location),
            forced: false,
        }))
    }

    fn force_finish(&mut self) -> Result<Finished> {
        self.set_open(false);
        self.toggle.finish();
        Ok(Finished {
            location: self.last_location.clone(),
            forced: true,
        })
    }
}
