use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use gst::prelude::*;
use gstreamer as gst;
use log::*;

use super::branch::{Finished, RecordBranch, RecordState, Toggle};
use super::config::{OutputConfig, RecordMode};
use super::splitmux::{self, FragmentClosed};
use crate::bus;
use crate::pads::link_tee_branch;

/// Recording branch that lives in the pipeline unlinked. Starting requests a
/// tee pad for it, stopping blocks that pad, detaches the branch and drains
/// it with EOS.
pub struct PadBranch {
    toggle: Toggle,
    tee: gst::Element,
    queue: gst::Element,
    elements: Vec<gst::Element>,
    sink: gst::Element,
    tee_pad: Option<gst::Pad>,
    detached: Arc<AtomicBool>,
    last_location: Option<PathBuf>,
    fragments_opened: u32,
}

/// Unlinks `tee_pad` from the branch, drains the branch and gives the pad
/// back to the tee. Runs at most once per recording.
fn detach(tee: &gst::Element, tee_pad: &gst::Pad, sink_pad: &gst::Pad, detached: &AtomicBool) {
    if detached.swap(true, Ordering::SeqCst) {
        return;
    }
    if let Err(err) = tee_pad.unlink(sink_pad) {
        warn!("failed to unlink {}: {err}", tee_pad.name());
    }
    sink_pad.send_event(gst::event::Eos::new());

    // Request pads cannot be released from their own streaming thread.
    let tee_pad = tee_pad.clone();
    tee.call_async(move |tee| {
        debug!("releasing {}", tee_pad.name());
        tee.release_request_pad(&tee_pad);
    });
}

impl PadBranch {
    pub fn new(pipeline: &gst::Pipeline, tee: &gst::Element, output: &OutputConfig) -> Result<Self> {
        let queue = gst::ElementFactory::make("queue")
            .name("record-queue")
            .property("flush-on-eos", false)
            .build()?;
        let convert = gst::ElementFactory::make("videoconvert")
            .name("record-convert")
            .build()?;
        let encoder = splitmux::encoder(output, "record-encoder")?;
        let parse = splitmux::h264parse("record-parse")?;
        let sink = splitmux::splitmuxsink(output, "record-sink")?;

        let elements = vec![queue.clone(), convert, encoder, parse, sink.clone()];
        pipeline.add_many(&elements)?;
        gst::Element::link_many(&elements)?;

        Ok(PadBranch {
            toggle: Toggle::default(),
            tee: tee.clone(),
            queue,
            elements,
            sink,
            tee_pad: None,
            detached: Arc::new(AtomicBool::new(false)),
            last_location: None,
            fragments_opened: 0,
        })
    }

    fn queue_sink(&self) -> Result<gst::Pad> {
        self.queue
            .static_pad("sink")
            .context("record queue without sink pad")
    }

    fn belongs_to_branch(&self, object: &gst::Object) -> bool {
        object == self.sink.upcast_ref::<gst::Object>() || object.has_as_ancestor(&self.sink)
    }

    /// Brings the drained branch back to the pipeline state so that the
    /// next recording starts with a fresh encoder and muxer.
    fn reset(&mut self) -> Result<()> {
        for element in self.elements.iter().rev() {
            element.set_state(gst::State::Null)?;
        }
        // The muxer restarts its numbering from start-index when reset.
        self.sink
            .set_property("start-index", i32::try_from(self.fragments_opened)?);
        for element in &self.elements {
            element.sync_state_with_parent()?;
        }
        self.tee_pad = None;
        Ok(())
    }

    fn complete(&mut self, forced: bool) -> Result<Finished> {
        self.reset()?;
        self.toggle.finish();
        Ok(Finished {
            location: self.last_location.take(),
            forced,
        })
    }
}

impl RecordBranch for PadBranch {
    fn mode(&self) -> RecordMode {
        RecordMode::Pad
    }

    fn toggle(&self) -> &Toggle {
        &self.toggle
    }

    fn start(&mut self) -> Result<()> {
        self.toggle.begin_start()?;
        match link_tee_branch(&self.tee, &self.queue) {
            Ok(tee_pad) => {
                self.detached = Arc::new(AtomicBool::new(false));
                self.tee_pad = Some(tee_pad);
                Ok(())
            }
            Err(err) => {
                self.toggle.abort_start();
                Err(err)
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.toggle.begin_stop()?;
        let Some(tee_pad) = self.tee_pad.clone() else {
            self.toggle.finish();
            bail!("recording branch is not linked to the tee");
        };
        let sink_pad = self.queue_sink()?;
        let tee = self.tee.clone();
        let detached = Arc::clone(&self.detached);

        tee_pad
            .add_probe(gst::PadProbeType::BLOCK_DOWNSTREAM, move |pad, _| {
                detach(&tee, pad, &sink_pad, &detached);
                gst::PadProbeReturn::Remove
            })
            .context("failed to block the tee pad")?;
        Ok(())
    }

    fn handle_message(&mut self, msg: &gst::MessageRef) -> Result<Option<Finished>> {
        if bus::is_from(msg, &self.sink) {
            if let Some(location) = splitmux::fragment_opened(msg) {
                self.last_location = Some(location);
                self.fragments_opened += 1;
                return Ok(None);
            }
        }
        if self.toggle.state() != RecordState::Stopping {
            return Ok(None);
        }

        // With a segment duration set, fragments also close on their own
        // while the drained data is still queued. Only the EOS of the sink
        // means the last file has been written.
        if let Some(closed) = FragmentClosed::from_message(msg) {
            if bus::is_from(msg, &self.sink) {
                debug!("fragment {} closed while stopping", closed.location.display());
            }
            return Ok(None);
        }
        if !bus::forwarded_eos_source(msg).is_some_and(|src| self.belongs_to_branch(&src)) {
            return Ok(None);
        }
        self.complete(false).map(Some)
    }

    fn force_finish(&mut self) -> Result<Finished> {
        if let Some(tee_pad) = self.tee_pad.clone() {
            let sink_pad = self.queue_sink()?;
            detach(&self.tee, &tee_pad, &sink_pad, &self.detached);
        }
        self.complete(true)
    }
}
