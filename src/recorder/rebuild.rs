use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use gst::prelude::*;
use gstreamer as gst;
use log::*;

use super::branch::{Finished, RecordBranch, RecordState, Toggle};
use super::config::{OutputConfig, RecordMode};
use super::splitmux;
use crate::bus;
use crate::pads::link_tee_pad;

/// Bin attached to the tee for the duration of one recording.
struct RecordingBin {
    bin: gst::Bin,
    sink_pad: gst::Pad,
    tee_pad: gst::Pad,
    location: PathBuf,
    detached: Arc<AtomicBool>,
}

/// Recording branch that is built from scratch for every recording and
/// removed from the pipeline once its file is complete.
pub struct RebuildBranch {
    toggle: Toggle,
    pipeline: gst::Pipeline,
    tee: gst::Element,
    output: OutputConfig,
    next_index: u32,
    active: Option<RecordingBin>,
}

fn detach(tee: &gst::Element, tee_pad: &gst::Pad, sink_pad: &gst::Pad, detached: &AtomicBool) {
    if detached.swap(true, Ordering::SeqCst) {
        return;
    }
    if let Err(err) = tee_pad.unlink(sink_pad) {
        warn!("failed to unlink {}: {err}", tee_pad.name());
    }
    let tee_pad = tee_pad.clone();
    let sink_pad = sink_pad.clone();
    tee.call_async(move |tee| {
        tee.release_request_pad(&tee_pad);
        sink_pad.send_event(gst::event::Eos::new());
    });
}

impl RebuildBranch {
    pub fn new(pipeline: &gst::Pipeline, tee: &gst::Element, output: &OutputConfig) -> Self {
        RebuildBranch {
            toggle: Toggle::default(),
            pipeline: pipeline.clone(),
            tee: tee.clone(),
            output: output.clone(),
            next_index: 0,
            active: None,
        }
    }

    fn build_bin(&self, index: u32, location: &Path) -> Result<(gst::Bin, gst::Pad)> {
        let bin = gst::Bin::with_name(&format!("record-bin-{index}"));

        let queue = gst::ElementFactory::make("queue").build()?;
        let convert = gst::ElementFactory::make("videoconvert").build()?;
        let encoder = splitmux::encoder(&self.output, &format!("record-encoder-{index}"))?;
        let parse = splitmux::h264parse(&format!("record-parse-{index}"))?;
        let muxer = gst::ElementFactory::make(&self.output.muxer)
            .build()
            .with_context(|| format!("failed to create muxer {}", self.output.muxer))?;
        let filesink = gst::ElementFactory::make("filesink")
            .property("location", location.to_string_lossy().as_ref())
            .property("async", false)
            .build()?;

        let elements = [&queue, &convert, &encoder, &parse, &muxer, &filesink];
        bin.add_many(&elements)?;
        gst::Element::link_many(&elements)?;

        let queue_sink = queue.static_pad("sink").context("queue without sink pad")?;
        let ghost_pad = gst::GhostPad::with_target(&queue_sink)?;
        bin.add_pad(&ghost_pad)?;

        Ok((bin, ghost_pad.upcast()))
    }

    fn attach(&mut self) -> Result<RecordingBin> {
        let index = self.next_index;
        let location = self.output.location(index);
        let (bin, sink_pad) = self.build_bin(index, &location)?;

        self.pipeline.add(&bin)?;
        let tee_pad = match link_tee_pad(&self.tee, &sink_pad) {
            Ok(pad) => pad,
            Err(err) => {
                if let Err(err) = self.pipeline.remove(&bin) {
                    warn!("failed to remove {}: {err}", bin.name());
                }
                return Err(err);
            }
        };
        bin.sync_state_with_parent()?;
        self.next_index += 1;

        info!("recording into {}", location.display());
        Ok(RecordingBin {
            bin,
            sink_pad,
            tee_pad,
            location,
            detached: Arc::new(AtomicBool::new(false)),
        })
    }

    /// True if `src` is the attached bin or an element inside it.
    fn owns(&self, src: &gst::Object) -> bool {
        self.active.as_ref().is_some_and(|recording| {
            let bin = recording.bin.upcast_ref::<gst::Object>();
            src == bin || src.has_as_ancestor(bin)
        })
    }

    fn remove(&mut self, recording: RecordingBin) -> Result<PathBuf> {
        recording.bin.set_state(gst::State::Null)?;
        self.pipeline.remove(&recording.bin)?;
        debug!("removed {}", recording.bin.name());
        Ok(recording.location)
    }
}

impl RecordBranch for RebuildBranch {
    fn mode(&self) -> RecordMode {
        RecordMode::Rebuild
    }

    fn toggle(&self) -> &Toggle {
        &self.toggle
    }

    fn start(&mut self) -> Result<()> {
        self.toggle.begin_start()?;
        match self.attach() {
            Ok(recording) => {
                self.active = Some(recording);
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
        let recording = self
            .active
            .as_ref()
            .context("no recording bin attached")?;

        let tee = self.tee.clone();
        let sink_pad = recording.sink_pad.clone();
        let detached = Arc::clone(&recording.detached);
        recording
            .tee_pad
            .add_probe(gst::PadProbeType::IDLE, move |pad, _| {
                detach(&tee, pad, &sink_pad, &detached);
                gst::PadProbeReturn::Remove
            })
            .context("failed to install idle probe")?;
        Ok(())
    }

    fn handle_message(&mut self, msg: &gst::MessageRef) -> Result<Option<Finished>> {
        if self.toggle.state() != RecordState::Stopping {
            return Ok(None);
        }
        let Some(src) = bus::forwarded_eos_source(msg) else {
            return Ok(None);
        };
        if !self.owns(&src) {
            return Ok(None);
        }
        let Some(recording) = self.active.take() else {
            return Ok(None);
        };

        let location = self.remove(recording)?;
        self.toggle.finish();
        Ok(Some(Finished {
            location: Some(location),
            forced: false,
        }))
    }

    fn force_finish(&mut self) -> Result<Finished> {
        let location = match self.active.take() {
            Some(recording) => {
                detach(
                    &self.tee,
                    &recording.tee_pad,
                    &recording.sink_pad,
                    &recording.detached,
                );
                Some(self.remove(recording)?)
            }
            None => None,
        };
        self.toggle.finish();
        Ok(Finished {
            location,
            forced: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_attach_leaves_no_bin_behind() {
        gst::init().unwrap();
        let required = ["tee", "queue", "videoconvert", "x264enc", "h264parse", "mp4mux", "filesink"];
        if required.iter().any(|name| gst::ElementFactory::find(name).is_none()) {
            return;
        }
        let pipeline = gst::Pipeline::new();
        // A tee in another pipeline cannot be linked to the recording bin.
        let elsewhere = gst::Pipeline::new();
        let tee = gst::ElementFactory::make("tee").build().unwrap();
        elsewhere.add(&tee).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let output = OutputConfig {
            directory: dir.path().to_path_buf(),
            ..OutputConfig::default()
        };
        let mut branch = RebuildBranch::new(&pipeline, &tee, &output);

        assert!(branch.start().is_err());
        assert_eq!(branch.state(), RecordState::Idle);
        assert!(pipeline.by_name("record-bin-0").is_none());
        assert_eq!(pipeline.children().len(), 0);
        assert!(tee.src_pads().is_empty());
    }
}
