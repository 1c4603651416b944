use anyhow::{Context, Result};
use gst::prelude::*;
use gstreamer as gst;
use log::*;

use crate::bus;
use crate::pads::{self, StreamKind};

/// uridecodebin only exposes its source pads once it has looked at the
/// media, so the decoded stream is linked from the `pad-added` handler.
pub fn build(uri: &str, video: bool) -> Result<gst::Pipeline> {
    let pipeline = gst::Pipeline::with_name("test-pipeline");
    let source = gst::ElementFactory::make("uridecodebin")
        .name("source")
        .property("uri", uri)
        .build()?;

    let (convert, accept): (gst::Element, fn(StreamKind) -> bool) = if video {
        let convert = gst::ElementFactory::make("videoconvert")
            .name("convert")
            .build()?;
        let scale = gst::ElementFactory::make("videoscale").name("scale").build()?;
        let sink = gst::ElementFactory::make("autovideosink").name("sink").build()?;
        pipeline.add_many(&[&source, &convert, &scale, &sink])?;
        gst::Element::link_many(&[&convert, &scale, &sink])?;
        (convert, |kind| kind == StreamKind::RawVideo)
    } else {
        let convert = gst::ElementFactory::make("audioconvert")
            .name("convert")
            .build()?;
        let resample = gst::ElementFactory::make("audioresample")
            .name("resample")
            .build()?;
        let sink = gst::ElementFactory::make("autoaudiosink").name("sink").build()?;
        pipeline.add_many(&[&source, &convert, &resample, &sink])?;
        gst::Element::link_many(&[&convert, &resample, &sink])?;
        (convert, |kind| kind == StreamKind::RawAudio)
    };

    let sink_pad = convert
        .static_pad("sink")
        .context("convert element without sink pad")?;
    source.connect_pad_added(move |src, src_pad| {
        info!("Received new pad {} from {}", src_pad.name(), src.name());
        pads::link_matching(src_pad, &sink_pad, accept).log(src_pad);
    });

    Ok(pipeline)
}

pub fn run(uri: &str, video: bool) -> Result<()> {
    let pipeline = build(uri, video)?;
    bus::main_loop(pipeline.upcast())
}
