use anyhow::Result;
use gst::prelude::*;
use gstreamer as gst;

use crate::bus;
use crate::pads::link_tee_branch;

pub fn run(freq: f64) -> Result<()> {
    let audio_source = gst::ElementFactory::make("audiotestsrc")
        .name("audio_source")
        .property("freq", freq)
        .build()?;
    let tee = gst::ElementFactory::make("tee").name("tee").build()?;
    let audio_queue = gst::ElementFactory::make("queue").name("audio_queue").build()?;
    let audio_convert = gst::ElementFactory::make("audioconvert")
        .name("audio_convert")
        .build()?;
    let audio_resample = gst::ElementFactory::make("audioresample")
        .name("audio_resample")
        .build()?;
    let audio_sink = gst::ElementFactory::make("autoaudiosink")
        .name("audio_sink")
        .build()?;
    let video_queue = gst::ElementFactory::make("queue").name("video_queue").build()?;
    let visual = gst::ElementFactory::make("wavescope")
        .name("visual")
        .property_from_str("shader", "none")
        .property_from_str("style", "lines")
        .build()?;
    let video_convert = gst::ElementFactory::make("videoconvert")
        .name("video_convert")
        .build()?;
    let video_sink = gst::ElementFactory::make("autovideosink")
        .name("video_sink")
        .build()?;

    let pipeline = gst::Pipeline::with_name("test-pipeline");
    pipeline.add_many(&[
        &audio_source,
        &tee,
        &audio_queue,
        &audio_convert,
        &audio_resample,
        &audio_sink,
        &video_queue,
        &visual,
        &video_convert,
        &video_sink,
    ])?;

    audio_source.link(&tee)?;
    gst::Element::link_many(&[&audio_queue, &audio_convert, &audio_resample, &audio_sink])?;
    gst::Element::link_many(&[&video_queue, &visual, &video_convert, &video_sink])?;

    // Request pads are safe to take while the pipeline is still in NULL.
    let tee_audio_pad = link_tee_branch(&tee, &audio_queue)?;
    let tee_video_pad = link_tee_branch(&tee, &video_queue)?;

    let result = bus::main_loop(pipeline.clone().upcast());

    tee.release_request_pad(&tee_audio_pad);
    tee.release_request_pad(&tee_video_pad);
    result
}
