use anyhow::{Context, Result};
use gst::prelude::*;
use gstreamer as gst;

use super::config::DisplayConfig;
use crate::overlay::{self, RecIndicator};
use crate::pads::link_tee_branch;

/// Adds the always-on display branch behind `tee`, optionally with the
/// recording overlay in front of the sink. Returns the sink.
pub fn add_display(
    pipeline: &gst::Pipeline,
    tee: &gst::Element,
    display: &DisplayConfig,
    indicator: Option<&RecIndicator>,
) -> Result<gst::Element> {
    let queue = gst::ElementFactory::make("queue").name("display-queue").build()?;
    let convert = gst::ElementFactory::make("videoconvert")
        .name("display-convert")
        .build()?;
    let sink = gst::ElementFactory::make(&display.sink)
        .name("display-sink")
        .build()
        .with_context(|| format!("failed to create display sink {}", display.sink))?;

    let mut elements = vec![queue.clone(), convert];
    if let Some(indicator) = indicator {
        elements.push(overlay::rec_overlay(indicator.clone())?);
        elements.push(
            gst::ElementFactory::make("videoconvert")
                .name("overlay-convert")
                .build()?,
        );
    }
    elements.push(sink.clone());

    pipeline.add_many(&elements)?;
    gst::Element::link_many(&elements)?;
    link_tee_branch(tee, &queue)?;
    Ok(sink)
}
