//! Small stand-alone programs, each exercising one part of the GStreamer
//! API: dynamic pads, seeking, stream tags, capabilities, request pads,
//! application sources/sinks and buffering.

pub mod appsrc;
pub mod caps;
pub mod dynamic;
pub mod seek;
pub mod streaming;
pub mod streams;
pub mod tee;

use anyhow::Result;
use gstreamer as gst;

use crate::bus;

/// Runs a `gst-launch-1.0` style pipeline description.
pub fn launch(description: &str) -> Result<()> {
    let pipeline = gst::parse_launch(description)?;
    bus::main_loop(pipeline)
}
