//! Encoder and muxer elements shared by the recording branches.

use std::path::PathBuf;

use anyhow::{Context, Result};
use gst::prelude::*;
use gstreamer as gst;
use gstreamer_video as gst_video;
use log::*;

use super::config::OutputConfig;

pub fn encoder(output: &OutputConfig, name: &str) -> Result<gst::Element> {
    let encoder = gst::ElementFactory::make(&output.encoder)
        .name(name)
        .build()
        .with_context(|| format!("failed to create encoder {}", output.encoder))?;
    if encoder.find_property("tune").is_some() {
        encoder.set_property_from_str("tune", "zerolatency");
    }
    if encoder.find_property("key-int-max").is_some() {
        encoder.set_property("key-int-max", output.key_int_max);
    }
    Ok(encoder)
}

pub fn h264parse(name: &str) -> Result<gst::Element> {
    Ok(gst::ElementFactory::make("h264parse")
        .name(name)
        .property("config-interval", 1i32)
        .build()?)
}

pub fn splitmuxsink(output: &OutputConfig, name: &str) -> Result<gst::Element> {
    let location = output.location_pattern();
    let location = location
        .to_str()
        .with_context(|| format!("output location {} is not valid UTF-8", location.display()))?;

    let sink = gst::ElementFactory::make("splitmuxsink")
        .name(name)
        .property("location", location)
        .property("muxer-factory", output.muxer.as_str())
        .property("async-finalize", true)
        .property("async-handling", true)
        .build()
        .context("failed to create splitmuxsink")?;

    if let Some(duration) = output.segment_duration {
        sink.set_property("max-size-time", duration.nseconds());
        sink.set_property("send-keyframe-requests", true);
    }
    Ok(sink)
}

/// Asks the encoder upstream of `pad` for a key frame so a new file can
/// start right away.
pub fn request_key_unit(pad: &gst::Pad) {
    let event = gst_video::UpstreamForceKeyUnitEvent::builder()
        .all_headers(true)
        .build();
    if !pad.send_event(event) {
        debug!("key unit request on {} was not handled", pad.name());
    }
}

/// Contents of a `splitmuxsink-fragment-closed` element message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentClosed {
    pub location: PathBuf,
    pub running_time: Option<gst::ClockTime>,
}

impl FragmentClosed {
    pub fn from_message(msg: &gst::MessageRef) -> Option<Self> {
        let gst::MessageView::Element(element) = msg.view() else {
            return None;
        };
        let s = element.structure()?;
        if !s.has_name("splitmuxsink-fragment-closed") {
            return None;
        }
        let location = s.get::<String>("location").ok()?;
        Some(FragmentClosed {
            location: PathBuf::from(location),
            running_time: s.get::<u64>("running-time").ok().map(gst::ClockTime::from_nseconds),
        })
    }
}

/// Location of a `splitmuxsink-fragment-opened` element message.
pub fn fragment_opened(msg: &gst::MessageRef) -> Option<PathBuf> {
    let gst::MessageView::Element(element) = msg.view() else {
        return None;
    };
    let s = element.structure()?;
    if !s.has_name("splitmuxsink-fragment-opened") {
        return None;
    }
    s.get::<String>("location").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element_message(structure: gst::Structure) -> gst::Message {
        gst::message::Element::new(structure)
    }

    #[test]
    fn parses_fragment_closed() {
        gst::init().unwrap();
        let msg = element_message(
            gst::Structure::builder("splitmuxsink-fragment-closed")
                .field("location", "/tmp/clip-001.mp4")
                .field("running-time", 2_000_000_000u64)
                .build(),
        );
        let closed = FragmentClosed::from_message(&msg).unwrap();
        assert_eq!(closed.location, PathBuf::from("/tmp/clip-001.mp4"));
        assert_eq!(closed.running_time, Some(gst::ClockTime::from_seconds(2)));
        assert_eq!(fragment_opened(&msg), None);
    }

    #[test]
    fn parses_fragment_opened() {
        gst::init().unwrap();
        let msg = element_message(
            gst::Structure::builder("splitmuxsink-fragment-opened")
                .field("location", "clip-000.mp4")
                .field("running-time", 0u64)
                .build(),
        );
        assert_eq!(fragment_opened(&msg), Some(PathBuf::from("clip-000.mp4")));
        assert_eq!(FragmentClosed::from_message(&msg), None);
    }

    #[test]
    fn ignores_other_messages() {
        gst::init().unwrap();
        let msg = element_message(gst::Structure::new_empty("level"));
        assert_eq!(FragmentClosed::from_message(&msg), None);
        assert_eq!(FragmentClosed::from_message(&gst::message::Eos::new()), None);
    }

    #[test]
    fn splitmuxsink_uses_output_settings() {
        gst::init().unwrap();
        if gst::ElementFactory::find("splitmuxsink").is_none() {
            return;
        }
        let output = OutputConfig {
            directory: PathBuf::from("/tmp"),
            segment_duration: Some(gst::ClockTime::from_seconds(10)),
            ..OutputConfig::default()
        };
        let sink = splitmuxsink(&output, "sink").unwrap();
        assert_eq!(
            sink.property::<Option<String>>("location").as_deref(),
            Some("/tmp/clip-%03d.mp4")
        );
        assert_eq!(sink.property::<u64>("max-size-time"), 10_000_000_000);
        assert!(sink.property::<bool>("async-finalize"));
    }
}
