use anyhow::{Context, Result};
use gst::prelude::*;
use gstreamer as gst;
use log::*;

use super::config::{SourceConfig, SourceKind};
use crate::pads::{self, LinkOutcome, StreamKind};

/// Adds the configured source to `pipeline` and arranges for its video to
/// reach `head`. Decoded streams other than the first video are drained.
pub fn add_source(pipeline: &gst::Pipeline, source: &SourceConfig, head: &gst::Element) -> Result<()> {
    let head_sink = head.static_pad("sink").context("source head without sink pad")?;

    match source.kind {
        SourceKind::Test => {
            let src = gst::ElementFactory::make("videotestsrc")
                .name("source")
                .property("is-live", true)
                .property_from_str("pattern", "ball")
                .build()?;
            pipeline.add(&src)?;
            src.link(head)?;
        }
        SourceKind::Uri => {
            let uri = source.uri.as_deref().context("uri source without a URI")?;
            let src = gst::ElementFactory::make("uridecodebin")
                .name("source")
                .property("uri", uri)
                .build()?;
            pipeline.add(&src)?;
            src.connect_pad_added(route_decoded(pipeline, head_sink));
        }
        SourceKind::Hls => {
            let uri = source.uri.as_deref().context("hls source without a URI")?;
            let src = gst::ElementFactory::make("souphttpsrc")
                .name("source")
                .property("location", uri)
                .build()?;
            let demux = gst::ElementFactory::make("hlsdemux").name("demux").build()?;
            let decode = gst::ElementFactory::make("decodebin").name("decode").build()?;
            pipeline.add_many(&[&src, &demux, &decode])?;
            src.link(&demux)?;

            let decode_sink = decode.static_pad("sink").context("decodebin without sink pad")?;
            let pipeline_weak = pipeline.downgrade();
            demux.connect_pad_added(move |demux, src_pad| {
                info!("Received new pad {} from {}", src_pad.name(), demux.name());
                // The variant stream may not have caps until it is typefound.
                let kind = pads::media_type(src_pad).map(|t| StreamKind::of(&t));
                let wanted = !matches!(kind, Some(k) if k.is_audio()) && !decode_sink.is_linked();
                if wanted {
                    match src_pad.link(&decode_sink) {
                        Ok(_) => {
                            info!("Linked {} to decodebin", src_pad.name());
                            return;
                        }
                        Err(err) => warn!("failed to link {} to decodebin: {err}", src_pad.name()),
                    }
                }
                let Some(pipeline) = pipeline_weak.upgrade() else {
                    return;
                };
                if let Err(err) = pads::drain_into_fakesink(pipeline.upcast_ref(), src_pad) {
                    warn!("{err:#}");
                }
            });
            decode.connect_pad_added(route_decoded(pipeline, head_sink));
        }
    }
    Ok(())
}

/// `pad-added` handler sending the first video stream to `head_sink` and
/// everything else into a fakesink.
fn route_decoded(
    pipeline: &gst::Pipeline,
    head_sink: gst::Pad,
) -> impl Fn(&gst::Element, &gst::Pad) + Send + Sync + 'static {
    let pipeline_weak = pipeline.downgrade();
    move |src, src_pad| {
        info!("Received new pad {} from {}", src_pad.name(), src.name());
        let outcome = pads::link_matching(src_pad, &head_sink, StreamKind::is_video);
        outcome.log(src_pad);
        if let LinkOutcome::Linked(_) = outcome {
            return;
        }

        let Some(pipeline) = pipeline_weak.upgrade() else {
            return;
        };
        if let Err(err) = pads::drain_into_fakesink(pipeline.upcast_ref(), src_pad) {
            warn!("{err:#}");
        }
    }
}
