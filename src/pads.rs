use anyhow::{Context, Result};
use gst::prelude::*;
use gstreamer as gst;
use log::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    RawAudio,
    RawVideo,
    Audio,
    Video,
    /// Playlist or transport stream coming out of an HLS demuxer.
    Container,
    Other,
}

impl StreamKind {
    pub fn of(media_type: &str) -> Self {
        match media_type {
            "application/x-hls" | "video/mp2t" | "video/mpegts" => StreamKind::Container,
            t if t.starts_with("audio/x-raw") => StreamKind::RawAudio,
            t if t.starts_with("video/x-raw") => StreamKind::RawVideo,
            t if t.starts_with("audio/") => StreamKind::Audio,
            t if t.starts_with("video/") => StreamKind::Video,
            _ => StreamKind::Other,
        }
    }

    pub fn is_video(self) -> bool {
        matches!(self, StreamKind::RawVideo | StreamKind::Video)
    }

    pub fn is_audio(self) -> bool {
        matches!(self, StreamKind::RawAudio | StreamKind::Audio)
    }
}

/// Media type of the first caps structure. Pads that have not negotiated
/// yet are asked what they could produce instead.
pub fn media_type(pad: &gst::Pad) -> Option<String> {
    let caps = pad.current_caps().unwrap_or_else(|| pad.query_caps(None));
    caps.structure(0).map(|s| s.name().to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    AlreadyLinked,
    Ignored(String),
    Linked(String),
    Failed(String),
}

impl LinkOutcome {
    pub fn log(&self, src_pad: &gst::Pad) {
        match self {
            LinkOutcome::AlreadyLinked => info!("We are already linked. Ignoring {}.", src_pad.name()),
            LinkOutcome::Ignored(t) => info!("It has type {t} which is not accepted. Ignoring."),
            LinkOutcome::Linked(t) => info!("Link succeeded (type {t})."),
            LinkOutcome::Failed(t) => warn!("Type is {t} but link failed."),
        }
    }
}

/// Links a freshly added `src_pad` to `sink_pad` when its stream kind passes
/// `accept` and the sink is still free.
pub fn link_matching(
    src_pad: &gst::Pad,
    sink_pad: &gst::Pad,
    accept: impl Fn(StreamKind) -> bool,
) -> LinkOutcome {
    if sink_pad.is_linked() {
        return LinkOutcome::AlreadyLinked;
    }

    let Some(media_type) = media_type(src_pad) else {
        return LinkOutcome::Ignored(String::from("unknown"));
    };
    if !accept(StreamKind::of(&media_type)) {
        return LinkOutcome::Ignored(media_type);
    }

    match src_pad.link(sink_pad) {
        Ok(_) => LinkOutcome::Linked(media_type),
        Err(_) => LinkOutcome::Failed(media_type),
    }
}

/// Requests a new tee source pad and links it to the branch head.
pub fn link_tee_branch(tee: &gst::Element, head: &gst::Element) -> Result<gst::Pad> {
    let sink_pad = head.static_pad("sink").context("branch head without sink pad")?;
    link_tee_pad(tee, &sink_pad)
}

pub fn link_tee_pad(tee: &gst::Element, sink_pad: &gst::Pad) -> Result<gst::Pad> {
    let tee_pad = tee
        .request_pad_simple("src_%u")
        .context("tee refused a request pad")?;
    if let Err(err) = tee_pad.link(sink_pad) {
        tee.release_request_pad(&tee_pad);
        return Err(err).with_context(|| format!("failed to link {}", tee_pad.name()));
    }
    info!("Obtained request pad {} for {}", tee_pad.name(), sink_pad.name());
    Ok(tee_pad)
}

/// Terminates an unwanted stream so that the demuxer producing it never
/// blocks on a not-linked pad.
pub fn drain_into_fakesink(bin: &gst::Bin, src_pad: &gst::Pad) -> Result<gst::Element> {
    let fakesink = gst::ElementFactory::make("fakesink")
        .property("sync", false)
        .property("async", false)
        .build()?;
    bin.add(&fakesink)?;
    let sink_pad = fakesink
        .static_pad("sink")
        .context("fakesink without sink pad")?;
    src_pad
        .link(&sink_pad)
        .with_context(|| format!("failed to drain {} into fakesink", src_pad.name()))?;
    fakesink.sync_state_with_parent()?;
    debug!("draining {} into {}", src_pad.name(), fakesink.name());
    Ok(fakesink)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_media_types() {
        assert_eq!(StreamKind::of("audio/x-raw"), StreamKind::RawAudio);
        assert_eq!(StreamKind::of("video/x-raw"), StreamKind::RawVideo);
        assert_eq!(StreamKind::of("video/x-h264"), StreamKind::Video);
        assert_eq!(StreamKind::of("audio/mpeg"), StreamKind::Audio);
        assert_eq!(StreamKind::of("video/mpegts"), StreamKind::Container);
        assert_eq!(StreamKind::of("video/mp2t"), StreamKind::Container);
        assert_eq!(StreamKind::of("application/x-hls"), StreamKind::Container);
        assert_eq!(StreamKind::of("text/x-raw"), StreamKind::Other);
        assert!(StreamKind::RawVideo.is_video());
        assert!(!StreamKind::Container.is_video());
        assert!(StreamKind::Audio.is_audio());
    }

    fn src_pad_with_caps(media_type: &str) -> gst::Pad {
        let caps = gst::Caps::new_empty_simple(media_type);
        let templ =
            gst::PadTemplate::new("src", gst::PadDirection::Src, gst::PadPresence::Always, &caps)
                .unwrap();
        gst::Pad::builder_from_template(&templ).name("src").build()
    }

    fn sink_pad() -> gst::Pad {
        gst::Pad::builder(gst::PadDirection::Sink).name("sink").build()
    }

    #[test]
    fn links_accepted_streams_once() {
        gst::init().unwrap();
        let src = src_pad_with_caps("audio/x-raw");
        let sink = sink_pad();

        let outcome = link_matching(&src, &sink, StreamKind::is_audio);
        assert_eq!(outcome, LinkOutcome::Linked(String::from("audio/x-raw")));

        let other = src_pad_with_caps("audio/x-raw");
        assert_eq!(
            link_matching(&other, &sink, StreamKind::is_audio),
            LinkOutcome::AlreadyLinked
        );
    }

    #[test]
    fn ignores_rejected_streams() {
        gst::init().unwrap();
        let src = src_pad_with_caps("video/x-raw");
        let sink = sink_pad();

        let outcome = link_matching(&src, &sink, |k| k == StreamKind::RawAudio);
        assert_eq!(outcome, LinkOutcome::Ignored(String::from("video/x-raw")));
        assert!(!sink.is_linked());
    }
}
