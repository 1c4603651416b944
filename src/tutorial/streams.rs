use anyhow::Result;
use gst::prelude::*;
use gstreamer as gst;
use log::*;

use crate::bus::{self, ErrorMessage};
use crate::tutorial::seek::format_position;

const TAGS_CHANGED: &str = "tags-changed";

/// Per-stream metadata gathered from playbin's tag lists.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct StreamReport {
    pub kind: &'static str,
    pub index: i32,
    pub codec: Option<String>,
    pub language: Option<String>,
    pub bitrate: Option<u32>,
}

impl StreamReport {
    fn from_tags(kind: &'static str, index: i32, tags: &gst::TagListRef) -> Self {
        let codec = match kind {
            "video" => tags.get::<gst::tags::VideoCodec>().map(|t| t.get().to_owned()),
            "audio" => tags.get::<gst::tags::AudioCodec>().map(|t| t.get().to_owned()),
            _ => None,
        };
        StreamReport {
            kind,
            index,
            codec,
            language: tags
                .get::<gst::tags::LanguageCode>()
                .map(|t| t.get().to_owned()),
            bitrate: tags.get::<gst::tags::Bitrate>().map(|t| t.get()),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![format!("{} stream {}:", self.kind, self.index)];
        if let Some(codec) = &self.codec {
            lines.push(format!("  codec: {codec}"));
        } else if self.kind == "video" {
            lines.push(String::from("  codec: unknown"));
        }
        if let Some(language) = &self.language {
            lines.push(format!("  language: {language}"));
        }
        if let Some(bitrate) = self.bitrate {
            lines.push(format!("  bitrate: {bitrate}"));
        }
        lines
    }
}

fn analyze_streams(playbin: &gst::Element) -> Vec<StreamReport> {
    let mut reports = Vec::new();
    for (kind, count, signal) in [
        ("video", "n-video", "get-video-tags"),
        ("audio", "n-audio", "get-audio-tags"),
        ("subtitle", "n-text", "get-text-tags"),
    ] {
        let n = playbin.property::<i32>(count);
        for i in 0..n {
            if let Some(tags) = playbin.emit_by_name::<Option<gst::TagList>>(signal, &[&i]) {
                reports.push(StreamReport::from_tags(kind, i, &tags));
            }
        }
    }
    reports
}

/// Tag signals are emitted from streaming threads; turn them into an
/// application message so the report is produced on the bus thread.
fn post_tags_changed(playbin: &gst::Element) {
    let msg = gst::message::Application::builder(gst::Structure::new_empty(TAGS_CHANGED))
        .src(playbin)
        .build();
    if playbin.post_message(msg).is_err() {
        warn!("failed to post {TAGS_CHANGED}");
    }
}

pub fn run(uri: &str) -> Result<()> {
    let playbin = gst::ElementFactory::make("playbin")
        .name("playbin")
        .property("uri", uri)
        .build()?;

    for signal in ["video-tags-changed", "audio-tags-changed", "text-tags-changed"] {
        playbin.connect(signal, false, |args| {
            if let Ok(playbin) = args[0].get::<gst::Element>() {
                post_tags_changed(&playbin);
            }
            None
        });
    }

    playbin.set_state(gst::State::Playing)?;
    let bus = playbin.bus().expect("Pipeline without bus. Shouldn't happen!");

    let mut state = gst::State::Null;
    let mut duration = gst::ClockTime::NONE;
    let mut result = Ok(());

    loop {
        let Some(msg) = bus.timed_pop(gst::ClockTime::SECOND) else {
            if state >= gst::State::Paused {
                if duration.is_none() {
                    duration = playbin.query_duration::<gst::ClockTime>();
                }
                let position = playbin.query_position::<gst::ClockTime>();
                if let Some(line) = format_position(position, duration) {
                    println!("{line}");
                }
            }
            continue;
        };

        use gst::MessageView;
        match msg.view() {
            MessageView::Error(err) => {
                let err = ErrorMessage::from_view(err);
                error!("{err}");
                result = Err(err.into());
                break;
            }
            MessageView::Eos(..) => {
                println!("End-Of-Stream reached.");
                break;
            }
            MessageView::StateChanged(s) if bus::is_from(&msg, &playbin) => {
                state = s.current();
                info!("State set to {:?}", state);
            }
            MessageView::DurationChanged(..) => duration = None,
            MessageView::Application(app)
                if app.structure().map_or(false, |s| s.has_name(TAGS_CHANGED)) =>
            {
                for report in analyze_streams(&playbin) {
                    for line in report.lines() {
                        println!("{line}");
                    }
                }
            }
            _ => (),
        }
    }

    playbin.set_state(gst::State::Ready)?;
    playbin.set_state(gst::State::Null)?;
    result
}
