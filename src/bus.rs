use anyhow::Error;
use derive_more::{Display, Error};
use gst::{glib, prelude::*};
use gstreamer as gst;
use log::*;

#[derive(Debug, Display, Error)]
#[display(fmt = "Received error from {src}: {error} (debug: {debug:?})")]
pub struct ErrorMessage {
    pub src: glib::GString,
    pub error: glib::Error,
    pub debug: Option<glib::GString>,
}

impl ErrorMessage {
    pub fn from_view(err: &gst::message::Error) -> Self {
        ErrorMessage {
            src: err
                .src()
                .map(|s| s.path_string())
                .unwrap_or_else(|| glib::GString::from("None")),
            error: err.error(),
            debug: err.debug(),
        }
    }
}

/// Returns true if `msg` was posted by `object` itself.
pub fn is_from(msg: &gst::MessageRef, object: &impl IsA<gst::Object>) -> bool {
    msg.src() == Some(object.upcast_ref::<gst::Object>())
}

/// What a buffering message asks of a non-live pipeline.
pub fn buffering_action(percent: i32, is_live: bool) -> Option<gst::State> {
    if is_live {
        None
    } else if percent < 100 {
        Some(gst::State::Paused)
    } else {
        Some(gst::State::Playing)
    }
}

/// With `message-forward` enabled a bin wraps the EOS of each of its sinks into
/// a `GstBinForwarded` element message. Returns the object that went EOS.
pub fn forwarded_eos_source(msg: &gst::MessageRef) -> Option<gst::Object> {
    let gst::MessageView::Element(element) = msg.view() else {
        return None;
    };
    let s = element.structure()?;
    if !s.has_name("GstBinForwarded") {
        return None;
    }
    let inner = s.get::<gst::Message>("message").ok()?;
    if inner.type_() != gst::MessageType::Eos {
        return None;
    }
    inner.src().cloned()
}

pub fn log_state_changed(pipeline: &gst::Element, msg: &gst::MessageRef) {
    if let gst::MessageView::StateChanged(s) = msg.view() {
        if is_from(msg, pipeline) {
            info!(
                "State changed from {:?}: {:?} -> {:?} ({:?})",
                s.src().map(|s| s.path_string()),
                s.old(),
                s.current(),
                s.pending()
            );
        }
    }
}

/// Plays `pipeline` until EOS or an error is posted, then shuts it down.
pub fn main_loop(pipeline: gst::Element) -> Result<(), Error> {
    pipeline.set_state(gst::State::Playing)?;

    let bus = pipeline
        .bus()
        .expect("Pipeline without bus. Shouldn't happen!");

    let mut result = Ok(());
    for msg in bus.iter_timed(gst::ClockTime::NONE) {
        use gst::MessageView;

        match msg.view() {
            MessageView::Eos(..) => {
                info!("End-Of-Stream reached");
                break;
            }
            MessageView::Error(err) => {
                let err = ErrorMessage::from_view(err);
                error!("{err}");
                result = Err(err.into());
                break;
            }
            MessageView::StateChanged(..) => log_state_changed(&pipeline, &msg),
            _ => (),
        }
    }

    pipeline.set_state(gst::State::Null)?;

    result
}
