use std::sync::{Arc, Mutex};

use anyhow::Result;
use gst::{glib, prelude::*};
use gstreamer as gst;
use log::*;

use crate::bus::{self, ErrorMessage};

/// Network playback that holds the pipeline in PAUSED while the buffering
/// queue refills, unless the source is live.
pub fn run(uri: &str) -> Result<()> {
    let pipeline = gst::parse_launch(&format!("playbin uri={uri}"))?;

    let is_live = match pipeline.set_state(gst::State::Playing)? {
        gst::StateChangeSuccess::NoPreroll => {
            info!("is live");
            true
        }
        _ => false,
    };

    let main_loop = glib::MainLoop::new(None, false);
    let error: Arc<Mutex<Option<ErrorMessage>>> = Arc::new(Mutex::new(None));

    let bus = pipeline.bus().expect("Pipeline without bus. Shouldn't happen!");
    let _watch = bus.add_watch({
        let main_loop = main_loop.clone();
        let pipeline_weak = pipeline.downgrade();
        let error = Arc::clone(&error);
        move |_, msg| {
            let Some(pipeline) = pipeline_weak.upgrade() else {
                return glib::ControlFlow::Break;
            };

            use gst::MessageView;
            match msg.view() {
                MessageView::Error(err) => {
                    let err = ErrorMessage::from_view(err);
                    error!("{err}");
                    *error.lock().unwrap() = Some(err);
                    let _ = pipeline.set_state(gst::State::Ready);
                    main_loop.quit();
                }
                MessageView::Eos(..) => {
                    let _ = pipeline.set_state(gst::State::Ready);
                    main_loop.quit();
                }
                MessageView::Buffering(buffering) => {
                    let percent = buffering.percent();
                    if let Some(state) = bus::buffering_action(percent, is_live) {
                        print!("Buffering ({percent}%)\r");
                        if pipeline.set_state(state).is_err() {
                            warn!("failed to set {state:?} while buffering");
                        }
                    }
                }
                MessageView::ClockLost(..) => {
                    // Select a new clock
                    let _ = pipeline.set_state(gst::State::Paused);
                    let _ = pipeline.set_state(gst::State::Playing);
                }
                _ => (),
            }
            glib::ControlFlow::Continue
        }
    })?;

    main_loop.run();
    pipeline.set_state(gst::State::Null)?;

    let error = error.lock().unwrap().take();
    match error {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}
