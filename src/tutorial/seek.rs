use std::io::Write;

use anyhow::Result;
use gst::prelude::*;
use gstreamer as gst;
use log::*;

use crate::bus::{self, ErrorMessage};

struct PlaybackState {
    playing: bool,
    terminate: bool,
    seek_enabled: bool,
    seek_done: bool,
    duration: Option<gst::ClockTime>,
}

/// Whether the one-shot seek should fire at `position`.
fn should_seek(
    seek_enabled: bool,
    seek_done: bool,
    position: Option<gst::ClockTime>,
    seek_at: gst::ClockTime,
) -> bool {
    seek_enabled && !seek_done && position.map_or(false, |p| p > seek_at)
}

pub fn format_position(
    position: Option<gst::ClockTime>,
    duration: Option<gst::ClockTime>,
) -> Option<String> {
    let (position, duration) = (position?, duration?);
    Some(format!(
        "Position {:.2}s / {:.2}s",
        position.mseconds() as f64 / 1000.,
        duration.mseconds() as f64 / 1000.
    ))
}

fn handle_message(playbin: &gst::Element, state: &mut PlaybackState, msg: &gst::Message) -> Result<()> {
    use gst::MessageView;

    match msg.view() {
        MessageView::Error(err) => {
            state.terminate = true;
            return Err(ErrorMessage::from_view(err).into());
        }
        MessageView::Eos(..) => {
            println!("\nEnd-Of-Stream reached.");
            state.terminate = true;
        }
        MessageView::DurationChanged(..) => state.duration = None,
        MessageView::StateChanged(s) if bus::is_from(msg, playbin) => {
            info!("Pipeline state changed from {:?} to {:?}", s.old(), s.current());

            state.playing = s.current() == gst::State::Playing;
            if state.playing {
                let mut query = gst::query::Seeking::new(gst::Format::Time);
                if playbin.query(&mut query) {
                    let (seekable, start, end) = query.result();
                    state.seek_enabled = seekable;
                    if seekable {
                        info!("Seeking is ENABLED from {start} to {end}");
                    } else {
                        info!("Seeking is DISABLED for this stream.");
                    }
                } else {
                    warn!("Seeking query failed.");
                }
            }
        }
        _ => (),
    }
    Ok(())
}

pub fn run(uri: &str, seek_at: gst::ClockTime, seek_to: gst::ClockTime) -> Result<()> {
    let playbin = gst::ElementFactory::make("playbin")
        .name("playbin")
        .property("uri", uri)
        .build()?;

    playbin.set_state(gst::State::Playing)?;

    let bus = playbin.bus().expect("Pipeline without bus. Shouldn't happen!");
    let mut state = PlaybackState {
        playing: false,
        terminate: false,
        seek_enabled: false,
        seek_done: false,
        duration: gst::ClockTime::NONE,
    };

    let mut result = Ok(());
    while !state.terminate {
        let msg = bus.timed_pop_filtered(
            gst::ClockTime::from_mseconds(100),
            &[
                gst::MessageType::StateChanged,
                gst::MessageType::Error,
                gst::MessageType::Eos,
                gst::MessageType::DurationChanged,
            ],
        );

        match msg {
            Some(msg) => {
                if let Err(err) = handle_message(&playbin, &mut state, &msg) {
                    error!("{err}");
                    result = Err(err);
                }
            }
            None if state.playing => {
                let position = playbin.query_position::<gst::ClockTime>();
                if position.is_none() {
                    warn!("Could not query current position.");
                }
                if state.duration.is_none() {
                    state.duration = playbin.query_duration::<gst::ClockTime>();
                }

                if let Some(line) = format_position(position, state.duration) {
                    print!("{line}\r");
                    let _ = std::io::stdout().flush();
                }

                if should_seek(state.seek_enabled, state.seek_done, position, seek_at) {
                    println!("\nReached {seek_at}, performing seek...");
                    playbin.seek_simple(gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT, seek_to)?;
                    state.seek_done = true;
                }
            }
            None => (),
        }
    }

    playbin.set_state(gst::State::Null)?;
    result
}
