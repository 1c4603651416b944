use std::path::Path;
use std::time::{Duration, Instant};

use gst_cctv_recorder::recorder::{
    Command, DisplayConfig, OutputConfig, RecordMode, RecordState, Recorder, RecorderConfig,
    RecorderEvent, SourceConfig, SourceKind,
};
use gst::prelude::*;
use gstreamer as gst;

const REQUIRED: &[&str] = &[
    "videotestsrc",
    "videoconvert",
    "tee",
    "queue",
    "fakesink",
    "valve",
    "x264enc",
    "h264parse",
    "mp4mux",
    "splitmuxsink",
    "filesink",
];

fn elements_available() -> bool {
    gst::init().unwrap();
    let missing: Vec<_> = REQUIRED
        .iter()
        .filter(|name| gst::ElementFactory::find(name).is_none())
        .collect();
    if !missing.is_empty() {
        eprintln!("skipping, missing elements: {missing:?}");
    }
    missing.is_empty()
}

fn config(dir: &Path, mode: RecordMode) -> RecorderConfig {
    let mut config = RecorderConfig::new(
        SourceConfig {
            kind: SourceKind::Test,
            uri: None,
            label: String::from("test"),
        },
        mode,
    );
    config.output = OutputConfig {
        directory: dir.to_path_buf(),
        ..OutputConfig::default()
    };
    config.display = DisplayConfig {
        sink: String::from("fakesink"),
        overlay: false,
    };
    config.finalize_timeout = Duration::from_secs(10);
    config
}

/// Polls until `want` matches an event, returning every event seen.
fn wait_for(
    recorder: &mut Recorder,
    timeout: Duration,
    mut want: impl FnMut(&RecorderEvent) -> bool,
) -> Vec<RecorderEvent> {
    let deadline = Instant::now() + timeout;
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        for event in recorder.poll(gst::ClockTime::from_mseconds(50)).unwrap() {
            let done = want(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }
    panic!("timed out, events so far: {seen:?}");
}

fn pump(recorder: &mut Recorder, duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        recorder.poll(gst::ClockTime::from_mseconds(50)).unwrap();
    }
}

/// Records one clip and returns where it was written.
fn record_clip(recorder: &mut Recorder) -> std::path::PathBuf {
    recorder.commands().send(Command::Start).unwrap();
    wait_for(recorder, Duration::from_secs(2), |e| *e == RecorderEvent::Started);
    assert_eq!(recorder.state(), RecordState::Recording);

    pump(recorder, Duration::from_millis(1500));

    recorder.commands().send(Command::Stop).unwrap();
    let events = wait_for(recorder, Duration::from_secs(10), |e| {
        matches!(e, RecorderEvent::Finished(_))
    });
    assert!(events.contains(&RecorderEvent::Stopping));
    assert_eq!(recorder.state(), RecordState::Idle);

    let Some(RecorderEvent::Finished(finished)) = events.last() else {
        unreachable!();
    };
    assert!(!finished.forced, "recording had to be torn down: {finished:?}");
    let location = finished.location.clone().expect("no location reported");
    let size = std::fs::metadata(&location).unwrap().len();
    assert!(size > 0, "{} is empty", location.display());
    location
}

fn two_recordings(mode: RecordMode) {
    if !elements_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let mut recorder = Recorder::new(&config(dir.path(), mode)).unwrap();
    recorder.play().unwrap();
    pump(&mut recorder, Duration::from_millis(500));

    let first = record_clip(&mut recorder);
    pump(&mut recorder, Duration::from_millis(500));
    let second = record_clip(&mut recorder);

    assert_ne!(first, second);
    assert!(first.starts_with(dir.path()));
    assert!(second.starts_with(dir.path()));
    recorder.shutdown().unwrap();
}

#[test]
fn valve_mode_records_twice() {
    two_recordings(RecordMode::Valve);
}

#[test]
fn pad_mode_records_twice() {
    two_recordings(RecordMode::Pad);
}

#[test]
fn rebuild_mode_records_twice() {
    two_recordings(RecordMode::Rebuild);
}

#[test]
fn refused_commands_keep_running() {
    if !elements_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let mut recorder = Recorder::new(&config(dir.path(), RecordMode::Pad)).unwrap();
    recorder.play().unwrap();

    assert_eq!(recorder.apply(Command::Stop).unwrap(), None);
    assert_eq!(recorder.state(), RecordState::Idle);

    assert_eq!(recorder.apply(Command::Start).unwrap(), Some(RecorderEvent::Started));
    assert_eq!(recorder.apply(Command::Start).unwrap(), None);
    assert_eq!(recorder.state(), RecordState::Recording);
    pump(&mut recorder, Duration::from_millis(500));

    assert_eq!(recorder.apply(Command::Toggle).unwrap(), Some(RecorderEvent::Stopping));
    assert_eq!(recorder.apply(Command::Start).unwrap(), None);
    wait_for(&mut recorder, Duration::from_secs(10), |e| {
        matches!(e, RecorderEvent::Finished(_))
    });
    recorder.shutdown().unwrap();
}

#[test]
fn quit_finalizes_the_recording_first() {
    if !elements_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let mut recorder = Recorder::new(&config(dir.path(), RecordMode::Rebuild)).unwrap();
    recorder.play().unwrap();
    recorder.apply(Command::Start).unwrap();
    pump(&mut recorder, Duration::from_millis(800));

    recorder.commands().send(Command::Quit).unwrap();
    let events = wait_for(&mut recorder, Duration::from_secs(10), |e| {
        *e == RecorderEvent::Quit
    });
    let finished = events
        .iter()
        .position(|e| matches!(e, RecorderEvent::Finished(_)))
        .expect("recording was not finished before quitting");
    assert!(finished < events.len() - 1);
    assert_eq!(recorder.state(), RecordState::Idle);
    recorder.shutdown().unwrap();
}

#[test]
fn unknown_encoder_is_reported() {
    if !elements_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), RecordMode::Valve);
    config.output.encoder = String::from("no-such-encoder");
    let err = Recorder::new(&config).err().expect("recorder built without encoder");
    assert!(format!("{err:#}").contains("no-such-encoder"));
}

/// Makes the test source stop after `buffers` frames.
fn finite_source(recorder: &Recorder, buffers: i32) {
    let source = recorder.pipeline().by_name("source").unwrap();
    source.set_property("num-buffers", buffers);
}

fn source_end_is_reported(mode: RecordMode) {
    if !elements_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let mut recorder = Recorder::new(&config(dir.path(), mode)).unwrap();
    finite_source(&recorder, 30);
    recorder.play().unwrap();

    let events = wait_for(&mut recorder, Duration::from_secs(10), |e| *e == RecorderEvent::Eos);
    assert_eq!(events.iter().filter(|e| **e == RecorderEvent::Eos).count(), 1);
    assert_eq!(recorder.state(), RecordState::Idle);

    // Reported once even though the pipeline may post its own EOS later.
    pump(&mut recorder, Duration::from_millis(300));
    recorder.shutdown().unwrap();
}

#[test]
fn valve_mode_ends_with_the_source() {
    source_end_is_reported(RecordMode::Valve);
}

#[test]
fn pad_mode_ends_with_the_source() {
    source_end_is_reported(RecordMode::Pad);
}

#[test]
fn rebuild_mode_ends_with_the_source() {
    source_end_is_reported(RecordMode::Rebuild);
}

#[test]
fn pad_mode_ends_with_the_source_after_a_recording() {
    if !elements_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let mut recorder = Recorder::new(&config(dir.path(), RecordMode::Pad)).unwrap();
    finite_source(&recorder, 150);
    recorder.play().unwrap();
    pump(&mut recorder, Duration::from_millis(300));

    record_clip(&mut recorder);
    wait_for(&mut recorder, Duration::from_secs(10), |e| *e == RecorderEvent::Eos);
    recorder.shutdown().unwrap();
}

fn has_moov(path: &Path) -> bool {
    let data = std::fs::read(path).unwrap();
    data.windows(4).any(|w| w == b"moov")
}

#[test]
fn pad_mode_finalizes_every_segment() {
    if !elements_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), RecordMode::Pad);
    config.output.segment_duration = Some(gst::ClockTime::from_seconds(1));
    let mut recorder = Recorder::new(&config).unwrap();
    recorder.play().unwrap();
    pump(&mut recorder, Duration::from_millis(300));

    recorder.apply(Command::Start).unwrap();
    pump(&mut recorder, Duration::from_millis(2500));
    recorder.apply(Command::Stop).unwrap();
    let events = wait_for(&mut recorder, Duration::from_secs(10), |e| {
        matches!(e, RecorderEvent::Finished(_))
    });
    let Some(RecorderEvent::Finished(finished)) = events.last() else {
        unreachable!();
    };
    assert!(!finished.forced);
    assert_eq!(recorder.state(), RecordState::Idle);

    let clips: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "mp4"))
        .collect();
    assert!(clips.len() >= 2, "expected several segments, got {clips:?}");
    for clip in &clips {
        assert!(has_moov(clip), "{} was not finalized", clip.display());
    }
    assert!(has_moov(finished.location.as_ref().unwrap()));
    recorder.shutdown().unwrap();
}

#[test]
fn stuck_recording_is_torn_down_after_timeout() {
    if !elements_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), RecordMode::Pad);
    config.finalize_timeout = Duration::from_millis(500);
    let mut recorder = Recorder::new(&config).unwrap();
    recorder.play().unwrap();

    recorder.apply(Command::Start).unwrap();
    pump(&mut recorder, Duration::from_millis(800));

    // Swallow the EOS so the muxer never finishes the file.
    let encoder_src = recorder
        .pipeline()
        .by_name("record-encoder")
        .unwrap()
        .static_pad("src")
        .unwrap();
    encoder_src.add_probe(gst::PadProbeType::EVENT_DOWNSTREAM, |_, info| match &info.data {
        Some(gst::PadProbeData::Event(event)) if event.type_() == gst::EventType::Eos => {
            gst::PadProbeReturn::Drop
        }
        _ => gst::PadProbeReturn::Ok,
    });

    assert_eq!(recorder.apply(Command::Stop).unwrap(), Some(RecorderEvent::Stopping));
    let events = wait_for(&mut recorder, Duration::from_secs(5), |e| {
        matches!(e, RecorderEvent::Finished(_))
    });
    let Some(RecorderEvent::Finished(finished)) = events.last() else {
        unreachable!();
    };
    assert!(finished.forced);
    assert_eq!(recorder.state(), RecordState::Idle);
    recorder.shutdown().unwrap();
}
