use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Error};
use clap::{Args, Parser, Subcommand};
use gstreamer as gst;
use log::*;

use gst_cctv_recorder::cctv::{self, CctvClient, CctvQuery};
use gst_cctv_recorder::recorder::{
    command, DisplayConfig, OutputConfig, RecordMode, Recorder, RecorderConfig, Schedule,
    SourceConfig, SourceKind,
};
use gst_cctv_recorder::{run, tutorial};

const DEFAULT_URI: &str =
    "https://gstreamer.freedesktop.org/data/media/sintel_trailer-480p.webm";

#[derive(Debug, Parser)]
#[command(version, about = "GStreamer pipelines from basic playback to CCTV recording")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Plays a URI, linking the decoder's pads as they appear.
    Dynamic {
        #[arg(long, default_value = DEFAULT_URI)]
        uri: String,
        /// Play the video stream instead of the audio stream.
        #[arg(long)]
        video: bool,
    },
    /// Plays a URI and jumps once the position passes a mark.
    Seek {
        #[arg(long, default_value = DEFAULT_URI)]
        uri: String,
        /// Seconds of playback before seeking.
        #[arg(long, default_value_t = 10)]
        seek_at: u64,
        /// Position to seek to, in seconds.
        #[arg(long, default_value_t = 30)]
        seek_to: u64,
    },
    /// Lists the video, audio and subtitle streams of a URI.
    Streams {
        #[arg(long, default_value = DEFAULT_URI)]
        uri: String,
    },
    /// Prints pad templates and negotiated caps while a pipeline starts.
    Caps {
        #[arg(long, default_value = "audiotestsrc")]
        source: String,
        #[arg(long, default_value = "autoaudiosink")]
        sink: String,
    },
    /// Splits a test tone into an audio branch and a waveform branch.
    Tee {
        #[arg(long, default_value_t = 215.0)]
        freq: f64,
    },
    /// Generates audio in the application and reads it back.
    Appsrc,
    /// Network playback with buffering and clock-loss handling.
    Stream {
        #[arg(long, default_value = DEFAULT_URI)]
        uri: String,
    },
    /// Runs a textual pipeline description.
    Launch {
        #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
        description: Vec<String>,
    },
    /// Lists the CCTV cameras returned by the ITS open API.
    Cctv(ApiArgs),
    /// Displays a live stream and records it on demand.
    Record(RecordArgs),
}

#[derive(Debug, Args)]
struct ApiArgs {
    #[arg(long, env = "ITS_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    #[arg(long, default_value = cctv::DEFAULT_ENDPOINT)]
    endpoint: String,
    /// `ex` for expressways, `its` for national roads.
    #[arg(long, default_value = "ex")]
    road_type: String,
    #[arg(long, default_value_t = 1)]
    cctv_type: u8,
    #[arg(long, default_value_t = 126.8)]
    min_x: f64,
    #[arg(long, default_value_t = 127.89)]
    max_x: f64,
    #[arg(long, default_value_t = 34.9)]
    min_y: f64,
    #[arg(long, default_value_t = 35.1)]
    max_y: f64,
}

impl ApiArgs {
    fn query(&self) -> CctvQuery {
        CctvQuery {
            road_type: self.road_type.clone(),
            cctv_type: self.cctv_type,
            min_x: self.min_x,
            max_x: self.max_x,
            min_y: self.min_y,
            max_y: self.max_y,
        }
    }

    fn client(&self) -> Result<CctvClient, Error> {
        let api_key = self
            .api_key
            .as_deref()
            .context("an ITS API key is required (--api-key or ITS_API_KEY)")?;
        CctvClient::new(&self.endpoint, api_key)
    }
}

#[derive(Debug, Args)]
struct RecordArgs {
    /// Stream to open, defaults to a live test pattern.
    #[arg(long, conflicts_with = "cctv")]
    uri: Option<String>,
    /// Record the camera at this index of the CCTV API listing.
    #[arg(long, value_name = "INDEX")]
    cctv: Option<usize>,
    #[arg(long, value_enum)]
    source: Option<SourceKind>,
    #[command(flatten)]
    api: ApiArgs,
    #[arg(long, value_enum, default_value_t = RecordMode::Pad)]
    mode: RecordMode,
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
    /// File name pattern, `%03d` is replaced by the recording number.
    #[arg(long, default_value = "clip-%03d.mp4")]
    pattern: String,
    #[arg(long, default_value = "x264enc")]
    encoder: String,
    #[arg(long, default_value = "mp4mux")]
    muxer: String,
    #[arg(long, default_value_t = 30)]
    key_int_max: u32,
    /// Split recordings into files of this many seconds (valve and pad modes).
    #[arg(long)]
    segment_secs: Option<u64>,
    #[arg(long, default_value = "autovideosink")]
    sink: String,
    #[arg(long)]
    no_overlay: bool,
    /// Overlay label, defaults to the camera name or URI.
    #[arg(long)]
    label: Option<String>,
    /// Timed commands, e.g. `2:start,5:stop,7:quit`.
    #[arg(long)]
    schedule: Option<Schedule>,
    /// Read r/s/x/q commands from stdin.
    #[arg(long)]
    interactive: bool,
    /// Seconds to wait for a stopped recording to be finalized.
    #[arg(long, default_value_t = 30)]
    finalize_timeout: u64,
}

fn list_cameras(api: &ApiArgs) -> Result<(), Error> {
    let cameras = api.client()?.fetch(&api.query())?;
    if cameras.is_empty() {
        println!("No cameras found");
    }
    for (index, camera) in cameras.iter().enumerate() {
        println!("{index:3}: {}", camera.name);
        println!("     {}", camera.url);
        if let (Some(x), Some(y)) = (camera.coord_x, camera.coord_y) {
            println!("     at {x:.5}, {y:.5}");
        }
    }
    Ok(())
}

fn record(args: RecordArgs) -> Result<(), Error> {
    let (uri, name) = match (&args.uri, args.cctv) {
        (Some(uri), _) => (Some(uri.clone()), uri.clone()),
        (None, Some(index)) => {
            let camera = args.api.client()?.stream_uri(&args.api.query(), index)?;
            info!("camera {index}: {} ({})", camera.name, camera.url);
            (Some(camera.url), camera.name)
        }
        (None, None) => (None, String::from("test pattern")),
    };
    let kind = match (args.source, &uri) {
        (Some(kind), _) => kind,
        (None, Some(_)) => SourceKind::Uri,
        (None, None) => SourceKind::Test,
    };

    let mut config = RecorderConfig::new(
        SourceConfig {
            kind,
            uri,
            label: args.label.unwrap_or(name),
        },
        args.mode,
    );
    config.output = OutputConfig {
        directory: args.output_dir,
        pattern: args.pattern,
        encoder: args.encoder,
        muxer: args.muxer,
        key_int_max: args.key_int_max,
        segment_duration: args.segment_secs.map(gst::ClockTime::from_seconds),
    };
    config.display = DisplayConfig {
        sink: args.sink,
        overlay: !args.no_overlay,
    };
    config.finalize_timeout = Duration::from_secs(args.finalize_timeout);

    std::fs::create_dir_all(&config.output.directory).with_context(|| {
        format!("failed to create {}", config.output.directory.display())
    })?;

    let recorder = Recorder::new(&config)?;
    if let Some(schedule) = args.schedule {
        command::spawn_schedule(schedule, recorder.commands());
    }
    if args.interactive {
        command::spawn_stdin(recorder.commands());
    }
    recorder.run()
}

fn dispatch(cli: Cli) -> Result<(), Error> {
    gst::init()?;

    match cli.command {
        Commands::Dynamic { uri, video } => tutorial::dynamic::run(&uri, video),
        Commands::Seek {
            uri,
            seek_at,
            seek_to,
        } => tutorial::seek::run(
            &uri,
            gst::ClockTime::from_seconds(seek_at),
            gst::ClockTime::from_seconds(seek_to),
        ),
        Commands::Streams { uri } => tutorial::streams::run(&uri),
        Commands::Caps { source, sink } => tutorial::caps::run(&source, &sink),
        Commands::Tee { freq } => tutorial::tee::run(freq),
        Commands::Appsrc => tutorial::appsrc::run(),
        Commands::Stream { uri } => tutorial::streaming::run(&uri),
        Commands::Launch { description } => tutorial::launch(&description.join(" ")),
        Commands::Cctv(api) => list_cameras(&api),
        Commands::Record(args) => record(args),
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    if let Err(e) = run::run(move || dispatch(cli)) {
        eprintln!("Error! {e:#}");
        std::process::exit(1);
    }
}
