use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use gstreamer as gst;

/// How the recording branch is attached to the tee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RecordMode {
    /// Permanently linked branch gated by a `valve`.
    Valve,
    /// Prebuilt branch linked to and unlinked from a tee request pad.
    Pad,
    /// Fresh bin created for every recording and removed afterwards.
    Rebuild,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// Anything `uridecodebin` can open.
    Uri,
    /// HTTP live stream demuxed explicitly.
    Hls,
    /// Live test pattern.
    Test,
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub uri: Option<String>,
    /// Shown in the overlay next to the recording indicator.
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub directory: PathBuf,
    /// printf style pattern with a single integer conversion.
    pub pattern: String,
    pub encoder: String,
    pub muxer: String,
    pub key_int_max: u32,
    /// Split recordings into files of this length.
    pub segment_duration: Option<gst::ClockTime>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            directory: PathBuf::from("."),
            pattern: String::from("clip-%03d.mp4"),
            encoder: String::from("x264enc"),
            muxer: String::from("mp4mux"),
            key_int_max: 30,
            segment_duration: None,
        }
    }
}

impl OutputConfig {
    /// Location pattern as understood by `splitmuxsink`.
    pub fn location_pattern(&self) -> PathBuf {
        self.directory.join(&self.pattern)
    }

    pub fn location(&self, index: u32) -> PathBuf {
        self.directory.join(format_location(&self.pattern, index))
    }
}

#[derive(Debug, Clone)]
pub struct DisplayConfig {
    pub sink: String,
    pub overlay: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        DisplayConfig {
            sink: String::from("autovideosink"),
            overlay: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub source: SourceConfig,
    pub mode: RecordMode,
    pub output: OutputConfig,
    pub display: DisplayConfig,
    /// Longest wait for a stopped recording to be finalized before the
    /// branch is torn down forcefully.
    pub finalize_timeout: Duration,
}

impl RecorderConfig {
    pub fn new(source: SourceConfig, mode: RecordMode) -> Self {
        RecorderConfig {
            source,
            mode,
            output: OutputConfig::default(),
            display: DisplayConfig::default(),
            finalize_timeout: Duration::from_secs(30),
        }
    }
}

/// Expands the first `%d`, `%0Nd` or `%Nd` conversion of `pattern` with
/// `index`, the way `splitmuxsink` names its fragments. `%%` is a literal
/// percent sign. A pattern without a conversion gets the index appended
/// before the extension.
pub fn format_location(pattern: &str, index: u32) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut chars = pattern.chars().peekable();
    let mut expanded = false;

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        if expanded {
            out.push(c);
            continue;
        }

        let mut digits = String::new();
        while let Some(&d) = chars.peek() {
            if d.is_ascii_digit() {
                digits.push(d);
                chars.next();
            } else {
                break;
            }
        }
        if chars.peek() == Some(&'d') {
            chars.next();
            let zero_pad = digits.starts_with('0');
            let width: usize = digits.parse().unwrap_or(0);
            if zero_pad {
                out.push_str(&format!("{index:0width$}"));
            } else {
                out.push_str(&format!("{index:width$}"));
            }
            expanded = true;
        } else {
            out.push('%');
            out.push_str(&digits);
        }
    }

    if !expanded {
        match out.rfind('.') {
            Some(dot) if dot > 0 => out.insert_str(dot, &format!("-{index}")),
            _ => out.push_str(&format!("-{index}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_zero_padded_index() {
        assert_eq!(format_location("clip-%03d.mp4", 0), "clip-000.mp4");
        assert_eq!(format_location("clip-%03d.mp4", 42), "clip-042.mp4");
        assert_eq!(format_location("clip-%03d.mp4", 1234), "clip-1234.mp4");
    }

    #[test]
    fn expands_plain_and_width_only_index() {
        assert_eq!(format_location("video%d.mp4", 7), "video7.mp4");
        assert_eq!(format_location("v%3d.ts", 7), "v  7.ts");
    }

    #[test]
    fn only_first_conversion_is_expanded() {
        assert_eq!(format_location("a%02d-%02d.mkv", 3), "a03-%02d.mkv");
        assert_eq!(format_location("100%%-%d.mp4", 1), "100%-1.mp4");
    }

    #[test]
    fn pattern_without_conversion_gets_suffix() {
        assert_eq!(format_location("record.mp4", 2), "record-2.mp4");
        assert_eq!(format_location("record", 2), "record-2");
    }

    #[test]
    fn location_joins_directory() {
        let output = OutputConfig {
            directory: PathBuf::from("/tmp/rec"),
            ..OutputConfig::default()
        };
        assert_eq!(output.location(5), PathBuf::from("/tmp/rec/clip-005.mp4"));
        assert_eq!(output.location_pattern(), PathBuf::from("/tmp/rec/clip-%03d.mp4"));
    }
}
