//! Recording indicator drawn on top of the displayed video.

use std::ops;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use gst::{glib, prelude::*};
use gstreamer as gst;
use gstreamer_video as gst_video;
use log::*;
use pango::prelude::{FontMapExt, ObjectExt as _};

struct DrawingContext {
    layout: LayoutWrapper,
    info: Option<gst_video::VideoInfo>,
}

#[derive(Debug)]
struct LayoutWrapper(pango::Layout);

impl ops::Deref for LayoutWrapper {
    type Target = pango::Layout;

    fn deref(&self) -> &pango::Layout {
        assert_eq!(self.0.ref_count(), 1);
        &self.0
    }
}

// SAFETY: We ensure that there are never multiple references to the layout.
unsafe impl Send for LayoutWrapper {}

#[derive(Debug)]
struct IndicatorState {
    label: String,
    recording_since: Option<Instant>,
}

/// Text shown by the overlay, shared between the controller and the
/// streaming thread that renders it.
#[derive(Debug, Clone)]
pub struct RecIndicator(Arc<Mutex<IndicatorState>>);

impl RecIndicator {
    pub fn new(label: impl Into<String>) -> Self {
        RecIndicator(Arc::new(Mutex::new(IndicatorState {
            label: label.into(),
            recording_since: None,
        })))
    }

    pub fn set_recording(&self, recording: bool) {
        let mut state = self.0.lock().unwrap();
        state.recording_since = match (recording, state.recording_since) {
            (true, Some(since)) => Some(since),
            (true, None) => Some(Instant::now()),
            (false, _) => None,
        };
    }

    pub fn is_recording(&self) -> bool {
        self.0.lock().unwrap().recording_since.is_some()
    }

    /// Plain text of the indicator at `now`.
    pub fn text(&self, now: Instant) -> String {
        let state = self.0.lock().unwrap();
        match state.recording_since {
            Some(since) => format!(
                "{}\n● REC {}",
                state.label,
                format_elapsed(now.saturating_duration_since(since))
            ),
            None => state.label.clone(),
        }
    }

    /// Pango markup of the indicator at `now`, with the REC line in red.
    pub fn markup(&self, now: Instant) -> String {
        let state = self.0.lock().unwrap();
        let label = glib::markup_escape_text(&state.label);
        match state.recording_since {
            Some(since) => format!(
                "{label}\n<span foreground=\"#ff3030\">● REC {}</span>",
                format_elapsed(now.saturating_duration_since(since))
            ),
            None => label.to_string(),
        }
    }
}

/// `hh:mm:ss`, hours keep growing past 99.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

fn render(
    layout: &pango::Layout,
    info: &gst_video::VideoInfo,
) -> Result<gst_video::VideoOverlayComposition> {
    // Create a Cairo image surface to draw into and the context around it.
    let surface = cairo::ImageSurface::create(
        cairo::Format::ARgb32,
        info.width() as i32,
        info.height() as i32,
    )?;
    let cr = cairo::Context::new(&surface)?;

    cr.save()?;
    cr.set_operator(cairo::Operator::Clear);
    cr.paint()?;
    cr.restore()?;

    let margin = f64::from(info.height()) / 30.0;
    pangocairo::functions::update_layout(&cr, layout);

    // Drop shadow first, then the text itself.
    cr.set_source_rgba(0.0, 0.0, 0.0, 0.6);
    cr.move_to(margin + 2.0, margin + 2.0);
    pangocairo::functions::layout_path(&cr, layout);
    cr.fill()?;

    cr.set_source_rgb(1.0, 1.0, 1.0);
    cr.move_to(margin, margin);
    pangocairo::functions::show_layout(&cr, layout);

    /* Drop the Cairo context to release the additional reference to the data and
     * then take ownership of the data. This only works if we have the one and only
     * reference to the image surface */
    drop(cr);
    let stride = surface.stride();
    let data = surface.take_data().context("cairo surface still in use")?;

    let mut buffer = gst::Buffer::from_mut_slice(data);
    gst_video::VideoMeta::add_full(
        buffer.get_mut().context("overlay buffer not writable")?,
        gst_video::VideoFrameFlags::empty(),
        gst_video::VideoFormat::Bgra,
        info.width(),
        info.height(),
        &[0],
        &[stride],
    )?;

    let rect = gst_video::VideoOverlayRectangle::new_raw(
        &buffer,
        0,
        0,
        info.width(),
        info.height(),
        gst_video::VideoOverlayFormatFlags::PREMULTIPLIED_ALPHA,
    );
    Ok(gst_video::VideoOverlayComposition::new(Some(&rect))?)
}

/// Creates an `overlaycomposition` element that draws `indicator` on every
/// frame passing through it.
pub fn rec_overlay(indicator: RecIndicator) -> Result<gst::Element> {
    let overlay = gst::ElementFactory::make("overlaycomposition")
        .name("rec-overlay")
        .build()?;

    let fontmap = pangocairo::FontMap::new();
    let context = fontmap.create_context();
    let layout = LayoutWrapper(pango::Layout::new(&context));
    let font_desc = pango::FontDescription::from_string("sans bold 20");
    layout.set_font_description(Some(&font_desc));

    // Both signals are emitted from the streaming thread only, the Mutex is
    // there to make the context Sync.
    let drawer = Arc::new(Mutex::new(DrawingContext { layout, info: None }));

    overlay.connect_closure(
        "draw",
        false,
        glib::closure!(@strong drawer => move |_overlay: &gst::Element,
                                               _sample: &gst::Sample| {
            let drawer = drawer.lock().unwrap();
            let Some(info) = drawer.info.as_ref() else {
                return None;
            };
            drawer.layout.set_markup(&indicator.markup(Instant::now()));
            match render(&drawer.layout, info) {
                Ok(composition) => Some(composition),
                Err(err) => {
                    warn!("failed to render overlay: {err:#}");
                    None
                }
            }
        }),
    );

    // The canvas follows the negotiated frame size.
    overlay.connect_closure(
        "caps-changed",
        false,
        glib::closure!(move |_overlay: &gst::Element,
                             caps: &gst::Caps,
                             _width: u32,
                             _height: u32| {
            let mut drawer = drawer.lock().unwrap();
            drawer.info = gst_video::VideoInfo::from_caps(caps).ok();
        }),
    );

    Ok(overlay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_time_format() {
        assert_eq!(format_elapsed(Duration::ZERO), "00:00:00");
        assert_eq!(format_elapsed(Duration::from_millis(65_900)), "00:01:05");
        assert_eq!(format_elapsed(Duration::from_secs(3 * 3600 + 7)), "03:00:07");
        assert_eq!(format_elapsed(Duration::from_secs(123 * 3600)), "123:00:00");
    }

    #[test]
    fn indicator_text_follows_recording_state() {
        let indicator = RecIndicator::new("Camera A");
        let now = Instant::now();
        assert_eq!(indicator.text(now), "Camera A");
        assert!(!indicator.is_recording());

        indicator.set_recording(true);
        assert!(indicator.is_recording());
        let later = Instant::now() + Duration::from_secs(5);
        assert_eq!(indicator.text(later), "Camera A\n● REC 00:00:05");

        // A second start keeps the first timestamp.
        indicator.set_recording(true);
        assert_eq!(indicator.text(later), "Camera A\n● REC 00:00:05");

        indicator.set_recording(false);
        assert_eq!(indicator.text(later), "Camera A");
    }

    #[test]
    fn markup_escapes_label() {
        let indicator = RecIndicator::new("A & B <road>");
        assert_eq!(indicator.markup(Instant::now()), "A &amp; B &lt;road&gt;");
        indicator.set_recording(true);
        assert!(indicator.markup(Instant::now()).contains("<span foreground=\"#ff3030\">● REC 00:00:0"));
    }

    #[test]
    fn overlay_element() {
        gst::init().unwrap();
        if gst::ElementFactory::find("overlaycomposition").is_none() {
            return;
        }
        let overlay = rec_overlay(RecIndicator::new("test")).unwrap();
        assert_eq!(overlay.name(), "rec-overlay");
    }
}
