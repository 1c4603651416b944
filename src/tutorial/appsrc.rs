use std::io::Write;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use gst::{element_error, glib, prelude::*, Caps};
use gstreamer as gst;
use gstreamer_app as gst_app;
use log::*;

use crate::bus::ErrorMessage;
use crate::pads::link_tee_branch;

/// Bytes per pushed buffer.
pub const CHUNK_SIZE: usize = 1024;
pub const SAMPLE_RATE: u32 = 44100;

/// Psychedelic oscillator: the inner sine's frequency is itself swept by a
/// slower sine.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    a: f64,
    b: f64,
    c: f64,
    d: f64,
}

impl Default for Waveform {
    fn default() -> Self {
        Waveform {
            a: 0.0,
            b: 1.0,
            c: 0.0,
            d: 1.0,
        }
    }
}

impl Waveform {
    pub fn fill(&mut self, samples: &mut [i16]) {
        self.c += self.d;
        self.d -= self.c / 1000.0;
        let freq = 1100.0 + 1000.0 * self.d;
        for sample in samples {
            self.a += self.b;
            self.b -= self.a / freq;
            *sample = (500.0 * self.a) as i16;
        }
    }
}

fn audio_caps() -> Caps {
    Caps::builder("audio/x-raw")
        .field("format", "S16LE")
        .field("rate", SAMPLE_RATE as i32)
        .field("channels", 1i32)
        .field("layout", "interleaved")
        .build()
}

struct Generator {
    waveform: Waveform,
    num_samples: u64,
}

impl Generator {
    fn next_buffer(&mut self) -> Result<gst::Buffer> {
        let n_samples = CHUNK_SIZE / 2;
        let mut samples = vec![0i16; n_samples];
        self.waveform.fill(&mut samples);

        let mut buffer = gst::Buffer::with_size(CHUNK_SIZE)?;
        {
            let bufref = buffer.get_mut().context("fresh buffer is not writable")?;
            let pts = gst::ClockTime::SECOND
                .mul_div_floor(self.num_samples, SAMPLE_RATE as u64)
                .context("timestamp overflow")?;
            let duration = gst::ClockTime::SECOND
                .mul_div_floor(n_samples as u64, SAMPLE_RATE as u64)
                .context("duration overflow")?;
            bufref.set_pts(pts);
            bufref.set_dts(pts);
            bufref.set_duration(duration);

            let mut mw = bufref.map_writable()?;
            for (dst, sample) in mw.as_mut_slice().chunks_exact_mut(2).zip(&samples) {
                dst.copy_from_slice(&sample.to_le_bytes());
            }
        }

        self.num_samples += n_samples as u64;
        Ok(buffer)
    }
}

pub fn tone_src() -> Result<gst_app::AppSrc> {
    let appsrc = gst_app::AppSrc::builder()
        .caps(&audio_caps())
        .format(gst::Format::Time)
        .build();

    let generator = Mutex::new(Generator {
        waveform: Waveform::default(),
        num_samples: 0,
    });
    appsrc.set_callbacks(
        gst_app::AppSrcCallbacks::builder()
            .need_data(move |appsrc, _| {
                let mut generator = generator.lock().unwrap();
                match generator.next_buffer() {
                    Ok(buffer) => {
                        if appsrc.push_buffer(buffer).is_err() {
                            debug!("appsrc stopped accepting buffers");
                        }
                    }
                    Err(err) => {
                        element_error!(
                            appsrc,
                            gst::ResourceError::Failed,
                            ("Failed to generate samples: {}", err)
                        );
                    }
                }
            })
            .enough_data(|_| debug!("appsrc queue full"))
            .build(),
    );
    Ok(appsrc)
}

pub fn sample_sink() -> Result<gst_app::AppSink> {
    let appsink = gst_app::AppSink::builder()
        .caps(&audio_caps())
        .build();

    appsink.set_callbacks(
        gst_app::AppSinkCallbacks::builder()
            .new_sample(|appsink| {
                let _sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                print!("*");
                let _ = std::io::stdout().flush();
                Ok(gst::FlowSuccess::Ok)
            })
            .build(),
    );
    Ok(appsink)
}

pub fn run() -> Result<()> {
    let appsrc = tone_src()?;
    let appsink = sample_sink()?;

    let tee = gst::ElementFactory::make("tee").name("tee").build()?;
    let audio_queue = gst::ElementFactory::make("queue").name("audio_queue").build()?;
    let audio_convert1 = gst::ElementFactory::make("audioconvert")
        .name("audio_convert1")
        .build()?;
    let audio_resample = gst::ElementFactory::make("audioresample")
        .name("audio_resample")
        .build()?;
    let audio_sink = gst::ElementFactory::make("autoaudiosink")
        .name("audio_sink")
        .build()?;
    let video_queue = gst::ElementFactory::make("queue").name("video_queue").build()?;
    let audio_convert2 = gst::ElementFactory::make("audioconvert")
        .name("audio_convert2")
        .build()?;
    let visual = gst::ElementFactory::make("wavescope")
        .name("visual")
        .property_from_str("shader", "none")
        .property_from_str("style", "dots")
        .build()?;
    let video_convert = gst::ElementFactory::make("videoconvert")
        .name("video_convert")
        .build()?;
    let video_sink = gst::ElementFactory::make("autovideosink")
        .name("video_sink")
        .build()?;
    let app_queue = gst::ElementFactory::make("queue").name("app_queue").build()?;

    let pipeline = gst::Pipeline::with_name("test-pipeline");
    pipeline.add_many(&[
        appsrc.upcast_ref(),
        &tee,
        &audio_queue,
        &audio_convert1,
        &audio_resample,
        &audio_sink,
        &video_queue,
        &audio_convert2,
        &visual,
        &video_convert,
        &video_sink,
        &app_queue,
        appsink.upcast_ref(),
    ])?;

    appsrc.link(&tee)?;
    gst::Element::link_many(&[&audio_queue, &audio_convert1, &audio_resample, &audio_sink])?;
    gst::Element::link_many(&[&video_queue, &audio_convert2, &visual, &video_convert, &video_sink])?;
    app_queue.link(&appsink)?;

    let pads = [
        link_tee_branch(&tee, &audio_queue)?,
        link_tee_branch(&tee, &video_queue)?,
        link_tee_branch(&tee, &app_queue)?,
    ];

    let main_loop = glib::MainLoop::new(None, false);
    let error: Arc<Mutex<Option<ErrorMessage>>> = Arc::new(Mutex::new(None));

    let bus = pipeline.bus().expect("Pipeline without bus. Shouldn't happen!");
    let _watch = bus.add_watch({
        let main_loop = main_loop.clone();
        let error = Arc::clone(&error);
        move |_, msg| {
            use gst::MessageView;
            match msg.view() {
                MessageView::Error(err) => {
                    let err = ErrorMessage::from_view(err);
                    error!("{err}");
                    *error.lock().unwrap() = Some(err);
                    main_loop.quit();
                }
                MessageView::Eos(..) => main_loop.quit(),
                _ => (),
            }
            glib::ControlFlow::Continue
        }
    })?;

    pipeline.set_state(gst::State::Playing)?;
    main_loop.run();
    pipeline.set_state(gst::State::Null)?;

    for pad in &pads {
        tee.release_request_pad(pad);
    }

    let error = error.lock().unwrap().take();
    match error {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waveform_starts_from_silence() {
        let mut waveform = Waveform::default();
        let mut samples = [0i16; 4];
        waveform.fill(&mut samples);
        // a accumulates b, which starts at 1
        assert_eq!(samples[0], 500);
        assert!(samples.iter().all(|s| *s > 0));
    }

    #[test]
    fn waveform_continues_across_chunks() {
        let mut chunked = Waveform::default();
        let mut whole = Waveform::default();
        let mut a = [0i16; 8];
        let mut b = [0i16; 8];
        chunked.fill(&mut a);
        whole.fill(&mut b);
        assert_eq!(a, b);

        chunked.fill(&mut a);
        assert_ne!(a, b);
        assert_ne!(chunked, Waveform::default());
    }

    #[test]
    fn buffers_are_timestamped_by_sample_count() {
        gst::init().unwrap();
        let mut generator = Generator {
            waveform: Waveform::default(),
            num_samples: 0,
        };

        let first = generator.next_buffer().unwrap();
        assert_eq!(first.size(), CHUNK_SIZE);
        assert_eq!(first.pts(), Some(gst::ClockTime::ZERO));
        assert_eq!(first.dts(), first.pts());

        let second = generator.next_buffer().unwrap();
        let expected = gst::ClockTime::SECOND
            .mul_div_floor(512, SAMPLE_RATE as u64)
            .unwrap();
        assert_eq!(second.pts(), Some(expected));
        assert_eq!(second.dts(), Some(expected));
        assert_eq!(second.duration(), Some(expected));
    }
}
