use anyhow::{anyhow, Result};
use gst::prelude::*;
use gstreamer as gst;
use log::*;

use crate::bus::{self, ErrorMessage};
use crate::caps::{describe_pad_caps, describe_pad_templates};

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{line}");
    }
}

pub fn run(source: &str, sink: &str) -> Result<()> {
    let source_factory =
        gst::ElementFactory::find(source).ok_or_else(|| anyhow!("element factory {source} not found"))?;
    let sink_factory =
        gst::ElementFactory::find(sink).ok_or_else(|| anyhow!("element factory {sink} not found"))?;

    print_lines(describe_pad_templates(&source_factory));
    print_lines(describe_pad_templates(&sink_factory));

    let source = source_factory.create().name("source").build()?;
    let sink = sink_factory.create().name("sink").build()?;
    let pipeline = gst::Pipeline::with_name("test-pipeline");
    pipeline.add_many(&[&source, &sink])?;
    source.link(&sink)?;

    println!("In NULL state:");
    print_lines(describe_pad_caps(&sink, "sink"));

    pipeline.set_state(gst::State::Playing)?;

    let bus = pipeline.bus().expect("Pipeline without bus. Shouldn't happen!");
    let mut result = Ok(());
    for msg in bus.iter_timed(gst::ClockTime::NONE) {
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
            MessageView::StateChanged(s) if bus::is_from(&msg, &pipeline) => {
                println!("\nPipeline state changed from {:?} to {:?}:", s.old(), s.current());
                print_lines(describe_pad_caps(&sink, "sink"));
            }
            _ => (),
        }
    }

    pipeline.set_state(gst::State::Null)?;
    result
}
