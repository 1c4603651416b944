use gst::prelude::*;
use gstreamer as gst;

pub fn describe_caps(caps: &gst::CapsRef, prefix: &str) -> Vec<String> {
    if caps.is_any() {
        return vec![format!("{prefix}ANY")];
    }
    if caps.is_empty() {
        return vec![format!("{prefix}EMPTY")];
    }

    let mut lines = Vec::new();
    for s in caps.iter() {
        lines.push(format!("{prefix}{}", s.name()));
        for (field, value) in s.iter() {
            let value = value
                .serialize()
                .map(|v| v.to_string())
                .unwrap_or_else(|_| String::from("<unserializable>"));
            lines.push(format!("{prefix}  {field:>15}: {value}"));
        }
    }
    lines
}

fn direction_name(direction: gst::PadDirection) -> &'static str {
    match direction {
        gst::PadDirection::Src => "SRC",
        gst::PadDirection::Sink => "SINK",
        _ => "UNKNOWN",
    }
}

fn presence_name(presence: gst::PadPresence) -> &'static str {
    match presence {
        gst::PadPresence::Always => "Always",
        gst::PadPresence::Sometimes => "Sometimes",
        gst::PadPresence::Request => "On request",
        _ => "UNKNOWN",
    }
}

pub fn describe_pad_templates(factory: &gst::ElementFactory) -> Vec<String> {
    let mut lines = vec![format!("Pad Templates for {}:", factory.longname())];
    if factory.num_pad_templates() == 0 {
        lines.push(String::from("  none"));
        return lines;
    }

    for templ in factory.static_pad_templates() {
        lines.push(format!(
            "  {} template: '{}'",
            direction_name(templ.direction()),
            templ.name_template()
        ));
        lines.push(format!("    Availability: {}", presence_name(templ.presence())));
        lines.push(String::from("    Capabilities:"));
        lines.extend(describe_caps(&templ.caps(), "      "));
        lines.push(String::new());
    }
    lines
}

/// Negotiated caps of `pad_name`, or what it could accept before negotiation.
pub fn describe_pad_caps(element: &gst::Element, pad_name: &str) -> Vec<String> {
    let Some(pad) = element.static_pad(pad_name) else {
        return vec![format!("Could not retrieve pad '{pad_name}'")];
    };
    let caps = pad.current_caps().unwrap_or_else(|| pad.query_caps(None));

    let mut lines = vec![format!("Caps for the {pad_name} pad:")];
    lines.extend(describe_caps(&caps, "      "));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_caps() {
        gst::init().unwrap();
        assert_eq!(describe_caps(&gst::Caps::new_any(), ""), vec!["ANY"]);
        assert_eq!(describe_caps(&gst::Caps::new_empty(), "  "), vec!["  EMPTY"]);
    }

    #[test]
    fn fields_are_serialized() {
        gst::init().unwrap();
        let caps = gst::Caps::builder("audio/x-raw")
            .field("format", "S16LE")
            .field("rate", 44100i32)
            .field("channels", 1i32)
            .build();

        let lines = describe_caps(&caps, "");
        assert_eq!(lines[0], "audio/x-raw");
        assert!(lines.iter().any(|l| l.trim() == "format: S16LE"));
        assert!(lines.iter().any(|l| l.trim() == "rate: 44100"));
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn core_factory_templates() {
        gst::init().unwrap();
        let factory = gst::ElementFactory::find("fakesink").unwrap();
        let lines = describe_pad_templates(&factory);
        assert!(lines[0].starts_with("Pad Templates for"));
        assert!(lines.iter().any(|l| l.contains("SINK template: 'sink'")));
        assert!(lines.iter().any(|l| l.contains("Availability: Always")));
    }

    #[test]
    fn missing_pad_is_reported() {
        gst::init().unwrap();
        let sink = gst::ElementFactory::make("fakesink").build().unwrap();
        assert_eq!(
            describe_pad_caps(&sink, "src"),
            vec!["Could not retrieve pad 'src'"]
        );
        assert_eq!(describe_pad_caps(&sink, "sink")[1], "      ANY");
    }
}
