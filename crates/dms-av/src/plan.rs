//! Per-stream encoder directives for the generic transcode profile.

use dms_probe::{CodecType, StreamDescriptor};
use serde::Serialize;

/// Audio codec that generic receivers cannot decode and gets re-encoded.
const REENCODE_AUDIO_CODEC: &str = "dca";

/// Encoder arguments for one input stream, ending with its `-map` selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamDirective {
    pub stream_index: u32,
    pub encoder_args: Vec<String>,
}

impl StreamDirective {
    fn new(stream_index: u32, args: &[&str]) -> Self {
        let mut encoder_args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        encoder_args.push("-map".to_string());
        encoder_args.push(format!("0:{stream_index}"));
        Self {
            stream_index,
            encoder_args,
        }
    }
}

/// Build one directive per mappable stream, in probe order.
///
/// Streams of [`CodecType::Other`] produce no directive and are dropped from
/// the output.
pub fn plan(streams: &[StreamDescriptor]) -> Vec<StreamDirective> {
    streams.iter().filter_map(directive_for).collect()
}

fn directive_for(stream: &StreamDescriptor) -> Option<StreamDirective> {
    let args: &[&str] = match stream.codec_type {
        CodecType::Video => &["-target", "pal-dvd"],
        CodecType::Audio if stream.codec_name == REENCODE_AUDIO_CODEC => {
            &["-acodec", "ac3", "-ab", "224k", "-ac", "2"]
        }
        CodecType::Audio => &["-acodec", "copy"],
        CodecType::Subtitle => &["-scodec", "copy"],
        CodecType::Other => return None,
    };
    Some(StreamDirective::new(stream.index, args))
}

/// Flatten directives into one argument list, preserving order.
pub fn flatten(directives: &[StreamDirective]) -> impl Iterator<Item = &str> {
    directives
        .iter()
        .flat_map(|d| d.encoder_args.iter().map(String::as_str))
}
