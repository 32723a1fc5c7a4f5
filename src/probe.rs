use anyhow::Context;
use ffmpeg_reader::{MediaKind, SourceStreamInfo, StreamReader, options::parse_pairs};
use serde::Serialize;

use crate::cli::ProbeArgs;

#[derive(Debug, Serialize)]
struct StreamReport {
    index: usize,
    kind: String,
    codec: String,
    codec_long_name: String,
    bit_rate: i64,
    time_base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channels: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frame_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pixel_format: Option<String>,
}

impl From<&SourceStreamInfo> for StreamReport {
    fn from(info: &SourceStreamInfo) -> Self {
        let mut report = Self {
            index: info.index,
            kind: info.media.name().to_string(),
            codec: info.codec_name.clone(),
            codec_long_name: info.codec_long_name.clone(),
            bit_rate: info.bit_rate,
            time_base: format!(
                "{}/{}",
                info.time_base.numerator(),
                info.time_base.denominator()
            ),
            sample_rate: None,
            channels: None,
            sample_format: None,
            width: None,
            height: None,
            frame_rate: None,
            pixel_format: None,
        };
        match &info.media {
            MediaKind::Audio {
                sample_rate,
                channels,
                sample_format,
            } => {
                report.sample_rate = Some(*sample_rate);
                report.channels = Some(*channels);
                report.sample_format = Some(sample_format.clone());
            }
            MediaKind::Video {
                width,
                height,
                frame_rate,
                pixel_format,
            } => {
                report.width = Some(*width);
                report.height = Some(*height);
                report.frame_rate = Some(*frame_rate);
                report.pixel_format = Some(pixel_format.clone());
            }
            MediaKind::Other { .. } => {}
        }
        report
    }
}

#[derive(Debug, Serialize)]
struct ProbeReport {
    source: String,
    format: String,
    duration: Option<f64>,
    best_audio: Option<usize>,
    best_video: Option<usize>,
    streams: Vec<StreamReport>,
}

fn probe(args: &ProbeArgs) -> anyhow::Result<ProbeReport> {
    let options = parse_pairs(args.options.iter().map(String::as_str)).map_err(anyhow::Error::msg)?;
    let reader = StreamReader::open(&args.source, args.device.as_deref(), &options)
        .with_context(|| format!("open {}", args.source))?;

    Ok(ProbeReport {
        source: args.source.clone(),
        format: reader.source().format_name(),
        duration: reader.source().duration(),
        best_audio: reader.find_best_audio_stream().ok(),
        best_video: reader.find_best_video_stream().ok(),
        streams: reader
            .list_source_streams()
            .iter()
            .map(StreamReport::from)
            .collect(),
    })
}

/// Prints the source's streams as JSON on stdout.
pub async fn run(args: ProbeArgs) -> anyhow::Result<()> {
    let report = tokio::task::spawn_blocking(move || probe(&args))
        .await
        .context("probe task panicked")??;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
