//! Hardware-accelerated decoder discovery.
//!
//! Maps a hardware acceleration hint (e.g. "cuda", "qsv") onto the FFmpeg
//! decoder that implements it for a given codec. Callers fall back to the
//! software decoder when nothing matches.

use ffmpeg_next::codec::Id;

/// Decoder name suffixes FFmpeg uses for each supported backend.
fn suffixes_for_hint(hint: &str) -> Option<&'static [&'static str]> {
    match hint.to_ascii_lowercase().as_str() {
        "cuda" | "cuvid" | "nvdec" => Some(&["cuvid"]),
        "qsv" => Some(&["qsv"]),
        "v4l2m2m" | "v4l2" => Some(&["v4l2m2m"]),
        "auto" => Some(&["cuvid", "qsv", "v4l2m2m"]),
        _ => None,
    }
}

fn codec_prefix(codec_id: Id) -> Option<&'static str> {
    match codec_id {
        Id::H264 => Some("h264"),
        Id::HEVC => Some("hevc"),
        Id::VP8 => Some("vp8"),
        Id::VP9 => Some("vp9"),
        Id::AV1 => Some("av1"),
        Id::MPEG2VIDEO => Some("mpeg2"),
        Id::MPEG4 => Some("mpeg4"),
        Id::MJPEG => Some("mjpeg"),
        _ => None,
    }
}

/// Candidate hardware decoder names for `codec_id` under `hint`, in
/// preference order.
pub fn hw_decoder_names(codec_id: Id, hint: &str) -> Vec<String> {
    let (Some(prefix), Some(suffixes)) = (codec_prefix(codec_id), suffixes_for_hint(hint)) else {
        return Vec::new();
    };
    suffixes
        .iter()
        .map(|suffix| format!("{}_{}", prefix, suffix))
        .collect()
}

/// Returns true if `hint` names a backend this crate knows about.
pub fn is_known_hint(hint: &str) -> bool {
    suffixes_for_hint(hint).is_some()
}

/// Try to find a hardware-accelerated decoder for the given codec ID.
/// Returns the first available decoder, or None if none is found.
pub fn find_hw_decoder(codec_id: Id, hint: &str) -> Option<ffmpeg_next::Codec> {
    for name in hw_decoder_names(codec_id, hint) {
        if let Some(codec) = ffmpeg_next::decoder::find_by_name(&name) {
            log::info!("found hardware decoder: {}", name);
            return Some(codec);
        }
    }
    None
}
