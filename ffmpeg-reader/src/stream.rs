use ffmpeg_next::{Rational, codec::Parameters, format::stream};

/// Kind-specific description of a source stream.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaKind {
    Audio {
        sample_rate: u32,
        channels: u32,
        /// Sample format name, e.g. "fltp", "s16".
        sample_format: String,
    },
    Video {
        width: u32,
        height: u32,
        /// Average frame rate; 0.0 if the container does not advertise one.
        frame_rate: f64,
        /// Pixel format name, e.g. "yuv420p".
        pixel_format: String,
    },
    /// Subtitle, data, attachment or unknown streams.
    Other { media_type: String },
}

impl MediaKind {
    pub fn is_audio(&self) -> bool {
        matches!(self, MediaKind::Audio { .. })
    }

    pub fn is_video(&self) -> bool {
        matches!(self, MediaKind::Video { .. })
    }

    pub fn name(&self) -> &str {
        match self {
            MediaKind::Audio { .. } => "audio",
            MediaKind::Video { .. } => "video",
            MediaKind::Other { media_type } => media_type,
        }
    }
}

/// Static description of one stream in the opened input.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceStreamInfo {
    pub index: usize,
    /// Short codec name, e.g. "h264", "aac".
    pub codec_name: String,
    pub codec_long_name: String,
    /// Bits per second; 0 if unknown.
    pub bit_rate: i64,
    pub time_base: Rational,
    pub media: MediaKind,
}

/// Codec parameters of a demuxed stream, kept so decoders can be opened for
/// it later.
pub struct AvStream {
    index: usize,
    parameters: Parameters,
    time_base: Rational,
    rate: Rational,
}

unsafe impl Send for AvStream {}

impl AvStream {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn is_video(&self) -> bool {
        self.parameters.medium() == ffmpeg_next::media::Type::Video
    }

    pub fn is_audio(&self) -> bool {
        self.parameters.medium() == ffmpeg_next::media::Type::Audio
    }

    pub fn info(&self) -> SourceStreamInfo {
        let codec_id = self.parameters.id();
        let (codec_name, codec_long_name) = match ffmpeg_next::decoder::find(codec_id) {
            Some(codec) => (codec.name().to_string(), codec.description().to_string()),
            None => (format!("{:?}", codec_id).to_lowercase(), String::new()),
        };

        let raw = unsafe {
            &*(self.parameters.as_ptr() as *const ffmpeg_next::ffi::AVCodecParameters)
        };

        let media = if self.is_audio() {
            let sample_format = self
                .open_probe_context()
                .and_then(|ctx| ctx.decoder().audio().ok())
                .map(|decoder| sample_format_name(decoder.format()))
                .unwrap_or_else(|| "none".to_string());
            MediaKind::Audio {
                sample_rate: raw.sample_rate.max(0) as u32,
                channels: raw.ch_layout.nb_channels.max(0) as u32,
                sample_format,
            }
        } else if self.is_video() {
            let pixel_format = self
                .open_probe_context()
                .and_then(|ctx| ctx.decoder().video().ok())
                .map(|decoder| pixel_format_name(decoder.format()))
                .unwrap_or_else(|| "none".to_string());
            MediaKind::Video {
                width: raw.width.max(0) as u32,
                height: raw.height.max(0) as u32,
                frame_rate: rational_to_f64(self.rate),
                pixel_format,
            }
        } else {
            MediaKind::Other {
                media_type: format!("{:?}", self.parameters.medium()).to_lowercase(),
            }
        };

        SourceStreamInfo {
            index: self.index,
            codec_name,
            codec_long_name,
            bit_rate: raw.bit_rate,
            time_base: self.time_base,
            media,
        }
    }

    /// Codec context used only to read the decoded sample/pixel format, which
    /// codec parameters do not expose directly.
    fn open_probe_context(&self) -> Option<ffmpeg_next::codec::Context> {
        ffmpeg_next::codec::Context::from_parameters(self.parameters.clone()).ok()
    }
}

impl From<stream::Stream<'_>> for AvStream {
    fn from(stream: stream::Stream<'_>) -> Self {
        Self {
            index: stream.index(),
            parameters: stream.parameters(),
            time_base: stream.time_base(),
            rate: stream.avg_frame_rate(),
        }
    }
}

impl Clone for AvStream {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            parameters: self.parameters.clone(),
            time_base: self.time_base,
            rate: self.rate,
        }
    }
}

pub(crate) fn rational_to_f64(r: Rational) -> f64 {
    if r.denominator() == 0 {
        0.0
    } else {
        r.numerator() as f64 / r.denominator() as f64
    }
}

pub(crate) fn sample_format_name(format: ffmpeg_next::format::Sample) -> String {
    match format {
        ffmpeg_next::format::Sample::None => "none".to_string(),
        format => format.name().to_string(),
    }
}

pub(crate) fn pixel_format_name(format: ffmpeg_next::format::Pixel) -> String {
    format
        .descriptor()
        .map(|d| d.name().to_string())
        .unwrap_or_else(|| "none".to_string())
}
