use ffmpeg_next::{Rational, util::error::EAGAIN};

use crate::{
    error::{ReaderError, Result},
    frame::RawFrame,
    hw::find_hw_decoder,
    options::to_dictionary,
    output::OutputStreamConfig,
    packet::RawPacket,
    stream::AvStream,
};

/// Turns the compressed packets of one source stream into raw frames.
///
/// Each output pipeline owns its own decoder, so reference-frame state is
/// never shared between pipelines.
pub trait FrameDecoder {
    /// Decodes one packet. May return no frames (reordering delay) or several.
    fn decode(&mut self, packet: &RawPacket) -> Result<Vec<RawFrame>>;

    /// Signals end of input and drains every frame held back for reordering.
    fn flush(&mut self) -> Result<Vec<RawFrame>>;

    /// Drops all internal state without producing frames.
    fn reset(&mut self);

    /// Time base of the timestamps carried by the returned frames.
    fn time_base(&self) -> Rational;

    fn name(&self) -> &str;
}

enum DecoderType {
    Video(ffmpeg_next::codec::decoder::Video),
    Audio(ffmpeg_next::codec::decoder::Audio),
}

impl DecoderType {
    fn send_packet(&mut self, packet: &RawPacket) -> std::result::Result<(), ffmpeg_next::Error> {
        match self {
            DecoderType::Video(video_decoder) => video_decoder.send_packet(packet.packet()),
            DecoderType::Audio(audio_decoder) => audio_decoder.send_packet(packet.packet()),
        }
    }

    fn send_eof(&mut self) -> std::result::Result<(), ffmpeg_next::Error> {
        match self {
            DecoderType::Video(video_decoder) => video_decoder.send_eof(),
            DecoderType::Audio(audio_decoder) => audio_decoder.send_eof(),
        }
    }

    /// Receives one frame with its best-effort timestamp stamped into `pts`,
    /// so filters rescale the timestamp that is actually read downstream.
    fn receive_frame(&mut self) -> Result<Option<RawFrame>> {
        let result = match self {
            DecoderType::Video(video_decoder) => {
                let mut frame = ffmpeg_next::frame::Video::empty();
                video_decoder.receive_frame(&mut frame).map(|()| {
                    frame.set_pts(frame.timestamp().or(frame.pts()));
                    RawFrame::Video(frame)
                })
            }
            DecoderType::Audio(audio_decoder) => {
                let mut frame = ffmpeg_next::frame::Audio::empty();
                audio_decoder.receive_frame(&mut frame).map(|()| {
                    frame.set_pts(frame.timestamp().or(frame.pts()));
                    RawFrame::Audio(frame)
                })
            }
        };
        match result {
            Ok(frame) => Ok(Some(frame)),
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(ffmpeg_next::Error::Other { errno }) if errno == EAGAIN => Ok(None),
            Err(err) => Err(ReaderError::decode(err)),
        }
    }

    fn flush_buffers(&mut self) {
        match self {
            DecoderType::Video(video_decoder) => video_decoder.flush(),
            DecoderType::Audio(audio_decoder) => audio_decoder.flush(),
        }
    }
}

/// FFmpeg-backed [`FrameDecoder`].
pub struct Decoder {
    inner: DecoderType,
    codec_name: String,
    time_base: Rational,
}

impl Decoder {
    /// Opens a decoder for `stream`.
    ///
    /// An explicit `decoder_override` wins. Otherwise a hardware decoder is
    /// tried when `hw_accel_hint` is set, falling back to the default decoder
    /// for the stream's codec.
    pub fn open(stream: &AvStream, config: &OutputStreamConfig) -> Result<Self> {
        let codec_id = stream.parameters().id();

        if let Some(name) = config.decoder_override.as_deref() {
            let codec = ffmpeg_next::decoder::find_by_name(name)
                .ok_or_else(|| ReaderError::DecoderNotFound(name.to_string()))?;
            return Self::open_with_codec(stream, codec, config).map_err(ReaderError::decode);
        }

        if let Some(hint) = config.hw_accel_hint.as_deref() {
            match find_hw_decoder(codec_id, hint) {
                Some(codec) => match Self::open_with_codec(stream, codec, config) {
                    Ok(decoder) => return Ok(decoder),
                    Err(e) => {
                        log::warn!(
                            "hardware decoder {} failed: {}, falling back to software",
                            codec.name(),
                            e
                        );
                    }
                },
                None => {
                    log::warn!(
                        "no {} decoder for {:?}, falling back to software",
                        hint,
                        codec_id
                    );
                }
            }
        }

        let codec = ffmpeg_next::decoder::find(codec_id)
            .ok_or_else(|| ReaderError::DecoderNotFound(format!("{:?}", codec_id)))?;
        Self::open_with_codec(stream, codec, config).map_err(ReaderError::decode)
    }

    fn open_with_codec(
        stream: &AvStream,
        codec: ffmpeg_next::Codec,
        config: &OutputStreamConfig,
    ) -> std::result::Result<Self, ffmpeg_next::Error> {
        let mut decoder_ctx =
            ffmpeg_next::codec::Context::from_parameters(stream.parameters().clone())?;
        unsafe {
            (*decoder_ctx.as_mut_ptr()).time_base = stream.time_base().into();
            (*decoder_ctx.as_mut_ptr()).pkt_timebase = stream.time_base().into();
        }

        let opened = decoder_ctx
            .decoder()
            .open_as_with(codec, to_dictionary(&config.decoder_options))?;
        let inner = if stream.is_video() {
            DecoderType::Video(opened.video()?)
        } else if stream.is_audio() {
            DecoderType::Audio(opened.audio()?)
        } else {
            return Err(ffmpeg_next::Error::DecoderNotFound);
        };

        log::debug!("opened decoder {} for stream {}", codec.name(), stream.index());
        Ok(Self {
            inner,
            codec_name: codec.name().to_string(),
            time_base: stream.time_base(),
        })
    }

    fn receive_frames(&mut self, frames: &mut Vec<RawFrame>) -> Result<()> {
        while let Some(frame) = self.inner.receive_frame()? {
            frames.push(frame);
        }
        Ok(())
    }
}

impl FrameDecoder for Decoder {
    fn decode(&mut self, packet: &RawPacket) -> Result<Vec<RawFrame>> {
        let mut frames = Vec::new();
        match self.inner.send_packet(packet) {
            Ok(()) => {}
            // decoder input is full: drain, then retry once
            Err(ffmpeg_next::Error::Other { errno }) if errno == EAGAIN => {
                self.receive_frames(&mut frames)?;
                self.inner.send_packet(packet).map_err(ReaderError::decode)?;
            }
            Err(e) => return Err(ReaderError::decode(e)),
        }
        self.receive_frames(&mut frames)?;
        Ok(frames)
    }

    fn flush(&mut self) -> Result<Vec<RawFrame>> {
        let mut frames = Vec::new();
        self.receive_frames(&mut frames)?;
        match self.inner.send_eof() {
            Ok(()) | Err(ffmpeg_next::Error::Eof) => {}
            Err(ffmpeg_next::Error::Other { errno }) if errno == EAGAIN => {
                self.receive_frames(&mut frames)?;
                let _ = self.inner.send_eof();
            }
            Err(e) => return Err(ReaderError::decode(e)),
        }
        self.receive_frames(&mut frames)?;
        // leave the codec reusable after draining
        self.inner.flush_buffers();
        Ok(frames)
    }

    fn reset(&mut self) {
        self.inner.flush_buffers();
    }

    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn name(&self) -> &str {
        &self.codec_name
    }
}
