use ffmpeg_next::Rational;

use crate::{
    chunk::{Chunk, ChunkBuffer, chunk_limit},
    decoder::FrameDecoder,
    error::{ReaderError, Result},
    filter::FilterStage,
    frame::{Frame, FrameLayout, RawFrame},
    hw::is_known_hint,
    options::OptionDict,
    packet::RawPacket,
    stream::SourceStreamInfo,
};

/// How one output pipeline decodes, filters and chunks a source stream.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputStreamConfig {
    pub source_index: usize,
    /// Frames per chunk (samples for audio, pictures for video), or -1 to
    /// collect everything into a single chunk sealed at end of stream.
    pub frames_per_chunk: i64,
    /// Completed chunks kept before the oldest is dropped, or -1 for no limit.
    pub num_chunks: i64,
    /// FFmpeg filter graph description, e.g. `"aresample=16000"`.
    pub filter_description: Option<String>,
    /// Decoder to use by name instead of the default one for the codec.
    pub decoder_override: Option<String>,
    pub decoder_options: OptionDict,
    /// Hardware decoding backend for video, e.g. `"cuda"`.
    pub hw_accel_hint: Option<String>,
}

impl OutputStreamConfig {
    pub fn new(source_index: usize, frames_per_chunk: i64, num_chunks: i64) -> Self {
        Self {
            source_index,
            frames_per_chunk,
            num_chunks,
            filter_description: None,
            decoder_override: None,
            decoder_options: OptionDict::new(),
            hw_accel_hint: None,
        }
    }

    pub fn with_filter(mut self, description: impl Into<String>) -> Self {
        self.filter_description = Some(description.into());
        self
    }

    pub fn with_decoder(mut self, name: impl Into<String>) -> Self {
        self.decoder_override = Some(name.into());
        self
    }

    pub fn with_decoder_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.decoder_options.insert(key.into(), value.into());
        self
    }

    pub fn with_hw_accel(mut self, hint: impl Into<String>) -> Self {
        self.hw_accel_hint = Some(hint.into());
        self
    }

    /// Checks the config against the stream it targets. Returns the chunk
    /// limits with -1 mapped to `None`.
    pub fn validate(&self, stream: &SourceStreamInfo) -> Result<(Option<usize>, Option<usize>)> {
        let frames_per_chunk = chunk_limit(self.frames_per_chunk, "frames_per_chunk")?;
        let num_chunks = chunk_limit(self.num_chunks, "num_chunks")?;

        if let Some(hint) = self.hw_accel_hint.as_deref() {
            if !stream.media.is_video() {
                return Err(ReaderError::InvalidConfig(format!(
                    "hardware acceleration requested for {} stream {}",
                    stream.media.name(),
                    stream.index
                )));
            }
            if !is_known_hint(hint) {
                return Err(ReaderError::InvalidConfig(format!(
                    "unknown hardware acceleration {:?}",
                    hint
                )));
            }
        }
        if !stream.media.is_audio() && !stream.media.is_video() {
            return Err(ReaderError::InvalidConfig(format!(
                "stream {} is {}, only audio and video can be decoded",
                stream.index,
                stream.media.name()
            )));
        }
        Ok((frames_per_chunk, num_chunks))
    }

    fn filter(&self) -> Option<&str> {
        self.filter_description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

/// Snapshot of an output pipeline for callers.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputStreamInfo {
    pub config: OutputStreamConfig,
    pub decoder_name: String,
    /// Layout of the chunks produced so far, once known.
    pub layout: Option<FrameLayout>,
    pub queued_chunks: usize,
    pub evicted_chunks: u64,
    pub failed: bool,
}

/// Decoder, optional filter stage and chunk buffer for one output.
///
/// The first error in any stage is kept: the pipeline stops consuming
/// packets, still hands out the chunks it completed before, and then reports
/// the error on every pop.
pub struct OutputStream {
    config: OutputStreamConfig,
    decoder: Box<dyn FrameDecoder>,
    filter: Option<FilterStage>,
    buffer: ChunkBuffer,
    layout: Option<FrameLayout>,
    failure: Option<ReaderError>,
    discard_until: Option<f64>,
    /// Latest frame of unknown duration starting at or before the seek
    /// target; it is the one containing the target once a later frame shows up.
    held: Option<Frame>,
}

impl OutputStream {
    pub fn new(
        config: OutputStreamConfig,
        stream: &SourceStreamInfo,
        decoder: Box<dyn FrameDecoder>,
    ) -> Result<Self> {
        let (frames_per_chunk, num_chunks) = config.validate(stream)?;
        let filter = config.filter().map(FilterStage::new);
        Ok(Self {
            config,
            decoder,
            filter,
            buffer: ChunkBuffer::new(frames_per_chunk, num_chunks),
            layout: None,
            failure: None,
            discard_until: None,
            held: None,
        })
    }

    pub fn source_index(&self) -> usize {
        self.config.source_index
    }

    /// Ready when a chunk is queued or the pipeline has an error to report.
    pub fn is_ready(&self) -> bool {
        self.buffer.has_chunk() || self.failure.is_some()
    }

    pub fn info(&self) -> OutputStreamInfo {
        OutputStreamInfo {
            config: self.config.clone(),
            decoder_name: self.decoder.name().to_string(),
            layout: self.layout,
            queued_chunks: self.buffer.len(),
            evicted_chunks: self.buffer.evicted(),
            failed: self.failure.is_some(),
        }
    }

    /// Decodes one packet of this pipeline's source stream.
    pub fn feed(&mut self, packet: &RawPacket) {
        if self.failure.is_some() {
            return;
        }
        let result = self
            .decoder
            .decode(packet)
            .and_then(|frames| self.process(frames));
        self.record(result);
    }

    /// Drains the decoder and filter at end of stream and seals the partial
    /// chunk.
    pub fn flush_and_seal(&mut self) {
        if self.failure.is_some() {
            return;
        }
        let result = self.decoder.flush().and_then(|frames| self.process(frames));
        let result = result
            .and_then(|()| self.flush_filter())
            .and_then(|()| self.release_held());
        self.record(result);
        if self.failure.is_none() {
            self.buffer.seal();
        }
    }

    /// Drops all in-flight state after a seek. Nothing is sealed.
    pub fn reset(&mut self) {
        self.decoder.reset();
        if let Some(filter) = self.filter.as_mut() {
            filter.reset();
        }
        self.buffer.reset();
        self.layout = None;
        self.discard_until = None;
        self.held = None;
    }

    /// Drops decoded frames that end at or before `seconds`, keeping the
    /// frame that contains it.
    pub fn discard_before(&mut self, seconds: f64) {
        self.discard_until = Some(seconds);
    }

    /// Next completed chunk, then the stored error once the queue is empty.
    pub fn pop(&mut self) -> Result<Option<Chunk>> {
        if let Some(chunk) = self.buffer.pop() {
            return Ok(Some(chunk));
        }
        match &self.failure {
            Some(e) => Err(e.clone()),
            None => Ok(None),
        }
    }

    fn record(&mut self, result: Result<()>) {
        if let Err(e) = result {
            log::warn!(
                "output pipeline for stream {} ({}) failed: {}",
                self.config.source_index,
                self.decoder.name(),
                e
            );
            self.failure = Some(e);
        }
    }

    fn process(&mut self, frames: Vec<RawFrame>) -> Result<()> {
        let time_base = self.decoder.time_base();
        for frame in frames {
            match self.filter.as_mut() {
                Some(filter) => {
                    let filtered = filter.apply(frame, time_base)?;
                    let out_time_base = filter.time_base().unwrap_or(time_base);
                    for frame in filtered {
                        self.store(&frame, out_time_base)?;
                    }
                }
                None => self.store(&frame, time_base)?,
            }
        }
        Ok(())
    }

    fn flush_filter(&mut self) -> Result<()> {
        let Some(filter) = self.filter.as_mut() else {
            return Ok(());
        };
        let time_base = filter.time_base().unwrap_or(self.decoder.time_base());
        for frame in filter.flush()? {
            self.store(&frame, time_base)?;
        }
        Ok(())
    }

    fn store(&mut self, raw: &RawFrame, time_base: Rational) -> Result<()> {
        let frame = Frame::from_raw(raw, time_base)?;
        if let Some(target) = self.discard_until {
            match seek_position(&frame, target) {
                SeekPosition::Before => return Ok(()),
                SeekPosition::Candidate => {
                    self.held = Some(frame);
                    return Ok(());
                }
                SeekPosition::Contains => self.held = None,
                SeekPosition::After => {}
            }
            self.discard_until = None;
            self.release_held()?;
        }
        self.push(frame)
    }

    fn release_held(&mut self) -> Result<()> {
        self.discard_until = None;
        match self.held.take() {
            Some(frame) => self.push(frame),
            None => Ok(()),
        }
    }

    fn push(&mut self, frame: Frame) -> Result<()> {
        self.layout = Some(frame.layout);
        self.buffer.push(frame)
    }
}

/// Where a decoded frame lies relative to a seek target.
#[derive(Debug, PartialEq, Eq)]
enum SeekPosition {
    /// Ends at or before the target.
    Before,
    /// Unknown duration, starts at or before the target.
    Candidate,
    /// Known duration, spans the target.
    Contains,
    /// Starts after the target, or carries no timestamp.
    After,
}

fn seek_position(frame: &Frame, target: f64) -> SeekPosition {
    let Some(pts) = frame.pts else {
        return SeekPosition::After;
    };
    match frame.duration {
        Some(duration) if duration > 0.0 => {
            if pts + duration <= target {
                SeekPosition::Before
            } else if pts <= target {
                SeekPosition::Contains
            } else {
                SeekPosition::After
            }
        }
        _ if pts <= target => SeekPosition::Candidate,
        _ => SeekPosition::After,
    }
}
