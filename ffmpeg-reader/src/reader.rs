use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::{
    chunk::Chunk,
    error::{ReaderError, Result},
    input::{AvInput, PacketEvent, PacketSource},
    options::OptionDict,
    output::{OutputStream, OutputStreamConfig, OutputStreamInfo},
    stream::{MediaKind, SourceStreamInfo},
};

/// Delay between would-block reads when the caller gives none.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(10);

/// Handle of an output pipeline. Never reused within one reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PipelineId(u64);

impl PipelineId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of one processing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketStatus {
    /// A packet was read and dispatched.
    Success,
    /// Nothing arrived before the timeout. No state was touched.
    Timeout,
    /// The source is exhausted and every pipeline has been sealed.
    EndOfStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Idle,
    Processing,
    Exhausted,
    /// A fatal read error occurred; processing calls keep returning it.
    Failed,
}

/// Pulls packets from one source and fans them out to any number of
/// independently configured output pipelines.
///
/// Everything happens on the caller's thread: nothing is read or decoded
/// unless one of the `process_*` methods is called.
pub struct StreamReader<S: PacketSource = AvInput> {
    source: S,
    pipelines: BTreeMap<PipelineId, OutputStream>,
    next_id: u64,
    state: ReaderState,
    fatal: Option<ReaderError>,
}

impl StreamReader<AvInput> {
    /// Opens a file, URL or device. See [`AvInput::open`].
    pub fn open(locator: &str, device_hint: Option<&str>, options: &OptionDict) -> Result<Self> {
        Ok(Self::new(AvInput::open(locator, device_hint, options)?))
    }
}

impl<S: PacketSource> StreamReader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            pipelines: BTreeMap::new(),
            next_id: 0,
            state: ReaderState::Idle,
            fatal: None,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn num_src_streams(&self) -> usize {
        self.source.streams().len()
    }

    pub fn num_out_streams(&self) -> usize {
        self.pipelines.len()
    }

    pub fn list_source_streams(&self) -> &[SourceStreamInfo] {
        self.source.streams()
    }

    pub fn source_stream_info(&self, index: usize) -> Result<&SourceStreamInfo> {
        let streams = self.source.streams();
        streams.get(index).ok_or(ReaderError::InvalidStreamIndex {
            index,
            available: streams.len(),
        })
    }

    /// The audio stream with the most channels, then the highest sample
    /// rate, then the lowest index.
    pub fn find_best_audio_stream(&self) -> Result<usize> {
        self.source
            .streams()
            .iter()
            .filter_map(|s| match s.media {
                MediaKind::Audio {
                    sample_rate,
                    channels,
                    ..
                } => Some((channels, sample_rate, std::cmp::Reverse(s.index))),
                _ => None,
            })
            .max()
            .map(|(_, _, std::cmp::Reverse(index))| index)
            .ok_or(ReaderError::NoSuchStream("audio"))
    }

    /// The video stream with the largest picture, then the highest frame
    /// rate, then the lowest index.
    pub fn find_best_video_stream(&self) -> Result<usize> {
        let mut best: Option<(u64, f64, usize)> = None;
        for stream in self.source.streams() {
            let MediaKind::Video {
                width,
                height,
                frame_rate,
                ..
            } = stream.media
            else {
                continue;
            };
            let area = width as u64 * height as u64;
            let better = match best {
                None => true,
                Some((best_area, best_rate, _)) => {
                    area > best_area || (area == best_area && frame_rate > best_rate)
                }
            };
            if better {
                best = Some((area, frame_rate, stream.index));
            }
        }
        best.map(|(_, _, index)| index)
            .ok_or(ReaderError::NoSuchStream("video"))
    }

    /// Attaches a new pipeline. Existing pipelines are untouched whether or
    /// not this succeeds.
    pub fn add_output_stream(&mut self, config: OutputStreamConfig) -> Result<PipelineId> {
        let stream = self.source_stream_info(config.source_index)?.clone();
        config.validate(&stream)?;
        let decoder = self.source.open_decoder(config.source_index, &config)?;
        let pipeline = OutputStream::new(config, &stream, decoder)?;

        let id = PipelineId(self.next_id);
        self.next_id += 1;
        log::info!(
            "added output {} for {} stream {} ({})",
            id,
            stream.media.name(),
            stream.index,
            stream.codec_name
        );
        self.pipelines.insert(id, pipeline);
        Ok(id)
    }

    /// Like [`Self::add_output_stream`] but requires an audio stream.
    pub fn add_audio_stream(&mut self, config: OutputStreamConfig) -> Result<PipelineId> {
        if !self.source_stream_info(config.source_index)?.media.is_audio() {
            return Err(ReaderError::MediaKindMismatch {
                index: config.source_index,
                expected: "audio",
            });
        }
        self.add_output_stream(config)
    }

    /// Like [`Self::add_output_stream`] but requires a video stream.
    pub fn add_video_stream(&mut self, config: OutputStreamConfig) -> Result<PipelineId> {
        if !self.source_stream_info(config.source_index)?.media.is_video() {
            return Err(ReaderError::MediaKindMismatch {
                index: config.source_index,
                expected: "video",
            });
        }
        self.add_output_stream(config)
    }

    pub fn remove_output_stream(&mut self, id: PipelineId) -> Result<()> {
        self.pipelines
            .remove(&id)
            .map(|_| log::info!("removed output {}", id))
            .ok_or(ReaderError::UnknownPipeline(id))
    }

    pub fn pipeline_ids(&self) -> Vec<PipelineId> {
        self.pipelines.keys().copied().collect()
    }

    pub fn output_stream_info(&self, id: PipelineId) -> Result<OutputStreamInfo> {
        self.pipelines
            .get(&id)
            .map(OutputStream::info)
            .ok_or(ReaderError::UnknownPipeline(id))
    }

    /// Reads at most one packet and pushes it through every pipeline of its
    /// source stream. On end of stream every pipeline is flushed and sealed,
    /// once; later calls keep returning `EndOfStream` until a seek.
    pub fn process_one_packet(
        &mut self,
        timeout: Option<Duration>,
        backoff: Duration,
    ) -> Result<PacketStatus> {
        if let Some(e) = &self.fatal {
            return Err(e.clone());
        }
        if self.state == ReaderState::Exhausted {
            return Ok(PacketStatus::EndOfStream);
        }

        let event = match self.source.next_packet(timeout, backoff) {
            Ok(event) => event,
            Err(e) => {
                if e.is_fatal() {
                    log::error!("reading source failed: {}", e);
                    self.state = ReaderState::Failed;
                    self.fatal = Some(e.clone());
                }
                return Err(e);
            }
        };

        match event {
            PacketEvent::Packet(packet) => {
                self.state = ReaderState::Processing;
                log::trace!(
                    "packet on stream {} at {:?}s, {} bytes",
                    packet.index(),
                    packet.pts_seconds(),
                    packet.size()
                );
                for pipeline in self
                    .pipelines
                    .values_mut()
                    .filter(|p| p.source_index() == packet.index())
                {
                    pipeline.feed(&packet);
                }
                Ok(PacketStatus::Success)
            }
            PacketEvent::EndOfStream => {
                for pipeline in self.pipelines.values_mut() {
                    pipeline.flush_and_seal();
                }
                self.state = ReaderState::Exhausted;
                log::info!("source exhausted, sealed {} outputs", self.pipelines.len());
                Ok(PacketStatus::EndOfStream)
            }
            PacketEvent::Timeout => Ok(PacketStatus::Timeout),
        }
    }

    /// Processes packets until every pipeline has a chunk (or an error)
    /// ready. Timeouts are retried after `backoff`. Returns `EndOfStream`
    /// if the source ran out first and nothing is ready.
    pub fn process_until_buffers_ready(
        &mut self,
        timeout: Option<Duration>,
        backoff: Duration,
    ) -> Result<PacketStatus> {
        loop {
            if self.is_buffer_ready() {
                return Ok(PacketStatus::Success);
            }
            match self.process_one_packet(timeout, backoff)? {
                PacketStatus::Success => {}
                PacketStatus::Timeout => std::thread::sleep(backoff),
                PacketStatus::EndOfStream => {
                    return Ok(if self.is_buffer_ready() {
                        PacketStatus::Success
                    } else {
                        PacketStatus::EndOfStream
                    });
                }
            }
        }
    }

    /// Processes the whole source. Chunks beyond each pipeline's queue limit
    /// are dropped oldest first.
    pub fn process_all(&mut self) -> Result<()> {
        while self.process_one_packet(None, DEFAULT_BACKOFF)? != PacketStatus::EndOfStream {}
        Ok(())
    }

    /// True when there is at least one pipeline and each has a chunk or an
    /// error waiting.
    pub fn is_buffer_ready(&self) -> bool {
        !self.pipelines.is_empty() && self.pipelines.values().all(OutputStream::is_ready)
    }

    /// Takes the oldest chunk of every pipeline. A failed pipeline yields its
    /// error once its queue is empty.
    pub fn pop_chunks(&mut self) -> BTreeMap<PipelineId, Result<Option<Chunk>>> {
        self.pipelines
            .iter_mut()
            .map(|(id, pipeline)| (*id, pipeline.pop()))
            .collect()
    }

    pub fn pop_chunk(&mut self, id: PipelineId) -> Result<Option<Chunk>> {
        self.pipelines
            .get_mut(&id)
            .ok_or(ReaderError::UnknownPipeline(id))?
            .pop()
    }

    /// Moves to `seconds` from the start. All decoded but undelivered data
    /// is dropped; output resumes with the frame containing the target.
    pub fn seek(&mut self, seconds: f64) -> Result<()> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(ReaderError::InvalidArgument(format!(
                "seek target must be a non-negative number of seconds, got {}",
                seconds
            )));
        }
        if let Some(e) = &self.fatal {
            return Err(e.clone());
        }

        self.source.seek(seconds)?;
        for pipeline in self.pipelines.values_mut() {
            pipeline.reset();
            pipeline.discard_before(seconds);
        }
        self.state = ReaderState::Idle;
        log::debug!("seeked to {}s", seconds);
        Ok(())
    }
}

#[cfg(test)]
#[path = "reader_test.rs"]
mod reader_test;
