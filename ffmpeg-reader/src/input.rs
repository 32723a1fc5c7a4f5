use std::ffi::CString;
use std::path::Path;
use std::time::{Duration, Instant};

use ffmpeg_next::{Dictionary, Rational, util::error::EAGAIN};

use crate::{
    decoder::{Decoder, FrameDecoder},
    error::{ReaderError, Result},
    options::{OptionDict, to_dictionary},
    output::OutputStreamConfig,
    packet::RawPacket,
    stream::{AvStream, SourceStreamInfo},
};

/// Result of a single read attempt on the demuxer.
pub enum ReadOutcome {
    Packet(RawPacket),
    /// The source has nothing right now (live input); try again later.
    WouldBlock,
    EndOfStream,
}

/// Result of [`PacketSource::next_packet`].
pub enum PacketEvent {
    Packet(RawPacket),
    EndOfStream,
    Timeout,
}

/// A demultiplexed input the reader pulls packets from.
pub trait PacketSource {
    fn streams(&self) -> &[SourceStreamInfo];

    /// Performs exactly one read. Errors other than would-block and end of
    /// stream are fatal.
    fn read_packet(&mut self) -> Result<ReadOutcome>;

    /// Repositions to the nearest keyframe at or before `seconds`.
    fn seek(&mut self, seconds: f64) -> Result<()>;

    /// Opens a decoder for source stream `index`.
    fn open_decoder(
        &self,
        index: usize,
        config: &OutputStreamConfig,
    ) -> Result<Box<dyn FrameDecoder>>;

    /// Reads until a packet or end of stream arrives, sleeping `backoff`
    /// between would-block attempts. `None` waits forever; a zero timeout
    /// makes exactly one attempt.
    fn next_packet(&mut self, timeout: Option<Duration>, backoff: Duration) -> Result<PacketEvent> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            match self.read_packet()? {
                ReadOutcome::Packet(packet) => return Ok(PacketEvent::Packet(packet)),
                ReadOutcome::EndOfStream => return Ok(PacketEvent::EndOfStream),
                ReadOutcome::WouldBlock => {}
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(PacketEvent::Timeout);
                    }
                    std::thread::sleep(backoff.min(deadline - now));
                }
                None => std::thread::sleep(backoff),
            }
        }
    }
}

/// FFmpeg demuxer over a file, URL or capture device.
pub struct AvInput {
    inner: ffmpeg_next::format::context::Input,
    streams: Vec<AvStream>,
    infos: Vec<SourceStreamInfo>,
    eof: bool,
}

impl AvInput {
    /// Resolve input format by name (e.g. "x11grab", "v4l2", "lavfi") via
    /// FFmpeg's av_find_input_format. An unknown name fails to open `locator`.
    fn find_input_format(
        locator: &str,
        name: &str,
    ) -> Result<ffmpeg_next::format::format::Input> {
        let not_found = || ReaderError::SourceOpen {
            locator: locator.to_string(),
            source: ffmpeg_next::Error::DemuxerNotFound,
        };
        let cname = CString::new(name).map_err(|_| not_found())?;
        let ptr = unsafe { ffmpeg_next::ffi::av_find_input_format(cname.as_ptr()) };
        if ptr.is_null() {
            log::error!("input format {:?} not found", name);
            return Err(not_found());
        }
        Ok(unsafe { ffmpeg_next::format::format::Input::wrap(ptr as *mut _) })
    }

    /// Opens `locator`. `device_hint` forces an input format (e.g. "v4l2"),
    /// `options` go to the demuxer or device unexamined.
    pub fn open(locator: &str, device_hint: Option<&str>, options: &OptionDict) -> Result<Self> {
        use ffmpeg_next::format::format::Format;

        let path = Path::new(locator);
        let source_open = |source| ReaderError::SourceOpen {
            locator: locator.to_string(),
            source,
        };
        let opts: Dictionary<'static> = to_dictionary(options);
        let input = match device_hint {
            Some(fmt_name) => {
                let fmt = Self::find_input_format(locator, fmt_name)?;
                let ctx = ffmpeg_next::format::open_with(path, &Format::Input(fmt), opts)
                    .map_err(source_open)?;
                ctx.input()
            }
            None if options.is_empty() => ffmpeg_next::format::input(path).map_err(source_open)?,
            None => ffmpeg_next::format::input_with_dictionary(path, opts).map_err(source_open)?,
        };

        let streams: Vec<AvStream> = input.streams().map(AvStream::from).collect();
        let infos: Vec<SourceStreamInfo> = streams.iter().map(AvStream::info).collect();
        log::info!("opened {} with {} streams", locator, infos.len());
        for info in &infos {
            log::info!(
                "stream index: {}, codec: {}, kind: {}, time_base: {}",
                info.index,
                info.codec_name,
                info.media.name(),
                info.time_base
            );
        }

        Ok(Self {
            inner: input,
            streams,
            infos,
            eof: false,
        })
    }

    /// Container duration in seconds, if known.
    pub fn duration(&self) -> Option<f64> {
        let duration = self.inner.duration();
        (duration > 0).then(|| duration as f64 / ffmpeg_next::ffi::AV_TIME_BASE as f64)
    }

    /// Short name of the demuxer, e.g. "mov,mp4,m4a,3gp,3g2,mj2".
    pub fn format_name(&self) -> String {
        self.inner.format().name().to_string()
    }
}

impl PacketSource for AvInput {
    fn streams(&self) -> &[SourceStreamInfo] {
        &self.infos
    }

    fn read_packet(&mut self) -> Result<ReadOutcome> {
        if self.eof {
            return Ok(ReadOutcome::EndOfStream);
        }
        let mut packet = ffmpeg_next::Packet::empty();
        match packet.read(&mut self.inner) {
            Ok(()) => {
                let time_base = self
                    .streams
                    .get(packet.stream())
                    .map(AvStream::time_base)
                    .unwrap_or(Rational::new(1, ffmpeg_next::ffi::AV_TIME_BASE as i32));
                Ok(ReadOutcome::Packet((packet, time_base).into()))
            }
            Err(ffmpeg_next::Error::Eof) => {
                log::debug!("end of input stream");
                self.eof = true;
                Ok(ReadOutcome::EndOfStream)
            }
            Err(ffmpeg_next::Error::Other { errno }) if errno == EAGAIN => {
                Ok(ReadOutcome::WouldBlock)
            }
            Err(e) => Err(ReaderError::Read(e.to_string())),
        }
    }

    fn seek(&mut self, seconds: f64) -> Result<()> {
        let ts = (seconds * ffmpeg_next::ffi::AV_TIME_BASE as f64).round() as i64;
        self.inner
            .seek(ts, ..ts)
            .map_err(|e| ReaderError::Seek(format!("seek to {}s: {}", seconds, e)))?;
        self.eof = false;
        Ok(())
    }

    fn open_decoder(
        &self,
        index: usize,
        config: &OutputStreamConfig,
    ) -> Result<Box<dyn FrameDecoder>> {
        let stream = self
            .streams
            .get(index)
            .ok_or(ReaderError::InvalidStreamIndex {
                index,
                available: self.streams.len(),
            })?;
        Ok(Box::new(Decoder::open(stream, config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flaky {
        ready_after: usize,
        attempts: usize,
    }

    impl PacketSource for Flaky {
        fn streams(&self) -> &[SourceStreamInfo] {
            &[]
        }

        fn read_packet(&mut self) -> Result<ReadOutcome> {
            self.attempts += 1;
            if self.attempts > self.ready_after {
                Ok(ReadOutcome::EndOfStream)
            } else {
                Ok(ReadOutcome::WouldBlock)
            }
        }

        fn seek(&mut self, _seconds: f64) -> Result<()> {
            Ok(())
        }

        fn open_decoder(
            &self,
            index: usize,
            _config: &OutputStreamConfig,
        ) -> Result<Box<dyn FrameDecoder>> {
            Err(ReaderError::InvalidStreamIndex {
                index,
                available: 0,
            })
        }
    }

    #[test]
    fn test_zero_timeout_is_single_attempt() -> anyhow::Result<()> {
        let mut source = Flaky {
            ready_after: 3,
            attempts: 0,
        };
        let event = source.next_packet(Some(Duration::ZERO), Duration::from_millis(1))?;
        assert!(matches!(event, PacketEvent::Timeout));
        assert_eq!(source.attempts, 1);
        Ok(())
    }

    #[test]
    fn test_retries_until_ready() -> anyhow::Result<()> {
        let mut source = Flaky {
            ready_after: 3,
            attempts: 0,
        };
        let event = source.next_packet(None, Duration::from_millis(1))?;
        assert!(matches!(event, PacketEvent::EndOfStream));
        assert_eq!(source.attempts, 4);
        Ok(())
    }

    #[test]
    fn test_timeout_bounds_retries() -> anyhow::Result<()> {
        let mut source = Flaky {
            ready_after: usize::MAX,
            attempts: 0,
        };
        let started = Instant::now();
        let event = source.next_packet(Some(Duration::from_millis(30)), Duration::from_millis(5))?;
        assert!(matches!(event, PacketEvent::Timeout));
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(source.attempts > 1);
        Ok(())
    }

    #[test]
    fn test_open_missing_file() {
        crate::init().unwrap();
        let result = AvInput::open("/nonexistent/clip.mp4", None, &OptionDict::new());
        assert!(matches!(result, Err(ReaderError::SourceOpen { .. })));
    }

    #[test]
    fn test_unknown_device_hint() {
        crate::init().unwrap();
        let result = AvInput::open("x", Some("no_such_device_format"), &OptionDict::new());
        assert!(matches!(
            result,
            Err(ReaderError::SourceOpen {
                source: ffmpeg_next::Error::DemuxerNotFound,
                ..
            })
        ));
    }
}
