use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use crate::{
    error::{ReaderError, Result},
    frame::{Frame, FrameLayout},
};

/// A fixed-size block of frames handed to the caller.
///
/// Holds exactly `frames_per_chunk` frames, except the last chunk of a stream
/// which may be shorter.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub layout: FrameLayout,
    pub data: Bytes,
    pub num_frames: usize,
    /// Presentation time of the first frame, in seconds.
    pub pts: Option<f64>,
}

impl Chunk {
    pub fn duration(&self) -> Option<f64> {
        match self.layout.sample_rate() {
            Some(rate) if rate > 0 => Some(self.num_frames as f64 / rate as f64),
            _ => None,
        }
    }
}

/// Converts a user facing chunk limit, where `-1` means unbounded.
pub fn chunk_limit(value: i64, name: &str) -> Result<Option<usize>> {
    match value {
        -1 => Ok(None),
        v if v > 0 => Ok(Some(v as usize)),
        v => Err(ReaderError::InvalidConfig(format!(
            "{} must be positive or -1, got {}",
            name, v
        ))),
    }
}

/// Accumulates frames into chunks and keeps a bounded queue of finished ones.
///
/// When the queue is full the oldest chunk is dropped to make room, so a
/// slow consumer always sees the most recent data.
pub struct ChunkBuffer {
    frames_per_chunk: Option<usize>,
    num_chunks: Option<usize>,
    layout: Option<FrameLayout>,
    pending: BytesMut,
    pending_frames: usize,
    pending_pts: Option<f64>,
    chunks: VecDeque<Chunk>,
    evicted: u64,
}

impl ChunkBuffer {
    /// `None` for either limit selects the unbounded mode for it.
    pub fn new(frames_per_chunk: Option<usize>, num_chunks: Option<usize>) -> Self {
        Self {
            frames_per_chunk,
            num_chunks,
            layout: None,
            pending: BytesMut::new(),
            pending_frames: 0,
            pending_pts: None,
            chunks: VecDeque::new(),
            evicted: 0,
        }
    }

    /// Appends a frame, completing as many chunks as it fills. Audio frames
    /// are split at sample granularity across chunk boundaries.
    pub fn push(&mut self, frame: Frame) -> Result<()> {
        if frame.num_frames == 0 {
            return Ok(());
        }
        match self.layout {
            Some(layout) if layout != frame.layout => {
                return Err(ReaderError::Decode(format!(
                    "frame layout changed from {:?} to {:?}",
                    layout, frame.layout
                )));
            }
            Some(_) => {}
            None => self.layout = Some(frame.layout),
        }

        let bytes_per_frame = frame.bytes_per_frame();
        let rate = frame.layout.sample_rate().filter(|r| *r > 0);
        let mut offset = 0;
        while offset < frame.num_frames {
            if self.pending_frames == 0 {
                self.pending_pts = frame.pts.map(|pts| match rate {
                    Some(rate) => pts + offset as f64 / rate as f64,
                    None => pts,
                });
            }
            let remaining = frame.num_frames - offset;
            let take = match self.frames_per_chunk {
                Some(n) => remaining.min(n - self.pending_frames),
                None => remaining,
            };
            self.pending.extend_from_slice(
                &frame.data[offset * bytes_per_frame..(offset + take) * bytes_per_frame],
            );
            self.pending_frames += take;
            offset += take;

            if self.frames_per_chunk == Some(self.pending_frames) {
                self.complete();
            }
        }
        Ok(())
    }

    /// Turns the partial accumulator, if any, into a final short chunk.
    pub fn seal(&mut self) {
        if self.pending_frames > 0 {
            self.complete();
        }
    }

    pub fn pop(&mut self) -> Option<Chunk> {
        self.chunks.pop_front()
    }

    /// Drops queued chunks and the partial accumulator.
    pub fn reset(&mut self) {
        self.layout = None;
        self.pending.clear();
        self.pending_frames = 0;
        self.pending_pts = None;
        self.chunks.clear();
    }

    pub fn has_chunk(&self) -> bool {
        !self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn pending_frames(&self) -> usize {
        self.pending_frames
    }

    /// Number of chunks dropped because the queue was full.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    fn complete(&mut self) {
        let Some(layout) = self.layout else {
            return;
        };
        let chunk = Chunk {
            layout,
            data: self.pending.split().freeze(),
            num_frames: self.pending_frames,
            pts: self.pending_pts.take(),
        };
        self.pending_frames = 0;
        self.chunks.push_back(chunk);

        if let Some(limit) = self.num_chunks {
            while self.chunks.len() > limit {
                if let Some(dropped) = self.chunks.pop_front() {
                    self.evicted += 1;
                    log::debug!(
                        "chunk queue full ({}), dropped chunk at {:?}",
                        limit,
                        dropped.pts
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg_next::format::{Pixel, Sample, sample::Type};

    const MONO_S16: FrameLayout = FrameLayout::Audio {
        sample_rate: 100,
        channels: 1,
        format: Sample::I16(Type::Packed),
    };

    fn audio(samples: usize, first: u8, pts: f64) -> Frame {
        let data: Vec<u8> = (0..samples)
            .flat_map(|i| [first.wrapping_add(i as u8), 0])
            .collect();
        Frame {
            layout: MONO_S16,
            data: Bytes::from(data),
            num_frames: samples,
            pts: Some(pts),
            duration: Some(samples as f64 / 100.0),
        }
    }

    fn picture(value: u8, pts: f64) -> Frame {
        Frame {
            layout: FrameLayout::Video {
                width: 2,
                height: 2,
                format: Pixel::GRAY8,
            },
            data: Bytes::from(vec![value; 4]),
            num_frames: 1,
            pts: Some(pts),
            duration: None,
        }
    }

    #[test]
    fn test_chunk_limit() {
        assert_eq!(chunk_limit(-1, "num_chunks").unwrap(), None);
        assert_eq!(chunk_limit(4, "num_chunks").unwrap(), Some(4));
        assert!(matches!(
            chunk_limit(0, "num_chunks"),
            Err(ReaderError::InvalidConfig(_))
        ));
        assert!(chunk_limit(-2, "frames_per_chunk").is_err());
    }

    #[test]
    fn test_audio_is_split_across_chunks() -> anyhow::Result<()> {
        let mut buffer = ChunkBuffer::new(Some(4), None);
        buffer.push(audio(6, 0, 1.0))?;
        buffer.push(audio(3, 6, 1.06))?;
        buffer.seal();

        let first = buffer.pop().unwrap();
        assert_eq!(first.num_frames, 4);
        assert_eq!(first.pts, Some(1.0));
        assert_eq!(&first.data[..], &[0, 0, 1, 0, 2, 0, 3, 0]);

        // the remainder of the first frame starts the second chunk
        let second = buffer.pop().unwrap();
        assert_eq!(second.num_frames, 4);
        assert!((second.pts.unwrap() - 1.04).abs() < 1e-9);
        assert_eq!(&second.data[..], &[4, 0, 5, 0, 6, 0, 7, 0]);

        let last = buffer.pop().unwrap();
        assert_eq!(last.num_frames, 1);
        assert_eq!(&last.data[..], &[8, 0]);
        assert!(buffer.pop().is_none());
        Ok(())
    }

    #[test]
    fn test_oldest_chunk_is_evicted() -> anyhow::Result<()> {
        let mut buffer = ChunkBuffer::new(Some(1), Some(2));
        for i in 0..5u8 {
            buffer.push(picture(i, i as f64))?;
        }
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.evicted(), 3);
        assert_eq!(buffer.pop().unwrap().data[0], 3);
        assert_eq!(buffer.pop().unwrap().data[0], 4);
        Ok(())
    }

    #[test]
    fn test_unbounded_chunk_is_sealed_once() -> anyhow::Result<()> {
        let mut buffer = ChunkBuffer::new(None, None);
        for i in 0..10 {
            buffer.push(audio(10, 0, i as f64 / 10.0))?;
        }
        assert!(!buffer.has_chunk());
        assert_eq!(buffer.pending_frames(), 100);

        buffer.seal();
        let chunk = buffer.pop().unwrap();
        assert_eq!(chunk.num_frames, 100);
        assert_eq!(chunk.pts, Some(0.0));
        assert_eq!(chunk.duration(), Some(1.0));

        buffer.seal();
        assert!(buffer.pop().is_none());
        Ok(())
    }

    #[test]
    fn test_layout_change_is_rejected() -> anyhow::Result<()> {
        let mut buffer = ChunkBuffer::new(Some(2), None);
        buffer.push(audio(1, 0, 0.0))?;
        let result = buffer.push(picture(0, 0.0));
        assert!(matches!(result, Err(ReaderError::Decode(_))));
        Ok(())
    }

    #[test]
    fn test_reset_discards_everything() -> anyhow::Result<()> {
        let mut buffer = ChunkBuffer::new(Some(2), None);
        buffer.push(audio(5, 0, 0.0))?;
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.pending_frames(), 1);

        buffer.reset();
        buffer.seal();
        assert!(buffer.is_empty());

        // a different layout is accepted after a reset
        buffer.push(picture(1, 0.0))?;
        Ok(())
    }
}
