use bytes::Bytes;
use ffmpeg_next::{Rational, format::Pixel, format::Sample};

use crate::error::{ReaderError, Result};
use crate::packet::ts_to_seconds;

/// A decoded frame as produced by a decoder or a filter graph.
pub enum RawFrame {
    Video(ffmpeg_next::frame::Video),
    Audio(ffmpeg_next::frame::Audio),
}

impl RawFrame {
    /// Presentation timestamp. Decoders stamp their best-effort timestamp
    /// into `pts`, and filters rescale `pts` into the sink time base.
    pub fn pts(&self) -> Option<i64> {
        match self {
            RawFrame::Video(frame) => frame.pts(),
            RawFrame::Audio(frame) => frame.pts(),
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, RawFrame::Audio(_))
    }
}

/// Shape of the samples or pixels held by a [`Frame`] or chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLayout {
    /// Interleaved samples; `format` is always a packed sample format.
    Audio {
        sample_rate: u32,
        channels: u16,
        format: Sample,
    },
    /// One picture per frame, planes stored back to back without padding.
    Video {
        width: u32,
        height: u32,
        format: Pixel,
    },
}

impl FrameLayout {
    pub fn sample_rate(&self) -> Option<u32> {
        match self {
            FrameLayout::Audio { sample_rate, .. } => Some(*sample_rate),
            FrameLayout::Video { .. } => None,
        }
    }
}

/// A decoded frame copied out of FFmpeg into packed bytes.
///
/// For audio, `num_frames` is the number of samples per channel. For video it
/// is always 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub layout: FrameLayout,
    pub data: Bytes,
    pub num_frames: usize,
    /// Presentation time of the first sample/picture, in seconds.
    pub pts: Option<f64>,
    /// Seconds covered by the frame, when known.
    pub duration: Option<f64>,
}

impl Frame {
    pub fn bytes_per_frame(&self) -> usize {
        if self.num_frames == 0 {
            0
        } else {
            self.data.len() / self.num_frames
        }
    }

    /// Copies a raw FFmpeg frame into packed bytes. `time_base` is the time
    /// base of the frame's timestamps.
    pub fn from_raw(frame: &RawFrame, time_base: Rational) -> Result<Self> {
        let pts = frame.pts().map(|ts| ts_to_seconds(ts, time_base));
        match frame {
            RawFrame::Audio(audio) => Self::from_audio(audio, pts),
            RawFrame::Video(video) => {
                let duration = unsafe { (*video.as_ptr()).duration };
                let duration = (duration > 0).then(|| ts_to_seconds(duration, time_base));
                Self::from_video(video, pts, duration)
            }
        }
    }

    fn from_audio(frame: &ffmpeg_next::frame::Audio, pts: Option<f64>) -> Result<Self> {
        let samples = frame.samples();
        let channels = frame.channels();
        let format = frame.format();
        if format == Sample::None || channels == 0 {
            return Err(ReaderError::decode("audio frame without sample format"));
        }

        let data = copy_audio_data(frame, format.bytes(), samples, channels as usize)?;
        let rate = frame.rate();
        Ok(Self {
            layout: FrameLayout::Audio {
                sample_rate: rate,
                channels,
                format: format.packed(),
            },
            data: Bytes::from(data),
            num_frames: samples,
            pts,
            duration: (rate > 0).then(|| samples as f64 / rate as f64),
        })
    }

    fn from_video(
        frame: &ffmpeg_next::frame::Video,
        pts: Option<f64>,
        duration: Option<f64>,
    ) -> Result<Self> {
        let format = frame.format();
        let (width, height) = (frame.width(), frame.height());
        if format == Pixel::None || width == 0 || height == 0 {
            return Err(ReaderError::decode(format!(
                "invalid video frame {}x{} {:?}",
                width, height, format
            )));
        }

        let data = copy_video_data(frame)?;
        Ok(Self {
            layout: FrameLayout::Video {
                width,
                height,
                format,
            },
            data: Bytes::from(data),
            num_frames: 1,
            pts,
            duration,
        })
    }
}

/// Copies audio samples, interleaving planar formats. Planar audio keeps one
/// channel per plane and only `linesize[0]` is meaningful, so planes are read
/// through the raw data pointers.
fn copy_audio_data(
    frame: &ffmpeg_next::frame::Audio,
    bytes_per_sample: usize,
    samples: usize,
    channels: usize,
) -> Result<Vec<u8>> {
    let total = samples * channels * bytes_per_sample;
    if samples == 0 {
        return Ok(Vec::new());
    }

    if !frame.is_planar() {
        let plane = frame.data(0);
        if plane.len() < total {
            return Err(ReaderError::decode(format!(
                "packed audio has {} bytes, expected {}",
                plane.len(),
                total
            )));
        }
        return Ok(plane[..total].to_vec());
    }

    let plane_bytes = samples * bytes_per_sample;
    if frame.data(0).len() < plane_bytes {
        return Err(ReaderError::decode(format!(
            "planar audio has {} bytes per plane, expected {}",
            frame.data(0).len(),
            plane_bytes
        )));
    }

    let mut out = vec![0u8; total];
    for ch in 0..channels {
        let plane = unsafe {
            let ptr = *(*frame.as_ptr()).extended_data.add(ch);
            std::slice::from_raw_parts(ptr, plane_bytes)
        };
        for (s, sample) in plane.chunks_exact(bytes_per_sample).enumerate() {
            let offset = (s * channels + ch) * bytes_per_sample;
            out[offset..offset + bytes_per_sample].copy_from_slice(sample);
        }
    }
    Ok(out)
}

/// Copies every plane row by row, dropping the linesize padding.
fn copy_video_data(frame: &ffmpeg_next::frame::Video) -> Result<Vec<u8>> {
    let pix_fmt: ffmpeg_next::ffi::AVPixelFormat = frame.format().into();
    let mut out = Vec::new();
    for plane in 0..frame.planes() {
        let row_bytes = unsafe {
            ffmpeg_next::ffi::av_image_get_linesize(pix_fmt, frame.width() as i32, plane as i32)
        };
        if row_bytes < 0 {
            return Err(ReaderError::decode(format!(
                "cannot compute line size for {:?}",
                frame.format()
            )));
        }
        let row_bytes = row_bytes as usize;
        let stride = frame.stride(plane);
        let rows = frame.plane_height(plane) as usize;
        let data = frame.data(plane);
        for row in 0..rows {
            let start = row * stride;
            let end = start + row_bytes;
            if end > data.len() {
                return Err(ReaderError::decode("video plane shorter than expected"));
            }
            out.extend_from_slice(&data[start..end]);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg_next::{ChannelLayout, format::sample::Type};

    fn planar_stereo(samples: usize) -> ffmpeg_next::frame::Audio {
        let mut frame = ffmpeg_next::frame::Audio::new(
            Sample::I16(Type::Planar),
            samples,
            ChannelLayout::STEREO,
        );
        frame.set_rate(8000);
        frame.set_pts(Some(8000));
        for (i, b) in frame.data_mut(0).iter_mut().enumerate() {
            *b = (i % 2) as u8;
        }
        // right channel plane, written through extended_data like the copy does
        let right = unsafe {
            let ptr = *(*frame.as_mut_ptr()).extended_data.add(1);
            std::slice::from_raw_parts_mut(ptr, samples * 2)
        };
        right.fill(9);
        frame
    }

    #[test]
    fn test_planar_audio_is_interleaved() -> anyhow::Result<()> {
        let frame = RawFrame::Audio(planar_stereo(4));
        let out = Frame::from_raw(&frame, Rational::new(1, 8000))?;

        assert_eq!(out.num_frames, 4);
        assert_eq!(out.pts, Some(1.0));
        assert_eq!(out.duration, Some(0.0005));
        assert_eq!(out.bytes_per_frame(), 4);
        assert_eq!(
            out.layout,
            FrameLayout::Audio {
                sample_rate: 8000,
                channels: 2,
                format: Sample::I16(Type::Packed),
            }
        );
        // left sample bytes [0, 1], right sample bytes [9, 9]
        assert_eq!(&out.data[..8], &[0, 1, 9, 9, 0, 1, 9, 9]);
        Ok(())
    }

    #[test]
    fn test_video_frame_drops_padding() -> anyhow::Result<()> {
        let mut video = ffmpeg_next::frame::Video::new(Pixel::GRAY8, 3, 2);
        for b in video.data_mut(0).iter_mut() {
            *b = 7;
        }
        video.set_pts(Some(5));
        let out = Frame::from_raw(&RawFrame::Video(video), Rational::new(1, 10))?;

        assert_eq!(out.num_frames, 1);
        assert_eq!(out.data.len(), 6);
        assert!(out.data.iter().all(|b| *b == 7));
        assert_eq!(out.pts, Some(0.5));
        Ok(())
    }

    #[test]
    fn test_pts_ignores_stale_best_effort_timestamp() -> anyhow::Result<()> {
        let mut audio = planar_stereo(4);
        audio.set_rate(8000);
        audio.set_pts(Some(512));
        // copied unchanged from the filter input, still in the input time base
        unsafe {
            (*audio.as_mut_ptr()).best_effort_timestamp = 1024;
        }
        let raw = RawFrame::Audio(audio);
        assert_eq!(raw.pts(), Some(512));

        let out = Frame::from_raw(&raw, Rational::new(1, 8000))?;
        assert_eq!(out.pts, Some(0.064));
        Ok(())
    }
}
