use ffmpeg_next::{Rational, filter, util::error::EAGAIN};

use crate::{
    error::{ReaderError, Result},
    frame::RawFrame,
};

struct FilterGraph {
    graph: filter::Graph,
    audio: bool,
    time_base: Rational,
}

/// Applies a textual FFmpeg filter description (e.g. `"aresample=16000"`,
/// `"scale=320:240,format=rgb24"`) to decoded frames.
///
/// The graph is built from the properties of the first frame it sees, so the
/// same stage works for whatever the decoder happens to produce. `reset`
/// drops the graph; the next frame rebuilds it.
pub struct FilterStage {
    description: String,
    graph: Option<FilterGraph>,
    time_base: Option<Rational>,
}

impl FilterStage {
    pub fn new(description: &str) -> Self {
        Self {
            description: description.to_string(),
            graph: None,
            time_base: None,
        }
    }

    /// Time base of the frames leaving the graph, once it has been built.
    /// Survives `flush` so drained frames can still be timed.
    pub fn time_base(&self) -> Option<Rational> {
        self.time_base
    }

    /// Pushes one frame through the graph. `time_base` is the time base of
    /// the incoming frame's timestamps.
    pub fn apply(&mut self, frame: RawFrame, time_base: Rational) -> Result<Vec<RawFrame>> {
        if self.graph.is_none() {
            let graph = FilterGraph::build(&self.description, &frame, time_base)?;
            self.time_base = Some(graph.time_base);
            self.graph = Some(graph);
        }
        let Some(graph) = self.graph.as_mut() else {
            return Ok(Vec::new());
        };
        if graph.audio != frame.is_audio() {
            return Err(ReaderError::filter("frame kind changed mid-stream"));
        }

        let mut source = graph
            .graph
            .get("in")
            .ok_or_else(|| ReaderError::filter("filter source missing"))?;
        let added = match &frame {
            RawFrame::Audio(audio) => source.source().add(audio),
            RawFrame::Video(video) => source.source().add(video),
        };
        added.map_err(ReaderError::filter)?;
        graph.drain()
    }

    /// Signals end of input and drains the frames the graph still holds.
    pub fn flush(&mut self) -> Result<Vec<RawFrame>> {
        let Some(graph) = self.graph.as_mut() else {
            return Ok(Vec::new());
        };
        let mut source = graph
            .graph
            .get("in")
            .ok_or_else(|| ReaderError::filter("filter source missing"))?;
        source.source().flush().map_err(ReaderError::filter)?;
        let frames = graph.drain()?;
        // a flushed buffer source accepts no more frames
        self.graph = None;
        Ok(frames)
    }

    pub fn reset(&mut self) {
        self.graph = None;
        self.time_base = None;
    }
}

impl FilterGraph {
    fn build(description: &str, frame: &RawFrame, time_base: Rational) -> Result<Self> {
        let mut graph = filter::Graph::new();
        let audio = frame.is_audio();
        let (src_name, sink_name, args) = match frame {
            RawFrame::Audio(audio) => {
                ("abuffer", "abuffersink", audio_source_args(audio, time_base))
            }
            RawFrame::Video(video) => {
                ("buffer", "buffersink", video_source_args(video, time_base))
            }
        };

        let src = filter::find(src_name)
            .ok_or_else(|| ReaderError::filter(format!("filter {} not available", src_name)))?;
        let sink = filter::find(sink_name)
            .ok_or_else(|| ReaderError::filter(format!("filter {} not available", sink_name)))?;
        graph.add(&src, "in", &args).map_err(ReaderError::filter)?;
        graph.add(&sink, "out", "").map_err(ReaderError::filter)?;

        graph
            .output("in", 0)
            .and_then(|parser| parser.input("out", 0))
            .and_then(|parser| parser.parse(description))
            .map_err(|e| ReaderError::filter(format!("invalid filter {:?}: {}", description, e)))?;
        graph.validate().map_err(ReaderError::filter)?;

        let out_time_base = {
            let sink_ctx = graph
                .get("out")
                .ok_or_else(|| ReaderError::filter("filter sink missing"))?;
            let tb = unsafe { ffmpeg_next::ffi::av_buffersink_get_time_base(sink_ctx.as_ptr()) };
            Rational::from(tb)
        };

        log::debug!(
            "built filter graph {:?} ({}), output time base {}",
            description,
            args,
            out_time_base
        );
        Ok(Self {
            graph,
            audio,
            time_base: out_time_base,
        })
    }

    fn drain(&mut self) -> Result<Vec<RawFrame>> {
        let mut frames = Vec::new();
        let mut sink_ctx = self
            .graph
            .get("out")
            .ok_or_else(|| ReaderError::filter("filter sink missing"))?;
        loop {
            let result = if self.audio {
                let mut out = ffmpeg_next::frame::Audio::empty();
                sink_ctx.sink().frame(&mut out).map(|()| RawFrame::Audio(out))
            } else {
                let mut out = ffmpeg_next::frame::Video::empty();
                sink_ctx.sink().frame(&mut out).map(|()| RawFrame::Video(out))
            };
            match result {
                Ok(frame) => frames.push(frame),
                Err(ffmpeg_next::Error::Eof) => break,
                Err(ffmpeg_next::Error::Other { errno }) if errno == EAGAIN => break,
                Err(e) => return Err(ReaderError::filter(e)),
            }
        }
        Ok(frames)
    }
}

fn audio_source_args(frame: &ffmpeg_next::frame::Audio, time_base: Rational) -> String {
    format!(
        "time_base={}/{}:sample_rate={}:sample_fmt={}:channel_layout={}",
        time_base.numerator(),
        time_base.denominator().max(1),
        frame.rate(),
        frame.format().name(),
        channel_layout_name(frame)
    )
}

fn video_source_args(frame: &ffmpeg_next::frame::Video, time_base: Rational) -> String {
    let aspect = frame.aspect_ratio();
    let (num, den) = if aspect.numerator() > 0 && aspect.denominator() > 0 {
        (aspect.numerator(), aspect.denominator())
    } else {
        (1, 1)
    };
    format!(
        "video_size={}x{}:pix_fmt={}:time_base={}/{}:pixel_aspect={}/{}",
        frame.width(),
        frame.height(),
        ffmpeg_next::ffi::AVPixelFormat::from(frame.format()) as i32,
        time_base.numerator(),
        time_base.denominator().max(1),
        num,
        den
    )
}

/// Describes the frame's channel layout the way `abuffer` parses it
/// (e.g. "stereo"), falling back to a channel count.
fn channel_layout_name(frame: &ffmpeg_next::frame::Audio) -> String {
    let mut buf = [0 as std::os::raw::c_char; 64];
    let written = unsafe {
        ffmpeg_next::ffi::av_channel_layout_describe(
            &(*frame.as_ptr()).ch_layout,
            buf.as_mut_ptr(),
            buf.len(),
        )
    };
    if written > 0 {
        let name = unsafe { std::ffi::CStr::from_ptr(buf.as_ptr()) };
        if let Ok(name) = name.to_str() {
            return name.to_string();
        }
    }
    format!("{}c", frame.channels())
}
