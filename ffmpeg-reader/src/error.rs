use thiserror::Error;

use crate::reader::PipelineId;

/// Errors surfaced by the stream reader and its pipelines.
///
/// `Decode` and `Filter` are fatal to the owning pipeline only. `Read` is
/// fatal to the whole reader. A timed-out read is not an error, see
/// [`crate::reader::PacketStatus::Timeout`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReaderError {
    #[error("failed to open source {locator:?}: {source}")]
    SourceOpen {
        locator: String,
        #[source]
        source: ffmpeg_next::Error,
    },

    #[error("no {0} stream found in source")]
    NoSuchStream(&'static str),

    #[error("source stream index {index} is out of range (source has {available} streams)")]
    InvalidStreamIndex { index: usize, available: usize },

    #[error("unknown output pipeline {0}")]
    UnknownPipeline(PipelineId),

    #[error("source stream {index} is not a {expected} stream")]
    MediaKindMismatch {
        index: usize,
        expected: &'static str,
    },

    #[error("invalid output configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("decoder not found: {0}")]
    DecoderNotFound(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("filter error: {0}")]
    Filter(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("seek error: {0}")]
    Seek(String),

    #[error("ffmpeg init error: {0}")]
    Init(ffmpeg_next::Error),
}

impl ReaderError {
    pub(crate) fn decode(e: impl std::fmt::Display) -> Self {
        Self::Decode(e.to_string())
    }

    pub(crate) fn filter(e: impl std::fmt::Display) -> Self {
        Self::Filter(e.to_string())
    }

    /// True for errors that end processing for the whole reader.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Read(_))
    }
}

pub type Result<T> = std::result::Result<T, ReaderError>;
