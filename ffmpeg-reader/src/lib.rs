use std::sync::OnceLock;

use ffmpeg_next::util::log::Level;

pub mod chunk;
pub mod decoder;
pub mod error;
pub mod filter;
pub mod frame;
pub mod hw;
pub mod input;
pub mod options;
pub mod output;
pub mod packet;
pub mod reader;
pub mod stream;

pub use ffmpeg_next;

pub use chunk::Chunk;
pub use error::{ReaderError, Result};
pub use frame::FrameLayout;
pub use input::{AvInput, PacketSource};
pub use options::OptionDict;
pub use output::{OutputStreamConfig, OutputStreamInfo};
pub use reader::{DEFAULT_BACKOFF, PacketStatus, PipelineId, ReaderState, StreamReader};
pub use stream::{MediaKind, SourceStreamInfo};

static INIT: OnceLock<std::result::Result<(), ffmpeg_next::Error>> = OnceLock::new();

/// Registers FFmpeg components (formats, devices such as v4l2 or lavfi).
/// Safe to call repeatedly; later calls return the first call's result.
///
/// FFmpeg's default `info` log level is lowered to `error` so library
/// chatter does not reach stderr unless asked for.
pub fn init() -> Result<()> {
    INIT.get_or_init(|| {
        ffmpeg_next::init()?;
        if matches!(ffmpeg_next::util::log::get_level(), Ok(Level::Info)) {
            ffmpeg_next::util::log::set_level(Level::Error);
        }
        Ok(())
    })
    .clone()
    .map_err(ReaderError::Init)
}

/// Decodes the best audio stream of `locator` in one go.
///
/// Returns the whole stream as a single chunk (None if it had no samples)
/// and its sample rate.
pub fn load(locator: &str) -> Result<(Option<Chunk>, u32)> {
    init()?;
    let mut reader = StreamReader::open(locator, None, &OptionDict::new())?;
    let index = reader.find_best_audio_stream()?;
    let advertised = match reader.source_stream_info(index)?.media {
        MediaKind::Audio { sample_rate, .. } => sample_rate,
        _ => 0,
    };
    let id = reader.add_audio_stream(OutputStreamConfig::new(index, -1, -1))?;
    reader.process_all()?;

    let chunk = reader.pop_chunk(id)?;
    let sample_rate = chunk
        .as_ref()
        .and_then(|c| c.layout.sample_rate())
        .unwrap_or(advertised);
    Ok((chunk, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        assert_eq!(init(), Ok(()));
        assert_eq!(init(), Ok(()));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            load("/nonexistent/audio.wav"),
            Err(ReaderError::SourceOpen { .. })
        ));
    }
}
