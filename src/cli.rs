use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Decode media sources into fixed-size raw sample chunks.
#[derive(Parser)]
#[command(name = "lite-reader", version, long_about = None)]
pub struct Cli {
    /// Debug logging for the reader
    #[arg(short, long, global = true, env = "LITE_READER_VERBOSE")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the streams of a source as JSON
    Probe(ProbeArgs),
    /// Decode a source and write each output's chunks to <out-dir>/<name>.raw
    Read(ReadArgs),
}

#[derive(Args)]
pub struct ProbeArgs {
    /// File, URL or device name
    pub source: String,

    /// Input format / device, e.g. v4l2, lavfi
    #[arg(short = 'f', long)]
    pub device: Option<String>,

    /// Demuxer or device option as key=value, repeatable
    #[arg(short, long = "option")]
    pub options: Vec<String>,
}

#[derive(Args, Default)]
pub struct ReadArgs {
    /// File, URL or device name; overrides the job file
    pub source: Option<String>,

    /// JSON job description
    #[arg(short, long, env = "LITE_READER_JOB")]
    pub job: Option<PathBuf>,

    /// Input format / device, e.g. v4l2, lavfi
    #[arg(short = 'f', long)]
    pub device: Option<String>,

    /// Demuxer or device option as key=value, repeatable
    #[arg(short, long = "option")]
    pub options: Vec<String>,

    /// Add an output for the best audio stream
    #[arg(long)]
    pub audio: bool,

    /// Add an output for the best video stream
    #[arg(long)]
    pub video: bool,

    /// Add an output for this source stream index
    #[arg(long)]
    pub stream: Option<usize>,

    /// Frames per chunk for outputs given on the command line, -1 for one chunk
    #[arg(long, allow_negative_numbers = true)]
    pub frames_per_chunk: Option<i64>,

    /// Queued chunks per output before the oldest is dropped, -1 for no limit
    #[arg(long, allow_negative_numbers = true)]
    pub num_chunks: Option<i64>,

    /// FFmpeg filter description for outputs given on the command line
    #[arg(long)]
    pub filter: Option<String>,

    /// Decoder name for outputs given on the command line
    #[arg(long)]
    pub decoder: Option<String>,

    /// Hardware decoding backend for video outputs (cuda, qsv, v4l2m2m, auto)
    #[arg(long)]
    pub hw_accel: Option<String>,

    /// Read timeout in milliseconds for live sources
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Delay between retries of a blocked read, in milliseconds
    #[arg(long)]
    pub backoff_ms: Option<u64>,

    /// Start position in seconds
    #[arg(long)]
    pub seek: Option<f64>,

    #[arg(long, env = "LITE_READER_OUT_DIR")]
    pub out_dir: Option<PathBuf>,
}
