use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Context;
use ffmpeg_reader::{OptionDict, OutputStreamConfig, options::parse_pairs};
use serde::{Deserialize, Serialize};

use crate::cli::ReadArgs;

pub struct Defaults {
    frames_per_chunk: i64,
    num_chunks: i64,
    backoff_ms: u64,
    out_dir: PathBuf,
}

impl Defaults {
    pub fn new(frames_per_chunk: i64, num_chunks: i64, backoff_ms: u64, out_dir: &str) -> Self {
        Self {
            frames_per_chunk,
            num_chunks,
            backoff_ms,
            out_dir: PathBuf::from(out_dir),
        }
    }

    pub fn frames_per_chunk(&self) -> i64 {
        self.frames_per_chunk
    }

    pub fn num_chunks(&self) -> i64 {
        self.num_chunks
    }

    pub fn backoff_ms(&self) -> u64 {
        self.backoff_ms
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }
}

pub fn defaults() -> &'static Defaults {
    static DEFAULTS: LazyLock<Defaults> = LazyLock::new(|| Defaults::new(4096, 16, 10, "out"));
    &DEFAULTS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Audio,
    Video,
}

/// One output of a read job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputJob {
    /// File stem of the output; defaults to `output<n>`.
    #[serde(default)]
    pub name: Option<String>,
    /// Source stream index. Without it the best stream of `kind` is used.
    #[serde(default)]
    pub stream: Option<usize>,
    #[serde(default)]
    pub kind: Option<OutputKind>,
    #[serde(default = "default_frames_per_chunk")]
    pub frames_per_chunk: i64,
    #[serde(default = "default_num_chunks")]
    pub num_chunks: i64,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub decoder: Option<String>,
    #[serde(default)]
    pub decoder_options: OptionDict,
    #[serde(default)]
    pub hw_accel: Option<String>,
}

impl OutputJob {
    fn new(kind: Option<OutputKind>, stream: Option<usize>) -> Self {
        Self {
            name: None,
            stream,
            kind,
            frames_per_chunk: default_frames_per_chunk(),
            num_chunks: default_num_chunks(),
            filter: None,
            decoder: None,
            decoder_options: OptionDict::new(),
            hw_accel: None,
        }
    }

    pub fn to_config(&self, source_index: usize) -> OutputStreamConfig {
        let mut config =
            OutputStreamConfig::new(source_index, self.frames_per_chunk, self.num_chunks);
        config.filter_description = self.filter.clone();
        config.decoder_override = self.decoder.clone();
        config.decoder_options = self.decoder_options.clone();
        config.hw_accel_hint = self.hw_accel.clone();
        config
    }
}

/// Everything `lite-reader read` needs, loaded from `--job` and then
/// overridden by command line flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub options: OptionDict,
    #[serde(default)]
    pub outputs: Vec<OutputJob>,
    /// None blocks until the source delivers.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default)]
    pub seek: Option<f64>,
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
}

fn default_frames_per_chunk() -> i64 {
    defaults().frames_per_chunk()
}

fn default_num_chunks() -> i64 {
    defaults().num_chunks()
}

fn default_backoff_ms() -> u64 {
    defaults().backoff_ms()
}

fn default_out_dir() -> PathBuf {
    defaults().out_dir().to_path_buf()
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            source: String::new(),
            device: None,
            options: OptionDict::new(),
            outputs: Vec::new(),
            timeout_ms: None,
            backoff_ms: default_backoff_ms(),
            seek: None,
            out_dir: default_out_dir(),
        }
    }
}

impl JobConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read job file {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parse job file {}", path.display()))
    }

    /// Builds the job from `args`, starting from the job file if one is given.
    pub fn from_args(args: &ReadArgs) -> anyhow::Result<Self> {
        let mut job = match &args.job {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if let Some(source) = &args.source {
            job.source = source.clone();
        }
        if args.device.is_some() {
            job.device = args.device.clone();
        }
        let options =
            parse_pairs(args.options.iter().map(String::as_str)).map_err(anyhow::Error::msg)?;
        job.options.extend(options);
        if args.timeout_ms.is_some() {
            job.timeout_ms = args.timeout_ms;
        }
        if let Some(backoff_ms) = args.backoff_ms {
            job.backoff_ms = backoff_ms;
        }
        if args.seek.is_some() {
            job.seek = args.seek;
        }
        if let Some(out_dir) = &args.out_dir {
            job.out_dir = out_dir.clone();
        }

        let mut flagged = Vec::new();
        if args.audio {
            flagged.push(OutputJob::new(Some(OutputKind::Audio), None));
        }
        if args.video {
            flagged.push(OutputJob::new(Some(OutputKind::Video), None));
        }
        if args.stream.is_some() {
            flagged.push(OutputJob::new(None, args.stream));
        }
        if flagged.is_empty() && job.outputs.is_empty() {
            flagged.push(OutputJob::new(Some(OutputKind::Audio), None));
        }
        for output in &mut flagged {
            if let Some(n) = args.frames_per_chunk {
                output.frames_per_chunk = n;
            }
            if let Some(n) = args.num_chunks {
                output.num_chunks = n;
            }
            output.filter = args.filter.clone();
            output.decoder = args.decoder.clone();
            output.hw_accel = args.hw_accel.clone();
        }
        job.outputs.extend(flagged);

        if job.source.is_empty() {
            anyhow::bail!("no source given, pass one on the command line or in the job file");
        }
        Ok(job)
    }

    /// File stems of the outputs, in order.
    pub fn output_names(&self) -> Vec<String> {
        self.outputs
            .iter()
            .enumerate()
            .map(|(i, output)| {
                output
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("output{}", i))
            })
            .collect()
    }
}
