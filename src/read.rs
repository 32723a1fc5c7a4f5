use std::collections::{BTreeMap, HashMap, hash_map::Entry};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use ffmpeg_reader::{FrameLayout, PacketStatus, PipelineId, StreamReader};
use serde::Serialize;
use tokio::{io::AsyncWriteExt as _, sync::mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::{JobConfig, OutputKind};

/// One popped chunk on its way to the writer.
#[derive(Debug)]
struct ChunkMsg {
    name: String,
    layout: FrameLayout,
    pts: Option<f64>,
    data: Bytes,
}

/// Sidecar written next to each `.raw` file so the bytes can be interpreted.
#[derive(Serialize)]
struct RawLayout {
    kind: &'static str,
    format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channels: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    first_pts: Option<f64>,
}

impl RawLayout {
    fn new(layout: &FrameLayout, first_pts: Option<f64>) -> Self {
        match *layout {
            FrameLayout::Audio {
                sample_rate,
                channels,
                format,
            } => Self {
                kind: "audio",
                format: format.name().to_string(),
                sample_rate: Some(sample_rate),
                channels: Some(channels),
                width: None,
                height: None,
                first_pts,
            },
            FrameLayout::Video {
                width,
                height,
                format,
            } => Self {
                kind: "video",
                format: format
                    .descriptor()
                    .map(|d| d.name().to_string())
                    .unwrap_or_else(|| format!("{:?}", format)),
                sample_rate: None,
                channels: None,
                width: Some(width),
                height: Some(height),
                first_pts,
            },
        }
    }
}

#[derive(Debug, Default)]
struct PullSummary {
    chunks: u64,
    failed_outputs: usize,
}

/// Runs a read job: decoding happens on a blocking worker, chunks are
/// written asynchronously as they are popped.
pub async fn run(job: JobConfig, cancel: CancellationToken) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&job.out_dir)
        .await
        .with_context(|| format!("create {}", job.out_dir.display()))?;

    let (tx, rx) = mpsc::channel::<ChunkMsg>(64);
    let writer = tokio::spawn(write_chunks(job.out_dir.clone(), rx));

    let cancel_inner = cancel.clone();
    let pull_job = job.clone();
    let summary = tokio::task::spawn_blocking(move || pull(&pull_job, &tx, &cancel_inner))
        .await
        .context("reader task panicked")??;
    let written = writer.await.context("writer task panicked")??;

    log::info!(
        "read {} chunks ({} bytes) into {}, {} outputs failed",
        summary.chunks,
        written,
        job.out_dir.display(),
        summary.failed_outputs
    );
    if summary.failed_outputs == job.outputs.len() && !job.outputs.is_empty() {
        anyhow::bail!("every output failed");
    }
    Ok(())
}

fn pull(
    job: &JobConfig,
    tx: &mpsc::Sender<ChunkMsg>,
    cancel: &CancellationToken,
) -> anyhow::Result<PullSummary> {
    let mut reader = StreamReader::open(&job.source, job.device.as_deref(), &job.options)
        .with_context(|| format!("open {}", job.source))?;

    let mut names = BTreeMap::new();
    for (output, name) in job.outputs.iter().zip(job.output_names()) {
        let index = match (output.stream, output.kind) {
            (Some(index), _) => index,
            (None, Some(OutputKind::Video)) => reader.find_best_video_stream()?,
            (None, _) => reader.find_best_audio_stream()?,
        };
        let id = reader
            .add_output_stream(output.to_config(index))
            .with_context(|| format!("add output {} for stream {}", name, index))?;
        names.insert(id, name);
    }

    if let Some(seconds) = job.seek {
        reader.seek(seconds).context("seek")?;
    }

    let timeout = job.timeout_ms.map(Duration::from_millis);
    let backoff = Duration::from_millis(job.backoff_ms);
    let mut summary = PullSummary::default();
    loop {
        if cancel.is_cancelled() {
            log::info!("read cancelled");
            break;
        }
        let status = reader.process_one_packet(timeout, backoff)?;
        if status == PacketStatus::Timeout {
            log::debug!("no packet within {:?}, retrying", timeout);
            continue;
        }
        forward(&mut reader, &mut names, tx, &mut summary)?;
        if status == PacketStatus::EndOfStream || names.is_empty() {
            break;
        }
    }
    Ok(summary)
}

/// Pops every queued chunk and hands it to the writer. Failed outputs are
/// reported and detached so the others keep running.
fn forward(
    reader: &mut StreamReader,
    names: &mut BTreeMap<PipelineId, String>,
    tx: &mpsc::Sender<ChunkMsg>,
    summary: &mut PullSummary,
) -> anyhow::Result<()> {
    loop {
        let mut popped = false;
        for (id, result) in reader.pop_chunks() {
            let Some(name) = names.get(&id) else {
                continue;
            };
            match result {
                Ok(Some(chunk)) => {
                    popped = true;
                    summary.chunks += 1;
                    let msg = ChunkMsg {
                        name: name.clone(),
                        layout: chunk.layout,
                        pts: chunk.pts,
                        data: chunk.data,
                    };
                    tx.blocking_send(msg)
                        .map_err(|_| anyhow::anyhow!("chunk writer stopped"))?;
                }
                Ok(None) => {}
                Err(e) => {
                    log::error!("output {} failed: {}", name, e);
                    summary.failed_outputs += 1;
                    names.remove(&id);
                    reader.remove_output_stream(id)?;
                }
            }
        }
        if !popped {
            return Ok(());
        }
    }
}

async fn write_chunks(out_dir: PathBuf, mut rx: mpsc::Receiver<ChunkMsg>) -> anyhow::Result<u64> {
    let mut files: HashMap<String, tokio::fs::File> = HashMap::new();
    let mut written = 0u64;
    while let Some(msg) = rx.recv().await {
        let file = match files.entry(msg.name.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                write_layout(&out_dir, &msg).await?;
                let path = out_dir.join(format!("{}.raw", msg.name));
                let file = tokio::fs::File::create(&path)
                    .await
                    .with_context(|| format!("create {}", path.display()))?;
                log::info!("writing output {} to {}", msg.name, path.display());
                entry.insert(file)
            }
        };
        file.write_all(&msg.data).await?;
        written += msg.data.len() as u64;
    }
    for file in files.values_mut() {
        file.flush().await?;
    }
    Ok(written)
}

async fn write_layout(out_dir: &Path, msg: &ChunkMsg) -> anyhow::Result<()> {
    let path = out_dir.join(format!("{}.json", msg.name));
    let json = serde_json::to_vec_pretty(&RawLayout::new(&msg.layout, msg.pts))?;
    tokio::fs::write(&path, json)
        .await
        .with_context(|| format!("write {}", path.display()))
}
