//! Run artifacts: per-iteration action logs and the run summary.
//!
//! Action logs are JSONL, one record per decided event, rolled to a new
//! file at every iteration boundary. Logging failures never fail a
//! decision; they are reported and the stream continues.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use faultline_core::{ActionDecision, HarnessError, PacketEvent};

use crate::iteration::{IterationOutcome, RunSummary};
use crate::strategy::{DecisionSource, PipelineStats};

#[derive(Serialize)]
struct ActionRecord<'a> {
    ts: DateTime<Utc>,
    iteration: u32,
    from: u32,
    to: u32,
    sequence: u64,
    source: &'static str,
    action: String,
    duplicates: u32,
    original_hex: String,
    final_hex: &'a str,
}

/// Sink for decided actions. Cheap to share; one lock around the writer.
pub struct ActionLog {
    writer: Mutex<Option<BufWriter<File>>>,
}

impl ActionLog {
    /// A log that discards everything.
    pub fn disabled() -> Self {
        Self {
            writer: Mutex::new(None),
        }
    }

    /// Direct the log at a fresh file, flushing and closing any prior one.
    pub fn roll(&self, path: &Path) -> Result<(), HarnessError> {
        let file = File::create(path).map_err(|source| HarnessError::Artifact {
            path: path.display().to_string(),
            source,
        })?;
        let mut writer = self.writer.lock();
        if let Some(mut old) = writer.take() {
            let _ = old.flush();
        }
        *writer = Some(BufWriter::new(file));
        Ok(())
    }

    /// Append one decision record. Never fails the caller.
    pub fn record(
        &self,
        iteration: u32,
        event: &PacketEvent,
        decision: &ActionDecision,
        source: DecisionSource,
    ) {
        let mutated = decision.payload != event.payload;
        let final_hex = hex::encode(&decision.payload);
        let record = ActionRecord {
            ts: Utc::now(),
            iteration,
            from: event.from,
            to: event.to,
            sequence: event.sequence,
            source: source.as_str(),
            action: decision.kind(),
            duplicates: decision.duplicates,
            original_hex: if mutated {
                hex::encode(&event.payload)
            } else {
                final_hex.clone()
            },
            final_hex: &final_hex,
        };
        let mut writer = self.writer.lock();
        let Some(writer) = writer.as_mut() else {
            return;
        };
        let outcome = serde_json::to_writer(&mut *writer, &record)
            .map_err(std::io::Error::from)
            .and_then(|()| writer.write_all(b"\n"));
        if let Err(err) = outcome {
            tracing::warn!(%err, "failed to append action record");
        }
    }

    /// Flush buffered records to disk.
    pub fn flush(&self) {
        if let Some(writer) = self.writer.lock().as_mut() {
            let _ = writer.flush();
        }
    }
}

#[derive(Serialize)]
struct SummaryRecord<'a> {
    run_id: &'a str,
    strategy: &'a str,
    finished_at: DateTime<Utc>,
    healthy: bool,
    counts: std::collections::BTreeMap<&'static str, u32>,
    pipeline: PipelineSection,
    iterations: &'a [IterationOutcome],
}

#[derive(Serialize)]
struct PipelineSection {
    strategy_calls: u64,
    identical_hits: u64,
    subset_hits: u64,
    partition_drops: u64,
}

/// Filesystem layout for one run's artifacts: a directory named after
/// the run id holding the action logs and `summary.json`.
pub struct ArtifactStore {
    directory: PathBuf,
}

impl ArtifactStore {
    /// Create the run directory under `root`.
    pub fn new(root: &Path, run_id: &str) -> Result<Self, HarnessError> {
        let directory = root.join(run_id);
        fs::create_dir_all(&directory).map_err(|source| HarnessError::Artifact {
            path: directory.display().to_string(),
            source,
        })?;
        Ok(Self { directory })
    }

    /// Directory the artifacts land in.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the action log for one iteration.
    pub fn action_log_path(&self, iteration: u32) -> PathBuf {
        self.directory.join(format!("iteration-{iteration:03}.jsonl"))
    }

    /// Persist the run summary as `summary.json`.
    pub fn write_summary(
        &self,
        run_id: &str,
        strategy: &str,
        summary: &RunSummary,
        stats: PipelineStats,
    ) -> Result<PathBuf, HarnessError> {
        let path = self.directory.join("summary.json");
        let record = SummaryRecord {
            run_id,
            strategy,
            finished_at: Utc::now(),
            healthy: summary.healthy(),
            counts: summary.counts(),
            pipeline: PipelineSection {
                strategy_calls: stats.strategy_calls,
                identical_hits: stats.identical_hits,
                subset_hits: stats.subset_hits,
                partition_drops: stats.partition_drops,
            },
            iterations: &summary.iterations,
        };
        let text =
            serde_json::to_string_pretty(&record).map_err(|source| HarnessError::Artifact {
                path: path.display().to_string(),
                source: source.into(),
            })?;
        fs::write(&path, text).map_err(|source| HarnessError::Artifact {
            path: path.display().to_string(),
            source,
        })?;
        Ok(path)
    }
}
