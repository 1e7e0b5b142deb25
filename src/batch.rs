//! Batch processing of numbered photo sequences
//!
//! Camera files are named `<prefix><index>.<ext>` (e.g. `IMG_2600.JPG`).
//! Files are processed one at a time; a missing or broken file is logged and
//! skipped so the rest of the range still gets processed.

use std::fs;
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::config::BatchConfig;
use crate::error::Result;
use crate::pipeline::SlidePipeline;

/// A numbered range of input files and where to write the results
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// First index, inclusive
    pub start: u32,
    /// Last index, exclusive
    pub end: u32,
    pub naming: BatchConfig,
}

impl BatchJob {
    pub fn input_path(&self, index: u32) -> PathBuf {
        self.input_dir
            .join(format!("{}{}.{}", self.naming.prefix, index, self.naming.input_ext))
    }

    pub fn output_path(&self, index: u32) -> PathBuf {
        self.output_dir
            .join(format!("{}{}.{}", self.naming.prefix, index, self.naming.output_ext))
    }
}

/// What happened to one index of the range
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Processed { fallback: bool },
    Missing,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub index: u32,
    pub input: PathBuf,
    pub outcome: FileOutcome,
}

/// Per-file results of a batch run
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    pub fn processed(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Processed { .. }))
    }

    pub fn fallbacks(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Processed { fallback: true }))
    }

    pub fn missing(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Missing))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Failed(_)))
    }

    /// Indices whose input file did not exist
    pub fn missing_indices(&self) -> Vec<u32> {
        self.entries
            .iter()
            .filter(|e| e.outcome == FileOutcome::Missing)
            .map(|e| e.index)
            .collect()
    }

    /// Inputs that existed but could not be processed, with the reason
    pub fn failures(&self) -> impl Iterator<Item = (&PathBuf, &str)> {
        self.entries.iter().filter_map(|e| match &e.outcome {
            FileOutcome::Failed(reason) => Some((&e.input, reason.as_str())),
            _ => None,
        })
    }

    fn count(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }
}

/// Process every index in `job.start..job.end` in order.
///
/// Only failing to create the output directory is an error; per-file
/// problems are recorded in the report.
pub fn run_batch(pipeline: &SlidePipeline, job: &BatchJob) -> Result<BatchReport> {
    fs::create_dir_all(&job.output_dir)?;
    info!(
        "Batch {}..{} from {:?} to {:?}",
        job.start, job.end, job.input_dir, job.output_dir
    );

    let mut report = BatchReport::default();
    for index in job.start..job.end {
        let input = job.input_path(index);

        let outcome = if !input.exists() {
            warn!("{} does not exist", input.display());
            FileOutcome::Missing
        } else {
            info!("{}", input.display());
            match pipeline.process_file(&input, &job.output_path(index)) {
                Ok(done) => {
                    info!(
                        "Saved: {} ({}x{})",
                        done.output.display(),
                        done.width,
                        done.height
                    );
                    FileOutcome::Processed {
                        fallback: done.method.is_fallback(),
                    }
                }
                Err(e) => {
                    error!("Failed to process {}: {}", input.display(), e);
                    FileOutcome::Failed(e.to_string())
                }
            }
        };

        report.entries.push(BatchEntry {
            index,
            input,
            outcome,
        });
    }

    info!(
        "Batch finished: {} processed ({} fallback), {} missing, {} failed",
        report.processed(),
        report.fallbacks(),
        report.missing(),
        report.failed()
    );
    Ok(report)
}
