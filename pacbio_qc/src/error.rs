use std::path::PathBuf;

use thiserror::Error;

/// Name under which this pipeline reports its status
pub const PIPELINE_NAME: &str = "pacbio_qc";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{pipeline}: no samples found (looked for {pattern} in {dir})")]
    NoSamples {
        pipeline: &'static str,
        dir: PathBuf,
        pattern: String,
    },
    #[error("{pipeline}: sample name {name} is used by both {first} and {second}")]
    DuplicateSample {
        pipeline: &'static str,
        name: String,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("{pipeline}: sample name {name} (from {path}) clashes with an output of the pipeline")]
    ReservedSample {
        pipeline: &'static str,
        name: String,
        path: PathBuf,
    },
    #[error("{pipeline}: {} task(s) failed: {}", .failed.len(), .failed.join(", "))]
    Failed {
        pipeline: &'static str,
        failed: Vec<String>,
    },
}

impl PipelineError {
    pub fn failed(failed: Vec<String>) -> Self {
        Self::Failed {
            pipeline: PIPELINE_NAME,
            failed,
        }
    }
}
