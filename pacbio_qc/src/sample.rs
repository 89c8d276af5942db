use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
};

use anyhow::Context;
use compress_io::compress::CompressIo;
use regex::Regex;
use utils::get_next_line;

use crate::{
    error::{PipelineError, PIPELINE_NAME},
    settings::Settings,
};

/// Entries at the top of the output directory owned by the pipeline
const RESERVED_NAMES: [&str; 6] = [
    "tmp",
    "logs",
    "multiqc",
    ".sequana",
    "index.html",
    "summary.json",
];

/// Input sample
///
/// name - derived from the BAM file name, used for the output directory
/// input_path - path to input BAM file
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    name: String,
    input_path: PathBuf,
}

impl Sample {
    pub fn from_path<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let input_path = path.as_ref().to_owned();
        let name = sample_name(&input_path)?;
        Ok(Self { name, input_path })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_path(&self) -> &Path {
        self.input_path.as_ref()
    }
}

/// Sample name for a BAM file: the file name with the final `.bam` removed.
///
/// Only the last extension is stripped, so `lima_output.lbc32.ccs.bam`
/// gives `lima_output.lbc32.ccs`.
pub fn sample_name<P: AsRef<Path>>(path: P) -> io::Result<String> {
    let path = path.as_ref();
    let fname = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Could not get file name from {}", path.display()),
            )
        })?;
    match fname.strip_suffix(".bam") {
        Some(name) if !name.is_empty() => Ok(name.to_owned()),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Input file {} is not a BAM file (.bam)", path.display()),
        )),
    }
}

/// Convert a shell style glob (`*`, `?`) into an anchored regex
pub fn glob_to_regex(pattern: &str) -> anyhow::Result<Regex> {
    let mut s = String::with_capacity(pattern.len() + 8);
    s.push('^');
    for c in pattern.chars() {
        match c {
            '*' => s.push_str("[^/]*"),
            '?' => s.push_str("[^/]"),
            _ => s.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    s.push('$');
    Regex::new(&s).with_context(|| format!("Invalid input pattern {}", pattern))
}

/// Find input BAM files in dir whose file name matches pattern
pub fn samples_from_dir(dir: &Path, pattern: &str) -> anyhow::Result<Vec<Sample>> {
    debug!(
        "Looking for input files matching {} in {}",
        pattern,
        dir.display()
    );
    let reg = glob_to_regex(pattern)?;
    let mut v = Vec::new();
    for f in dir
        .read_dir()
        .with_context(|| format!("Error checking input directory {}", dir.display()))?
    {
        let entry =
            f.with_context(|| format!("Could not get directory entry from {}", dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if reg.is_match(name) {
                trace!("Found input file {}", path.display());
                v.push(Sample::from_path(&path)?)
            }
        }
    }
    Ok(v)
}

/// Read in a list of input BAM files, one per line.
/// Only the first tab separated column is used; empty lines are skipped.
/// Relative paths are taken relative to the directory of the list file.
pub fn samples_from_list<P: AsRef<Path>>(fname: P) -> anyhow::Result<Vec<Sample>> {
    let fname = fname.as_ref();
    debug!("Reading in input list from {}", fname.display());

    let mut rdr = CompressIo::new()
        .path(fname)
        .bufreader()
        .with_context(|| format!("Error opening input list {}", fname.display()))?;
    let base = fname.parent().map(|p| p.to_owned()).unwrap_or_default();

    let mut buf = String::new();
    let mut line = 0;
    let mut sample_vec = Vec::new();

    while let Some(fields) = get_next_line(&mut rdr, &mut buf)
        .with_context(|| format!("Error after reading {} lines from {}", line, fname.display()))?
    {
        line += 1;
        if fields[0].is_empty() {
            continue;
        }
        let p = base.join(fields[0]);
        let sample = Sample::from_path(&p)
            .with_context(|| format!("{}:{} Invalid input file", fname.display(), line))?;
        sample_vec.push(sample)
    }

    debug!(
        "Finished reading in {} lines; found {} samples",
        line,
        sample_vec.len()
    );
    Ok(sample_vec)
}

/// Names a sample cannot take because its output directory would clash with
/// pipeline outputs or with the directories removed at cleanup
pub fn reserved_names(st: &Settings) -> Vec<String> {
    RESERVED_NAMES
        .iter()
        .map(|s| s.to_string())
        .chain(
            st.cleanup
                .directories
                .iter()
                .map(|p| p.display().to_string()),
        )
        .collect()
}

/// Sort samples by name and reject duplicated or reserved names
pub fn check_samples(
    mut samples: Vec<Sample>,
    reserved: &[String],
) -> Result<Vec<Sample>, PipelineError> {
    samples.sort_by(|a, b| a.name.cmp(&b.name));
    let mut seen: HashMap<&str, &Path> = HashMap::new();
    for s in samples.iter() {
        if reserved.iter().any(|r| *r == s.name) {
            return Err(PipelineError::ReservedSample {
                pipeline: PIPELINE_NAME,
                name: s.name.clone(),
                path: s.input_path.clone(),
            });
        }
        if let Some(p) = seen.insert(s.name(), s.input_path()) {
            return Err(PipelineError::DuplicateSample {
                pipeline: PIPELINE_NAME,
                name: s.name.clone(),
                first: p.to_owned(),
                second: s.input_path.clone(),
            });
        }
    }
    Ok(samples)
}
