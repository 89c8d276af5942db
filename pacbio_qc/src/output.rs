use std::{
    ffi::OsString,
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::Serialize;

use crate::config::Config;

/// Sibling of p with `.tmp` appended to the file name.  Steps write here and
/// rename to p when complete so that failed steps never leave a final output
pub fn staging_path(p: &Path) -> PathBuf {
    let mut name = p
        .file_name()
        .map(|s| s.to_owned())
        .unwrap_or_else(OsString::new);
    name.push(".tmp");
    p.with_file_name(name)
}

/// Create the output directory tree: one directory per sample (with a logs
/// sub-directory), plus tmp and .sequana
///
/// Returns the cleanup directories that were already present.  These were not
/// left by this run so must survive cleanup
pub fn setup_output(cfg: &Config) -> anyhow::Result<Vec<PathBuf>> {
    let d = cfg.output_dir();
    let existing: Vec<PathBuf> = cfg
        .settings()
        .cleanup
        .directories
        .iter()
        .map(|p| d.join(p))
        .filter(|p| p.exists())
        .collect();
    for p in existing.iter() {
        debug!("{} exists before the run and will be kept", p.display());
    }
    let mut dirs = vec![d.join("tmp"), d.join(".sequana"), d.join("logs")];
    for s in cfg.sample_list() {
        dirs.push(d.join(s.name()).join("logs"));
    }
    for p in dirs.iter() {
        if !p.exists() {
            fs::create_dir_all(p)
                .with_context(|| format!("Error creating output directory {}", p.display()))?;
        }
    }
    Ok(existing)
}

/// Write text to path via a staging file
pub fn write_text(path: &Path, s: &str) -> anyhow::Result<()> {
    let tmp = staging_path(path);
    fs::write(&tmp, s).with_context(|| format!("problem writing output file {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Could not move {} to {}", tmp.display(), path.display()))
}

/// Serialize to pretty printed JSON at path via a staging file
pub fn write_json<T: Serialize>(path: &Path, x: &T) -> anyhow::Result<()> {
    let tmp = staging_path(path);
    {
        let mut wrt = BufWriter::new(
            fs::File::create(&tmp)
                .with_context(|| format!("problem creating output file {}", tmp.display()))?,
        );
        serde_json::to_writer_pretty(&mut wrt, x)
            .with_context(|| format!("Error writing JSON to {}", tmp.display()))?;
        writeln!(wrt)?;
        wrt.flush()?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("Could not move {} to {}", tmp.display(), path.display()))
}

/// Fresh (empty) staging directory for a step producing the directory dir
pub fn staging_dir(dir: &Path) -> anyhow::Result<PathBuf> {
    let tmp = staging_path(dir);
    if tmp.exists() {
        fs::remove_dir_all(&tmp)
            .with_context(|| format!("Could not remove old staging directory {}", tmp.display()))?;
    }
    fs::create_dir_all(&tmp)
        .with_context(|| format!("Could not create staging directory {}", tmp.display()))?;
    Ok(tmp)
}

/// Replace dir with its completed staging directory
pub fn promote_dir(dir: &Path) -> anyhow::Result<()> {
    let tmp = staging_path(dir);
    if dir.exists() {
        fs::remove_dir_all(dir)
            .with_context(|| format!("Could not remove old directory {}", dir.display()))?;
    }
    fs::rename(&tmp, dir)
        .with_context(|| format!("Could not move {} to {}", tmp.display(), dir.display()))
}
