use anyhow::Context;
use std::path::Path;

use crate::{
    config::Config,
    output::{promote_dir, staging_dir},
    settings::KrakenSettings,
    tools::{ToolCommand, ToolRunner},
};

/// Command line for the taxonomy classifier
pub fn kraken_command(ks: &KrakenSettings, fasta: &Path, out_dir: &Path) -> ToolCommand {
    ToolCommand::new(ks.executable.as_str())
        .arg("--file1")
        .arg(fasta)
        .arg("--output-directory")
        .arg(out_dir)
        .arg("--thread")
        .arg(ks.thread.to_string())
        .arg("--databases")
        .args(ks.databases.iter())
}

/// Classify the reads of a sample.  The tool writes into a staging directory
/// which replaces `{sample}/kraken` once kraken.html has been produced
pub fn classify(cfg: &Config, runner: &dyn ToolRunner, sample: &str) -> anyhow::Result<()> {
    let ks = &cfg.settings().kraken;
    let out_dir = cfg.kraken_dir(sample);
    let tmp = staging_dir(&out_dir)?;
    let cmd = kraken_command(ks, &cfg.fasta(sample), &tmp)
        .log_to(cfg.sample_log(sample, "kraken"));
    runner
        .run(&cmd)
        .with_context(|| format!("Taxonomic classification failed for sample {}", sample))?;
    if !tmp.join("kraken.html").is_file() {
        return Err(anyhow!(
            "Taxonomic classification for sample {} did not produce kraken.html",
            sample
        ));
    }
    promote_dir(&out_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn command_line() {
        let ks = KrakenSettings {
            enabled: true,
            databases: vec![PathBuf::from("/db/a"), PathBuf::from("/db/b")],
            thread: 8,
            executable: "sequana_taxonomy".to_string(),
        };
        let c = kraken_command(&ks, Path::new("tmp/A.fasta"), Path::new("A/kraken.tmp"));
        assert_eq!(
            c.to_string(),
            "sequana_taxonomy --file1 tmp/A.fasta --output-directory A/kraken.tmp --thread 8 --databases /db/a /db/b"
        );
    }
}
