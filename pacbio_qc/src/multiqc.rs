use std::path::Path;

use anyhow::Context;

use crate::{
    config::Config,
    output::{promote_dir, staging_dir},
    settings::MultiqcSettings,
    tools::{ToolCommand, ToolRunner},
};

pub fn multiqc_command(ms: &MultiqcSettings, input_dir: &Path, out_dir: &Path) -> ToolCommand {
    let mut c = ToolCommand::new("multiqc").arg(input_dir);
    for m in ms.modules.iter() {
        c = c.arg("-m").arg(m.as_str());
    }
    c = c.arg("-o").arg(out_dir).arg("-f");
    if let Some(p) = ms.config_file.as_ref() {
        c = c.arg("-c").arg(p);
    }
    c.args(ms.options.iter().map(|s| s.as_str()))
}

/// Run MultiQC over the output directory; multiqc/ is replaced only if the
/// report was generated
pub fn run_multiqc(cfg: &Config, runner: &dyn ToolRunner) -> anyhow::Result<()> {
    let out_dir = cfg.multiqc_dir();
    let tmp = staging_dir(&out_dir)?;
    let cmd = multiqc_command(&cfg.settings().multiqc, cfg.output_dir(), &tmp)
        .log_to(cfg.log_dir().join("multiqc.log"));
    runner.run(&cmd).with_context(|| "MultiQC failed")?;
    if !tmp.join("multiqc_report.html").is_file() {
        return Err(anyhow!("MultiQC did not produce multiqc_report.html"));
    }
    promote_dir(&out_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn command_line() {
        let mut ms = MultiqcSettings::default();
        assert_eq!(
            multiqc_command(&ms, Path::new("."), Path::new("multiqc.tmp")).to_string(),
            "multiqc . -m sequana_pacbio_qc -o multiqc.tmp -f"
        );
        ms.config_file = Some(PathBuf::from("multiqc_config.yaml"));
        ms.options = vec!["--no-data-dir".to_string()];
        assert_eq!(
            multiqc_command(&ms, Path::new("out"), Path::new("out/multiqc.tmp")).to_string(),
            "multiqc out -m sequana_pacbio_qc -o out/multiqc.tmp -f -c multiqc_config.yaml --no-data-dir"
        );
    }
}
