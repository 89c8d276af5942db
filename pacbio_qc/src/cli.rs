use std::{num::NonZeroUsize, path::PathBuf};

use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_parser, Arg, ArgAction,
    Command,
};

use anyhow::Context;

use utils::{init_log, LogLevel};

use crate::{
    config::*,
    error::{PipelineError, PIPELINE_NAME},
    sample::*,
    settings::Settings,
};

/// Set up definition of command options for clap
fn cli_model() -> Command {
    Command::new(crate_name!())
        .about(crate_description!())
        .version(crate_version!())
        .author(crate_authors!())
        .arg(
            Arg::new("timestamp")
                .short('X')
                .long("timestamp")
                .value_parser(value_parser!(stderrlog::Timestamp))
                .value_name("GRANULARITY")
                .default_value("none")
                .help("Prepend log entries with a timestamp"),
        )
        .arg(
            Arg::new("loglevel")
                .short('l')
                .long("loglevel")
                .value_name("LOGLEVEL")
                .value_parser(value_parser!(LogLevel))
                .ignore_case(true)
                .default_value("warn")
                .help("Set log level"),
        )
        .arg(
            Arg::new("quiet")
                .action(ArgAction::SetTrue)
                .long("quiet")
                .conflicts_with("loglevel")
                .help("Silence all output"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_parser(value_parser!(PathBuf))
                .value_name("FILE")
                .required(true)
                .help("YAML configuration file"),
        )
        .arg(
            Arg::new("output_dir")
                .short('d')
                .long("output-dir")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .help("Set output directory [default: current directory]"),
        )
        .arg(
            Arg::new("cores")
                .short('c')
                .long("cores")
                .value_parser(value_parser!(NonZeroUsize))
                .value_name("INT")
                .help("Set number of cores available to tasks [default: available cores]"),
        )
        .arg(
            Arg::new("force")
                .action(ArgAction::SetTrue)
                .short('F')
                .long("force")
                .help("Run all tasks even if their outputs are up to date"),
        )
        .arg(
            Arg::new("dry_run")
                .action(ArgAction::SetTrue)
                .short('n')
                .long("dry-run")
                .help("Show the tasks that would be run and exit"),
        )
        .arg(
            Arg::new("input")
                .value_parser(value_parser!(PathBuf))
                .value_name("BAM")
                .num_args(0..)
                .help("Input BAM files [default: taken from the configuration file]"),
        )
}

/// Collect the input samples.  BAM files given on the command line take
/// precedence over the input list from the configuration, which in turn takes
/// precedence over scanning the input directory
fn collect_samples(m: &clap::ArgMatches, st: &Settings) -> anyhow::Result<Vec<Sample>> {
    if let Some(files) = m.get_many::<PathBuf>("input") {
        debug!("Taking input files from command line");
        files
            .map(|p| {
                Sample::from_path(p).with_context(|| format!("Invalid input file {}", p.display()))
            })
            .collect()
    } else if let Some(p) = st.input_list.as_ref() {
        samples_from_list(p)
    } else {
        samples_from_dir(&st.input_directory, &st.input_pattern)
    }
}

/// Handle command line options.  Set up Config structure
pub fn handle_cli() -> anyhow::Result<Config> {
    // Get matches from command line
    let m = cli_model().get_matches();

    // Setup logging
    init_log(&m)?;

    debug!("Processing command line options");

    let cores = m
        .get_one::<NonZeroUsize>("cores")
        .map(|x| usize::from(*x))
        .unwrap_or_else(num_cpus::get);

    let config_file = m
        .get_one::<PathBuf>("config")
        .ok_or_else(|| anyhow!("Missing configuration file"))?;
    let settings = Settings::from_file(config_file)?;

    let samples = collect_samples(&m, &settings).with_context(|| "Error collecting input files")?;
    let samples = check_samples(samples, &reserved_names(&settings))?;
    if samples.is_empty() {
        error!("No input BAM files found");
        return Err(PipelineError::NoSamples {
            pipeline: PIPELINE_NAME,
            dir: settings.input_directory.clone(),
            pattern: settings.input_pattern.clone(),
        }
        .into());
    }
    debug!("Number of samples found: {}", samples.len());

    let mut cfg = Config::new(samples, settings);
    cfg.set_config_file(config_file);

    if let Some(p) = m.get_one::<PathBuf>("output_dir") {
        cfg.set_output_dir(p)
    }
    cfg.set_cores(cores);
    if m.get_flag("force") {
        cfg.set_force()
    }
    if m.get_flag("dry_run") {
        cfg.set_dry_run()
    }

    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_parsing() {
        cli_model().debug_assert();
        let m = cli_model()
            .try_get_matches_from([
                "pacbio_qc", "--config", "config.yaml", "-c", "3", "-F", "-n", "a.bam", "b.bam",
            ])
            .unwrap();
        assert_eq!(m.get_one::<NonZeroUsize>("cores").map(|x| x.get()), Some(3));
        assert!(m.get_flag("force"));
        assert!(m.get_flag("dry_run"));
        assert_eq!(m.get_many::<PathBuf>("input").unwrap().count(), 2);

        assert!(cli_model().try_get_matches_from(["pacbio_qc", "a.bam"]).is_err());
        assert!(cli_model()
            .try_get_matches_from(["pacbio_qc", "--config", "c.yaml", "-c", "0"])
            .is_err());
    }

    #[test]
    fn sample_precedence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("X.bam"), "").unwrap();
        std::fs::write(dir.path().join("Y.bam"), "").unwrap();
        let st = Settings {
            input_directory: dir.path().to_owned(),
            ..Default::default()
        };

        let m = cli_model()
            .try_get_matches_from(["pacbio_qc", "--config", "c.yaml"])
            .unwrap();
        let v = check_samples(collect_samples(&m, &st).unwrap(), &reserved_names(&st)).unwrap();
        assert_eq!(v.iter().map(|s| s.name()).collect::<Vec<_>>(), vec!["X", "Y"]);

        let m = cli_model()
            .try_get_matches_from(["pacbio_qc", "--config", "c.yaml", "other/Z.bam"])
            .unwrap();
        let v = collect_samples(&m, &st).unwrap();
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].name(), "Z");
    }
}
