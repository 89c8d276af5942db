use std::path::{Path, PathBuf};

use crate::{sample::Sample, settings::Settings};

/// Config
///
/// Configuration info for the program
/// This is generated from the command line arguments and the YAML configuration file
/// Once set it is read only
///
/// sample_list - list of input samples, sorted by name
/// settings - typed contents of the configuration file
/// config_file - path to the configuration file (copied to .sequana at teardown)
/// output_dir - root of the output tree
/// cores - number of cores available to tasks
/// force - run tasks even if their outputs are up to date
/// dry_run - only report the tasks that would be run
///
pub struct Config {
    sample_list: Vec<Sample>,
    settings: Settings,
    config_file: Option<PathBuf>,
    output_dir: PathBuf,
    cores: usize,
    force: bool,
    dry_run: bool,
}

impl Config {
    pub fn new(sample_list: Vec<Sample>, settings: Settings) -> Self {
        Self {
            sample_list,
            settings,
            config_file: None,
            output_dir: PathBuf::from("."),
            cores: 1,
            force: false,
            dry_run: false,
        }
    }

    pub fn set_config_file<P: AsRef<Path>>(&mut self, p: P) {
        self.config_file = Some(p.as_ref().to_owned())
    }

    pub fn set_output_dir<P: AsRef<Path>>(&mut self, dir: P) {
        self.output_dir = dir.as_ref().to_owned()
    }

    pub fn set_cores(&mut self, x: usize) {
        self.cores = x.max(1)
    }

    pub fn set_force(&mut self) {
        self.force = true
    }

    pub fn set_dry_run(&mut self) {
        self.dry_run = true
    }

    pub fn sample_list(&self) -> &[Sample] {
        &self.sample_list
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn cores(&self) -> usize {
        self.cores
    }

    pub fn force(&self) -> bool {
        self.force
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn kraken(&self) -> bool {
        self.settings.kraken.enabled
    }

    // Output layout

    pub fn sample_dir(&self, sample: &str) -> PathBuf {
        self.output_dir.join(sample)
    }

    pub fn qc_json(&self, sample: &str) -> PathBuf {
        self.sample_dir(sample)
            .join(format!("sequana_summary_pacbio_qc_{}.json", sample))
    }

    pub fn fasta(&self, sample: &str) -> PathBuf {
        self.tmp_dir().join(format!("{}.fasta", sample))
    }

    pub fn kraken_dir(&self, sample: &str) -> PathBuf {
        self.sample_dir(sample).join("kraken")
    }

    pub fn kraken_html(&self, sample: &str) -> PathBuf {
        self.kraken_dir(sample).join("kraken.html")
    }

    pub fn sample_report(&self, sample: &str) -> PathBuf {
        self.sample_dir(sample).join("summary.html")
    }

    pub fn sample_log(&self, sample: &str, step: &str) -> PathBuf {
        self.sample_dir(sample)
            .join("logs")
            .join(format!("{}.log", step))
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.output_dir.join("tmp")
    }

    pub fn summary_json(&self) -> PathBuf {
        self.output_dir.join("summary.json")
    }

    pub fn dashboard(&self) -> PathBuf {
        self.output_dir.join("index.html")
    }

    pub fn multiqc_dir(&self) -> PathBuf {
        self.output_dir.join("multiqc")
    }

    pub fn multiqc_report(&self) -> PathBuf {
        self.multiqc_dir().join("multiqc_report.html")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.output_dir.join("logs")
    }

    pub fn sequana_dir(&self) -> PathBuf {
        self.output_dir.join(".sequana")
    }

    pub fn rulegraph_dot(&self) -> PathBuf {
        self.sequana_dir().join("rulegraph.dot")
    }

    pub fn rulegraph_svg(&self) -> PathBuf {
        self.sequana_dir().join("rulegraph.svg")
    }
}
