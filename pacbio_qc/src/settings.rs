//! Typed view of the pipeline YAML configuration file
//!
//! Every section is optional in the file; missing sections and keys take the
//! defaults below. Unknown keys are rejected so that typos do not silently
//! disable a step.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub input_directory: PathBuf,
    pub input_pattern: String,
    pub input_list: Option<PathBuf>,
    pub kraken: KrakenSettings,
    pub bam_to_fasta: BamToFastaSettings,
    pub multiqc: MultiqcSettings,
    pub rulegraph: RulegraphSettings,
    pub cleanup: CleanupSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            input_directory: PathBuf::from("."),
            input_pattern: "*.bam".to_string(),
            input_list: None,
            kraken: KrakenSettings::default(),
            bam_to_fasta: BamToFastaSettings::default(),
            multiqc: MultiqcSettings::default(),
            rulegraph: RulegraphSettings::default(),
            cleanup: CleanupSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KrakenSettings {
    #[serde(rename = "do")]
    pub enabled: bool,
    pub databases: Vec<PathBuf>,
    pub thread: usize,
    pub executable: String,
}

impl Default for KrakenSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            databases: Vec::new(),
            thread: 4,
            executable: "sequana_taxonomy".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BamToFastaSettings {
    pub thread: usize,
}

impl Default for BamToFastaSettings {
    fn default() -> Self {
        Self { thread: 4 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MultiqcSettings {
    #[serde(rename = "do")]
    pub enabled: bool,
    pub modules: Vec<String>,
    pub config_file: Option<PathBuf>,
    pub options: Vec<String>,
}

impl Default for MultiqcSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            modules: vec!["sequana_pacbio_qc".to_string()],
            config_file: None,
            options: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RulegraphSettings {
    #[serde(rename = "do")]
    pub enabled: bool,
}

impl Default for RulegraphSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CleanupSettings {
    pub directories: Vec<PathBuf>,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            directories: ["css", "js", "images"].iter().map(PathBuf::from).collect(),
        }
    }
}

impl Settings {
    pub fn from_yaml(s: &str) -> anyhow::Result<Self> {
        // An empty document is not a mapping as far as serde_yaml is concerned
        if s.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: Settings =
            serde_yaml::from_str(s).with_context(|| "Could not parse configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        debug!("Reading configuration from {}", path.display());
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read configuration file {}", path.display()))?;
        Self::from_yaml(&s).with_context(|| format!("Invalid configuration file {}", path.display()))
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.kraken.enabled && self.kraken.databases.is_empty() {
            return Err(anyhow!("kraken.do is set but kraken.databases is empty"));
        }
        if self.kraken.thread == 0 {
            return Err(anyhow!("kraken.thread must be at least 1"));
        }
        if self.bam_to_fasta.thread == 0 {
            return Err(anyhow!("bam_to_fasta.thread must be at least 1"));
        }
        if self.input_pattern.is_empty() {
            return Err(anyhow!("input_pattern must not be empty"));
        }
        if self.multiqc.enabled && self.multiqc.modules.is_empty() {
            return Err(anyhow!("multiqc.do is set but multiqc.modules is empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let s = Settings::from_yaml("{}").unwrap();
        assert_eq!(s, Settings::default());
        assert!(!s.kraken.enabled);
        assert_eq!(s.bam_to_fasta.thread, 4);
        assert_eq!(s.input_pattern, "*.bam");
        assert_eq!(s.cleanup.directories.len(), 3);
    }

    #[test]
    fn kraken_section() {
        let s = Settings::from_yaml(
            "kraken:\n  do: true\n  databases:\n    - /db/toydb\n  thread: 8\nbam_to_fasta:\n  thread: 2\n",
        )
        .unwrap();
        assert!(s.kraken.enabled);
        assert_eq!(s.kraken.databases, vec![PathBuf::from("/db/toydb")]);
        assert_eq!(s.kraken.thread, 8);
        assert_eq!(s.kraken.executable, "sequana_taxonomy");
        assert_eq!(s.bam_to_fasta.thread, 2);
        assert!(s.multiqc.enabled);
    }

    #[test]
    fn kraken_without_databases_is_rejected() {
        assert!(Settings::from_yaml("kraken:\n  do: true\n").is_err());
    }

    #[test]
    fn zero_threads_rejected() {
        assert!(Settings::from_yaml("bam_to_fasta:\n  thread: 0\n").is_err());
        assert!(Settings::from_yaml("kraken:\n  thread: 0\n").is_err());
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(Settings::from_yaml("kraken:\n  dbs: []\n").is_err());
        assert!(Settings::from_yaml("krakn:\n  do: false\n").is_err());
    }
}
