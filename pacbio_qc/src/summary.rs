//! Cross-sample aggregation of the per-sample QC summaries
//!
//! The aggregate is read back as untyped JSON when the dashboard is built.
//! Values are coerced leniently: if a value cannot be converted it is left as
//! it is rather than failing the run.

use std::{collections::BTreeMap, fs, path::Path};

use anyhow::Context;
use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::{config::Config, error::PIPELINE_NAME, output::write_json};

/// Fields shown as integers
const INT_FIELDS: [&str; 4] = ["count", "nb_bases", "min", "max"];

/// Fields shown as floats rounded to two decimals
const FLOAT_FIELDS: [&str; 5] = ["mean", "std", "mean_GC", "mean_passes", "mean_rq"];

/// Fields not shown in the dashboard
const DROPPED_FIELDS: [&str; 3] = ["25%", "50%", "75%"];

/// Display names, in display order
const COLUMNS: [(&str, &str); 9] = [
    ("count", "Number of reads"),
    ("nb_bases", "Number of bases"),
    ("mean", "Mean read length"),
    ("std", "Read length std"),
    ("min", "Min read length"),
    ("max", "Max read length"),
    ("mean_GC", "Mean GC (%)"),
    ("mean_passes", "Mean passes"),
    ("mean_rq", "Mean read quality"),
];

/// Run level metadata shown in the dashboard and kept in .sequana/info.json
#[derive(Debug, Clone, Serialize)]
pub struct RunInfo {
    pub pipeline: String,
    pub version: String,
    pub description: String,
    pub n_samples: usize,
    pub kraken: bool,
    pub kraken_databases: Vec<String>,
    pub output_dir: String,
}

impl RunInfo {
    pub fn new(cfg: &Config) -> Self {
        let ks = &cfg.settings().kraken;
        Self {
            pipeline: PIPELINE_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: env!("CARGO_PKG_DESCRIPTION").to_string(),
            n_samples: cfg.sample_list().len(),
            kraken: ks.enabled,
            kraken_databases: if ks.enabled {
                ks.databases
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect()
            } else {
                Vec::new()
            },
            output_dir: cfg.output_dir().display().to_string(),
        }
    }

    /// (name, value) pairs for the general information table
    pub fn rows(&self) -> Vec<(&'static str, String)> {
        let mut v = vec![
            ("Pipeline", self.pipeline.clone()),
            ("Version", self.version.clone()),
            ("Description", self.description.clone()),
            ("Number of samples", self.n_samples.to_string()),
            (
                "Taxonomic classification",
                if self.kraken { "yes" } else { "no" }.to_string(),
            ),
        ];
        if self.kraken {
            v.push(("Kraken databases", self.kraken_databases.join(", ")));
        }
        v
    }
}

fn read_json(p: &Path) -> anyhow::Result<Value> {
    let s = fs::read_to_string(p).with_context(|| format!("Could not read {}", p.display()))?;
    serde_json::from_str(&s).with_context(|| format!("Could not parse JSON from {}", p.display()))
}

/// Load the per-sample summaries and write summary.json: one entry per
/// sample holding its read_stats plus the sample identifier
pub fn aggregate(cfg: &Config) -> anyhow::Result<()> {
    let mut agg: BTreeMap<String, Value> = BTreeMap::new();
    for s in cfg.sample_list() {
        let p = cfg.qc_json(s.name());
        let data = read_json(&p)?;
        let sample = data
            .get("sample")
            .and_then(|v| v.as_str())
            .unwrap_or_else(|| s.name())
            .to_owned();
        let mut stats = match data.get("read_stats") {
            Some(Value::Object(m)) => m.clone(),
            _ => return Err(anyhow!("No read_stats found in {}", p.display())),
        };
        stats.insert("sample".to_string(), Value::String(sample.clone()));
        if agg.insert(sample.clone(), Value::Object(stats)).is_some() {
            return Err(anyhow!("Sample {} found in more than one summary", sample));
        }
    }
    debug!("Writing summary for {} samples", agg.len());
    write_json(&cfg.summary_json(), &agg)
}

/// Integral part of f, if it fits in an i64 or u64
fn float_to_int(f: f64) -> Option<Number> {
    let f = f.trunc();
    if !f.is_finite() {
        None
    } else if f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some((f as i64).into())
    } else if f >= 0.0 && f < u64::MAX as f64 {
        Some((f as u64).into())
    } else {
        None
    }
}

/// Convert to an integer if possible, otherwise leave unchanged
pub fn coerce_int(v: &mut Value) {
    let x = match v {
        Value::Number(n) if n.is_i64() || n.is_u64() => None,
        Value::Number(n) => n.as_f64().and_then(float_to_int),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .map(Number::from)
                .or_else(|_| s.parse::<u64>().map(Number::from))
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(float_to_int))
        }
        _ => None,
    };
    if let Some(x) = x {
        *v = Value::Number(x)
    }
}

/// Convert to a float rounded to `digits` decimals if possible, otherwise leave unchanged
pub fn coerce_round(v: &mut Value, digits: u32) {
    let x = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    if let Some(n) = x.map(|f| utils::round_to(f, digits)).and_then(Number::from_f64) {
        *v = Value::Number(n)
    }
}

/// Table of per-sample statistics ready for display
#[derive(Debug, Clone, PartialEq)]
pub struct SampleTable {
    /// Display names of the statistics columns (the sample column is implicit)
    pub columns: Vec<String>,
    /// (sample, values) in column order; Null where a sample lacks a value
    pub rows: Vec<(String, Vec<Value>)>,
}

impl SampleTable {
    /// Build from the aggregate summary (sample -> stats)
    pub fn from_summary(summary: &Value) -> anyhow::Result<Self> {
        let samples = summary
            .as_object()
            .ok_or_else(|| anyhow!("Summary is not a JSON object"))?;

        let mut stats: Vec<(String, Map<String, Value>)> = Vec::with_capacity(samples.len());
        for (name, v) in samples.iter() {
            let mut m = v.as_object().cloned().unwrap_or_default();
            m.remove("sample");
            for k in DROPPED_FIELDS {
                m.remove(k);
            }
            for k in INT_FIELDS {
                if let Some(x) = m.get_mut(k) {
                    coerce_int(x)
                }
            }
            for k in FLOAT_FIELDS {
                if let Some(x) = m.get_mut(k) {
                    coerce_round(x, 2)
                }
            }
            stats.push((name.clone(), m));
        }

        // Known columns in fixed order, then anything else by name
        let mut keys: Vec<String> = COLUMNS
            .iter()
            .filter(|(k, _)| stats.iter().any(|(_, m)| m.contains_key(*k)))
            .map(|(k, _)| k.to_string())
            .collect();
        let mut extra: Vec<String> = stats
            .iter()
            .flat_map(|(_, m)| m.keys())
            .filter(|k| !COLUMNS.iter().any(|(c, _)| c == k))
            .cloned()
            .collect();
        extra.sort();
        extra.dedup();
        keys.extend(extra);

        let columns = keys
            .iter()
            .map(|k| {
                COLUMNS
                    .iter()
                    .find(|(c, _)| c == k)
                    .map(|(_, d)| d.to_string())
                    .unwrap_or_else(|| k.clone())
            })
            .collect();
        let rows = stats
            .into_iter()
            .map(|(name, mut m)| {
                let vals = keys
                    .iter()
                    .map(|k| m.remove(k).unwrap_or(Value::Null))
                    .collect();
                (name, vals)
            })
            .collect();
        Ok(Self { columns, rows })
    }

    pub fn from_file(p: &Path) -> anyhow::Result<Self> {
        Self::from_summary(&read_json(p)?)
    }
}
