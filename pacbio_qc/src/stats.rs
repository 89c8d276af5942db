use serde::{Deserialize, Serialize};

/// Summary statistics over all reads of a sample
///
/// Length statistics follow the layout of a pandas `describe()` so that the
/// JSON is understood by the MultiQC module for this pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadStats {
    pub count: u64,
    pub nb_bases: u64,
    pub mean: f64,
    pub std: f64,
    pub min: u64,
    #[serde(rename = "25%")]
    pub q25: f64,
    #[serde(rename = "50%")]
    pub q50: f64,
    #[serde(rename = "75%")]
    pub q75: f64,
    pub max: u64,
    #[serde(rename = "mean_GC")]
    pub mean_gc: f64,
    pub mean_passes: Option<f64>,
    pub mean_rq: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Lower edge of each bin
    pub bins: Vec<f64>,
    pub counts: Vec<u64>,
}

impl Histogram {
    /// n equal width bins covering [lo, hi]; the last bin is closed
    fn equal_width(values: &[f64], lo: f64, hi: f64, n: usize) -> Self {
        let width = if hi > lo { (hi - lo) / n as f64 } else { 1.0 };
        let bins = (0..n).map(|i| lo + width * i as f64).collect();
        let mut counts = vec![0; n];
        for x in values {
            let i = (((x - lo) / width) as usize).min(n - 1);
            counts[i] += 1;
        }
        Self { bins, counts }
    }

    /// One bin per distinct integer value
    fn discrete(values: &[u32]) -> Self {
        let mut v = values.to_vec();
        v.sort_unstable();
        let mut bins = Vec::new();
        let mut counts: Vec<u64> = Vec::new();
        for x in v {
            let x = x as f64;
            if bins.last() == Some(&x) {
                if let Some(c) = counts.last_mut() {
                    *c += 1
                }
            } else {
                bins.push(x);
                counts.push(1);
            }
        }
        Self { bins, counts }
    }
}

/// Per-sample QC record as written to JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSummary {
    pub generator: String,
    pub sample: String,
    pub read_stats: ReadStats,
    pub hist_read_length: Histogram,
    #[serde(rename = "hist_GC")]
    pub hist_gc: Histogram,
    pub hist_passes: Histogram,
}

const LENGTH_BINS: usize = 50;

/// Collects per read values as the BAM file is streamed
#[derive(Default, Debug)]
pub struct ReadStatsCollector {
    lengths: Vec<u64>,
    gc: Vec<f64>,
    passes: Vec<u32>,
    rq_sum: f64,
    rq_n: u64,
}

impl ReadStatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one read.  seq is the base sequence; passes and rq come from the
    /// np and rq tags if present
    pub fn add_read(&mut self, seq: &[u8], passes: Option<u32>, rq: Option<f32>) {
        self.lengths.push(seq.len() as u64);
        self.gc.push(gc_percent(seq));
        if let Some(np) = passes {
            self.passes.push(np)
        }
        if let Some(q) = rq {
            self.rq_sum += q as f64;
            self.rq_n += 1;
        }
    }

    pub fn n_reads(&self) -> usize {
        self.lengths.len()
    }

    pub fn finish(mut self, sample: &str) -> SampleSummary {
        self.lengths.sort_unstable();
        let l = &self.lengths;
        let n = l.len();
        let nb_bases: u64 = l.iter().sum();
        let mean = if n > 0 {
            nb_bases as f64 / n as f64
        } else {
            0.0
        };
        let std = if n > 1 {
            let ss: f64 = l.iter().map(|&x| (x as f64 - mean).powi(2)).sum();
            (ss / (n - 1) as f64).sqrt()
        } else {
            0.0
        };
        let mean_gc = if n > 0 {
            self.gc.iter().sum::<f64>() / n as f64
        } else {
            0.0
        };
        let mean_passes = if self.passes.is_empty() {
            None
        } else {
            Some(self.passes.iter().map(|&x| x as f64).sum::<f64>() / self.passes.len() as f64)
        };
        let mean_rq = if self.rq_n > 0 {
            Some(self.rq_sum / self.rq_n as f64)
        } else {
            None
        };

        let read_stats = ReadStats {
            count: n as u64,
            nb_bases,
            mean,
            std,
            min: l.first().copied().unwrap_or(0),
            q25: quantile(l, 0.25),
            q50: quantile(l, 0.5),
            q75: quantile(l, 0.75),
            max: l.last().copied().unwrap_or(0),
            mean_gc,
            mean_passes,
            mean_rq,
        };

        let fl: Vec<f64> = l.iter().map(|&x| x as f64).collect();
        let hist_read_length = Histogram::equal_width(
            &fl,
            read_stats.min as f64,
            read_stats.max as f64,
            LENGTH_BINS,
        );
        let hist_gc = Histogram::equal_width(&self.gc, 0.0, 100.0, 100);
        let hist_passes = Histogram::discrete(&self.passes);

        SampleSummary {
            generator: crate::error::PIPELINE_NAME.to_string(),
            sample: sample.to_owned(),
            read_stats,
            hist_read_length,
            hist_gc,
            hist_passes,
        }
    }
}

/// Percentage of G+C over unambiguous bases
pub fn gc_percent(seq: &[u8]) -> f64 {
    let (mut gc, mut acgt) = (0usize, 0usize);
    for b in seq {
        match b.to_ascii_uppercase() {
            b'G' | b'C' => {
                gc += 1;
                acgt += 1
            }
            b'A' | b'T' => acgt += 1,
            _ => (),
        }
    }
    if acgt > 0 {
        100.0 * gc as f64 / acgt as f64
    } else {
        0.0
    }
}

/// Quantile of sorted data with linear interpolation between closest ranks
fn quantile(sorted: &[u64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0] as f64,
        n => {
            let h = (n - 1) as f64 * p;
            let i = h.floor() as usize;
            let f = h - i as f64;
            let a = sorted[i] as f64;
            let b = sorted[(i + 1).min(n - 1)] as f64;
            a + f * (b - a)
        }
    }
}
