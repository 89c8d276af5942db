//! The workflow as an explicit directed acyclic graph of tasks
//!
//! Each task declares the files it reads and writes.  Dependencies are
//! derived from these: a task depends on the task producing each of its
//! inputs.  Tasks are added in dependency order so every dependency has a
//! smaller index than its dependent, which makes the graph acyclic by
//! construction.

use std::{
    collections::{BTreeSet, HashMap},
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::Context;

use crate::{
    config::Config,
    output::{staging_path, write_text},
    tools::{ToolCommand, ToolRunner},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKind {
    BamToFasta,
    PacbioQuality,
    Kraken,
    SampleReport,
    Summary,
    Multiqc,
    Rulegraph,
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BamToFasta => "bam_to_fasta",
            Self::PacbioQuality => "pacbio_quality",
            Self::Kraken => "kraken",
            Self::SampleReport => "html_report",
            Self::Summary => "summary",
            Self::Multiqc => "multiqc",
            Self::Rulegraph => "rulegraph",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Task {
    kind: TaskKind,
    sample_idx: Option<usize>,
    inputs: Vec<PathBuf>,
    outputs: Vec<PathBuf>,
    temporary: bool,
    threads: usize,
    deps: Vec<usize>,
}

impl Task {
    fn new(kind: TaskKind, sample_idx: Option<usize>) -> Self {
        Self {
            kind,
            sample_idx,
            inputs: Vec::new(),
            outputs: Vec::new(),
            temporary: false,
            threads: 1,
            deps: Vec::new(),
        }
    }

    fn input<P: AsRef<Path>>(mut self, p: P) -> Self {
        self.inputs.push(p.as_ref().to_owned());
        self
    }

    fn output<P: AsRef<Path>>(mut self, p: P) -> Self {
        self.outputs.push(p.as_ref().to_owned());
        self
    }

    fn temporary(mut self) -> Self {
        self.temporary = true;
        self
    }

    fn threads(mut self, n: usize) -> Self {
        self.threads = n;
        self
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn sample_idx(&self) -> Option<usize> {
        self.sample_idx
    }

    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PathBuf] {
        &self.outputs
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary
    }

    pub fn n_threads(&self) -> usize {
        self.threads
    }

    pub fn deps(&self) -> &[usize] {
        &self.deps
    }

    /// Rule name, with the sample for per-sample tasks (e.g., `kraken(A)`)
    pub fn label(&self, cfg: &Config) -> String {
        match self.sample_idx {
            Some(i) => format!("{}({})", self.kind.name(), cfg.sample_list()[i].name()),
            None => self.kind.name().to_string(),
        }
    }

    pub fn outputs_exist(&self) -> bool {
        self.outputs.iter().all(|p| p.exists())
    }

    /// All outputs exist and none is older than any of inputs.  inputs is
    /// normally self.inputs() but may stand in for removed temporary files
    pub fn newer_than<P: AsRef<Path>>(&self, inputs: &[P]) -> bool {
        let mtime = |p: &Path| fs::metadata(p).and_then(|m| m.modified()).ok();
        let mut oldest_out: Option<SystemTime> = None;
        for p in self.outputs.iter() {
            match mtime(p) {
                Some(t) => oldest_out = Some(oldest_out.map(|x| x.min(t)).unwrap_or(t)),
                None => return false,
            }
        }
        let Some(oldest_out) = oldest_out else {
            return false;
        };
        inputs
            .iter()
            .all(|p| mtime(p.as_ref()).map(|t| t <= oldest_out).unwrap_or(false))
    }
}

pub struct TaskGraph {
    tasks: Vec<Task>,
}

impl TaskGraph {
    /// Build the task graph for the samples and settings in cfg
    pub fn build(cfg: &Config) -> anyhow::Result<Self> {
        let st = cfg.settings();
        let mut g = Self { tasks: Vec::new() };

        for (ix, s) in cfg.sample_list().iter().enumerate() {
            let name = s.name();
            if cfg.kraken() {
                g.add(
                    Task::new(TaskKind::BamToFasta, Some(ix))
                        .input(s.input_path())
                        .output(cfg.fasta(name))
                        .threads(st.bam_to_fasta.thread)
                        .temporary(),
                )?;
            }
            g.add(
                Task::new(TaskKind::PacbioQuality, Some(ix))
                    .input(s.input_path())
                    .output(cfg.qc_json(name)),
            )?;
            if cfg.kraken() {
                g.add(
                    Task::new(TaskKind::Kraken, Some(ix))
                        .input(cfg.fasta(name))
                        .output(cfg.kraken_html(name))
                        .threads(st.kraken.thread),
                )?;
            }
            let mut report = Task::new(TaskKind::SampleReport, Some(ix)).input(cfg.qc_json(name));
            if cfg.kraken() {
                report = report.input(cfg.kraken_html(name));
            }
            g.add(report.output(cfg.sample_report(name)))?;
        }

        let mut summary = Task::new(TaskKind::Summary, None);
        for s in cfg.sample_list() {
            summary = summary.input(cfg.qc_json(s.name()));
        }
        g.add(summary.output(cfg.summary_json()))?;

        if st.multiqc.enabled {
            let mut mqc = Task::new(TaskKind::Multiqc, None);
            for s in cfg.sample_list() {
                mqc = mqc.input(cfg.sample_report(s.name()));
            }
            g.add(mqc.output(cfg.multiqc_report()))?;
        }

        if st.rulegraph.enabled {
            g.add(
                Task::new(TaskKind::Rulegraph, None)
                    .input(cfg.rulegraph_dot())
                    .output(cfg.rulegraph_svg()),
            )?;
        }

        debug!("Task graph built with {} tasks", g.tasks.len());
        Ok(g)
    }

    /// Add a task, linking it to the producers of its inputs
    fn add(&mut self, mut task: Task) -> anyhow::Result<usize> {
        let producers: HashMap<&Path, usize> = self
            .tasks
            .iter()
            .enumerate()
            .flat_map(|(i, t)| t.outputs.iter().map(move |p| (p.as_path(), i)))
            .collect();
        for p in task.outputs.iter() {
            if let Some(i) = producers.get(p.as_path()) {
                return Err(anyhow!(
                    "Output {} is produced by more than one task ({} and {})",
                    p.display(),
                    self.tasks[*i].kind.name(),
                    task.kind.name()
                ));
            }
        }
        let mut deps: Vec<usize> = task
            .inputs
            .iter()
            .filter_map(|p| producers.get(p.as_path()).copied())
            .collect();
        deps.sort_unstable();
        deps.dedup();
        task.deps = deps;
        self.tasks.push(task);
        Ok(self.tasks.len() - 1)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Inputs that no task produces must exist before the run starts
    pub fn check_inputs(&self) -> anyhow::Result<()> {
        let produced: BTreeSet<&Path> = self
            .tasks
            .iter()
            .flat_map(|t| t.outputs.iter().map(|p| p.as_path()))
            .collect();
        for t in self.tasks.iter() {
            for p in t.inputs.iter() {
                if !produced.contains(p.as_path()) && !p.exists() {
                    return Err(anyhow!(
                        "Missing input file {} for {}",
                        p.display(),
                        t.kind.name()
                    ));
                }
            }
        }
        Ok(())
    }

    /// Index of the task producing p
    pub fn producer(&self, p: &Path) -> Option<usize> {
        self.tasks
            .iter()
            .position(|t| t.outputs.iter().any(|q| q == p))
    }

    /// Indices of the tasks that depend on task ix
    pub fn consumers(&self, ix: usize) -> impl Iterator<Item = usize> + '_ {
        self.tasks
            .iter()
            .enumerate()
            .filter(move |(_, t)| t.deps.contains(&ix))
            .map(|(i, _)| i)
    }

    pub fn temporary_outputs(&self) -> impl Iterator<Item = &Path> {
        self.tasks
            .iter()
            .filter(|t| t.temporary)
            .flat_map(|t| t.outputs.iter().map(|p| p.as_path()))
    }

    /// Graphviz description of the rule graph: one node per kind of task,
    /// one edge per kind of dependency
    pub fn to_dot(&self) -> String {
        let kinds: BTreeSet<TaskKind> = self.tasks.iter().map(|t| t.kind).collect();
        let ix: HashMap<TaskKind, usize> = kinds.iter().enumerate().map(|(i, k)| (*k, i)).collect();
        let edges: BTreeSet<(usize, usize)> = self
            .tasks
            .iter()
            .flat_map(|t| t.deps.iter().map(move |d| (*d, t.kind)))
            .map(|(d, k)| (ix[&self.tasks[d].kind], ix[&k]))
            .collect();

        let mut s = String::new();
        s.push_str("digraph pacbio_qc {\n");
        s.push_str("    graph[bgcolor=white, margin=0];\n");
        s.push_str("    node[shape=box, style=rounded, fontname=sans, fontsize=10, penwidth=2];\n");
        s.push_str("    edge[penwidth=2, color=grey];\n");
        let nk = kinds.len().max(1) as f64;
        for (i, k) in kinds.iter().enumerate() {
            let hue = i as f64 / nk;
            let _ = writeln!(
                s,
                "    {}[label = \"{}\", color = \"{:.2} 0.6 0.85\", style=\"rounded\"];",
                i,
                k.name(),
                hue
            );
        }
        for (a, b) in edges {
            let _ = writeln!(s, "    {} -> {}", a, b);
        }
        s.push_str("}\n");
        s
    }
}

/// Write the rule graph description, leaving an identical existing file (and
/// its timestamp) alone
pub fn write_rulegraph_dot(cfg: &Config, graph: &TaskGraph) -> anyhow::Result<()> {
    let p = cfg.rulegraph_dot();
    let dot = graph.to_dot();
    if fs::read_to_string(&p).map(|s| s == dot).unwrap_or(false) {
        return Ok(());
    }
    write_text(&p, &dot)
}

/// Convert the rule graph description to SVG with graphviz
pub fn render_rulegraph(cfg: &Config, runner: &dyn ToolRunner) -> anyhow::Result<()> {
    let svg = cfg.rulegraph_svg();
    let tmp = staging_path(&svg);
    let cmd = ToolCommand::new("dot")
        .arg("-Tsvg")
        .arg(cfg.rulegraph_dot())
        .arg("-o")
        .arg(&tmp)
        .log_to(cfg.log_dir().join("rulegraph.log"));
    runner.run(&cmd).with_context(|| "Rule graph rendering failed")?;
    fs::rename(&tmp, &svg)
        .with_context(|| format!("Could not move {} to {}", tmp.display(), svg.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{sample::Sample, settings::Settings};

    fn config(kraken: bool) -> Config {
        let mut st = Settings::default();
        if kraken {
            st.kraken.enabled = true;
            st.kraken.databases = vec![PathBuf::from("/db/toy")];
            st.kraken.thread = 3;
        }
        let samples = vec![
            Sample::from_path("in/A.bam").unwrap(),
            Sample::from_path("in/B.bam").unwrap(),
        ];
        let mut cfg = Config::new(samples, st);
        cfg.set_output_dir("out");
        cfg
    }

    fn find(g: &TaskGraph, cfg: &Config, label: &str) -> usize {
        g.tasks()
            .iter()
            .position(|t| t.label(cfg) == label)
            .unwrap_or_else(|| panic!("no task {}", label))
    }

    #[test]
    fn graph_without_kraken() {
        let cfg = config(false);
        let g = TaskGraph::build(&cfg).unwrap();
        assert_eq!(g.len(), 2 * 2 + 3);
        assert!(g.tasks().iter().all(|t| t.kind() != TaskKind::Kraken));
        assert_eq!(g.temporary_outputs().count(), 0);

        let qc = find(&g, &cfg, "pacbio_quality(A)");
        let report = find(&g, &cfg, "html_report(A)");
        assert_eq!(g.tasks()[report].deps(), &[qc]);
        let summary = find(&g, &cfg, "summary");
        assert_eq!(g.tasks()[summary].deps().len(), 2);
        assert!(g.tasks()[find(&g, &cfg, "rulegraph")].deps().is_empty());
    }

    #[test]
    fn graph_with_kraken() {
        let cfg = config(true);
        let g = TaskGraph::build(&cfg).unwrap();
        assert_eq!(g.len(), 4 * 2 + 3);
        let fasta = find(&g, &cfg, "bam_to_fasta(B)");
        let kraken = find(&g, &cfg, "kraken(B)");
        let qc = find(&g, &cfg, "pacbio_quality(B)");
        assert_eq!(g.tasks()[kraken].deps(), &[fasta]);
        assert_eq!(g.tasks()[kraken].n_threads(), 3);
        let mut deps = vec![qc, kraken];
        deps.sort();
        assert_eq!(g.tasks()[find(&g, &cfg, "html_report(B)")].deps(), &deps[..]);
        let tmp: Vec<_> = g.temporary_outputs().collect();
        assert_eq!(tmp, vec![Path::new("out/tmp/A.fasta"), Path::new("out/tmp/B.fasta")]);
    }

    #[test]
    fn dependencies_precede_dependents() {
        let cfg = config(true);
        let g = TaskGraph::build(&cfg).unwrap();
        for (i, t) in g.tasks().iter().enumerate() {
            assert!(t.deps().iter().all(|d| *d < i));
        }
    }

    #[test]
    fn optional_rules() {
        let mut cfg = config(false);
        let mut st = cfg.settings().clone();
        st.multiqc.enabled = false;
        st.rulegraph.enabled = false;
        cfg = Config::new(cfg.sample_list().to_vec(), st);
        let g = TaskGraph::build(&cfg).unwrap();
        assert_eq!(g.len(), 2 * 2 + 1);
    }

    #[test]
    fn dot_output() {
        let cfg = config(true);
        let dot = TaskGraph::build(&cfg).unwrap().to_dot();
        assert!(dot.starts_with("digraph pacbio_qc {"));
        // bam_to_fasta(0) -> kraken(2), kraken(2) -> html_report(3)
        assert!(dot.contains("    0 -> 2\n"));
        assert!(dot.contains("    2 -> 3\n"));
        assert!(dot.contains("label = \"multiqc\""));
        assert_eq!(dot.matches(" -> ").count(), 5);
    }

    #[test]
    fn producers_and_consumers() {
        let cfg = config(true);
        let g = TaskGraph::build(&cfg).unwrap();
        let fasta = find(&g, &cfg, "bam_to_fasta(A)");
        assert_eq!(g.producer(&cfg.fasta("A")), Some(fasta));
        assert_eq!(g.producer(Path::new("in/A.bam")), None);
        let c: Vec<_> = g.consumers(fasta).collect();
        assert_eq!(c, vec![find(&g, &cfg, "kraken(A)")]);
    }

    #[test]
    fn missing_bam_detected() {
        let cfg = config(false);
        let g = TaskGraph::build(&cfg).unwrap();
        let e = g.check_inputs().unwrap_err();
        assert!(e.to_string().contains("Missing input file"));
    }

    #[test]
    fn up_to_date_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("in.bam");
        let b = dir.path().join("out.json");
        fs::write(&a, "").unwrap();
        let t = Task::new(TaskKind::PacbioQuality, None).input(&a).output(&b);
        assert!(!t.outputs_exist());
        assert!(!t.newer_than(t.inputs()));
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(&b, "").unwrap();
        assert!(t.newer_than(t.inputs()));
        assert!(!t.newer_than(&[dir.path().join("gone.bam")]));
    }
}
