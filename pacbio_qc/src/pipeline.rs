//! Top level of a run: build and execute the task graph, then on success
//! render the dashboard and tidy up the output directory

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use log::LevelFilter;
use utils::MaxLevelGuard;

use crate::{
    config::Config,
    controller::{initial_states, TaskState},
    error::{PipelineError, PIPELINE_NAME},
    output::{setup_output, write_json, write_text},
    process::process_graph,
    report,
    sample::{check_samples, reserved_names},
    summary::RunInfo,
    task::{write_rulegraph_dot, TaskGraph},
    tools::ToolRunner,
};

pub fn run(cfg: &Config, runner: &dyn ToolRunner) -> anyhow::Result<()> {
    if cfg.sample_list().is_empty() {
        let st = cfg.settings();
        error!("No samples to process");
        return Err(PipelineError::NoSamples {
            pipeline: PIPELINE_NAME,
            dir: st.input_directory.clone(),
            pattern: st.input_pattern.clone(),
        }
        .into());
    }
    check_samples(cfg.sample_list().to_vec(), &reserved_names(cfg.settings()))?;

    let graph = TaskGraph::build(cfg)?;
    if graph.is_empty() {
        return Err(anyhow!("Task graph is empty"));
    }

    if cfg.dry_run() {
        print_plan(cfg, &graph);
        return Ok(());
    }

    let keep = setup_output(cfg)?;
    write_rulegraph_dot(cfg, &graph)?;
    graph.check_inputs()?;

    // A dashboard from an earlier run must not outlive a failed one
    let dashboard = cfg.dashboard();
    if dashboard.exists() {
        fs::remove_file(&dashboard)
            .with_context(|| format!("Could not remove old dashboard {}", dashboard.display()))?;
    }

    info!(
        "Processing {} samples with {} tasks on {} cores",
        cfg.sample_list().len(),
        graph.len(),
        cfg.cores()
    );
    let states = process_graph(cfg, &graph, runner)?;

    let mut failed = Vec::new();
    for (t, s) in graph.tasks().iter().zip(states.iter()) {
        let label = t.label(cfg);
        match s {
            TaskState::Failed => {
                error!("{}: {}", label, s);
                failed.push(label)
            }
            TaskState::Skipped => warn!("{}: {}", label, s),
            _ => info!("{}: {}", label, s),
        }
    }
    if !failed.is_empty() {
        return Err(PipelineError::failed(failed).into());
    }

    on_success(cfg, &graph, &keep)
}

fn print_plan(cfg: &Config, graph: &TaskGraph) {
    let states = initial_states(cfg, graph);
    let n_run = states.iter().filter(|s| **s != TaskState::UpToDate).count();
    println!("{}: {} of {} tasks to run", PIPELINE_NAME, n_run, graph.len());
    for (t, s) in graph.tasks().iter().zip(states.iter()) {
        let status = if *s == TaskState::UpToDate {
            "up to date"
        } else {
            "run"
        };
        println!("  {:<24} {:<10} threads={}", t.label(cfg), status, t.n_threads());
        for p in t.inputs() {
            println!("      <- {}", p.display())
        }
        let tmp = if t.is_temporary() { " (temporary)" } else { "" };
        for p in t.outputs() {
            println!("      -> {}{}", p.display(), tmp)
        }
    }
}

fn on_success(cfg: &Config, graph: &TaskGraph, keep: &[PathBuf]) -> anyhow::Result<()> {
    let info = RunInfo::new(cfg);
    {
        let _quiet = MaxLevelGuard::cap(LevelFilter::Warn);
        report::dashboard(cfg, &info)?;
    }
    cleanup(cfg, graph, keep)?;
    teardown(cfg, &info)?;
    #[cfg(unix)]
    make_group_writable(cfg.output_dir())?;
    info!("{} finished; see {}", PIPELINE_NAME, cfg.dashboard().display());
    Ok(())
}

/// Remove temporary outputs, tmp/ if it is left empty, and directories left
/// behind by external report tools during this run (those in keep predate it)
fn cleanup(cfg: &Config, graph: &TaskGraph, keep: &[PathBuf]) -> anyhow::Result<()> {
    for p in graph.temporary_outputs() {
        if p.exists() {
            debug!("Removing temporary file {}", p.display());
            fs::remove_file(p)
                .with_context(|| format!("Could not remove temporary file {}", p.display()))?;
        }
    }
    let tmp = cfg.tmp_dir();
    if tmp.is_dir() && fs::read_dir(&tmp)?.next().is_none() {
        fs::remove_dir(&tmp)
            .with_context(|| format!("Could not remove directory {}", tmp.display()))?;
    }
    for d in cfg.settings().cleanup.directories.iter() {
        let p = cfg.output_dir().join(d);
        if p.is_dir() && !keep.contains(&p) {
            debug!("Removing {}", p.display());
            fs::remove_dir_all(&p)
                .with_context(|| format!("Could not remove directory {}", p.display()))?;
        }
    }
    Ok(())
}

/// Record the run metadata and configuration under .sequana
fn teardown(cfg: &Config, info: &RunInfo) -> anyhow::Result<()> {
    let dir = cfg.sequana_dir();
    write_json(&dir.join("info.json"), info)?;
    let dest = dir.join("config.yaml");
    match cfg.config_file() {
        Some(p) => {
            fs::copy(p, &dest).with_context(|| {
                format!("Could not copy {} to {}", p.display(), dest.display())
            })?;
        }
        None => write_text(&dest, &serde_yaml::to_string(cfg.settings())?)?,
    }
    Ok(())
}

#[cfg(unix)]
fn make_group_writable(p: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let md = fs::symlink_metadata(p)?;
    if md.file_type().is_symlink() {
        return Ok(());
    }
    let mut perm = md.permissions();
    let mode = perm.mode();
    if mode & 0o020 == 0 {
        perm.set_mode(mode | 0o020);
        fs::set_permissions(p, perm)
            .with_context(|| format!("Could not change permissions of {}", p.display()))?;
    }
    if md.is_dir() {
        for e in fs::read_dir(p)? {
            make_group_writable(&e?.path())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bam::test_support::write_bam, sample::Sample, settings::Settings, tools::ToolCommand,
    };
    use std::{path::PathBuf, sync::Mutex};

    /// Stands in for the external tools, producing the files they would
    #[derive(Default)]
    struct FakeRunner {
        fail_kraken: bool,
        calls: Mutex<Vec<String>>,
        fasta_seen: Mutex<Vec<PathBuf>>,
    }

    impl FakeRunner {
        fn n_calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl ToolRunner for FakeRunner {
        fn run(&self, cmd: &ToolCommand) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(cmd.to_string());
            let flag = |f: &str| {
                cmd.flag_value(f)
                    .map(PathBuf::from)
                    .ok_or_else(|| anyhow!("{} missing {}", cmd.program(), f))
            };
            match cmd.program() {
                "sequana_taxonomy" => {
                    if self.fail_kraken {
                        return Err(anyhow!("classifier crashed"));
                    }
                    let fasta = flag("--file1")?;
                    if fasta.is_file() {
                        self.fasta_seen.lock().unwrap().push(fasta)
                    }
                    fs::write(
                        flag("--output-directory")?.join("kraken.html"),
                        "<html><body><p>Escherichia coli</p></body></html>",
                    )?;
                }
                "multiqc" => {
                    fs::write(flag("-o")?.join("multiqc_report.html"), "<html></html>")?;
                    // Report scaffolding left in the scanned directory
                    let css = PathBuf::from(&cmd.get_args()[0]).join("css");
                    fs::create_dir_all(&css)?;
                    fs::write(css.join("report.css"), "body{}")?;
                }
                "dot" => fs::write(flag("-o")?, "<svg></svg>")?,
                p => return Err(anyhow!("Unexpected tool {}", p)),
            }
            Ok(())
        }
    }

    fn setup(dir: &Path, kraken: bool) -> Config {
        let inp = dir.join("input");
        fs::create_dir(&inp).unwrap();
        let mut samples = Vec::new();
        for name in ["B", "A"] {
            let p = inp.join(format!("{}.bam", name));
            write_bam(&p, &[("m1/1/ccs", "ACGTACGGCC", Some(5)), ("m1/2/ccs", "AATTGC", Some(3))]);
            samples.push(Sample::from_path(p).unwrap());
        }
        samples.sort_by(|a, b| a.name().cmp(b.name()));
        let mut st = Settings::default();
        st.kraken.enabled = kraken;
        st.kraken.databases = vec![PathBuf::from("/db/toy")];
        let mut cfg = Config::new(samples, st);
        cfg.set_output_dir(dir.join("out"));
        cfg.set_cores(4);
        cfg
    }

    #[test]
    fn run_without_kraken() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = setup(dir.path(), false);
        let images = cfg.output_dir().join("images");
        fs::create_dir_all(&images).unwrap();
        fs::write(images.join("photo.png"), "").unwrap();
        let runner = FakeRunner::default();
        run(&cfg, &runner).unwrap();

        for s in ["A", "B"] {
            assert!(cfg.sample_report(s).is_file());
            assert!(cfg.qc_json(s).is_file());
            assert!(!cfg.kraken_dir(s).exists());
        }
        let v: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(cfg.summary_json()).unwrap()).unwrap();
        let keys: Vec<_> = v.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["A", "B"]);
        assert_eq!(v["A"]["count"], 2);

        let index = fs::read_to_string(cfg.dashboard()).unwrap();
        assert!(index.contains("<a href=\"B/summary.html\">B</a>"));
        assert!(cfg.multiqc_report().is_file());
        assert!(cfg.rulegraph_svg().is_file());
        assert!(cfg.sequana_dir().join("info.json").is_file());
        assert!(cfg.sequana_dir().join("config.yaml").is_file());
        assert!(!cfg.output_dir().join("css").exists());
        assert!(images.join("photo.png").is_file());
        assert!(!cfg.tmp_dir().exists());
        // multiqc and dot only
        assert_eq!(runner.n_calls(), 2);

        // Second run finds everything up to date
        let runner = FakeRunner::default();
        run(&cfg, &runner).unwrap();
        assert_eq!(runner.n_calls(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn outputs_group_writable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let cfg = setup(dir.path(), false);
        run(&cfg, &FakeRunner::default()).unwrap();
        for p in [cfg.dashboard(), cfg.sample_dir("A"), cfg.qc_json("B")] {
            let mode = fs::metadata(&p).unwrap().permissions().mode();
            assert_ne!(mode & 0o020, 0, "{} not group writable", p.display());
        }
    }

    #[test]
    fn run_with_kraken() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = setup(dir.path(), true);
        let runner = FakeRunner::default();
        run(&cfg, &runner).unwrap();

        let seen = runner.fasta_seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&cfg.fasta("A")));
        for s in ["A", "B"] {
            assert!(cfg.kraken_html(s).is_file());
            let report = fs::read_to_string(cfg.sample_report(s)).unwrap();
            assert!(report.contains("Taxonomic content"));
            assert!(!cfg.fasta(s).exists());
        }
        let info = fs::read_to_string(cfg.sequana_dir().join("info.json")).unwrap();
        assert!(info.contains("/db/toy"));

        // The FASTA files are gone but nothing they fed is out of date
        let runner = FakeRunner::default();
        run(&cfg, &runner).unwrap();
        assert_eq!(runner.calls.lock().unwrap().clone(), Vec::<String>::new());
        assert!(!cfg.fasta("A").exists());
    }

    #[test]
    fn changed_bam_reclassified() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = setup(dir.path(), true);
        run(&cfg, &FakeRunner::default()).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        let bam = cfg.sample_list()[1].input_path().to_owned();
        write_bam(&bam, &[("m2/1/ccs", "GGGGCCCCAT", Some(7))]);
        let runner = FakeRunner::default();
        run(&cfg, &runner).unwrap();
        let calls = runner.calls.lock().unwrap().clone();
        let kraken: Vec<_> = calls
            .iter()
            .filter(|c| c.starts_with("sequana_taxonomy"))
            .collect();
        assert_eq!(kraken.len(), 1);
        assert!(kraken[0].contains("B.fasta"));
        assert_eq!(runner.fasta_seen.lock().unwrap().clone(), vec![cfg.fasta("B")]);
    }

    #[test]
    fn failed_classification() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = setup(dir.path(), true);
        let runner = FakeRunner {
            fail_kraken: true,
            ..Default::default()
        };
        let e = run(&cfg, &runner).unwrap_err();
        match e.downcast_ref::<PipelineError>() {
            Some(PipelineError::Failed { pipeline, failed }) => {
                assert_eq!(*pipeline, "pacbio_qc");
                assert!(failed.iter().all(|l| l.starts_with("kraken(")));
            }
            _ => panic!("unexpected error {:#}", e),
        }
        assert!(!cfg.dashboard().exists());
        assert!(!cfg.sample_report("A").exists());
        assert!(!cfg.multiqc_report().exists());
    }

    #[test]
    fn failed_rerun_removes_dashboard() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = setup(dir.path(), true);
        run(&cfg, &FakeRunner::default()).unwrap();
        assert!(cfg.dashboard().is_file());

        cfg.set_force();
        let runner = FakeRunner {
            fail_kraken: true,
            ..Default::default()
        };
        assert!(run(&cfg, &runner).is_err());
        assert!(!cfg.dashboard().exists());
    }

    #[test]
    fn sample_named_like_scaffolding() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = setup(dir.path(), false);
        let p = dir.path().join("input").join("images.bam");
        write_bam(&p, &[("m1/1/ccs", "ACGT", None)]);
        let mut samples = cfg.sample_list().to_vec();
        samples.push(Sample::from_path(&p).unwrap());
        let out = cfg.output_dir().to_owned();
        cfg = Config::new(samples, cfg.settings().clone());
        cfg.set_output_dir(&out);

        let runner = FakeRunner::default();
        let e = run(&cfg, &runner).unwrap_err();
        match e.downcast_ref::<PipelineError>() {
            Some(PipelineError::ReservedSample { name, .. }) => assert_eq!(name, "images"),
            _ => panic!("unexpected error {:#}", e),
        }
        assert!(!out.exists());
        assert_eq!(runner.n_calls(), 0);
    }

    #[test]
    fn no_samples() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::new(Vec::new(), Settings::default());
        cfg.set_output_dir(dir.path().join("out"));
        let runner = FakeRunner::default();
        let e = run(&cfg, &runner).unwrap_err();
        assert!(matches!(
            e.downcast_ref::<PipelineError>(),
            Some(PipelineError::NoSamples { .. })
        ));
        assert!(!cfg.output_dir().exists());
        assert_eq!(runner.n_calls(), 0);
    }

    #[test]
    fn dry_run_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = setup(dir.path(), true);
        cfg.set_dry_run();
        let runner = FakeRunner::default();
        run(&cfg, &runner).unwrap();
        assert!(!cfg.output_dir().exists());
        assert_eq!(runner.n_calls(), 0);
    }
}
