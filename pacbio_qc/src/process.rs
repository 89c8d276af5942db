use std::{thread, time::Duration};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::{
    bam,
    config::Config,
    controller::*,
    kraken, multiqc, output, report, summary,
    task::{self, Task, TaskGraph, TaskKind},
    tools::ToolRunner,
};

/// Delay before asking again after being told to wait
const WAIT_DELAY: Duration = Duration::from_millis(50);

/// Run one node of the task graph
fn execute(cfg: &Config, runner: &dyn ToolRunner, t: &Task) -> anyhow::Result<()> {
    let sample = t.sample_idx().map(|i| &cfg.sample_list()[i]);
    let name = sample.map(|s| s.name());
    match (t.kind(), sample, name) {
        (TaskKind::BamToFasta, Some(s), Some(name)) => {
            bam::bam_to_fasta(s.input_path(), &cfg.fasta(name), t.n_threads()).map(|_| ())
        }
        (TaskKind::PacbioQuality, Some(s), Some(name)) => {
            let summary = bam::sample_summary(s.input_path(), name, t.n_threads())?;
            output::write_json(&cfg.qc_json(name), &summary)
        }
        (TaskKind::Kraken, _, Some(name)) => kraken::classify(cfg, runner, name),
        (TaskKind::SampleReport, _, Some(name)) => report::sample_report(cfg, name),
        (TaskKind::Summary, _, _) => summary::aggregate(cfg),
        (TaskKind::Multiqc, _, _) => multiqc::run_multiqc(cfg, runner),
        (TaskKind::Rulegraph, _, _) => task::render_rulegraph(cfg, runner),
        (k, _, _) => Err(anyhow!("Task {} requires a sample", k.name())),
    }
}

fn process_task(
    cfg: &Config,
    graph: &TaskGraph,
    runner: &dyn ToolRunner,
    ix: usize,
    snd: Sender<JobRequest>,
    recv: Receiver<Option<Job>>,
) -> anyhow::Result<()> {
    debug!("Process task {} starting up", ix);
    snd.send(JobRequest {
        prev_results: Completed::None,
        task_idx: ix,
    })?;

    while let Some(job) = recv.recv()? {
        trace!("Task {} received job {:?}", ix, job);

        let res = match job.job_type {
            JobType::Execute(i) => match execute(cfg, runner, &graph.tasks()[i]) {
                Ok(()) => Completed::Done(i),
                Err(e) => Completed::Failed(i, format!("{:#}", e)),
            },
            JobType::Wait => {
                thread::sleep(WAIT_DELAY);
                Completed::None
            }
        };
        snd.send(JobRequest {
            prev_results: res,
            task_idx: ix,
        })?;
    }
    debug!("Process task {} closing down", ix);
    Ok(())
}

/// Create child threads to process the task graph.  Returns the final state
/// of each node of the graph
pub fn process_graph(
    cfg: &Config,
    graph: &TaskGraph,
    runner: &dyn ToolRunner,
) -> anyhow::Result<Vec<TaskState>> {
    thread::scope(|sc| {
        let nt = cfg.cores().min(graph.len()).max(1);
        debug!("Starting {} process tasks", nt);

        // Channel for a task to request a new job
        let (send_ctrl, recv_ctrl) = bounded(nt * 8);

        // Storage for channels by which a task receives a new job
        let mut send_job = Vec::with_capacity(nt);

        // Spawn task processes
        let join_handles: Vec<_> = (0..nt)
            .map(|ix| {
                let (s, r) = bounded(1);
                send_job.push(s);
                let s = send_ctrl.clone();
                sc.spawn(move || process_task(cfg, graph, runner, ix + 1, s, r))
            })
            .collect();
        drop(send_ctrl);

        // Spawn controller process
        let control_jh = sc.spawn(move || controller(cfg, graph, recv_ctrl, send_job));

        for jh in join_handles {
            jh.join()
                .map_err(|_| anyhow!("Process task panicked"))??;
        }
        control_jh
            .join()
            .map_err(|_| anyhow!("Controller thread panicked"))?
    })
}
