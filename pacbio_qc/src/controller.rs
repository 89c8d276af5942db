/// Coordination of jobs between tasks
///
/// The pool of process tasks (threads) request jobs from and return results to
/// the controller.  The tasks return the outcome of their previous job (if
/// existing) and request a new job.  If no more jobs are available then None is
/// returned, and the child tasks will exit.
///
/// A job is one node of the task graph.  It becomes eligible once all of its
/// dependencies have completed (or were already up to date), and is sent out
/// only if the threads it declares fit into the free part of the core budget.
///
/// Possible job types are:
///
///   Execute - run a node of the task graph
///   Wait - No jobs are available, but more will be available in future
///
/// After a failure no new Execute jobs are sent.  Jobs already running are
/// allowed to finish, then all child tasks are sent None.  Nodes that never ran
/// are reported as skipped.
///
use std::{fmt, path::PathBuf};

use crossbeam_channel::{Receiver, Sender};

use crate::{config::Config, task::TaskGraph};

pub enum JobType {
    Execute(usize),
    Wait, // No jobs currently available, but there will be jobs in the future
}

impl fmt::Debug for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Execute(i) => write!(f, "JobType::Execute({})", i),
            Self::Wait => f.write_str("JobType::Wait"),
        }
    }
}

/// The child tasks send their results as Completed objects
#[derive(Debug)]
pub enum Completed {
    Done(usize),           // Graph node completed successfully
    Failed(usize, String), // Graph node failed, with error message
    None, // This is returned either initially or after a task receives a Wait job
}

/// Sent from child tasks to request a new job
#[derive(Debug)]
pub struct JobRequest {
    pub prev_results: Completed, // Returned results from previous job by this task
    pub task_idx: usize, // Id of task (used to select the channel to send the reply back to)
}

/// Sent to child task in response to a JobRequest
#[derive(Debug)]
pub struct Job {
    pub job_type: JobType,
}

/// Final state of a node in the task graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Waiting,
    Running,
    Done,
    UpToDate,
    Failed,
    Skipped,
}

impl TaskState {
    fn satisfied(&self) -> bool {
        matches!(self, Self::Done | Self::UpToDate)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Done => "done",
            Self::UpToDate => "up to date",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Keep track of pending Jobs (those that have been sent out and the results
/// have not yet come back) and the cores they occupy
#[derive(Default, Debug)]
struct Tracker {
    n_jobs_pending: usize,
    cores_in_use: usize,
    max_cores_in_use: usize,
}

impl Tracker {
    fn update_at_send(&mut self, threads: usize) {
        self.n_jobs_pending += 1;
        self.cores_in_use += threads;
        self.max_cores_in_use = self.max_cores_in_use.max(self.cores_in_use);
    }

    fn update_at_recv(&mut self, threads: usize) {
        assert!(self.n_jobs_pending > 0 && self.cores_in_use >= threads);
        self.n_jobs_pending -= 1;
        self.cores_in_use -= threads;
    }

    fn pending(&self) -> bool {
        self.n_jobs_pending > 0
    }
}

/// Initial state of the graph nodes.  A node is up to date if its outputs are
/// current and all its dependencies are up to date too.
///
/// Temporary outputs are removed at cleanup, so a temporary node with missing
/// outputs is judged by its consumers instead: for them the removed file is
/// replaced by the inputs it was made from, and the temporary node is up to
/// date if every consumer is.
pub fn initial_states(cfg: &Config, graph: &TaskGraph) -> Vec<TaskState> {
    let tasks = graph.tasks();
    if cfg.force() {
        return vec![TaskState::Waiting; tasks.len()];
    }
    let removed: Vec<bool> = tasks
        .iter()
        .map(|t| t.is_temporary() && !t.outputs_exist())
        .collect();

    let mut inputs: Vec<Vec<PathBuf>> = Vec::with_capacity(tasks.len());
    let mut state = Vec::with_capacity(tasks.len());
    for (i, t) in tasks.iter().enumerate() {
        let mut v = Vec::with_capacity(t.inputs().len());
        for p in t.inputs() {
            match graph.producer(p) {
                Some(d) if removed[d] => v.extend(inputs[d].iter().cloned()),
                _ => v.push(p.clone()),
            }
        }
        let deps_ok = t.deps().iter().all(|d| state[*d] == TaskState::UpToDate);
        let s = if deps_ok && (removed[i] || t.newer_than(&v)) {
            TaskState::UpToDate
        } else {
            TaskState::Waiting
        };
        inputs.push(v);
        state.push(s)
    }

    // Consumers have higher indices, so this settles chains of temporaries
    for i in (0..tasks.len()).rev() {
        if removed[i] && state[i] == TaskState::UpToDate {
            let mut c = graph.consumers(i).peekable();
            let current = c.peek().is_some() && c.all(|j| state[j] == TaskState::UpToDate);
            if !current {
                state[i] = TaskState::Waiting
            }
        }
    }
    state
}

/// Threads a node will occupy, limited to the core budget so that every
/// node can eventually run
fn job_threads(cfg: &Config, graph: &TaskGraph, ix: usize) -> usize {
    graph.tasks()[ix].n_threads().clamp(1, cfg.cores())
}

/// First waiting node whose dependencies are all satisfied and whose threads
/// fit into the free cores
fn next_ready(
    cfg: &Config,
    graph: &TaskGraph,
    state: &[TaskState],
    track: &Tracker,
) -> Option<usize> {
    let free = cfg.cores() - track.cores_in_use;
    graph.tasks().iter().enumerate().find_map(|(i, t)| {
        if state[i] == TaskState::Waiting
            && t.deps().iter().all(|d| state[*d].satisfied())
            && job_threads(cfg, graph, i) <= free
        {
            Some(i)
        } else {
            None
        }
    })
}

/// Main loop.  Receives messages from child tasks and allocates jobs appropriately.  Will
/// end if channel r is closed (i.e., when all child tasks exit) or on error.
/// Returns the final state of every node in the graph
pub fn controller(
    cfg: &Config,
    graph: &TaskGraph,
    r: Receiver<JobRequest>,
    svec: Vec<Sender<Option<Job>>>,
) -> anyhow::Result<Vec<TaskState>> {
    debug!("Controller thread starting up");

    let mut state = initial_states(cfg, graph);
    let n_current = state.iter().filter(|s| **s == TaskState::UpToDate).count();
    if n_current > 0 {
        info!("{} of {} tasks are up to date", n_current, graph.len());
    }
    let mut track = Tracker::default();
    let mut failing = false;

    while let Ok(jr) = r.recv() {
        trace!("Controller received request {:?}; pending: {:?}", jr, track);

        match jr.prev_results {
            Completed::Done(i) => {
                track.update_at_recv(job_threads(cfg, graph, i));
                info!("Finished {}", graph.tasks()[i].label(cfg));
                state[i] = TaskState::Done
            }
            Completed::Failed(i, e) => {
                track.update_at_recv(job_threads(cfg, graph, i));
                error!("Error in {}: {}", graph.tasks()[i].label(cfg), e);
                state[i] = TaskState::Failed;
                failing = true
            }
            Completed::None => (),
        }

        let job = if failing {
            None
        } else {
            next_ready(cfg, graph, &state, &track).map(|i| {
                state[i] = TaskState::Running;
                track.update_at_send(job_threads(cfg, graph, i));
                info!("Starting {}", graph.tasks()[i].label(cfg));
                Job {
                    job_type: JobType::Execute(i),
                }
            })
        }
        // If we get here with no job, check if jobs have been sent for processing that
        // have not returned.  If yes, then return JobType::Wait otherwise processing is
        // finished so we can return None.
        .or_else(|| {
            if track.pending() {
                Some(Job {
                    job_type: JobType::Wait,
                })
            } else {
                None
            }
        });

        trace!(
            "Controller sending back job {:?} for task {}",
            job,
            jr.task_idx
        );
        svec[jr.task_idx - 1]
            .send(job)
            .map_err(|_| anyhow!("Error sending message to task {}", jr.task_idx))?;
    }

    for s in state.iter_mut() {
        if matches!(s, TaskState::Waiting) {
            *s = TaskState::Skipped
        }
    }
    debug!(
        "Controller thread closing down (maximum cores in use: {})",
        track.max_cores_in_use
    );
    Ok(state)
}
