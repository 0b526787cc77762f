//! Single-slot dispatcher.
//!
//! One actor task owns the "processing" state: it claims the oldest
//! pending job, runs it to completion, waits `rescan_delay` and looks
//! again until nothing is pending. Kicks arriving while a job runs are
//! dropped since the actor rescans afterwards anyway.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, Instrument};

use super::{machine, EngineDeps};
use crate::error::{EngineError, StoreError};
use crate::model::{JobPatch, JobStatus};

/// Cancel flags of the jobs currently being processed, by job id.
#[derive(Clone, Default)]
pub struct ActiveJobs {
    flags: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
}

impl ActiveJobs {
    fn register(&self, id: &str) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        if let Ok(mut flags) = self.flags.lock() {
            flags.insert(id.to_string(), Arc::clone(&flag));
        }
        flag
    }

    fn release(&self, id: &str) {
        if let Ok(mut flags) = self.flags.lock() {
            flags.remove(id);
        }
    }

    /// Raises the in-process cancel flag. Returns false if `id` is not running here.
    pub fn signal_cancel(&self, id: &str) -> bool {
        match self.flags.lock() {
            Ok(flags) => match flags.get(id) {
                Some(flag) => {
                    flag.store(true, Ordering::Release);
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.flags
            .lock()
            .map(|flags| flags.contains_key(id))
            .unwrap_or(false)
    }
}

#[derive(Debug)]
enum Command {
    Kick,
    Shutdown,
}

/// Handle to the running dispatcher actor.
pub struct Scheduler {
    tx: mpsc::Sender<Command>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    pub fn spawn(deps: EngineDeps, active: ActiveJobs, rescan_delay: Duration) -> Self {
        let (tx, rx) = mpsc::channel(16);
        let actor = Actor {
            deps,
            active,
            rescan_delay,
            rx,
        };
        let handle = tokio::spawn(actor.run().instrument(info_span!("scheduler")));
        Self { tx, handle }
    }

    /// Asks for a scan. Never blocks; a full queue already implies one.
    pub fn kick(&self) {
        let _ = self.tx.try_send(Command::Kick);
    }

    /// Stops the actor once the current job, if any, is finished.
    pub async fn shutdown(self) -> Result<(), EngineError> {
        if self.tx.send(Command::Shutdown).await.is_err() {
            debug!("scheduler already stopped");
        }
        self.handle
            .await
            .map_err(|e| EngineError::Lane(format!("scheduler task failed: {}", e)))
    }
}

struct Actor {
    deps: EngineDeps,
    active: ActiveJobs,
    rescan_delay: Duration,
    rx: mpsc::Receiver<Command>,
}

impl Actor {
    async fn run(mut self) {
        info!("scheduler started");
        'outer: loop {
            loop {
                match self.process_next().await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        // Idle until the next kick rather than spin on a broken store.
                        error!(error = %e, "dispatch failed");
                        break;
                    }
                }
                if self.drain_commands() || self.pause().await {
                    break 'outer;
                }
            }

            match self.rx.recv().await {
                Some(Command::Kick) => continue,
                Some(Command::Shutdown) | None => break,
            }
        }
        info!("scheduler stopped");
    }

    /// Claims and runs the oldest pending job. Returns false if none is left.
    async fn process_next(&self) -> Result<bool, EngineError> {
        let jobs = self.deps.jobs.list_all().await?;
        for candidate in jobs.iter().filter(|j| j.status == JobStatus::Pending) {
            let Some(job) = machine::claim(&self.deps, &candidate.id).await? else {
                continue;
            };

            let id = job.id.clone();
            let flag = self.active.register(&id);
            let span = info_span!("job", job_id = %id);
            let outcome = machine::run_job(&self.deps, job, flag).instrument(span).await;
            self.active.release(&id);

            match outcome {
                Ok(status) => debug!(job_id = %id, %status, "job processed"),
                Err(e) => error!(job_id = %id, error = %e, "job processing failed"),
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Drops queued kicks. Returns true if a shutdown was queued.
    fn drain_commands(&mut self) -> bool {
        let mut shutdown = false;
        while let Ok(command) = self.rx.try_recv() {
            if matches!(command, Command::Shutdown) {
                shutdown = true;
            }
        }
        shutdown
    }

    /// Waits `rescan_delay`. Returns true if a shutdown arrived meanwhile.
    async fn pause(&mut self) -> bool {
        let sleep = tokio::time::sleep(self.rescan_delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                command = self.rx.recv() => match command {
                    Some(Command::Kick) => continue,
                    Some(Command::Shutdown) | None => return true,
                },
            }
        }
    }
}

/// Marks every `running` job `interrupted`. Run once at startup, before
/// the dispatcher; interrupted jobs wait for an explicit resume.
pub async fn recover_interrupted(deps: &EngineDeps) -> Result<usize, EngineError> {
    let mut recovered = 0;
    for job in deps.jobs.list_all().await? {
        if job.status != JobStatus::Running {
            continue;
        }
        let patch = JobPatch::status(JobStatus::Interrupted).when_status(&[JobStatus::Running]);
        match deps.jobs.update(&job.id, patch).await {
            Ok(_) => {
                info!(job_id = %job.id, "marked interrupted");
                recovered += 1;
            }
            Err(StoreError::Conflict { .. }) => {}
            Err(e) => return Err(e.into()),
        }
    }
    if recovered > 0 {
        info!(recovered, "recovered jobs left running by a previous process");
    }
    Ok(recovered)
}
