//! Transaction-scoped job scheduler.
//!
//! Live queries do not run their pipelines directly while a transaction is
//! applying writes. They schedule a job under the transaction's context;
//! jobs with the same id collapse into one run, and a flush runs every job
//! after the jobs it depends on. Jobs scheduled while a flush is running
//! land in a fresh pending set that the same flush drains afterwards.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;
use hashbrown::{HashMap, HashSet};
use strand_core::{Error, Result};

/// Identifies a scheduling context, usually a transaction id.
pub type ContextId = u64;

/// Identifies a job within a context, usually a live query id.
pub type JobId = u64;

/// Deferred work.
pub type Job = Box<dyn FnOnce()>;

struct PendingJob {
    id: JobId,
    dependencies: Vec<JobId>,
    run: Job,
}

#[derive(Default)]
pub struct Scheduler {
    pending: RefCell<HashMap<ContextId, Vec<PendingJob>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `run` as job `job` in `context`.
    ///
    /// A job already pending in the context keeps its position; its
    /// dependencies are extended and `run` replaces the earlier closure.
    pub fn schedule(&self, context: ContextId, job: JobId, dependencies: &[JobId], run: Job) {
        let mut pending = self.pending.borrow_mut();
        let jobs = pending.entry(context).or_default();
        match jobs.iter_mut().find(|p| p.id == job) {
            Some(existing) => {
                for dep in dependencies {
                    if !existing.dependencies.contains(dep) {
                        existing.dependencies.push(*dep);
                    }
                }
                existing.run = run;
            }
            None => jobs.push(PendingJob {
                id: job,
                dependencies: dependencies.to_vec(),
                run,
            }),
        }
        tracing::trace!(context, job, "job scheduled");
    }

    /// Whether `context` has jobs waiting.
    pub fn has_pending(&self, context: ContextId) -> bool {
        self.pending
            .borrow()
            .get(&context)
            .is_some_and(|jobs| !jobs.is_empty())
    }

    /// Whether job `job` is waiting in `context`.
    pub fn is_scheduled(&self, context: ContextId, job: JobId) -> bool {
        self.pending
            .borrow()
            .get(&context)
            .is_some_and(|jobs| jobs.iter().any(|p| p.id == job))
    }

    /// Drops job `job` from `context`. Returns whether it was pending.
    pub fn unschedule(&self, context: ContextId, job: JobId) -> bool {
        let removed = {
            let mut pending = self.pending.borrow_mut();
            let Some(jobs) = pending.get_mut(&context) else {
                return false;
            };
            let removed = jobs.iter().position(|p| p.id == job).map(|i| jobs.remove(i));
            if jobs.is_empty() {
                pending.remove(&context);
            }
            removed
        };
        match removed {
            Some(_) => {
                tracing::trace!(context, job, "job unscheduled");
                true
            }
            None => false,
        }
    }

    /// Drops every pending job of `context`.
    pub fn clear(&self, context: ContextId) {
        if let Some(jobs) = self.pending.borrow_mut().remove(&context) {
            tracing::debug!(context, dropped = jobs.len(), "pending jobs cleared");
        }
    }

    /// Runs every pending job of `context` in dependency order.
    ///
    /// Dependencies on jobs that are not pending are already satisfied.
    /// Jobs whose dependencies form a cycle are dropped and reported as
    /// `SchedulerCycle` after the runnable jobs ran.
    pub fn flush(&self, context: ContextId) -> Result<()> {
        let mut rounds = 0usize;
        loop {
            let Some(mut jobs) = self.pending.borrow_mut().remove(&context) else {
                break;
            };
            rounds += 1;
            tracing::debug!(context, jobs = jobs.len(), round = rounds, "flushing scheduler");

            while !jobs.is_empty() {
                let waiting: HashSet<JobId> = jobs.iter().map(|p| p.id).collect();
                let ready = jobs.iter().position(|p| {
                    p.dependencies
                        .iter()
                        .all(|dep| *dep == p.id || !waiting.contains(dep))
                });
                let Some(ready) = ready else {
                    let ids: Vec<String> = jobs.iter().map(|p| format!("{}", p.id)).collect();
                    let ids = ids.join(", ");
                    tracing::warn!(context, jobs = %ids, "dependency cycle between scheduled jobs");
                    self.clear(context);
                    return Err(Error::SchedulerCycle { context, jobs: ids });
                };
                let job = jobs.remove(ready);
                (job.run)();
            }
        }
        Ok(())
    }
}
