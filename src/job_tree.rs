//! Job membership resolution across nested jobs.

use std::sync::Arc;

use crate::{Job, JobResult, LimitFlags, Process, Registry, job_err};

fn allows_breakaway(job: &Job, requested: bool) -> bool {
    let limits = job.limits();
    if requested {
        limits.intersects(LimitFlags::BREAKAWAY_OK | LimitFlags::SILENT_BREAKAWAY_OK)
    } else {
        limits.contains(LimitFlags::SILENT_BREAKAWAY_OK)
    }
}

/// The job a new process inherits from the creator's chain (innermost
/// first), together with all of its ancestors.
///
/// Jobs allowing breakaway are stripped from the inner end of the chain.
/// The first job that does not allow it keeps the process together with
/// all of its ancestors. Requesting breakaway from an innermost job that
/// forbids it fails.
pub(crate) fn inherited_job(chain: &[Arc<Job>], breakaway: bool) -> JobResult<Option<Arc<Job>>> {
    let Some(innermost) = chain.first() else {
        return Ok(None);
    };
    if breakaway && !allows_breakaway(innermost, true) {
        return job_err!(AccessDenied, "job {} does not allow breakaway", innermost.id());
    }
    let skip = chain
        .iter()
        .take_while(|job| allows_breakaway(job, breakaway))
        .count();
    if skip > 0 {
        log::debug!("breaking away from {skip} of {} jobs", chain.len());
    }
    Ok(chain.get(skip).cloned())
}

/// The jobs `process` joins when assigned to `job`, innermost first, or
/// `None` if the assignment conflicts with its current chain.
fn plan(registry: &Registry, chain: &[Arc<Job>], job: &Arc<Job>) -> Option<Vec<Arc<Job>>> {
    let Some(innermost) = chain.first() else {
        return Some(job.lineage());
    };
    if !registry.config().nested_jobs {
        return None;
    }
    match job.parent() {
        Some(_) => {
            let lineage = job.lineage();
            let depth = lineage.iter().position(|j| Arc::ptr_eq(j, innermost))?;
            Some(lineage[..depth].to_vec())
        }
        None if job.accounting().total == 0 => {
            let adopted = job.set_parent(innermost);
            debug_assert!(adopted, "job {} got a parent outside the tree lock", job.id());
            Some(vec![job.clone()])
        }
        None => None,
    }
}

/// Assigns `process` to `job`, extending its chain as needed.
///
/// A process outside any job joins `job` and all of its ancestors, which is
/// also how a new process enters the chain it inherits.
pub(crate) fn assign(registry: &Registry, process: &Arc<Process>, job: &Arc<Job>) -> JobResult {
    let _tree = registry.lock_tree();
    if process.is_terminated() {
        return job_err!(AccessDenied, "process {} has exited", process.pid());
    }
    let chain = process.jobs();
    if chain.iter().any(|j| Arc::ptr_eq(j, job)) {
        return Ok(());
    }
    let Some(joined) = plan(registry, &chain, job) else {
        return job_err!(
            AccessDenied,
            "job {} conflicts with the chain of process {}",
            job.id(),
            process.pid()
        );
    };
    let mut new_chain = joined.clone();
    new_chain.extend(chain);
    process.set_jobs(&new_chain);
    for job in &joined {
        job.join(process);
    }
    Ok(())
}
