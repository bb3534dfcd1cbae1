//! Resolves operator-declared lock dependencies into ordered job-name groups.
//!
//! A job declaring `backup_should_be_locked_before: [{job_name: B}]` is
//! locked in an earlier group than every `B`. Groups come from Kahn's
//! algorithm; names within a group are sorted for stable output.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::instance::JobHandle;
use crate::job::{Job, LockDependency, ScriptKind};

/// Errors raised while resolving a lock order.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OrderingError {
    /// A dependency names a job absent from the deployment.
    #[error(
        "job {job} specified a lock dependency on {dependency}{}, which is not present in the deployment",
        .release.as_ref().map(|release| format!(" from release {release}")).unwrap_or_default()
    )]
    UnknownDependency {
        /// Declaring job.
        job: String,
        /// Missing job name.
        dependency: String,
        /// Release named by the dependency, if any.
        release: Option<String>,
    },
    /// The dependency graph has a cycle through these jobs.
    #[error("job locking dependency graph is cyclic: {}", .members.join(", "))]
    Cycle {
        /// Jobs left unresolved.
        members: Vec<String>,
    },
}

/// Which dependency list to read.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LockPurpose {
    /// `backup_should_be_locked_before`.
    Backup,
    /// `restore_should_be_locked_before`.
    Restore,
}

impl LockPurpose {
    fn dependencies(self, job: &Job) -> &[LockDependency] {
        match self {
            Self::Backup => job.backup_lock_dependencies(),
            Self::Restore => job.restore_lock_dependencies(),
        }
    }
}

/// Job-name groups in lock order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LockOrder {
    groups: Vec<Vec<String>>,
}

impl LockOrder {
    /// Groups in lock order.
    #[must_use]
    pub fn groups(&self) -> &[Vec<String>] {
        &self.groups
    }

    /// Splits `jobs` into phases following the group order, keeping only
    /// jobs that advertise `kind`.
    ///
    /// Phase `k` always corresponds to group `k`, so phases may be empty.
    #[must_use]
    pub fn phases<'a>(&self, jobs: &[JobHandle<'a>], kind: ScriptKind) -> Vec<Vec<JobHandle<'a>>> {
        self.groups
            .iter()
            .map(|group| {
                jobs.iter()
                    .filter(|handle| handle.job().has(kind))
                    .filter(|handle| group.iter().any(|name| name == handle.job().name()))
                    .copied()
                    .collect()
            })
            .collect()
    }

    /// Phases for unlocking the first `attempted` groups, in reverse order.
    #[must_use]
    pub fn unlock_phases<'a>(
        &self,
        jobs: &[JobHandle<'a>],
        kind: ScriptKind,
        attempted: usize,
    ) -> Vec<Vec<JobHandle<'a>>> {
        let mut phases = self.phases(jobs, kind);
        phases.truncate(attempted);
        phases.reverse();
        phases
    }
}

/// Resolves the lock order of `jobs`.
///
/// # Errors
///
/// Returns [`OrderingError::UnknownDependency`] when a dependency names a job
/// (or job and release) absent from `jobs`, and [`OrderingError::Cycle`]
/// listing the unresolved jobs when the graph is cyclic.
pub fn resolve(jobs: &[JobHandle<'_>], purpose: LockPurpose) -> Result<LockOrder, OrderingError> {
    let mut releases: BTreeMap<&str, BTreeSet<Option<&str>>> = BTreeMap::new();
    for handle in jobs {
        releases
            .entry(handle.job().name())
            .or_default()
            .insert(handle.job().release());
    }

    let mut successors: BTreeMap<&str, BTreeSet<&str>> =
        releases.keys().map(|name| (*name, BTreeSet::new())).collect();
    for handle in jobs {
        let job = handle.job();
        for dependency in purpose.dependencies(job) {
            let known = releases
                .get(dependency.job_name.as_str())
                .is_some_and(|known| release_matches(known, dependency.release.as_deref()));
            if !known {
                return Err(OrderingError::UnknownDependency {
                    job: job.name().to_owned(),
                    dependency: dependency.job_name.clone(),
                    release: dependency.release.clone(),
                });
            }
            if let Some(edges) = successors.get_mut(job.name()) {
                edges.insert(dependency.job_name.as_str());
            }
        }
    }

    let mut in_degree: BTreeMap<&str, usize> = successors.keys().map(|name| (*name, 0)).collect();
    for targets in successors.values() {
        for target in targets {
            if let Some(degree) = in_degree.get_mut(target) {
                *degree += 1;
            }
        }
    }

    let mut groups = Vec::new();
    while !in_degree.is_empty() {
        let ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();
        if ready.is_empty() {
            return Err(OrderingError::Cycle {
                members: in_degree.keys().map(|name| (*name).to_owned()).collect(),
            });
        }
        for name in &ready {
            in_degree.remove(name);
            for target in successors.get(name).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(target) {
                    *degree -= 1;
                }
            }
        }
        groups.push(ready.into_iter().map(str::to_owned).collect());
    }
    Ok(LockOrder { groups })
}

/// A dependency without a release, or a job whose release is unknown,
/// matches on name alone.
fn release_matches(known: &BTreeSet<Option<&str>>, wanted: Option<&str>) -> bool {
    match wanted {
        None => true,
        Some(release) => known
            .iter()
            .any(|candidate| candidate.is_none_or(|candidate| candidate == release)),
    }
}
