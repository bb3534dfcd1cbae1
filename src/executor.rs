//! Phased batch execution with a barrier between phases.
//!
//! Parallel work runs one scoped thread per item, gated by a semaphore and
//! reporting through a result channel; at most
//! [`MAX_PARALLELISM`](crate::config::MAX_PARALLELISM) items run at once.

use std::sync::mpsc;
use std::thread;

use tokio::sync::Semaphore;

use crate::config::MAX_PARALLELISM;
use crate::failure::{Failure, Failures};

/// Unit of work the executor runs.
pub trait Executable: Sync {
    /// Performs the work.
    ///
    /// # Errors
    ///
    /// Returns every failure the item hit.
    fn execute(&self) -> Result<(), Failure>;
}

/// How items within one phase are scheduled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Strategy {
    /// One item at a time, in order.
    Serial,
    /// Up to the given number of items at once, capped at
    /// [`MAX_PARALLELISM`].
    Parallel(usize),
}

impl Strategy {
    /// Number of items allowed in flight at once.
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::Serial => 1,
            Self::Parallel(width) => width,
        }
    }
}

/// What happens after a phase reports failures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OnFailure {
    /// Stop before the next phase.
    Halt,
    /// Run every remaining phase.
    Continue,
}

/// Result of a phased run.
#[derive(Debug, Default)]
pub struct PhaseReport {
    /// Every failure, in phase order.
    pub failures: Failures,
    /// Number of phases that started.
    pub phases_run: usize,
}

/// Runs phases one after another, items within a phase per [`Strategy`].
#[derive(Clone, Copy, Debug)]
pub struct PhasedExecutor {
    strategy: Strategy,
}

impl PhasedExecutor {
    /// Creates an executor.
    #[must_use]
    pub const fn new(strategy: Strategy) -> Self {
        Self { strategy }
    }

    /// Runs `phases` in order.
    ///
    /// Every item of a phase runs and reports before the next phase starts,
    /// even when some items fail. With [`OnFailure::Halt`] no further phase
    /// starts once one has failed.
    pub fn run<T: Executable>(&self, phases: &[Vec<T>], on_failure: OnFailure) -> PhaseReport {
        let mut report = PhaseReport::default();
        for phase in phases {
            report.phases_run += 1;
            let mut phase_failed = false;
            for result in map_bounded(phase, self.strategy.width(), |item: &T| item.execute()) {
                if let Err(failure) = result {
                    phase_failed = true;
                    report.failures.push(failure);
                }
            }
            if phase_failed && on_failure == OnFailure::Halt {
                break;
            }
        }
        report
    }
}

/// Applies `f` to every item with at most `max_in_flight` calls at once and
/// returns the results in input order.
pub fn map_bounded<T, R, F>(items: &[T], max_in_flight: usize, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    let width = max_in_flight.clamp(1, MAX_PARALLELISM).min(items.len());
    if width <= 1 {
        return items.iter().map(f).collect();
    }

    let permits = Semaphore::new(width);
    let (sender, receiver) = mpsc::channel();
    let mut results: Vec<(usize, R)> = Vec::with_capacity(items.len());
    thread::scope(|scope| {
        for (index, item) in items.iter().enumerate() {
            // a finished item releases its permit before reporting
            let permit = loop {
                if let Ok(permit) = permits.try_acquire() {
                    break Some(permit);
                }
                match receiver.recv() {
                    Ok(done) => results.push(done),
                    Err(_) => break None,
                }
            };
            let sender = sender.clone();
            let f = &f;
            scope.spawn(move || {
                let result = f(item);
                drop(permit);
                sender.send((index, result)).ok();
            });
        }
    });
    drop(sender);

    results.extend(receiver);
    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, result)| result).collect()
}
