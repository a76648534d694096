//! One-shot extrapolation of counted entries into a positional index.
//!
//! Each distinct value owns a run of `count` consecutive natural positions, laid out in
//! ascending value order. The index stores the exclusive end of every run, so resolving a
//! position is a binary search over run ends rather than a per-position table.
//!
//! The computation is handed to a crate-local worker pool (see [`run_one_shot`]) and its result
//! travels back over a single-use channel. The caller only ever observes the finished index.

use crate::error::{AggregateError, AggregateResult};
use crate::multiset::CountedEntry;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use rayon::ThreadPool;
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use std::sync::OnceLock;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct ExtrapolationIndex {
    run_ends: Vec<usize>,
    mode: Option<usize>,
}

impl ExtrapolationIndex {
    /// Lays out the runs and resolves the mode in a single pass.
    ///
    /// The mode only moves on a strictly greater count, so ties resolve to the entry seen first
    /// (the smallest value).
    pub(crate) fn build<V>(entries: &[CountedEntry<V>]) -> Self {
        let mut run_ends = Vec::with_capacity(entries.len());
        let mut end = 0usize;
        let mut mode = None;
        let mut max_count = 0usize;

        for (idx, entry) in entries.iter().enumerate() {
            end += entry.count();
            run_ends.push(end);

            if entry.count() > max_count {
                max_count = entry.count();
                mode = Some(idx);
            }
        }

        Self { run_ends, mode }
    }

    /// Total number of natural positions.
    pub(crate) fn len(&self) -> usize {
        self.run_ends.last().copied().unwrap_or(0)
    }

    /// Entry index owning `position`, if the position is in range.
    pub(crate) fn entry_at(&self, position: usize) -> Option<usize> {
        if position >= self.len() {
            return None;
        }
        Some(self.run_ends.partition_point(|&end| end <= position))
    }

    pub(crate) fn mode(&self) -> Option<usize> {
        self.mode
    }
}

/// Counted entries together with the index built over them.
#[derive(Debug)]
pub(crate) struct Extrapolated<V> {
    pub(crate) entries: Vec<CountedEntry<V>>,
    pub(crate) index: ExtrapolationIndex,
}

/// Builds the positional index for `entries` off the calling thread and waits for it.
pub(crate) fn extrapolate<V>(entries: Vec<CountedEntry<V>>) -> AggregateResult<Extrapolated<V>>
where
    V: Send + 'static,
{
    run_one_shot(move || {
        let index = ExtrapolationIndex::build(&entries);
        Extrapolated { entries, index }
    })
}

/// Runs `job` once and blocks until its single completion signal arrives.
///
/// The producer sends exactly one message. If the job panics the sender is dropped without
/// sending, and the wait reports [`AggregateError::ExtrapolationInterrupted`].
pub(crate) fn run_one_shot<T, F>(job: F) -> AggregateResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel::<T>(1);
    let task = move || {
        if let Ok(out) = catch_unwind(AssertUnwindSafe(job)) {
            // The receiver is still blocked on us; a failed send means it went away first.
            let _ = tx.send(out);
        }
    };

    spawn(task);

    rx.recv().map_err(|_| {
        log::warn!("extrapolation task finished without signalling completion");
        AggregateError::ExtrapolationInterrupted
    })
}

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
fn spawn(task: impl FnOnce() + Send + 'static) {
    match worker_pool() {
        Some(pool) => pool.spawn(task),
        None => task(),
    }
}

#[cfg(not(all(feature = "parallel", not(target_arch = "wasm32"))))]
fn spawn(task: impl FnOnce() + Send + 'static) {
    task();
}

/// Crate-local pool used for extrapolation.
///
/// A dedicated pool keeps extrapolation off Rayon's global pool, whose initialization can fail
/// under resource pressure. If no pool can be built, extrapolation runs inline.
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
static WORKER_POOL: OnceLock<Option<ThreadPool>> = OnceLock::new();

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
fn desired_worker_threads() -> usize {
    std::env::var("FORMULA_AGGREGATE_THREADS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(1)
}

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
fn build_worker_pool() -> Option<ThreadPool> {
    let threads = desired_worker_threads();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|idx| format!("formula-aggregate-extrapolate-{idx}"))
        .build();

    match pool {
        Ok(pool) => Some(pool),
        Err(err) => {
            log::warn!("failed to build extrapolation pool ({err}); extrapolating inline");
            None
        }
    }
}

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
fn worker_pool() -> Option<&'static ThreadPool> {
    WORKER_POOL.get_or_init(build_worker_pool).as_ref()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entries(counts: &[(i64, usize)]) -> Vec<CountedEntry<i64>> {
        counts
            .iter()
            .map(|&(value, count)| CountedEntry::with_count(value, count))
            .collect()
    }

    #[test]
    fn runs_cover_every_position() {
        let entries = entries(&[(10, 2), (20, 1), (30, 3)]);
        let index = ExtrapolationIndex::build(&entries);

        assert_eq!(index.len(), 6);
        let owners: Vec<usize> = (0..6).filter_map(|p| index.entry_at(p)).collect();
        assert_eq!(owners, vec![0, 0, 1, 2, 2, 2]);
        assert_eq!(index.entry_at(6), None);
    }

    #[test]
    fn mode_keeps_first_of_tied_counts() {
        let index = ExtrapolationIndex::build(&entries(&[(1, 2), (2, 3), (3, 3)]));
        assert_eq!(index.mode(), Some(1));
    }

    #[test]
    fn empty_input_has_no_mode() {
        let index = ExtrapolationIndex::build::<i64>(&[]);
        assert_eq!(index.len(), 0);
        assert_eq!(index.mode(), None);
        assert_eq!(index.entry_at(0), None);
    }

    #[test]
    fn one_shot_delivers_result() {
        assert_eq!(run_one_shot(|| 41 + 1).unwrap(), 42);
    }

    #[test]
    fn lost_signal_reports_interruption() {
        let result = run_one_shot(|| -> usize { panic!("extrapolation worker lost") });
        assert!(matches!(
            result,
            Err(AggregateError::ExtrapolationInterrupted)
        ));
    }
}
