//! Bounded fan-out of independent jobs onto scoped worker threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

/// Hard upper bound of concurrent workers. Configuration can only lower it.
pub const MAX_WORKERS: usize = 3;

/// Number of workers to use for `jobs` jobs given a configured upper `limit`.
///
/// The result is `min(limit, MAX_WORKERS, available parallelism, jobs)`, at
/// least one worker whenever there is a job to do.
pub fn worker_count(limit: usize, jobs: usize) -> usize {
    let parallelism = thread::available_parallelism().map_or(1, usize::from);
    limit.clamp(1, MAX_WORKERS).min(parallelism).min(jobs)
}

/// Runs `job` once for every item on at most `workers` threads.
///
/// Items are handed out in order to whichever worker is free next. Results
/// are returned in completion order, one per item. A job panicking
/// propagates the panic to the caller after all other jobs finished.
pub fn run_bounded<T, R, F>(items: &[T], workers: usize, job: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    let workers = workers.max(1).min(items.len());
    if workers == 0 {
        return Vec::new();
    }

    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel();

    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let next = &next;
            let job = &job;
            scope.spawn(move || loop {
                let idx = next.fetch_add(1, Ordering::Relaxed);
                let Some(item) = items.get(idx) else {
                    break;
                };
                if tx.send(job(item)).is_err() {
                    break;
                }
            });
        }
        // only the workers' senders keep the channel open
        drop(tx);

        rx.iter().collect()
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn worker_count_is_bounded_by_jobs_and_limit() {
        assert_eq!(worker_count(3, 0), 0);
        assert_eq!(worker_count(3, 1), 1);
        assert!(worker_count(3, 10) <= 3);
        assert!(worker_count(3, 10) >= 1);
        assert_eq!(worker_count(0, 5), 1);
    }

    #[test]
    fn configured_limit_cannot_raise_the_cap() {
        assert!(worker_count(8, 10) <= MAX_WORKERS);
        assert!(worker_count(usize::MAX, 100) <= MAX_WORKERS);
        assert_eq!(worker_count(8, 1), 1);
    }

    #[test]
    fn every_item_yields_exactly_one_result() {
        let items: Vec<u32> = (0..25).collect();
        let mut results = run_bounded(&items, 3, |n| n * 2);
        results.sort_unstable();

        let expected: Vec<u32> = (0..25).map(|n| n * 2).collect();
        assert_eq!(results, expected);
    }

    #[test]
    fn never_exceeds_worker_limit() {
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let items: Vec<usize> = (0..12).collect();

        let results = run_bounded(&items, 3, |_| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(15));
            running.fetch_sub(1, Ordering::SeqCst);
        });

        assert_eq!(results.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn empty_input_spawns_nothing() {
        let items: Vec<u8> = Vec::new();
        let results: Vec<u8> = run_bounded(&items, 3, |_| unreachable!());
        assert!(results.is_empty());
    }
}
