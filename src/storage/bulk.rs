//! Concurrent Bulk Writes
//!
//! [`Store::bulk_write`] fans a batch of key/value pairs out to a fixed pool
//! of worker threads:
//!
//! ```text
//!  feeder ──> [ work queue ] ──> worker 1 ─┐
//!                           ├──> worker 2 ─┼──> [ results ] ──> caller
//!                           └──> worker N ─┘         ▲
//!                                                     │
//!                         watcher: joins workers, then closes results
//! ```
//!
//! Repeated keys are merged first, the last value winning. Both queues are
//! bounded to the batch size, so neither the feeder nor a worker ever blocks
//! on a full channel. Results arrive in completion order, not submission
//! order. Every write still takes the engine's exclusive lock,
//! so extra workers only overlap the work done outside it.

use crate::storage::engine::Store;
use crate::storage::error::{Result, StoreError};
use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashMap;
use std::thread;
use tracing::{debug, warn};

/// Outcome of one write in a bulk batch.
#[derive(Debug)]
pub struct WriteResult {
    pub key: String,
    pub result: Result<()>,
}

impl WriteResult {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&StoreError> {
        self.result.as_ref().err()
    }
}

type Task = (String, Bytes);

impl Store {
    /// Writes every pair using `workers` threads and returns one result per
    /// distinct key, in completion order.
    ///
    /// A key given more than once is written once, with its last value. The
    /// worker count is clamped to `1..=distinct keys`. One key failing has no
    /// effect on the others.
    pub fn bulk_write<I, K, V>(&self, pairs: I, workers: usize) -> Vec<WriteResult>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Bytes>,
    {
        let tasks = dedup_last_wins(pairs);
        let total = tasks.len();
        if total == 0 {
            return Vec::new();
        }
        let workers = workers.clamp(1, total);
        debug!(pairs = total, workers = workers, "Starting bulk write");

        let (task_tx, task_rx) = crossbeam_channel::bounded::<Task>(total);
        let (result_tx, result_rx) = crossbeam_channel::bounded::<WriteResult>(total);

        let results = thread::scope(|scope| {
            scope.spawn(move || {
                for task in tasks {
                    if task_tx.send(task).is_err() {
                        break;
                    }
                }
            });

            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    let task_rx = task_rx.clone();
                    let result_tx = result_tx.clone();
                    scope.spawn(move || self.run_worker(task_rx, result_tx))
                })
                .collect();
            drop(task_rx);

            scope.spawn(move || {
                for handle in handles {
                    if handle.join().is_err() {
                        warn!("Bulk write worker panicked");
                    }
                }
                drop(result_tx);
            });

            result_rx.iter().collect::<Vec<_>>()
        });

        let failed = results.iter().filter(|r| !r.is_ok()).count();
        debug!(pairs = total, failed = failed, "Bulk write finished");
        results
    }

    fn run_worker(&self, tasks: Receiver<Task>, results: Sender<WriteResult>) {
        for (key, value) in tasks.iter() {
            let result = self.write(&key, &value);
            if results.send(WriteResult { key, result }).is_err() {
                return;
            }
        }
    }
}

/// Collapses repeated keys onto their first position, keeping the last value.
fn dedup_last_wins<I, K, V>(pairs: I) -> Vec<Task>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Bytes>,
{
    let mut tasks: Vec<Task> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();
    for (key, value) in pairs {
        let (key, value) = (key.into(), value.into());
        match slots.get(&key) {
            Some(&slot) => tasks[slot].1 = value,
            None => {
                slots.insert(key.clone(), tasks.len());
                tasks.push((key, value));
            }
        }
    }
    tasks
}
