//! Chunked batch helpers and progress reporting
//!
//! Mount and unmount batches split their items into chunks, run one pool
//! task per chunk, and share a progress reporter: a dedicated thread that
//! re-renders a `processed/total` line at a fixed cadence until the
//! producer signals completion, then renders once more and joins.

use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Chunk width for splitting `total` items across `workers` tasks.
///
/// Roughly `total / workers`, capped at 50 items per chunk so one slow
/// chunk cannot hold a large batch hostage, and never below 1.
pub fn chunk_size(total: usize, workers: usize) -> usize {
    if total == 0 {
        return 1;
    }
    total.div_ceil(workers.max(1)).clamp(1, 50)
}

/// Renders batch progress from a dedicated thread.
///
/// The counter is shared with the chunk tasks; the completion flag is set
/// by [`ProgressReporter::finish`] after the producer has joined all chunk
/// handles. No cancellation: the reporter always gets a final render.
///
/// Rendering goes to stderr and only when stderr is a terminal, so batch
/// runs inside pipelines and tests stay clean.
pub struct ProgressReporter {
    counter: Arc<AtomicUsize>,
    done: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    const CADENCE: Duration = Duration::from_millis(100);

    /// Spawn the reporter thread for a batch of `total` items.
    pub fn start(label: &str, total: usize) -> Self {
        let counter = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicBool::new(false));

        let thread_counter = Arc::clone(&counter);
        let thread_done = Arc::clone(&done);
        let label = label.to_string();
        let thread = thread::Builder::new()
            .name("loopdock-progress".to_string())
            .spawn(move || {
                let render_enabled = io::stderr().is_terminal();
                loop {
                    let finished = thread_done.load(Ordering::Acquire);
                    if render_enabled {
                        let count = thread_counter.load(Ordering::Relaxed);
                        eprint!("\r{label}: {count}/{total}");
                        let _ = io::stderr().flush();
                    }
                    if finished {
                        if render_enabled {
                            eprintln!();
                        }
                        break;
                    }
                    thread::sleep(Self::CADENCE);
                }
            })
            .expect("failed to spawn progress reporter thread");

        Self {
            counter,
            done,
            thread: Some(thread),
        }
    }

    /// The shared counter chunk tasks increment per processed item.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.counter)
    }

    /// Signal completion and wait for the final render.
    pub fn finish(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.done.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.stop();
    }
}
