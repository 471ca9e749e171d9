//! Background worker threads that populate queued chunks.
//!
//! Workers sleep on a wake channel that receives one token per queued load.
//! A token does not name a chunk: the woken worker pops whatever is most
//! urgent from the shared queue, and a token that finds the queue empty
//! (because a writer claimed the task) is simply consumed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use crate::world::{Shared, WorldError};

/// One generation of loader threads sharing a stop flag.
pub(crate) struct LoaderPool {
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl LoaderPool {
    /// Spawns `threads` workers and returns them with their wake sender.
    ///
    /// If any spawn fails, the workers already started are stopped before
    /// the error is returned.
    pub(crate) fn spawn(
        shared: &Arc<Shared>,
        threads: usize,
    ) -> Result<(Self, Sender<()>), WorldError> {
        let (wake_tx, wake) = crossbeam_channel::unbounded();
        let mut pool = Self {
            stop: Arc::new(AtomicBool::new(false)),
            workers: Vec::with_capacity(threads),
        };
        for i in 0..threads {
            let shared = Arc::clone(shared);
            let wake = wake.clone();
            let stop = Arc::clone(&pool.stop);
            let spawned = std::thread::Builder::new()
                .name(format!("geode-loader-{i}"))
                .spawn(move || worker_loop(&shared, &wake, &stop));
            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(err) => {
                    pool.request_stop();
                    drop(wake_tx);
                    pool.join();
                    return Err(WorldError::Spawn(err));
                }
            }
        }
        tracing::debug!(threads, "started chunk loader pool");
        Ok((pool, wake_tx))
    }

    pub(crate) fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Tells workers to stop taking new tasks. Running tasks complete.
    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Waits for every worker to exit. Call after [`request_stop`](Self::request_stop)
    /// and after the wake sender has been dropped.
    pub(crate) fn join(&mut self) {
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("chunk loader thread panicked");
            }
        }
    }
}

fn worker_loop(shared: &Shared, wake: &Receiver<()>, stop: &AtomicBool) {
    while wake.recv().is_ok() {
        if stop.load(Ordering::Acquire) {
            break;
        }
        shared.process_next();
    }
}
