//! The per-benchmark control plane: one counter, one suite state, and a
//! dynamic pool of worker tasks.
//!
//! A [`Job`] is the exclusive owner of everything a single benchmark
//! touches. Workers are plain tasks on the multi-threaded runtime, ordered
//! by spawn position; concurrency changes grow the pool at the tail and
//! retire from the tail. All mutation goes through `&mut self`, so callers
//! are serialized by construction.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::counter::{Counter, CounterHandle};
use crate::error::Error;
use crate::workload::{State, Workload};

/// A running benchmark target.
///
/// Lifecycle: [`Job::start`] evaluates `init` once and spawns nothing;
/// [`Job::set_concurrency`] moves the pool to the requested size;
/// [`Job::stop`] retires every worker and evaluates `done` once. Dropping
/// an unstopped job aborts its workers instead — the cancellation path
/// cannot await and never runs `done`.
pub struct Job {
    workload: Arc<Workload>,
    counter: Counter,
    suite: State,
    workers: Vec<Worker>,
    faults: Arc<AtomicU64>,
    stopped: bool,
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Job {
    /// Construct the job and run the `init` hook. No workers are started;
    /// the counter starts at zero.
    pub async fn start(workload: Workload) -> Result<Self, Error> {
        let suite = match &workload.init {
            Some(hook) => hook().await.map_err(|e| Error::InitFailed(e.to_string()))?,
            None => State::empty(),
        };
        tracing::debug!(job = workload.name(), "job started");
        Ok(Self {
            workload: Arc::new(workload),
            counter: Counter::new(),
            suite,
            workers: Vec::new(),
            faults: Arc::new(AtomicU64::new(0)),
            stopped: false,
        })
    }

    pub fn name(&self) -> &str {
        self.workload.name()
    }

    /// Read-only handle to the invocation counter.
    pub fn counter(&self) -> CounterHandle {
        self.counter.handle()
    }

    /// Nominal pool size: workers spawned and not yet retired. A worker
    /// whose runner faulted still counts until the next transition
    /// collects it.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Runner invocations that raised an error. Each fault retires its
    /// worker; faulted workers are not restarted.
    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    /// Transition the pool to exactly `n` workers.
    ///
    /// Growth spawns workers that evaluate `init_runner` before entering
    /// their loop and report readiness back; an `init_runner` failure fails
    /// the whole transition. Shrinkage flags the surplus tail and waits for
    /// those workers to finish the invocation in flight and exit. Returns
    /// only once the pool matches `n`.
    pub async fn set_concurrency(&mut self, n: usize) -> Result<(), Error> {
        if self.stopped {
            return Err(Error::InvalidConfiguration("job is already stopped".into()));
        }
        if n < self.workers.len() {
            self.retire_to(n).await;
            return Ok(());
        }
        let mut pending = Vec::with_capacity(n - self.workers.len());
        while self.workers.len() < n {
            let stop = Arc::new(AtomicBool::new(false));
            let (ready_tx, ready_rx) = oneshot::channel();
            let handle = tokio::spawn(worker_loop(
                Arc::clone(&self.workload),
                self.suite.clone(),
                self.counter.clone(),
                Arc::clone(&stop),
                Arc::clone(&self.faults),
                ready_tx,
            ));
            self.workers.push(Worker { stop, handle });
            pending.push(ready_rx);
        }
        for ready in pending {
            match ready.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    return Err(Error::WorkerInitFailed(
                        "worker exited before reporting readiness".into(),
                    ));
                }
            }
        }
        tracing::debug!(job = self.name(), workers = n, "concurrency set");
        Ok(())
    }

    /// Retire every worker, then evaluate `done` exactly once. Idempotent;
    /// a failing `done` hook is logged, not propagated — the measurement
    /// already exists.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.retire_to(0).await;
        if let Some(hook) = &self.workload.done {
            if let Err(err) = hook(self.suite.clone()).await {
                tracing::warn!(job = self.workload.name(), error = %err, "done hook failed");
            }
        }
        tracing::debug!(job = self.workload.name(), "job stopped");
    }

    async fn retire_to(&mut self, n: usize) {
        let surplus = self.workers.split_off(n);
        for worker in &surplus {
            worker.stop.store(true, Ordering::Relaxed);
        }
        for worker in surplus {
            if let Err(err) = worker.handle.await {
                if err.is_panic() {
                    self.faults.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(job = self.workload.name(), "worker panicked");
                }
            }
        }
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        for worker in &self.workers {
            worker.stop.store(true, Ordering::Relaxed);
            worker.handle.abort();
        }
    }
}

async fn worker_loop(
    workload: Arc<Workload>,
    suite: State,
    counter: Counter,
    stop: Arc<AtomicBool>,
    faults: Arc<AtomicU64>,
    ready: oneshot::Sender<Result<(), Error>>,
) {
    let state = match &workload.init_runner {
        Some(hook) => match hook(suite).await {
            Ok(state) => state,
            Err(err) => {
                let _ = ready.send(Err(Error::WorkerInitFailed(err.to_string())));
                return;
            }
        },
        None => suite,
    };
    if ready.send(Ok(())).is_err() {
        return;
    }
    loop {
        if let Err(err) = (workload.runner)(state.clone()).await {
            faults.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(job = workload.name(), error = %err, "runner failed, retiring worker");
            break;
        }
        counter.increment();
        // The stop check sits between invocations so a retiring worker
        // always completes the one in flight.
        if stop.load(Ordering::Relaxed) {
            break;
        }
        // Runners that never await would otherwise pin a runtime thread.
        tokio::task::yield_now().await;
    }
}
