//! Burgu — a micro-benchmark harness and concurrency-saturation explorer.
//!
//! Burgu answers two questions about a unit of work: what steady-state
//! throughput (QPS) it sustains under a given worker count, and which
//! worker count maximizes that throughput before contention or scheduler
//! saturation flattens it (the *squeeze*). Several workloads can also be
//! compared under one synchronized sampling pass, or run isolated in
//! freshly spawned runtimes that are discarded after use.
//!
//! # Architecture
//!
//! The crate is organized leaves-first:
//!
//! - [`counter`]: the lock-free invocation tally, one per job.
//! - [`workload`]: the unit of work plus its `init` / `init_runner` /
//!   `done` lifecycle hooks, built from closures or parsed from a
//!   serializable [`WorkloadSpec`] over the [`builtins`] op registry.
//! - [`job`]: the per-benchmark control plane — one counter, one suite
//!   state, and a dynamic pool of worker tasks.
//! - [`sampler`]: reads counters at fixed wall-clock intervals, discards
//!   warmup, and optionally gates on the coefficient of variation.
//! - [`squeeze`]: sweeps worker counts upward until throughput stops
//!   improving past a threshold.
//! - [`executor`]: builds jobs, drives the sampler or the squeezer, and
//!   tears everything down on every exit path.
//! - [`isolated`]: the fresh-runtime bridge, implemented over child
//!   processes with a one-shot stdio protocol.
//! - [`report`]: SI-scaled rate formatting and the summary table.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use burgu::{RunOptions, SampleOptions, Workload};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), burgu::Error> {
//!     let workload = Workload::new("sleepy", |_state| async {
//!         tokio::time::sleep(Duration::from_millis(1)).await;
//!         Ok(())
//!     });
//!     let options = RunOptions::builder()
//!         .concurrency(4)
//!         .sample(SampleOptions::builder().samples(3).build())
//!         .build();
//!     let outcome = burgu::run(workload, &options, None).await?;
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```

pub mod builtins;
pub mod counter;
pub mod error;
pub mod executor;
pub mod isolated;
pub mod job;
pub mod report;
pub mod sampler;
pub mod squeeze;
pub mod workload;

pub use counter::CounterHandle;
pub use error::{Error, HookError};
pub use executor::{RunOptions, RunOutcome, compare, run};
pub use job::Job;
pub use sampler::{BenchSamples, ReportMode, SampleOptions, perform_benchmark};
pub use squeeze::{
    SqueezeOptions, SqueezePoint, SqueezeResult, default_max_concurrency, perform_squeeze,
};
pub use workload::{CodeBody, OpSpec, State, Workload, WorkloadSpec};
