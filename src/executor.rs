//! Benchmark coordination: build jobs, drive the sampler or the squeezer,
//! and tear everything down on every exit path.

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::error::Error;
use crate::isolated;
use crate::job::Job;
use crate::sampler::{BenchSamples, SampleOptions, perform_benchmark};
use crate::squeeze::{SqueezeOptions, SqueezeResult, perform_squeeze};
use crate::workload::{Workload, WorkloadSpec};

/// Options for a benchmark run.
#[derive(Debug, Clone, TypedBuilder)]
pub struct RunOptions {
    /// Worker count for non-squeeze runs.
    #[builder(default = 1)]
    pub concurrency: usize,
    /// Sampler configuration.
    #[builder(default)]
    pub sample: SampleOptions,
    /// Run each workload in a freshly spawned runtime.
    #[builder(default = false)]
    pub isolated: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// What a run produced: a sampling pass, or a saturation sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunOutcome {
    Rate(BenchSamples),
    Saturation(SqueezeResult),
}

/// Benchmark a single workload.
///
/// With `squeeze` options the squeezer drives the job through ascending
/// worker counts; without them the job runs at `options.concurrency` for
/// one sampling pass. The job is stopped on every exit path.
pub async fn run(
    workload: Workload,
    options: &RunOptions,
    squeeze: Option<&SqueezeOptions>,
) -> Result<RunOutcome, Error> {
    if options.isolated {
        let spec = require_spec(&workload)?;
        let mut outcomes = isolated::run_isolated(vec![spec], options, squeeze).await?;
        return outcomes
            .pop()
            .ok_or_else(|| Error::IsolationFailed("isolated run returned no result".into()));
    }
    let mut job = Job::start(workload).await?;
    let outcome = match squeeze {
        Some(squeeze) => {
            perform_squeeze(&mut job, &options.sample, squeeze).await.map(RunOutcome::Saturation)
        }
        None => match job.set_concurrency(options.concurrency).await {
            Ok(()) => perform_benchmark(&[job.counter()], &options.sample).await.and_then(
                |mut samples| {
                    samples.pop().map(RunOutcome::Rate).ok_or_else(|| {
                        Error::InvalidConfiguration("sampler returned no result".into())
                    })
                },
            ),
            Err(err) => Err(err),
        },
    };
    job.stop().await;
    outcome
}

/// Benchmark several workloads under one synchronized sampling pass.
///
/// All jobs are built and brought to `options.concurrency` before the
/// sampler starts; construction failure of any job aborts the batch and
/// stops the jobs already started.
pub async fn compare(
    workloads: Vec<Workload>,
    options: &RunOptions,
) -> Result<Vec<BenchSamples>, Error> {
    if workloads.is_empty() {
        return Err(Error::InvalidConfiguration("nothing to benchmark".into()));
    }
    if options.isolated {
        let specs = workloads.iter().map(require_spec).collect::<Result<Vec<_>, _>>()?;
        let outcomes = isolated::run_isolated(specs, options, None).await?;
        return outcomes
            .into_iter()
            .map(|outcome| match outcome {
                RunOutcome::Rate(samples) => Ok(samples),
                RunOutcome::Saturation(_) => {
                    Err(Error::IsolationFailed("unexpected saturation result".into()))
                }
            })
            .collect();
    }

    let mut jobs: Vec<Job> = Vec::with_capacity(workloads.len());
    let mut setup = Ok(());
    for workload in workloads {
        match Job::start(workload).await {
            Ok(job) => jobs.push(job),
            Err(err) => {
                setup = Err(err);
                break;
            }
        }
    }
    if setup.is_ok() {
        for job in &mut jobs {
            if let Err(err) = job.set_concurrency(options.concurrency).await {
                setup = Err(err);
                break;
            }
        }
    }
    let outcome = match setup {
        Ok(()) => {
            let counters: Vec<_> = jobs.iter().map(Job::counter).collect();
            perform_benchmark(&counters, &options.sample).await
        }
        Err(err) => Err(err),
    };
    for job in &mut jobs {
        job.stop().await;
    }
    outcome
}

fn require_spec(workload: &Workload) -> Result<WorkloadSpec, Error> {
    workload.spec().cloned().ok_or_else(|| {
        Error::InvalidConfiguration(
            "isolated runs need a spec-backed workload; closures cannot cross the runtime boundary"
                .into(),
        )
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::error::HookError;
    use crate::workload::State;

    fn fast_sample() -> SampleOptions {
        SampleOptions::builder().sample_duration(Duration::from_millis(20)).samples(2).build()
    }

    fn with_done_probe(name: &str, dones: &Arc<AtomicUsize>) -> Workload {
        let dones = Arc::clone(dones);
        Workload::new(name, |_state| async {
            tokio::task::yield_now().await;
            Ok(())
        })
        .with_done(move |_suite| {
            let dones = Arc::clone(&dones);
            async move {
                dones.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        })
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_measures_a_rate() {
        let workload = Workload::new("quick", |_state| async {
            tokio::task::yield_now().await;
            Ok(())
        });
        let options = RunOptions::builder().concurrency(2).sample(fast_sample()).build();
        let outcome = run(workload, &options, None).await.unwrap();
        match outcome {
            RunOutcome::Rate(samples) => assert!(samples.mean() > 0.0),
            RunOutcome::Saturation(_) => panic!("expected a rate"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_releases_the_job_on_sampler_errors() {
        let dones = Arc::new(AtomicUsize::new(0));
        let workload = with_done_probe("doomed", &dones);
        let broken = SampleOptions::builder().samples(0).build();
        let options = RunOptions::builder().sample(broken).build();
        let err = run(workload, &options, None).await.err().expect("sampler should reject");
        assert!(matches!(err, Error::InvalidConfiguration(_)));
        assert_eq!(dones.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn comparison_failure_stops_started_jobs() {
        let dones = Arc::new(AtomicUsize::new(0));
        let good = with_done_probe("good", &dones);
        let bad = Workload::new("bad", |_state| async { Ok(()) })
            .with_init(|| async { Err::<State, HookError>("refused".into()) });
        let options = RunOptions::builder().sample(fast_sample()).build();
        let err = compare(vec![good, bad], &options).await.err().expect("batch should abort");
        assert!(matches!(err, Error::InitFailed(_)));
        assert_eq!(dones.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn closure_workloads_cannot_run_isolated() {
        let workload = Workload::new("closure", |_state| async { Ok(()) });
        let options = RunOptions::builder().isolated(true).build();
        let err = run(workload, &options, None).await.err().expect("must be rejected");
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn squeeze_outcome_carries_the_curve() {
        let workload = Workload::new("quick", |_state| async {
            tokio::task::yield_now().await;
            Ok(())
        });
        let sample =
            SampleOptions::builder().sample_duration(Duration::from_millis(10)).samples(1).build();
        let options = RunOptions::builder().sample(sample).build();
        let squeeze = SqueezeOptions::builder().min(1).max(2).threshold(1).build();
        let outcome = run(workload, &options, Some(&squeeze)).await.unwrap();
        match outcome {
            RunOutcome::Saturation(result) => {
                assert!((1..=2).contains(&result.best.concurrency));
                assert!(!result.history.is_empty());
                let peak = result.history.iter().map(|p| p.qps).fold(f64::MIN, f64::max);
                assert_eq!(result.best.qps, peak);
            }
            RunOutcome::Rate(_) => panic!("expected a saturation result"),
        }
    }
}
