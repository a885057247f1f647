//! Concurrency-saturation search: sweep worker counts upward until
//! throughput stops improving.

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::error::Error;
use crate::job::Job;
use crate::sampler::{SampleOptions, perform_benchmark};

/// Ceiling for the sweep when none is given, scaled from the host core
/// count. Task runtimes expose no queryable process-style limit to
/// subtract a safety margin from, so the worker-scale heuristic stands in.
pub fn default_max_concurrency() -> usize {
    num_cpus::get().saturating_mul(120)
}

/// Sweep bounds and the knee criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TypedBuilder, Serialize, Deserialize)]
pub struct SqueezeOptions {
    /// Starting worker count.
    #[builder(default = 1)]
    pub min: usize,
    /// Hard upper bound on the sweep.
    #[builder(default = default_max_concurrency())]
    pub max: usize,
    /// How far past the best concurrency the sweep probes without
    /// improvement before declaring the peak.
    #[builder(default = 3)]
    pub threshold: usize,
}

impl Default for SqueezeOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// One measured point of the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SqueezePoint {
    pub qps: f64,
    pub concurrency: usize,
}

/// Outcome of a sweep: the knee plus the full history, newest first.
/// Never partially reported — a failed sweep yields an error, not a
/// truncated curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqueezeResult {
    pub best: SqueezePoint,
    pub history: Vec<SqueezePoint>,
}

pub(crate) enum Step {
    Continue(usize),
    Done,
}

/// Decision core of the sweep, separated from jobs and timers.
///
/// Ties do not displace the best point: the first concurrency reaching a
/// given maximum is reported, giving a lower bound on the knee.
#[derive(Debug)]
pub(crate) struct SqueezeState {
    current: usize,
    max: usize,
    threshold: usize,
    best: Option<SqueezePoint>,
    history: Vec<SqueezePoint>,
}

impl SqueezeState {
    pub(crate) fn new(options: &SqueezeOptions) -> Result<Self, Error> {
        if options.min == 0 {
            return Err(Error::InvalidConfiguration("squeeze min must be at least 1".into()));
        }
        if options.min > options.max {
            return Err(Error::InvalidConfiguration(format!(
                "squeeze min {} exceeds max {}",
                options.min, options.max
            )));
        }
        Ok(Self {
            current: options.min,
            max: options.max,
            threshold: options.threshold,
            best: None,
            history: Vec::new(),
        })
    }

    /// The worker count to measure next.
    pub(crate) fn concurrency(&self) -> usize {
        self.current
    }

    /// Record a measurement at the current concurrency and decide whether
    /// to keep climbing.
    pub(crate) fn observe(&mut self, qps: f64) -> Step {
        let point = SqueezePoint { qps, concurrency: self.current };
        self.history.insert(0, point);
        match self.best {
            Some(best) if qps <= best.qps => {
                if self.current - best.concurrency > self.threshold {
                    return Step::Done;
                }
            }
            _ => self.best = Some(point),
        }
        self.current += 1;
        if self.current > self.max {
            return Step::Done;
        }
        Step::Continue(self.current)
    }

    pub(crate) fn into_result(self) -> Option<SqueezeResult> {
        let best = self.best?;
        Some(SqueezeResult { best, history: self.history })
    }
}

/// Sweep the job through ascending worker counts, sampling once per step.
pub async fn perform_squeeze(
    job: &mut Job,
    options: &SampleOptions,
    squeeze: &SqueezeOptions,
) -> Result<SqueezeResult, Error> {
    let mut state = SqueezeState::new(squeeze)?;
    loop {
        let concurrency = state.concurrency();
        job.set_concurrency(concurrency).await?;
        let samples = perform_benchmark(&[job.counter()], options).await?;
        let qps = samples.first().map(|s| s.mean()).unwrap_or(0.0);
        tracing::info!(job = job.name(), concurrency, qps, "squeeze step measured");
        if let Step::Done = state.observe(qps) {
            break;
        }
    }
    state
        .into_result()
        .ok_or_else(|| Error::InvalidConfiguration("squeeze made no measurements".into()))
}
