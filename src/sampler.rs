//! Fixed-interval counter sampling with warmup and an optional
//! coefficient-of-variation gate.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use typed_builder::TypedBuilder;

use crate::counter::CounterHandle;
use crate::error::Error;

/// How sampler results are presented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportMode {
    /// One mean rate per job.
    #[default]
    Mean,
    /// The full retained sample vector per job.
    Extended,
}

/// Sampling knobs.
///
/// With `cv` unset the sampler stops as soon as `samples` deltas exist per
/// job. Setting `cv` turns the window into a sliding one: sampling
/// continues, dropping the oldest delta each round, until stddev/mean of
/// the window is at or below the bound for every job at once.
#[derive(Debug, Clone, PartialEq, TypedBuilder, Serialize, Deserialize)]
pub struct SampleOptions {
    /// Wall-clock interval between counter reads.
    #[builder(default = Duration::from_millis(1000))]
    pub sample_duration: Duration,
    /// Initial intervals discarded before the baseline read.
    #[builder(default = 0)]
    pub warmup: usize,
    /// Retained intervals per job.
    #[builder(default = 3)]
    pub samples: usize,
    /// Coefficient-of-variation gate; only meaningful when `samples >= 2`.
    #[builder(default)]
    pub cv: Option<f64>,
    /// Mean or full-vector presentation.
    #[builder(default)]
    pub report: ReportMode,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// One counter snapshot.
#[derive(Debug, Clone, Copy)]
struct Reading {
    count: u64,
    at: Instant,
}

/// Per-interval throughput deltas for one job, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchSamples {
    rates: Vec<f64>,
}

impl BenchSamples {
    pub(crate) fn new(rates: Vec<f64>) -> Self {
        Self { rates }
    }

    /// Per-interval rates in ops per second, newest first.
    pub fn rates(&self) -> &[f64] {
        &self.rates
    }

    pub fn mean(&self) -> f64 {
        if self.rates.is_empty() {
            return 0.0;
        }
        self.rates.iter().sum::<f64>() / self.rates.len() as f64
    }

    /// Coefficient of variation of the window. All-equal windows (including
    /// all-zero ones) report 0.
    pub fn cv(&self) -> f64 {
        cv_of(&self.rates)
    }
}

fn cv_of(rates: &[f64]) -> f64 {
    if rates.len() < 2 {
        return 0.0;
    }
    let mean = rates.iter().sum::<f64>() / rates.len() as f64;
    let variance =
        rates.iter().map(|rate| (rate - mean) * (rate - mean)).sum::<f64>() / rates.len() as f64;
    let stddev = variance.sqrt();
    if stddev == 0.0 {
        0.0
    } else if mean == 0.0 {
        f64::INFINITY
    } else {
        stddev / mean
    }
}

/// Drive one sampling pass over a set of job counters.
///
/// Sleeps through `warmup` intervals, takes a baseline reading, then reads
/// every `sample_duration` until `samples` deltas exist per job — and, when
/// a CV gate is set, until every job's window satisfies it simultaneously.
/// One timestamp is shared per read round, so comparison-mode jobs see
/// synchronized windows; rates divide by the actually elapsed time, so a
/// delayed wakeup skews no rate.
pub async fn perform_benchmark(
    counters: &[CounterHandle],
    options: &SampleOptions,
) -> Result<Vec<BenchSamples>, Error> {
    if counters.is_empty() {
        return Err(Error::InvalidConfiguration("nothing to sample".into()));
    }
    if options.samples == 0 {
        return Err(Error::InvalidConfiguration("samples must be at least 1".into()));
    }
    if options.sample_duration.is_zero() {
        return Err(Error::InvalidConfiguration("sample_duration must be positive".into()));
    }
    if options.cv.is_some_and(|cv| cv < 0.0) {
        return Err(Error::InvalidConfiguration("cv bound must be non-negative".into()));
    }
    // CV over a single sample is undefined; fall back to a plain run.
    let cv_gate = if options.samples >= 2 { options.cv } else { None };

    if options.warmup > 0 {
        tracing::debug!(intervals = options.warmup, "warming up");
        tokio::time::sleep(options.sample_duration * options.warmup as u32).await;
    }

    let mut histories: Vec<Vec<Reading>> = vec![Vec::new(); counters.len()];
    read_round(counters, &mut histories);
    loop {
        tokio::time::sleep(options.sample_duration).await;
        read_round(counters, &mut histories);
        for history in &mut histories {
            history.truncate(options.samples + 1);
        }
        if histories[0].len() < options.samples + 1 {
            continue;
        }
        let windows: Vec<Vec<f64>> = histories.iter().map(|history| deltas(history)).collect();
        match cv_gate {
            None => return Ok(windows.into_iter().map(BenchSamples::new).collect()),
            Some(bound) => {
                let worst = windows.iter().map(|window| cv_of(window)).fold(0.0f64, f64::max);
                if worst <= bound {
                    return Ok(windows.into_iter().map(BenchSamples::new).collect());
                }
                tracing::debug!(worst_cv = worst, bound, "variation too high, extending window");
            }
        }
    }
}

fn read_round(counters: &[CounterHandle], histories: &mut [Vec<Reading>]) {
    let at = Instant::now();
    for (history, counter) in histories.iter_mut().zip(counters) {
        history.insert(0, Reading { count: counter.read(), at });
    }
}

fn deltas(history: &[Reading]) -> Vec<f64> {
    history
        .windows(2)
        .map(|pair| {
            let (newer, older) = (pair[0], pair[1]);
            let elapsed = newer.at.duration_since(older.at).as_secs_f64();
            if elapsed <= 0.0 {
                0.0
            } else {
                newer.count.saturating_sub(older.count) as f64 / elapsed
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::Counter;

    /// A counter driven at a steady pace by a background task.
    fn driven(per_tick: u64, tick: Duration) -> CounterHandle {
        let counter = Counter::new();
        let handle = counter.handle();
        tokio::spawn(async move {
            loop {
                for _ in 0..per_tick {
                    counter.increment();
                }
                tokio::time::sleep(tick).await;
            }
        });
        handle
    }

    fn fast(samples: usize) -> SampleOptions {
        SampleOptions::builder()
            .sample_duration(Duration::from_millis(20))
            .samples(samples)
            .build()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn window_length_matches_samples() {
        let handle = driven(100, Duration::from_millis(5));
        let results = perform_benchmark(&[handle], &fast(3)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].rates().len(), 3);
        assert!(results[0].rates().iter().all(|rate| *rate >= 0.0));
        assert!(results[0].mean() > 0.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cv_gate_holds_on_return() {
        let handle = driven(100, Duration::from_millis(5));
        let options = SampleOptions::builder()
            .sample_duration(Duration::from_millis(20))
            .samples(3)
            .cv(Some(1.0))
            .build();
        let started = Instant::now();
        let results = perform_benchmark(&[handle], &options).await.unwrap();
        assert!(results[0].cv() <= 1.0);
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn single_sample_ignores_the_cv_gate() {
        let handle = driven(10, Duration::from_millis(5));
        let options = SampleOptions::builder()
            .sample_duration(Duration::from_millis(10))
            .samples(1)
            .cv(Some(0.0))
            .build();
        let results = perform_benchmark(&[handle], &options).await.unwrap();
        assert_eq!(results[0].rates().len(), 1);
    }

    #[tokio::test]
    async fn degenerate_options_are_rejected() {
        let counter = Counter::new();
        let no_samples = SampleOptions::builder().samples(0).build();
        assert!(perform_benchmark(&[counter.handle()], &no_samples).await.is_err());
        let no_interval = SampleOptions::builder().sample_duration(Duration::ZERO).build();
        assert!(perform_benchmark(&[counter.handle()], &no_interval).await.is_err());
        assert!(perform_benchmark(&[], &SampleOptions::default()).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn warmup_delays_the_baseline() {
        let handle = driven(10, Duration::from_millis(5));
        let options = SampleOptions::builder()
            .sample_duration(Duration::from_millis(10))
            .warmup(2)
            .samples(1)
            .build();
        let started = Instant::now();
        perform_benchmark(&[handle], &options).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn statistics_over_fixed_windows() {
        let samples = BenchSamples::new(vec![100.0, 200.0]);
        assert_eq!(samples.mean(), 150.0);
        assert!((samples.cv() - 1.0 / 3.0).abs() < 1e-9);

        let flat = BenchSamples::new(vec![0.0, 0.0, 0.0]);
        assert_eq!(flat.mean(), 0.0);
        assert_eq!(flat.cv(), 0.0);

        assert_eq!(BenchSamples::new(vec![]).mean(), 0.0);
    }
}
