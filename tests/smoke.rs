//! End-to-end checks through the public API, with intervals shrunk far
//! below the CLI defaults to keep the suite quick.

use std::time::Duration;

use burgu::{RunOptions, RunOutcome, SampleOptions, SqueezeOptions, WorkloadSpec};

fn sample(duration_ms: u64, samples: usize) -> SampleOptions {
    SampleOptions::builder()
        .sample_duration(Duration::from_millis(duration_ms))
        .samples(samples)
        .build()
}

#[tokio::test(flavor = "multi_thread")]
async fn sleep_workload_lands_in_a_plausible_band() {
    let workload = WorkloadSpec::parse("sleep:1ms").unwrap().instantiate().unwrap();
    let options = RunOptions::builder().sample(sample(100, 2)).build();
    let outcome = burgu::run(workload, &options, None).await.unwrap();
    let RunOutcome::Rate(samples) = outcome else { panic!("expected a rate") };
    let qps = samples.mean();
    // A 1ms sleep per invocation cannot beat 1000 ops/s per worker; timer
    // slop pushes the floor well below that.
    assert!(qps > 50.0 && qps < 1100.0, "qps {qps} outside the plausible band");
}

#[tokio::test(flavor = "multi_thread")]
async fn comparison_ranks_cheap_work_above_sleeps() {
    let specs = [
        WorkloadSpec::parse("yield").unwrap(),
        WorkloadSpec::parse("sleep:1ms").unwrap(),
    ];
    let workloads = specs.iter().map(|s| s.instantiate().unwrap()).collect();
    let options = RunOptions::builder().sample(sample(50, 2)).build();
    let results = burgu::compare(workloads, &options).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(
        results[0].mean() > results[1].mean(),
        "yield ({}) should outrank sleep ({})",
        results[0].mean(),
        results[1].mean()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn squeeze_reports_a_peak_within_bounds() {
    let workload = WorkloadSpec::parse("yield").unwrap().instantiate().unwrap();
    let options = RunOptions::builder().sample(sample(10, 1)).build();
    let squeeze = SqueezeOptions::builder().min(1).max(3).threshold(1).build();
    let outcome = burgu::run(workload, &options, Some(&squeeze)).await.unwrap();
    let RunOutcome::Saturation(result) = outcome else { panic!("expected a sweep") };
    assert!((1..=3).contains(&result.best.concurrency));
    let peak = result.history.iter().map(|p| p.qps).fold(f64::MIN, f64::max);
    assert_eq!(result.best.qps, peak);
}

#[tokio::test(flavor = "multi_thread")]
async fn cv_gated_run_satisfies_the_bound() {
    let workload = WorkloadSpec::parse("yield").unwrap().instantiate().unwrap();
    let options = RunOptions::builder()
        .concurrency(2)
        .sample(
            SampleOptions::builder()
                .sample_duration(Duration::from_millis(20))
                .samples(3)
                .cv(Some(1.0))
                .build(),
        )
        .build();
    let started = std::time::Instant::now();
    let outcome = burgu::run(workload, &options, None).await.unwrap();
    let RunOutcome::Rate(samples) = outcome else { panic!("expected a rate") };
    assert_eq!(samples.rates().len(), 3);
    assert!(samples.cv() <= 1.0);
    assert!(started.elapsed() >= Duration::from_millis(60));
}

#[tokio::test(flavor = "multi_thread")]
async fn hooked_spec_runs_its_lifecycle() {
    let spec = WorkloadSpec::parse(
        r#"{"runner":"spin:100","init":"noop","init_runner":"noop","done":"noop"}"#,
    )
    .unwrap();
    let workload = spec.instantiate().unwrap();
    let options = RunOptions::builder().concurrency(2).sample(sample(20, 1)).build();
    let outcome = burgu::run(workload, &options, None).await.unwrap();
    let RunOutcome::Rate(samples) = outcome else { panic!("expected a rate") };
    assert!(samples.mean() > 0.0);
}
