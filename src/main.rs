//! Command-line front end.

use std::time::Duration;

use anyhow::bail;
use clap::{ArgAction, Parser, ValueEnum};
use tracing::Level;

use burgu::report::{ReportRow, format_qps, render_table};
use burgu::{
    BenchSamples, Error, ReportMode, RunOptions, RunOutcome, SampleOptions, SqueezeOptions,
    Workload, WorkloadSpec, default_max_concurrency,
};
use burgu::workload::{CodeBody, OpSpec};

#[derive(Debug, Parser)]
#[command(
    name = "burgu",
    version,
    about = "Micro-benchmark harness and concurrency-saturation explorer",
    after_help = "CODE is a built-in op (`sleep:1ms`, `spin:1000`, `rand`, ...), a JSON \
                  workload spec (`{\"runner\":\"spin:1000\",\"init\":\"noop\"}`), or the path \
                  of a recorded trace (a JSON array of op strings)."
)]
struct Args {
    /// Code fragments to benchmark.
    #[arg(value_name = "CODE", required_unless_present = "isolated_worker")]
    code: Vec<String>,

    /// Worker count for non-squeeze runs.
    #[arg(short, long, default_value_t = 1)]
    concurrency: usize,

    /// Interval between counter reads, in milliseconds.
    #[arg(short = 'd', long = "sample_duration", value_name = "MS", default_value_t = 1000)]
    sample_duration: u64,

    /// Number of retained samples.
    #[arg(short, long, default_value_t = 3)]
    samples: usize,

    /// Warmup intervals discarded before sampling.
    #[arg(short, long, default_value_t = 0)]
    warmup: usize,

    /// Keep sampling until stddev/mean of the window drops to this bound.
    #[arg(long)]
    cv: Option<f64>,

    /// Progress logging on stderr.
    #[arg(short, long)]
    verbose: bool,

    /// Run each fragment in a freshly spawned runtime.
    #[arg(short, long)]
    isolated: bool,

    /// Sweep worker counts for the throughput peak.
    #[arg(short = 'q', long)]
    squeeze: bool,

    /// Squeeze: starting worker count.
    #[arg(long, default_value_t = 1)]
    min: usize,

    /// Squeeze: worker count ceiling.
    #[arg(long)]
    max: Option<usize>,

    /// Squeeze: non-improving increments tolerated before declaring the
    /// peak.
    #[arg(short, long, default_value_t = 3)]
    threshold: usize,

    /// Run the call-tracing profiler instead of a benchmark.
    #[arg(short, long)]
    profile: bool,

    /// Report shape: the mean rate, or every retained sample.
    #[arg(short, long, value_enum, default_value = "mean")]
    report: ReportArg,

    /// Attach an init op to the N-th fragment: `--init N OP`.
    #[arg(long, num_args = 2, value_names = ["N", "OP"], action = ArgAction::Append)]
    init: Vec<String>,

    /// Attach a done op to the N-th fragment: `--done N OP`.
    #[arg(long, num_args = 2, value_names = ["N", "OP"], action = ArgAction::Append)]
    done: Vec<String>,

    /// Attach an init_runner op to the N-th fragment: `--init_runner N OP`.
    #[arg(long = "init_runner", num_args = 2, value_names = ["N", "OP"], action = ArgAction::Append)]
    init_runner: Vec<String>,

    #[arg(long = "isolated-worker", hide = true)]
    isolated_worker: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportArg {
    Mean,
    Extended,
}

impl From<ReportArg> for ReportMode {
    fn from(arg: ReportArg) -> Self {
        match arg {
            ReportArg::Mean => ReportMode::Mean,
            ReportArg::Extended => ReportMode::Extended,
        }
    }
}

enum Hook {
    Init,
    InitRunner,
    Done,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.isolated_worker {
        burgu::isolated::serve_stdio().await?;
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::WARN })
        .init();

    if args.profile {
        bail!("profile mode needs the call-tracing profiler, which ships separately");
    }

    let mut specs = args
        .code
        .iter()
        .map(|code| WorkloadSpec::parse(code))
        .collect::<Result<Vec<_>, _>>()?;
    attach_hooks(&mut specs, &args.init, Hook::Init)?;
    attach_hooks(&mut specs, &args.done, Hook::Done)?;
    attach_hooks(&mut specs, &args.init_runner, Hook::InitRunner)?;

    if args.squeeze && specs.len() != 1 {
        return Err(Error::InvalidConfiguration(
            "squeeze mode takes exactly one code fragment".into(),
        )
        .into());
    }

    let sample = SampleOptions::builder()
        .sample_duration(Duration::from_millis(args.sample_duration))
        .warmup(args.warmup)
        .samples(args.samples)
        .cv(args.cv)
        .report(args.report.into())
        .build();
    let options = RunOptions::builder()
        .concurrency(args.concurrency)
        .sample(sample)
        .isolated(args.isolated)
        .build();

    let workloads = specs
        .iter()
        .map(WorkloadSpec::instantiate)
        .collect::<Result<Vec<_>, _>>()?;

    if args.squeeze {
        let squeeze = SqueezeOptions::builder()
            .min(args.min)
            .max(args.max.unwrap_or_else(default_max_concurrency))
            .threshold(args.threshold)
            .build();
        let workload = into_single(workloads)?;
        let outcome = burgu::run(workload, &options, Some(&squeeze)).await?;
        let RunOutcome::Saturation(result) = outcome else {
            bail!("squeeze produced an unexpected result shape");
        };
        println!(
            "{}",
            render_table(&[ReportRow {
                code: specs[0].label(),
                concurrency: result.best.concurrency,
                qps: result.best.qps,
            }])
        );
        if args.report == ReportArg::Extended {
            for point in result.history.iter().rev() {
                println!("{:>6}  {}", point.concurrency, format_qps(point.qps));
            }
        }
    } else if workloads.len() == 1 {
        let workload = into_single(workloads)?;
        let outcome = burgu::run(workload, &options, None).await?;
        let RunOutcome::Rate(samples) = outcome else {
            bail!("benchmark produced an unexpected result shape");
        };
        print_rates(&specs, &[samples], &args);
    } else {
        let results = burgu::compare(workloads, &options).await?;
        print_rates(&specs, &results, &args);
    }
    Ok(())
}

fn into_single(mut workloads: Vec<Workload>) -> anyhow::Result<Workload> {
    match workloads.pop() {
        Some(workload) if workloads.is_empty() => Ok(workload),
        _ => bail!("expected exactly one workload"),
    }
}

fn print_rates(specs: &[WorkloadSpec], results: &[BenchSamples], args: &Args) {
    let rows: Vec<ReportRow> = specs
        .iter()
        .zip(results)
        .map(|(spec, samples)| ReportRow {
            code: spec.label(),
            concurrency: args.concurrency,
            qps: samples.mean(),
        })
        .collect();
    println!("{}", render_table(&rows));
    if args.report == ReportArg::Extended {
        for (spec, samples) in specs.iter().zip(results) {
            let rendered: Vec<String> =
                samples.rates().iter().map(|rate| format_qps(*rate)).collect();
            println!("{}: [{}]", spec.label(), rendered.join(", "));
        }
    }
}

fn attach_hooks(specs: &mut [WorkloadSpec], pairs: &[String], hook: Hook) -> Result<(), Error> {
    for pair in pairs.chunks_exact(2) {
        let index: usize = pair[0]
            .parse()
            .map_err(|_| Error::ArgParse(format!("hook index {:?} is not an integer", pair[0])))?;
        let spec = specs
            .get_mut(index)
            .ok_or_else(|| Error::ArgParse(format!("hook index {index} is out of range")))?;
        let body = CodeBody::Op(OpSpec::parse(&pair[1])?);
        match hook {
            Hook::Init => spec.init = Some(body),
            Hook::InitRunner => spec.init_runner = Some(body),
            Hook::Done => spec.done = Some(body),
        }
    }
    Ok(())
}
