//! The built-in op registry backing spec-driven workloads.
//!
//! Ops are the closed vocabulary available to the CLI and to recorded
//! traces. Each op compiles to the same boxed closure shape the worker loop
//! drives, so a trace is just a sequence of ops replayed per invocation.
//! Arguments are validated at compile time, before any job exists.

use std::hash::{BuildHasher, Hasher, RandomState};
use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::Error;
use crate::workload::{BoxFut, CodeBody, OpSpec, RunnerFn, State};

const NAMES: &[&str] = &["noop", "yield", "sleep", "spin", "hash", "alloc", "rand"];

/// Whether `name` is a registry op.
pub fn known(name: &str) -> bool {
    NAMES.contains(&name)
}

/// All registry op names, for diagnostics and help output.
pub fn names() -> &'static [&'static str] {
    NAMES
}

/// Compile a code body into a runner closure.
pub(crate) fn compile(body: &CodeBody) -> Result<RunnerFn, Error> {
    match body {
        CodeBody::Op(op) => compile_op(op),
        CodeBody::Trace(ops) => {
            if ops.is_empty() {
                return Err(Error::ArgParse("empty trace".into()));
            }
            let compiled = Arc::new(ops.iter().map(compile_op).collect::<Result<Vec<_>, _>>()?);
            Ok(Arc::new(move |state: State| -> BoxFut<()> {
                let compiled = Arc::clone(&compiled);
                Box::pin(async move {
                    for op in compiled.iter() {
                        op(state.clone()).await?;
                    }
                    Ok(())
                })
            }))
        }
    }
}

fn compile_op(op: &OpSpec) -> Result<RunnerFn, Error> {
    match op.name.as_str() {
        "noop" => {
            no_arg(op)?;
            Ok(Arc::new(|_state: State| -> BoxFut<()> { Box::pin(async { Ok(()) }) }))
        }
        "yield" => {
            no_arg(op)?;
            Ok(Arc::new(|_state: State| -> BoxFut<()> {
                Box::pin(async {
                    tokio::task::yield_now().await;
                    Ok(())
                })
            }))
        }
        "sleep" => {
            let duration = parse_duration(op.arg.as_deref().unwrap_or("1ms"))?;
            Ok(Arc::new(move |_state: State| -> BoxFut<()> {
                Box::pin(async move {
                    tokio::time::sleep(duration).await;
                    Ok(())
                })
            }))
        }
        "spin" => {
            let rounds = parse_count(op, 1000)?;
            Ok(Arc::new(move |_state: State| -> BoxFut<()> {
                Box::pin(async move {
                    let mut acc = 0u64;
                    for i in 0..rounds {
                        acc = black_box(acc.wrapping_mul(6364136223846793005).wrapping_add(i));
                    }
                    black_box(acc);
                    Ok(())
                })
            }))
        }
        "hash" => {
            let bytes = parse_count(op, 64)? as usize;
            let buf: Arc<Vec<u8>> = Arc::new((0..bytes).map(|i| (i % 251) as u8).collect());
            Ok(Arc::new(move |_state: State| -> BoxFut<()> {
                let buf = Arc::clone(&buf);
                Box::pin(async move {
                    let mut hasher = RandomState::new().build_hasher();
                    hasher.write(&buf);
                    black_box(hasher.finish());
                    Ok(())
                })
            }))
        }
        "alloc" => {
            let bytes = parse_count(op, 1024)? as usize;
            Ok(Arc::new(move |_state: State| -> BoxFut<()> {
                Box::pin(async move {
                    black_box(vec![0u8; bytes]);
                    Ok(())
                })
            }))
        }
        "rand" => {
            let bytes = parse_count(op, 8)?;
            let seed = Arc::new(AtomicU64::new(RandomState::new().build_hasher().finish() | 1));
            Ok(Arc::new(move |_state: State| -> BoxFut<()> {
                let seed = Arc::clone(&seed);
                Box::pin(async move {
                    // xorshift64; seed races between workers are harmless,
                    // this only has to be cheap and non-constant.
                    let mut x = seed.load(Ordering::Relaxed) | 1;
                    let mut out = 0u8;
                    for _ in 0..bytes {
                        x ^= x << 13;
                        x ^= x >> 7;
                        x ^= x << 17;
                        out ^= x as u8;
                    }
                    seed.store(x, Ordering::Relaxed);
                    black_box(out);
                    Ok(())
                })
            }))
        }
        other => Err(Error::ArgParse(format!("unknown op {other:?}"))),
    }
}

fn no_arg(op: &OpSpec) -> Result<(), Error> {
    match &op.arg {
        None => Ok(()),
        Some(arg) => Err(Error::ArgParse(format!(
            "op {:?} takes no argument, got {arg:?}",
            op.name
        ))),
    }
}

fn parse_count(op: &OpSpec, default: u64) -> Result<u64, Error> {
    match &op.arg {
        None => Ok(default),
        Some(arg) => arg.parse().map_err(|_| {
            Error::ArgParse(format!("op {:?} expects an integer argument, got {arg:?}", op.name))
        }),
    }
}

/// Parse `123ns` / `45us` / `6ms` / `7s`; a bare integer is milliseconds.
pub(crate) fn parse_duration(text: &str) -> Result<Duration, Error> {
    let text = text.trim();
    let split = text.find(|c: char| !c.is_ascii_digit()).unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| Error::ArgParse(format!("malformed duration {text:?}")))?;
    match unit {
        "ns" => Ok(Duration::from_nanos(value)),
        "us" => Ok(Duration::from_micros(value)),
        "ms" | "" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(Error::ArgParse(format!("malformed duration {text:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(name: &str, arg: Option<&str>) -> CodeBody {
        CodeBody::Op(OpSpec { name: name.into(), arg: arg.map(Into::into) })
    }

    #[test]
    fn durations_parse_with_suffixes() {
        assert_eq!(parse_duration("250ns").unwrap(), Duration::from_nanos(250));
        assert_eq!(parse_duration("15us").unwrap(), Duration::from_micros(15));
        assert_eq!(parse_duration("1ms").unwrap(), Duration::from_millis(1));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_millis(7));
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("1h").is_err());
    }

    #[test]
    fn bad_arguments_fail_at_compile_time() {
        assert!(compile(&op("noop", Some("1"))).is_err());
        assert!(compile(&op("spin", Some("lots"))).is_err());
        assert!(compile(&op("sleep", Some("soon"))).is_err());
        assert!(compile(&op("frobnicate", None)).is_err());
        assert!(compile(&CodeBody::Trace(vec![])).is_err());
    }

    #[tokio::test]
    async fn every_registry_op_completes() {
        for &name in names() {
            let runner = compile(&op(name, None)).unwrap();
            runner(State::empty()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn traces_replay_each_op_in_order() {
        let body = CodeBody::Trace(vec![
            OpSpec { name: "spin".into(), arg: Some("10".into()) },
            OpSpec { name: "hash".into(), arg: Some("16".into()) },
        ]);
        let runner = compile(&body).unwrap();
        runner(State::empty()).await.unwrap();
    }
}
