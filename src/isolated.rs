//! Fresh-runtime isolation over a child-process bridge.
//!
//! One runtime per workload, mapped positionally, never reused. The wire
//! protocol is deliberately small: the child prints a `ready` handshake
//! line, the controller writes one JSON request line on stdin, and the
//! child answers with one JSON response line on stdout before exiting.
//! Control steps (handshake, exit wait) are bounded by [`CONTROL_TIMEOUT`];
//! the benchmark response itself is not, since its length depends on the
//! sampling configuration. Children are spawned kill-on-drop, so shutdown
//! happens on every outcome.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;

use crate::error::Error;
use crate::executor::{RunOptions, RunOutcome};
use crate::sampler::SampleOptions;
use crate::squeeze::SqueezeOptions;
use crate::workload::WorkloadSpec;

/// Bound on each control-plane exchange with an isolated runtime.
pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// Hidden flag that switches the binary into worker mode.
pub const WORKER_FLAG: &str = "--isolated-worker";

/// One benchmark request shipped to an isolated runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolatedRequest {
    pub spec: WorkloadSpec,
    pub concurrency: usize,
    pub sample: SampleOptions,
    pub squeeze: Option<SqueezeOptions>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IsolatedResponse {
    outcome: Result<RunOutcome, String>,
}

/// Supplier of fresh runtimes, one per workload.
#[async_trait]
pub trait IsolationBridge {
    type Runtime: IsolatedRuntime;

    /// Start `n` fresh runtimes. Failure of any start aborts the batch;
    /// runtimes already started are torn down.
    async fn prepare(&self, n: usize) -> Result<Vec<Self::Runtime>, Error>;
}

/// A single disposable runtime.
#[async_trait]
pub trait IsolatedRuntime: Send {
    /// Execute one benchmark remotely. Errors surface with the same shape
    /// as a local failure.
    async fn run(&mut self, request: &IsolatedRequest) -> Result<RunOutcome, Error>;

    /// Tear the runtime down. Completes in bounded time on every outcome.
    async fn shutdown(&mut self);
}

/// Bridge that re-executes the current binary in worker mode.
#[derive(Debug, Default)]
pub struct ChildBridge;

#[async_trait]
impl IsolationBridge for ChildBridge {
    type Runtime = ChildRuntime;

    async fn prepare(&self, n: usize) -> Result<Vec<ChildRuntime>, Error> {
        let exe = std::env::current_exe()
            .map_err(|e| Error::IsolationStartFailed(format!("cannot locate own binary: {e}")))?;
        let mut runtimes = Vec::with_capacity(n);
        for _ in 0..n {
            let mut child = Command::new(&exe)
                .arg(WORKER_FLAG)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| Error::IsolationStartFailed(e.to_string()))?;
            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| Error::IsolationStartFailed("child stdin unavailable".into()))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| Error::IsolationStartFailed("child stdout unavailable".into()))?;
            let mut runtime =
                ChildRuntime { child, stdin, stdout: BufReader::new(stdout) };
            runtime.handshake().await?;
            runtimes.push(runtime);
        }
        Ok(runtimes)
    }
}

/// A spawned worker process.
#[derive(Debug)]
pub struct ChildRuntime {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ChildRuntime {
    async fn handshake(&mut self) -> Result<(), Error> {
        let line = timeout(CONTROL_TIMEOUT, self.read_line())
            .await
            .map_err(|_| Error::IsolationTimeout)??;
        if line.trim() == "ready" {
            Ok(())
        } else {
            Err(Error::IsolationStartFailed(format!("unexpected handshake {line:?}")))
        }
    }

    async fn read_line(&mut self) -> Result<String, Error> {
        let mut line = String::new();
        let read = self
            .stdout
            .read_line(&mut line)
            .await
            .map_err(|e| Error::IsolationFailed(e.to_string()))?;
        if read == 0 {
            return Err(Error::IsolationFailed("isolated runtime closed its pipe".into()));
        }
        Ok(line)
    }
}

#[async_trait]
impl IsolatedRuntime for ChildRuntime {
    async fn run(&mut self, request: &IsolatedRequest) -> Result<RunOutcome, Error> {
        let mut payload = serde_json::to_string(request)
            .map_err(|e| Error::IsolationFailed(e.to_string()))?;
        payload.push('\n');
        self.stdin
            .write_all(payload.as_bytes())
            .await
            .map_err(|e| Error::IsolationFailed(e.to_string()))?;
        self.stdin.flush().await.map_err(|e| Error::IsolationFailed(e.to_string()))?;
        let line = self.read_line().await?;
        let response: IsolatedResponse = serde_json::from_str(&line)
            .map_err(|e| Error::IsolationFailed(format!("malformed response: {e}")))?;
        response.outcome.map_err(Error::IsolationFailed)
    }

    async fn shutdown(&mut self) {
        // One-shot protocol: the worker exits after answering. Give it the
        // control window, then kill.
        match timeout(CONTROL_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(%status, "isolated runtime exited"),
            Ok(Err(err)) => tracing::warn!(error = %err, "isolated runtime wait failed"),
            Err(_) => {
                tracing::warn!("isolated runtime did not exit in time, killing");
                if let Err(err) = self.child.kill().await {
                    tracing::warn!(error = %err, "failed to kill isolated runtime");
                }
            }
        }
    }
}

/// Run one request per spec, each on its own fresh runtime, concurrently.
/// Every runtime is shut down regardless of the outcome.
pub(crate) async fn run_isolated(
    specs: Vec<WorkloadSpec>,
    options: &RunOptions,
    squeeze: Option<&SqueezeOptions>,
) -> Result<Vec<RunOutcome>, Error> {
    let bridge = ChildBridge;
    let mut runtimes = bridge.prepare(specs.len()).await?;
    let requests: Vec<IsolatedRequest> = specs
        .into_iter()
        .map(|spec| IsolatedRequest {
            spec,
            concurrency: options.concurrency,
            sample: options.sample.clone(),
            squeeze: squeeze.copied(),
        })
        .collect();
    let results = join_all(
        runtimes
            .iter_mut()
            .zip(&requests)
            .map(|(runtime, request)| runtime.run(request)),
    )
    .await;
    for runtime in &mut runtimes {
        runtime.shutdown().await;
    }
    results.into_iter().collect()
}

/// Worker-mode entry point: serve exactly one benchmark request over stdio,
/// then exit.
pub async fn serve_stdio() -> Result<(), Error> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(b"ready\n").await.map_err(io_err)?;
    stdout.flush().await.map_err(io_err)?;

    let mut line = String::new();
    let mut stdin = BufReader::new(tokio::io::stdin());
    let read = stdin.read_line(&mut line).await.map_err(io_err)?;
    if read == 0 {
        return Err(Error::IsolationFailed("controller closed the pipe".into()));
    }
    let request: IsolatedRequest = serde_json::from_str(&line)
        .map_err(|e| Error::IsolationFailed(format!("malformed request: {e}")))?;

    let outcome = execute(request).await;
    let response = IsolatedResponse { outcome: outcome.map_err(|e| e.to_string()) };
    let mut payload =
        serde_json::to_string(&response).map_err(|e| Error::IsolationFailed(e.to_string()))?;
    payload.push('\n');
    stdout.write_all(payload.as_bytes()).await.map_err(io_err)?;
    stdout.flush().await.map_err(io_err)?;
    Ok(())
}

async fn execute(request: IsolatedRequest) -> Result<RunOutcome, Error> {
    let workload = request.spec.instantiate()?;
    let options = RunOptions::builder()
        .concurrency(request.concurrency)
        .sample(request.sample)
        .isolated(false)
        .build();
    crate::executor::run(workload, &options, request.squeeze.as_ref()).await
}

fn io_err(err: std::io::Error) -> Error {
    Error::IsolationFailed(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_round_trip_through_json() {
        let request = IsolatedRequest {
            spec: WorkloadSpec::parse("sleep:1ms").unwrap(),
            concurrency: 4,
            sample: SampleOptions::default(),
            squeeze: Some(SqueezeOptions::builder().min(2).max(8).threshold(1).build()),
        };
        let json = serde_json::to_string(&request).unwrap();
        let back: IsolatedRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.spec, request.spec);
        assert_eq!(back.concurrency, 4);
        assert_eq!(back.sample, request.sample);
        assert_eq!(back.squeeze, request.squeeze);
    }

    #[test]
    fn failed_outcomes_survive_the_wire() {
        let response = IsolatedResponse { outcome: Err("runner failed: kaput".into()) };
        let json = serde_json::to_string(&response).unwrap();
        let back: IsolatedResponse = serde_json::from_str(&json).unwrap();
        match back.outcome {
            Err(message) => assert!(message.contains("kaput")),
            Ok(_) => panic!("expected an error outcome"),
        }
    }
}
