use crate::inference::InferenceClient;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webassess_core::{AssessContext, AssessError, Result, RuntimeConfig};

/// Lifecycle of the runtime check, from first probe to a terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Unknown,
    Probing,
    Reachable,
    Unreachable,
    Starting,
    StartFailed,
    NotInstalled,
}

impl RuntimeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RuntimeState::Reachable
                | RuntimeState::Unreachable
                | RuntimeState::StartFailed
                | RuntimeState::NotInstalled
        )
    }
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuntimeState::Unknown => "unknown",
            RuntimeState::Probing => "probing",
            RuntimeState::Reachable => "reachable",
            RuntimeState::Unreachable => "unreachable",
            RuntimeState::Starting => "starting",
            RuntimeState::StartFailed => "start-failed",
            RuntimeState::NotInstalled => "not-installed",
        };
        f.write_str(name)
    }
}

/// How the reachable runtime came to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeOrigin {
    /// Operator-specified endpoint
    Configured,
    /// Default endpoint was already serving
    AlreadyRunning,
    /// Started by this process
    Spawned { pid: Option<u32> },
}

/// A reachable runtime endpoint.
///
/// When the runtime was started by this process the handle owns it, so a
/// cancelled assessment can stop it again.
pub struct RuntimeHandle {
    pub endpoint: String,
    pub origin: RuntimeOrigin,
    /// Every state the check passed through, ending in `Reachable`.
    pub transitions: Vec<RuntimeState>,
    process: Option<Box<dyn RuntimeProcess>>,
}

impl fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("endpoint", &self.endpoint)
            .field("origin", &self.origin)
            .field("transitions", &self.transitions)
            .field("owns_process", &self.process.is_some())
            .finish()
    }
}

impl RuntimeHandle {
    /// Context that points all downstream calls at this endpoint.
    pub fn context(&self, cancel: CancellationToken) -> AssessContext {
        AssessContext::new(self.endpoint.clone(), cancel)
    }

    /// Runs the work that depends on this runtime. If it ends cancelled, a
    /// runtime this process started is terminated before returning.
    pub async fn supervise<T, F>(&mut self, ctx: &AssessContext, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let result = work.await;
        if ctx.is_cancelled() || matches!(result, Err(AssessError::Cancelled)) {
            self.terminate();
        }
        result
    }

    /// Stops the runtime if this process started it; otherwise a no-op.
    pub fn terminate(&mut self) {
        if let Some(mut process) = self.process.take() {
            info!("Stopping runtime started for this assessment");
            process.terminate();
        }
    }
}

/// Time source for the startup poll loop.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

/// Real time via tokio.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}

/// Doubling delay capped at a maximum.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial.min(max),
            max,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }
}

/// A runtime process started in the background.
pub trait RuntimeProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Describes the exit if the process has already stopped.
    fn exit_status(&mut self) -> Option<String>;

    /// Stop the process; used when startup fails or is cancelled.
    fn terminate(&mut self);
}

/// Locates and starts the runtime executable.
pub trait RuntimeLauncher: Send + Sync {
    fn locate(&self) -> Option<PathBuf>;

    fn spawn(&self, executable: &Path, endpoint: &str) -> Result<Box<dyn RuntimeProcess>>;
}

/// Starts `<executable> serve` found on PATH.
#[derive(Debug, Clone)]
pub struct OllamaLauncher {
    executable: String,
}

impl OllamaLauncher {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

impl RuntimeLauncher for OllamaLauncher {
    fn locate(&self) -> Option<PathBuf> {
        find_executable(&self.executable, std::env::var_os("PATH").as_deref())
    }

    fn spawn(&self, executable: &Path, endpoint: &str) -> Result<Box<dyn RuntimeProcess>> {
        info!("Starting inference runtime: {} serve", executable.display());

        let child = Command::new(executable)
            .arg("serve")
            .env("OLLAMA_HOST", host_of(endpoint))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                AssessError::RuntimeStartFailed(format!(
                    "failed to spawn {}: {}",
                    executable.display(),
                    e
                ))
            })?;

        info!("Inference runtime started with PID: {}", child.id());
        Ok(Box::new(ChildProcess { child }))
    }
}

/// Search `path_var` for `name`; names containing a separator are checked as-is.
pub fn find_executable(name: &str, path_var: Option<&std::ffi::OsStr>) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path_var = path_var?;
    std::env::split_paths(path_var).find_map(|dir| {
        let full = dir.join(name);
        if full.is_file() {
            return Some(full);
        }
        if cfg!(windows) {
            let exe = dir.join(format!("{}.exe", name));
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}

/// `OLLAMA_HOST` takes `host:port`.
fn host_of(endpoint: &str) -> &str {
    endpoint
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .trim_end_matches('/')
}

struct ChildProcess {
    child: Child,
}

impl RuntimeProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn exit_status(&mut self) -> Option<String> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            Ok(None) => None,
            Err(e) => Some(format!("unknown ({})", e)),
        }
    }

    fn terminate(&mut self) {
        let pid = self.child.id();
        if self.exit_status().is_some() {
            return;
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            info!("Sending SIGTERM to runtime process {}", pid);
            if signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok() {
                for _ in 0..20 {
                    if self.exit_status().is_some() {
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                warn!("Runtime process {} did not terminate gracefully", pid);
            }
        }

        info!("Killing runtime process {}", pid);
        if let Err(e) = self.child.kill() {
            warn!("Failed to kill runtime process {}: {}", pid, e);
        }
        let _ = self.child.wait();
    }
}

/// Makes sure a runtime endpoint answers before any model operation.
pub struct RuntimeSupervisor {
    client: Arc<dyn InferenceClient>,
    launcher: Arc<dyn RuntimeLauncher>,
    clock: Arc<dyn Clock>,
    config: RuntimeConfig,
}

impl RuntimeSupervisor {
    pub fn new(
        client: Arc<dyn InferenceClient>,
        launcher: Arc<dyn RuntimeLauncher>,
        config: RuntimeConfig,
    ) -> Self {
        Self::with_clock(client, launcher, Arc::new(TokioClock), config)
    }

    pub fn with_clock(
        client: Arc<dyn InferenceClient>,
        launcher: Arc<dyn RuntimeLauncher>,
        clock: Arc<dyn Clock>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            client,
            launcher,
            clock,
            config,
        }
    }

    /// One liveness request, no retry.
    pub async fn probe(&self, base_url: &str, cancel: &CancellationToken) -> Result<bool> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AssessError::Cancelled),
            reachable = self.client.probe(base_url) => Ok(reachable),
        }
    }

    /// Resolve the endpoint all later calls use, starting the local runtime
    /// only when no endpoint was configured.
    pub async fn ensure_running(
        &self,
        configured_url: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<RuntimeHandle> {
        let mut tracker = StateTracker::new();

        if let Some(url) = configured_url.map(str::trim).filter(|u| !u.is_empty()) {
            let url = url.trim_end_matches('/').to_string();
            tracker.enter(RuntimeState::Probing);
            if self.probe(&url, cancel).await? {
                tracker.enter(RuntimeState::Reachable);
                info!("Using configured inference runtime at {}", url);
                return Ok(tracker.finish(url, RuntimeOrigin::Configured));
            }
            tracker.enter(RuntimeState::Unreachable);
            return Err(AssessError::RuntimeUnreachable(url));
        }

        let Some(executable) = self.launcher.locate() else {
            tracker.enter(RuntimeState::NotInstalled);
            return Err(AssessError::RuntimeNotInstalled);
        };
        debug!("Runtime executable found at {}", executable.display());

        let url = self.config.default_url.trim_end_matches('/').to_string();
        tracker.enter(RuntimeState::Probing);
        if self.probe(&url, cancel).await? {
            tracker.enter(RuntimeState::Reachable);
            return Ok(tracker.finish(url, RuntimeOrigin::AlreadyRunning));
        }
        tracker.enter(RuntimeState::Unreachable);

        info!("Runtime not running on {}, attempting to start it", url);
        tracker.enter(RuntimeState::Starting);
        let mut process = match self.launcher.spawn(&executable, &url) {
            Ok(process) => process,
            Err(e) => {
                tracker.enter(RuntimeState::StartFailed);
                return Err(e);
            }
        };

        match self.wait_until_reachable(process.as_mut(), &url, cancel).await {
            Ok(()) => {
                tracker.enter(RuntimeState::Reachable);
                let pid = process.id();
                let mut handle = tracker.finish(url, RuntimeOrigin::Spawned { pid });
                handle.process = Some(process);
                Ok(handle)
            }
            Err(e) => {
                process.terminate();
                tracker.enter(RuntimeState::StartFailed);
                Err(e)
            }
        }
    }

    /// Poll with exponential backoff until the endpoint answers, the process
    /// dies, or the startup deadline passes.
    async fn wait_until_reachable(
        &self,
        process: &mut dyn RuntimeProcess,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let timeout = self.config.startup_timeout();
        let deadline = self.clock.now() + timeout;
        let mut backoff = Backoff::new(self.config.initial_backoff(), self.config.max_backoff());
        let mut attempts = 0u32;

        loop {
            let now = self.clock.now();
            if now >= deadline {
                return Err(AssessError::RuntimeStartFailed(format!(
                    "runtime did not become reachable at {} within {:?} ({} probes)",
                    url, timeout, attempts
                )));
            }

            let wait = backoff.next_delay().min(deadline - now);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AssessError::Cancelled),
                _ = self.clock.sleep(wait) => {}
            }

            if let Some(status) = process.exit_status() {
                return Err(AssessError::RuntimeStartFailed(format!(
                    "runtime exited during startup: {}",
                    status
                )));
            }

            attempts += 1;
            if self.probe(url, cancel).await? {
                debug!("Runtime reachable after {} probes", attempts);
                return Ok(());
            }
        }
    }
}

struct StateTracker {
    states: Vec<RuntimeState>,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            states: vec![RuntimeState::Unknown],
        }
    }

    fn enter(&mut self, next: RuntimeState) {
        if let Some(current) = self.states.last() {
            debug!("Runtime state: {} -> {}", current, next);
        }
        self.states.push(next);
    }

    fn finish(self, endpoint: String, origin: RuntimeOrigin) -> RuntimeHandle {
        RuntimeHandle {
            endpoint,
            origin,
            transitions: self.states,
            process: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(250), Duration::from_secs(1));
        let delays: Vec<_> = (0..5).map(|_| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(1),
                Duration::from_secs(1),
            ]
        );
    }

    #[test]
    fn host_strips_scheme() {
        assert_eq!(host_of("http://127.0.0.1:11434/"), "127.0.0.1:11434");
        assert_eq!(host_of("https://models.internal:443"), "models.internal:443");
    }

    #[test]
    fn executable_lookup_honours_path() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("fake-runtime");
        std::fs::write(&exe, b"#!/bin/sh\n").unwrap();

        let path_var = std::env::join_paths([dir.path()]).unwrap();
        assert_eq!(
            find_executable("fake-runtime", Some(&path_var)),
            Some(exe.clone())
        );
        assert_eq!(find_executable("missing-runtime", Some(&path_var)), None);
        assert_eq!(find_executable("fake-runtime", None), None);
        assert_eq!(
            find_executable(exe.to_str().unwrap(), None),
            Some(exe)
        );
    }

    #[test]
    fn terminal_states() {
        assert!(RuntimeState::Reachable.is_terminal());
        assert!(RuntimeState::NotInstalled.is_terminal());
        assert!(!RuntimeState::Starting.is_terminal());
        assert!(!RuntimeState::Probing.is_terminal());
    }
}
