#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use webassess_ai::{Clock, InferenceClient, PullStream, RuntimeLauncher, RuntimeProcess};
use webassess_core::{AssessError, ModelDescriptor, PullStatus, Result};

/// Deterministic answer of the stub model for `prompt`.
pub fn canned_output(model: &str, prompt: &str) -> String {
    let digest = prompt
        .bytes()
        .fold(17u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    format!(
        "{{\"model\":\"{}\",\"len\":{},\"digest\":{}}}",
        model,
        prompt.len(),
        digest
    )
}

#[derive(Default)]
struct StubState {
    probe_script: VecDeque<bool>,
    reachable: bool,
    models: Vec<ModelDescriptor>,
    budget: Option<usize>,
    fail_on: Option<String>,
    stall: bool,
    yields: usize,
    prompts: Vec<String>,
    completions: usize,
    pull_records: Vec<Result<PullStatus>>,
    pull_rejection: Option<String>,
    pull_installs: bool,
    pulls: Vec<String>,
    probed: Vec<String>,
}

/// Scripted in-memory inference runtime.
#[derive(Default)]
pub struct StubRuntime {
    state: Mutex<StubState>,
    network_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every probe with `reachable` once the script runs out.
    pub fn reachable(self, reachable: bool) -> Self {
        self.state.lock().unwrap().reachable = reachable;
        self
    }

    /// Answers for the next probes, in order.
    pub fn probe_script(self, script: &[bool]) -> Self {
        self.state.lock().unwrap().probe_script = script.iter().copied().collect();
        self
    }

    pub fn with_model(self, model: ModelDescriptor) -> Self {
        self.state.lock().unwrap().models.push(model);
        self
    }

    /// Prompts longer than `budget` bytes overflow the context window.
    pub fn with_budget(self, budget: usize) -> Self {
        self.state.lock().unwrap().budget = Some(budget);
        self
    }

    /// Prompts containing `needle` fail with a non-overflow error.
    pub fn failing_on(self, needle: &str) -> Self {
        self.state.lock().unwrap().fail_on = Some(needle.to_string());
        self
    }

    /// Generations never finish.
    pub fn stalling(self) -> Self {
        self.state.lock().unwrap().stall = true;
        self
    }

    /// Each generation yields to the scheduler `turns` times before answering,
    /// so concurrent calls overlap.
    pub fn yielding(self, turns: usize) -> Self {
        self.state.lock().unwrap().yields = turns;
        self
    }

    pub fn with_pull_records(self, records: Vec<Result<PullStatus>>) -> Self {
        self.state.lock().unwrap().pull_records = records;
        self
    }

    pub fn rejecting_pulls(self, message: &str) -> Self {
        self.state.lock().unwrap().pull_rejection = Some(message.to_string());
        self
    }

    /// A finished pull makes the model appear in later listings.
    pub fn installing_on_pull(self) -> Self {
        self.state.lock().unwrap().pull_installs = true;
        self
    }

    pub fn network_calls(&self) -> usize {
        self.network_calls.load(Ordering::SeqCst)
    }

    /// Every prompt sent to `generate`, accepted or not.
    pub fn prompts(&self) -> Vec<String> {
        self.state.lock().unwrap().prompts.clone()
    }

    /// Generations that produced output.
    pub fn completions(&self) -> usize {
        self.state.lock().unwrap().completions
    }

    /// Highest number of `generate` calls running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn pulls(&self) -> Vec<String> {
        self.state.lock().unwrap().pulls.clone()
    }

    pub fn probed(&self) -> Vec<String> {
        self.state.lock().unwrap().probed.clone()
    }

    fn touch(&self) {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl InferenceClient for StubRuntime {
    async fn probe(&self, base_url: &str) -> bool {
        self.touch();
        let mut state = self.state.lock().unwrap();
        state.probed.push(base_url.to_string());
        let default = state.reachable;
        state.probe_script.pop_front().unwrap_or(default)
    }

    async fn list_models(&self, _base_url: &str) -> Result<Vec<ModelDescriptor>> {
        self.touch();
        Ok(self.state.lock().unwrap().models.clone())
    }

    async fn generate(
        &self,
        _base_url: &str,
        model: &ModelDescriptor,
        prompt: &str,
    ) -> Result<String> {
        self.touch();
        let _in_flight = InFlight::enter(self);
        let (stall, yields) = {
            let mut state = self.state.lock().unwrap();
            state.prompts.push(prompt.to_string());

            if let Some(budget) = state.budget {
                if prompt.len() > budget {
                    return Err(AssessError::ContextLengthExceeded);
                }
            }
            if let Some(needle) = &state.fail_on {
                if prompt.contains(needle.as_str()) {
                    return Err(AssessError::InvocationFailed(format!(
                        "model crashed on '{}'",
                        needle
                    )));
                }
            }
            (state.stall, state.yields)
        };

        for _ in 0..yields {
            tokio::task::yield_now().await;
        }
        if stall {
            futures::future::pending::<()>().await;
        }

        self.state.lock().unwrap().completions += 1;
        Ok(canned_output(&model.name, prompt))
    }

    async fn pull(&self, _base_url: &str, name: &str) -> Result<PullStream> {
        self.touch();
        let mut state = self.state.lock().unwrap();
        state.pulls.push(name.to_string());

        if let Some(message) = &state.pull_rejection {
            return Err(AssessError::DownloadRejected(message.clone()));
        }
        if state.pull_installs {
            state.models.push(ModelDescriptor::named(name));
        }

        let records = std::mem::take(&mut state.pull_records);
        Ok(stream::iter(records).boxed())
    }

    fn provider_name(&self) -> &str {
        "stub"
    }
}

struct InFlight<'a> {
    stub: &'a StubRuntime,
}

impl<'a> InFlight<'a> {
    fn enter(stub: &'a StubRuntime) -> Self {
        let now = stub.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stub.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self { stub }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.stub.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Clock that only moves when slept on.
pub struct ManualClock {
    start: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.elapsed.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        *self.elapsed.lock().unwrap() += duration;
        self.sleeps.lock().unwrap().push(duration);
        tokio::task::yield_now().await;
    }
}

/// What happened to the processes a `FakeLauncher` started.
#[derive(Default)]
pub struct ProcessLog {
    pub spawned: Mutex<Vec<(PathBuf, String)>>,
    pub terminated: AtomicBool,
    pub exit_checks: AtomicUsize,
}

pub struct FakeProcess {
    log: Arc<ProcessLog>,
    exits_after_checks: Option<usize>,
}

impl RuntimeProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(4242)
    }

    fn exit_status(&mut self) -> Option<String> {
        let checks = self.log.exit_checks.fetch_add(1, Ordering::SeqCst) + 1;
        match self.exits_after_checks {
            Some(limit) if checks >= limit => Some("exit status: 1".to_string()),
            _ => None,
        }
    }

    fn terminate(&mut self) {
        self.log.terminated.store(true, Ordering::SeqCst);
    }
}

pub struct FakeLauncher {
    executable: Option<PathBuf>,
    spawn_error: Option<String>,
    exits_after_checks: Option<usize>,
    pub log: Arc<ProcessLog>,
}

impl FakeLauncher {
    pub fn installed() -> Self {
        Self {
            executable: Some(PathBuf::from("/usr/local/bin/ollama")),
            spawn_error: None,
            exits_after_checks: None,
            log: Arc::new(ProcessLog::default()),
        }
    }

    pub fn missing() -> Self {
        Self {
            executable: None,
            ..Self::installed()
        }
    }

    pub fn failing_to_spawn(message: &str) -> Self {
        Self {
            spawn_error: Some(message.to_string()),
            ..Self::installed()
        }
    }

    /// The spawned process dies on its `checks`-th exit check.
    pub fn exiting_after(checks: usize) -> Self {
        Self {
            exits_after_checks: Some(checks),
            ..Self::installed()
        }
    }

    pub fn spawn_count(&self) -> usize {
        self.log.spawned.lock().unwrap().len()
    }

    pub fn terminated(&self) -> bool {
        self.log.terminated.load(Ordering::SeqCst)
    }
}

impl RuntimeLauncher for FakeLauncher {
    fn locate(&self) -> Option<PathBuf> {
        self.executable.clone()
    }

    fn spawn(&self, executable: &Path, endpoint: &str) -> Result<Box<dyn RuntimeProcess>> {
        self.log
            .spawned
            .lock()
            .unwrap()
            .push((executable.to_path_buf(), endpoint.to_string()));
        if let Some(message) = &self.spawn_error {
            return Err(AssessError::RuntimeStartFailed(message.clone()));
        }
        Ok(Box::new(FakeProcess {
            log: Arc::clone(&self.log),
            exits_after_checks: self.exits_after_checks,
        }))
    }
}
