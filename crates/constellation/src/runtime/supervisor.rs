//! Per-service supervisor: waits for dependencies, launches the process and
//! drives the service through its state machine

use crate::runtime::registry::ServiceDefinition;
use crate::runtime::state::{FailureReason, ServiceState, StateChangeEvent};
use futures::stream::{FuturesUnordered, StreamExt};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// How long to keep reading output after the process exited
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Whether a dependency that finished successfully releases its dependents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DependencyPolicy {
    /// Only `Running` releases dependents
    #[default]
    RunningOnly,
    /// `Running` or `Finished` releases dependents
    RunningOrFinished,
}

/// Latch a service exposes to its dependents. Leaves `Pending` at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Ready,
    /// Failed before becoming ready
    Failed,
    /// Terminated without ever becoming ready
    Unsatisfiable,
}

/// Settings shared by every supervisor of one orchestrator
#[derive(Debug, Clone)]
pub struct SupervisorContext {
    pub events: mpsc::UnboundedSender<StateChangeEvent>,
    pub shutdown: watch::Receiver<bool>,
    pub policy: DependencyPolicy,
    pub shutdown_timeout: Duration,
}

/// A dependency this supervisor waits on
#[derive(Debug)]
pub struct DependencyWatch {
    pub name: String,
    pub readiness: watch::Receiver<Readiness>,
}

/// Output line read from the process
#[derive(Debug)]
struct OutputLine {
    text: String,
    is_stderr: bool,
}

enum WaitOutcome {
    Ready,
    Failed(FailureReason),
    Cancelled,
}

/// Drives exactly one service through its lifecycle
pub struct Supervisor {
    definition: Arc<ServiceDefinition>,
    state: ServiceState,
    state_tx: watch::Sender<ServiceState>,
    readiness_tx: watch::Sender<Readiness>,
    dependencies: Vec<DependencyWatch>,
    ctx: SupervisorContext,
}

impl Supervisor {
    pub fn new(
        definition: Arc<ServiceDefinition>,
        state_tx: watch::Sender<ServiceState>,
        readiness_tx: watch::Sender<Readiness>,
        dependencies: Vec<DependencyWatch>,
        ctx: SupervisorContext,
    ) -> Self {
        Self {
            definition,
            state: ServiceState::Dead,
            state_tx,
            readiness_tx,
            dependencies,
            ctx,
        }
    }

    fn name(&self) -> &str {
        &self.definition.name
    }

    /// Run the service to completion and return its final state.
    ///
    /// Returns `Dead` when shutdown was requested before the service launched.
    pub async fn run(mut self) -> ServiceState {
        match self.wait_for_dependencies().await {
            WaitOutcome::Ready => {}
            WaitOutcome::Failed(reason) => {
                log::warn!("[{}] Not launching: {}", self.name(), reason);
                self.transition(ServiceState::Failed, Some(reason));
                return self.state;
            }
            WaitOutcome::Cancelled => {
                log::debug!("[{}] Shutdown before launch", self.name());
                return self.state;
            }
        }

        let child = match self.spawn() {
            Ok(child) => child,
            Err(e) => {
                log::error!("[{}] Failed to spawn process: {}", self.name(), e);
                self.transition(
                    ServiceState::Failed,
                    Some(FailureReason::LaunchFailed(e.to_string())),
                );
                return self.state;
            }
        };

        // Without a pattern the service is running as soon as it launched
        let mut launched: Vec<_> = self.step(ServiceState::Started, None).into_iter().collect();
        if self.definition.readiness_pattern.is_none() {
            launched.extend(self.step(ServiceState::Running, None));
        }
        self.publish(launched);

        self.supervise(child).await;
        self.state
    }

    /// Block until every dependency is ready, one fails, or shutdown is requested
    async fn wait_for_dependencies(&mut self) -> WaitOutcome {
        let mut shutdown = self.ctx.shutdown.clone();
        if *shutdown.borrow_and_update() {
            return WaitOutcome::Cancelled;
        }
        if self.dependencies.is_empty() {
            return WaitOutcome::Ready;
        }

        log::debug!(
            "[{}] Waiting for {} dependencies",
            self.name(),
            self.dependencies.len()
        );

        let mut pending: FuturesUnordered<_> = self
            .dependencies
            .drain(..)
            .map(resolve_dependency)
            .collect();

        loop {
            tokio::select! {
                biased;

                // Teardown wins over a dependency resolving at the same time
                _ = shutdown_requested(&mut shutdown) => return WaitOutcome::Cancelled,
                resolved = pending.next() => match resolved {
                    None => return WaitOutcome::Ready,
                    Some((dep, Readiness::Ready)) => {
                        log::debug!("[{}] Dependency '{}' is ready", self.name(), dep);
                    }
                    Some((dep, Readiness::Failed)) => {
                        return WaitOutcome::Failed(FailureReason::DependencyFailed(dep));
                    }
                    Some((dep, Readiness::Unsatisfiable)) => {
                        return WaitOutcome::Failed(FailureReason::DependencyUnsatisfiable(dep));
                    }
                    Some((dep, Readiness::Pending)) => {
                        if *shutdown.borrow() {
                            log::debug!("[{}] Dependency '{}' stopped before resolving", self.name(), dep);
                        } else {
                            log::warn!(
                                "[{}] Dependency '{}' supervisor ended without resolving, not launching",
                                self.name(),
                                dep
                            );
                        }
                        return WaitOutcome::Cancelled;
                    }
                },
            }
        }
    }

    fn spawn(&self) -> std::io::Result<Child> {
        let definition = &self.definition;
        log::info!(
            "[{}] Starting: {} {}",
            definition.name,
            definition.executable,
            definition.arguments.join(" ")
        );

        let mut cmd = Command::new(&definition.executable);
        cmd.args(&definition.arguments)
            .envs(&definition.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &definition.working_dir {
            cmd.current_dir(dir);
        }

        cmd.spawn()
    }

    /// Watch output and exit concurrently until the process is gone
    async fn supervise(&mut self, mut child: Child) {
        let (line_tx, mut lines) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(stdout, false, line_tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(stderr, true, line_tx.clone())));
        }
        drop(line_tx);

        let mut shutdown = self.ctx.shutdown.clone();
        let mut output_open = true;
        let mut stopping = false;
        let mut kill_deadline: Option<Instant> = None;

        let status = loop {
            tokio::select! {
                line = lines.recv(), if output_open => match line {
                    Some(line) => self.observe_line(line),
                    None => output_open = false,
                },
                status = child.wait() => break status,
                _ = shutdown_requested(&mut shutdown), if !stopping => {
                    stopping = true;
                    terminate(self.name(), &mut child);
                    kill_deadline = Some(Instant::now() + self.ctx.shutdown_timeout);
                }
                _ = tokio::time::sleep_until(kill_deadline.unwrap_or_else(Instant::now)), if kill_deadline.is_some() => {
                    log::warn!("[{}] Process did not exit gracefully, forcing kill", self.name());
                    if let Err(e) = child.start_kill() {
                        log::error!("[{}] Failed to kill process: {}", self.name(), e);
                    }
                    kill_deadline = None;
                }
            }
        };

        // Lines still buffered in the pipes may carry the readiness match
        if output_open {
            let drain = async {
                while let Some(line) = lines.recv().await {
                    self.observe_line(line);
                }
            };
            if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, drain).await.is_err() {
                log::debug!("[{}] Output still open after exit, not waiting for it", self.name());
            }
        }
        // A background grandchild may still hold the pipes open
        for reader in readers {
            reader.abort();
        }

        match status {
            Ok(status) if status.success() => {
                log::info!("[{}] Process exited successfully", self.name());
                self.transition(ServiceState::Finished, None);
            }
            Ok(status) => {
                let reason = exit_failure(status);
                log::warn!("[{}] Process {}", self.name(), reason);
                self.transition(ServiceState::Failed, Some(reason));
            }
            Err(e) => {
                log::error!("[{}] Error waiting for process: {}", self.name(), e);
                self.transition(ServiceState::Failed, Some(FailureReason::Wait(e.to_string())));
            }
        }
    }

    fn observe_line(&mut self, line: OutputLine) {
        if line.is_stderr {
            log::debug!("[{}] stderr: {}", self.name(), line.text);
        } else {
            log::debug!("[{}] {}", self.name(), line.text);
        }

        if self.state == ServiceState::Started && self.definition.is_ready_line(&line.text) {
            self.transition(ServiceState::Running, None);
        }
    }

    /// Apply a transition and publish it.
    fn transition(&mut self, next: ServiceState, reason: Option<FailureReason>) {
        let events: Vec<_> = self.step(next, reason).into_iter().collect();
        self.publish(events);
    }

    /// Record a transition without publishing it
    fn step(
        &mut self,
        next: ServiceState,
        reason: Option<FailureReason>,
    ) -> Option<StateChangeEvent> {
        if !self.state.can_transition_to(next) {
            log::error!(
                "[{}] Ignoring invalid transition {} -> {}",
                self.name(),
                self.state,
                next
            );
            return None;
        }

        let mut event = StateChangeEvent::new(self.name(), self.state, next);
        if let Some(reason) = reason {
            event = event.with_reason(reason);
        }
        log::info!("[{}] {} -> {}", self.name(), self.state, next);

        self.state = next;
        Some(event)
    }

    /// Publish recorded transitions.
    ///
    /// The state cell moves straight to the latest state, then the events are
    /// queued in order, then the readiness latch changes. A consumer holding an
    /// event never reads an older state, and any dependent reacting to the
    /// latch publishes strictly after these events.
    fn publish(&mut self, events: Vec<StateChangeEvent>) {
        if events.is_empty() {
            return;
        }
        self.state_tx.send_replace(self.state);
        for event in events {
            // A closed stream only means nobody is listening
            let _ = self.ctx.events.send(event);
        }
        self.update_readiness(self.state);
    }

    fn update_readiness(&self, state: ServiceState) {
        let signal = match (state, self.ctx.policy) {
            (ServiceState::Running, _) => Readiness::Ready,
            (ServiceState::Finished, DependencyPolicy::RunningOrFinished) => Readiness::Ready,
            (ServiceState::Finished, DependencyPolicy::RunningOnly) => Readiness::Unsatisfiable,
            (ServiceState::Failed, _) => Readiness::Failed,
            (ServiceState::Dead | ServiceState::Started, _) => return,
        };

        self.readiness_tx.send_if_modified(|current| {
            if *current == Readiness::Pending {
                *current = signal;
                true
            } else {
                false
            }
        });
    }
}

/// Wait for one dependency's latch to leave `Pending`.
///
/// Yields `Pending` if the dependency's supervisor went away unresolved.
async fn resolve_dependency(mut dep: DependencyWatch) -> (String, Readiness) {
    loop {
        let readiness = *dep.readiness.borrow_and_update();
        if readiness != Readiness::Pending {
            return (dep.name, readiness);
        }
        if dep.readiness.changed().await.is_err() {
            let readiness = *dep.readiness.borrow();
            return (dep.name, readiness);
        }
    }
}

/// Resolves once shutdown is flagged or the orchestrator is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn forward_lines<R>(stream: R, is_stderr: bool, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                if tx.send(OutputLine { text, is_stderr }).is_err() {
                    break;
                }
            }
            Err(e) => {
                log::debug!("Output stream closed with error: {}", e);
                break;
            }
        }
    }
}

/// Ask the process to stop (SIGTERM on Unix, kill elsewhere)
fn terminate(name: &str, child: &mut Child) {
    log::info!("[{}] Stopping process...", name);

    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                log::warn!("[{}] Failed to send SIGTERM: {}", name, e);
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = child.start_kill() {
            log::warn!("[{}] Failed to kill process: {}", name, e);
        }
    }
}

fn exit_failure(status: ExitStatus) -> FailureReason {
    if let Some(code) = status.code() {
        return FailureReason::ExitCode(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return FailureReason::Signal(signal);
        }
    }

    FailureReason::Wait(format!("unknown exit status: {}", status))
}
