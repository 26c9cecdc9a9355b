//! [`ScriptEngine`]: runs one script at a time under a job's limits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::allowlist::DomainAllowlist;
use crate::context::ScriptExecutionContext;
use crate::control::ExecutionControl;
use crate::error::SandboxError;
use crate::events::{emit, EventSender, ScriptEvent};
use crate::http::OutboundHttp;
use crate::result::{ExecutionMetrics, ScriptError, ScriptErrorKind, ScriptResult};
use crate::runtime::{self, HostBindings, SandboxLimits};
use crate::validation;

/// Clears the engine's running flag when dropped. Once a run starts the
/// guard belongs to the sandbox thread, so the engine stays busy until that
/// thread has finished, even after `execute` has returned a timeout.
struct RunningGuard(Arc<AtomicBool>);

impl RunningGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ScriptEngine {
    http: Arc<dyn OutboundHttp>,
    limits: SandboxLimits,
    running: Arc<AtomicBool>,
}

impl ScriptEngine {
    pub fn new(http: Arc<dyn OutboundHttp>, limits: SandboxLimits) -> Self {
        Self {
            http,
            limits,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True while a sandbox thread of this engine is alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Validate and run `source` under `context`.
    ///
    /// Returns `Err` only when the run could not start (validation failure,
    /// another run in progress, thread spawn failure). Timeouts, uncaught
    /// exceptions and cancellation are reported as a failed
    /// [`ScriptResult`]. The wall-clock bound is enforced here, not in the
    /// sandbox thread: on expiry the run is killed and this returns at once,
    /// while the thread unwinds at its next checkpoint or evaluation slice.
    pub async fn execute(
        &self,
        source: &str,
        context: ScriptExecutionContext,
        control: ExecutionControl,
        events: EventSender,
    ) -> Result<ScriptResult, SandboxError> {
        let guard = RunningGuard::acquire(&self.running).ok_or(SandboxError::AlreadyRunning)?;

        let report = validation::validate(source);
        if !report.is_valid {
            return Err(SandboxError::Validation(report));
        }

        let job_id = context.job_id;
        let budget = Duration::from_millis(context.max_execution_time_ms);
        let started = Instant::now();
        let metrics = Arc::new(Mutex::new(ExecutionMetrics::default()));
        let kill = control.kill_token();

        let bindings = HostBindings {
            allowlist: DomainAllowlist::new(&context.allowed_domains),
            context: Arc::new(context),
            http: Arc::clone(&self.http),
            handle: tokio::runtime::Handle::current(),
            control: control.clone(),
            kill: kill.clone(),
            events: events.clone(),
            metrics: Arc::clone(&metrics),
            deadline: started + budget,
        };

        let (tx, rx) = oneshot::channel();
        let owned_source = source.to_string();
        let limits = self.limits;
        std::thread::Builder::new()
            .name(format!("sandbox-job-{job_id}"))
            .spawn(move || {
                let outcome = runtime::run(&owned_source, bindings, limits);
                drop(guard);
                let _ = tx.send(outcome);
            })
            .map_err(|e| SandboxError::Runtime(format!("failed to spawn sandbox thread: {e}")))?;

        tracing::debug!(job_id, budget_ms = budget.as_millis() as u64, "Script execution started");

        let outcome = tokio::select! {
            biased;
            finished = rx => finished.unwrap_or_else(|_| {
                Err(ScriptError::new(
                    ScriptErrorKind::Exception,
                    "sandbox thread ended without a result",
                ))
            }),
            _ = tokio::time::sleep(budget) => {
                kill.cancel();
                Err(ScriptError::new(
                    ScriptErrorKind::Timeout,
                    format!("execution exceeded {} ms", budget.as_millis()),
                ))
            }
            _ = control.stopped() => {
                kill.cancel();
                Err(ScriptError::new(ScriptErrorKind::Cancelled, "execution stopped"))
            }
        };

        let mut metrics = metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        metrics.elapsed_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(value) => ScriptResult::succeeded(value, metrics),
            Err(error) => ScriptResult::failed(error, metrics),
        };

        emit(
            &events,
            ScriptEvent::Stopped {
                success: result.success,
                error: result.error_kind(),
                elapsed_ms: result.metrics.elapsed_ms,
            },
        );
        match &result.error {
            None => tracing::info!(
                job_id,
                elapsed_ms = result.metrics.elapsed_ms,
                requests = result.metrics.total_requests,
                "Script execution completed"
            ),
            Some(error) => tracing::info!(
                job_id,
                elapsed_ms = result.metrics.elapsed_ms,
                requests = result.metrics.total_requests,
                error = %error,
                "Script execution failed"
            ),
        }

        Ok(result)
    }
}
