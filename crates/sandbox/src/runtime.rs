//! The sandbox runtime: one boa `Context` per execution, run on a
//! dedicated OS thread.
//!
//! Scripts see only the globals installed by [`PRELUDE`] (`http`, `utils`,
//! `console`, `target`). Every host call is a checkpoint that honours the
//! pause flag, the kill token and the wall-clock deadline. The script body
//! is evaluated in budgeted slices, and the same flags are checked between
//! slices, so pure JavaScript loops end there too. Callbacks that built-ins
//! invoke synchronously (and promise jobs) run without slicing and are
//! bounded by boa's per-frame loop iteration limit.

use std::cell::Cell;
use std::future::Future;
use std::pin::{pin, Pin};
use std::rc::Rc;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{self, Poll};
use std::time::{Duration, Instant};

use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{
    js_string, Context, Finalize, JsArgs, JsError, JsNativeError, JsResult, JsString, JsValue,
    NativeFunction, Script, Source, Trace,
};
use futures::task::noop_waker_ref;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::allowlist::DomainAllowlist;
use crate::context::ScriptExecutionContext;
use crate::control::ExecutionControl;
use crate::events::{emit, EventSender, LogLevel, ScriptEvent};
use crate::http::{OutboundHttp, OutboundRequest};
use crate::result::{ExecutionMetrics, RequestRecord, ScriptError, ScriptErrorKind};

/// How often a paused execution re-checks its flags.
const PAUSE_POLL: Duration = Duration::from_millis(25);

/// Longest single slice of `utils.sleep`.
const SLEEP_SLICE: Duration = Duration::from_millis(25);

/// Log lines longer than this are truncated.
const MAX_LOG_CHARS: usize = 8 * 1024;

/// VM cost units evaluated between two interrupt checks.
const SLICE_BUDGET: u32 = 4_096;

/// Engine limits that are not part of the per-job context.
#[derive(Debug, Clone, Copy)]
pub struct SandboxLimits {
    /// Iterations any single loop may run before it is aborted.
    pub loop_iteration_limit: u64,
    pub recursion_limit: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            loop_iteration_limit: 50_000_000,
            recursion_limit: 512,
        }
    }
}

/// Everything the host side of the sandbox needs for one run.
pub(crate) struct HostBindings {
    pub context: Arc<ScriptExecutionContext>,
    pub allowlist: DomainAllowlist,
    pub http: Arc<dyn OutboundHttp>,
    pub handle: tokio::runtime::Handle,
    pub control: ExecutionControl,
    pub kill: CancellationToken,
    pub events: EventSender,
    pub metrics: Arc<Mutex<ExecutionMetrics>>,
    pub deadline: Instant,
}

const PRELUDE: &str = r#"
(function (host) {
  "use strict";

  class SandboxError extends Error {
    constructor(name, message) {
      super(message);
      this.name = name;
    }
  }

  const settle = (reply) => {
    if (reply.error) {
      throw new SandboxError(reply.error.name, reply.error.message);
    }
    return Object.freeze(reply.response);
  };

  const payload = (body) => {
    if (body === undefined || body === null) return null;
    return typeof body === "string" ? body : JSON.stringify(body);
  };

  const format = (value) => {
    if (typeof value === "string") return value;
    try {
      const json = JSON.stringify(value);
      return json === undefined ? String(value) : json;
    } catch (_) {
      return String(value);
    }
  };

  const logger = (level) => (...args) => {
    host.log(level, args.map(format).join(" "));
  };

  const define = (name, value) =>
    Object.defineProperty(globalThis, name, {
      value: Object.freeze(value),
      writable: false,
      enumerable: true,
      configurable: false,
    });

  define("http", {
    request: (method, url, body) =>
      settle(host.request(String(method), String(url), payload(body))),
    get: (url) => settle(host.request("GET", String(url), null)),
    post: (url, body) => settle(host.request("POST", String(url), payload(body))),
  });

  define("utils", {
    sleep: (ms) => {
      host.sleep(Number(ms) || 0);
    },
    random: () => Math.random(),
    randomInt: (min, max) => {
      const lo = Math.ceil(Math.min(min, max));
      const hi = Math.floor(Math.max(min, max));
      return lo + Math.floor(Math.random() * (hi - lo + 1));
    },
    uuid: () => host.uuid(),
    timestamp: () => Date.now(),
  });

  define("console", {
    log: logger("log"),
    info: logger("info"),
    warn: logger("warn"),
    error: logger("error"),
  });

  define("target", host.target);
})
"#;

// ---------------------------------------------------------------------------
// Host state
// ---------------------------------------------------------------------------

struct Host {
    bindings: HostBindings,
    requests_issued: Cell<u32>,
    /// Set the first time a checkpoint aborts the script. Wins over whatever
    /// the script does afterwards (including catching the abort).
    interrupted: Cell<Option<ScriptErrorKind>>,
}

impl Host {
    fn new(bindings: HostBindings) -> Self {
        Self {
            bindings,
            requests_issued: Cell::new(0),
            interrupted: Cell::new(None),
        }
    }

    fn pending_interrupt(&self) -> Option<ScriptErrorKind> {
        if self.bindings.kill.is_cancelled() {
            if self.bindings.control.is_stopped() {
                Some(ScriptErrorKind::Cancelled)
            } else {
                Some(ScriptErrorKind::Timeout)
            }
        } else if Instant::now() >= self.bindings.deadline {
            Some(ScriptErrorKind::Timeout)
        } else {
            None
        }
    }

    fn abort(&self, kind: ScriptErrorKind) -> JsError {
        self.interrupted.set(Some(kind));
        JsNativeError::error()
            .with_message(format!("{kind}: execution interrupted"))
            .into()
    }

    /// Between evaluation slices: wait while paused, and report the reason
    /// once the run has to end.
    fn between_slices(&self) -> Option<ScriptErrorKind> {
        loop {
            if let Some(kind) = self.pending_interrupt() {
                self.interrupted.set(Some(kind));
                return Some(kind);
            }
            if !self.bindings.control.is_paused() {
                return None;
            }
            std::thread::sleep(PAUSE_POLL);
        }
    }

    /// Block while paused; fail once stopped, killed or past the deadline.
    fn checkpoint(&self) -> JsResult<()> {
        loop {
            if let Some(kind) = self.pending_interrupt() {
                return Err(self.abort(kind));
            }
            if !self.bindings.control.is_paused() {
                return Ok(());
            }
            std::thread::sleep(PAUSE_POLL);
        }
    }

    fn sleep(&self, millis: f64) -> JsResult<()> {
        let total = Duration::from_millis(millis.clamp(0.0, u32::MAX as f64) as u64);
        let until = Instant::now() + total;
        loop {
            self.checkpoint()?;
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            std::thread::sleep((until - now).min(SLEEP_SLICE));
        }
    }

    fn with_metrics<R>(&self, f: impl FnOnce(&mut ExecutionMetrics) -> R) -> R {
        let mut metrics = self
            .bindings
            .metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut metrics)
    }

    fn log(&self, level: LogLevel, mut message: String) {
        if message.len() > MAX_LOG_CHARS {
            let mut cut = MAX_LOG_CHARS;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
        }
        self.with_metrics(|m| m.log_lines += 1);
        tracing::debug!(job_id = self.bindings.context.job_id, ?level, %message, "Script log");
        emit(&self.bindings.events, ScriptEvent::Log { level, message });
    }

    fn record(&self, record: RequestRecord) {
        self.with_metrics(|m| m.requests.push(record.clone()));
        emit(&self.bindings.events, ScriptEvent::Request(record));
    }

    /// Issue one outbound request on behalf of the script.
    ///
    /// Allowlist and limit failures are returned as `{error}` replies that
    /// the prelude turns into catchable exceptions; they issue nothing and
    /// do not count toward the limit.
    fn request(
        &self,
        method: String,
        url: String,
        body: Option<String>,
    ) -> JsResult<serde_json::Value> {
        self.checkpoint()?;
        let method = method.trim().to_ascii_uppercase();

        if let Err(denied) = self.bindings.allowlist.check_url(&url) {
            tracing::debug!(job_id = self.bindings.context.job_id, %url, "Outbound host refused");
            return Ok(error_reply(ScriptErrorKind::DomainNotAllowed, denied.to_string()));
        }

        let limit = self.bindings.context.max_requests_per_execution;
        let issued = self.requests_issued.get();
        if issued >= limit {
            return Ok(error_reply(
                ScriptErrorKind::RateLimitExceeded,
                format!("request limit of {limit} per execution reached"),
            ));
        }
        self.requests_issued.set(issued + 1);
        self.with_metrics(|m| m.total_requests = issued + 1);

        let remaining = self
            .bindings
            .deadline
            .saturating_duration_since(Instant::now());
        let kill = self.bindings.kill.clone();
        let http = Arc::clone(&self.bindings.http);
        let request = OutboundRequest {
            method: method.clone(),
            url: url.clone(),
            body,
        };

        let started = Instant::now();
        let outcome = self.bindings.handle.block_on(async move {
            tokio::select! {
                _ = kill.cancelled() => None,
                sent = tokio::time::timeout(remaining, http.send(request)) => sent.ok(),
            }
        });
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            None => {
                let kind = self.pending_interrupt().unwrap_or(ScriptErrorKind::Timeout);
                self.record(RequestRecord {
                    method,
                    url,
                    status: None,
                    duration_ms: elapsed_ms,
                    error: Some(kind.name().to_string()),
                });
                Err(self.abort(kind))
            }
            Some(Ok(response)) => {
                self.record(RequestRecord {
                    method,
                    url,
                    status: Some(response.status),
                    duration_ms: response.duration_ms,
                    error: None,
                });
                Ok(json!({
                    "response": {
                        "status": response.status,
                        "ok": (200..300).contains(&response.status),
                        "body": response.body,
                        "durationMs": response.duration_ms,
                    }
                }))
            }
            Some(Err(e)) => {
                self.record(RequestRecord {
                    method,
                    url,
                    status: None,
                    duration_ms: elapsed_ms,
                    error: Some(e.to_string()),
                });
                Ok(error_reply(ScriptErrorKind::Http, e.to_string()))
            }
        }
    }
}

fn error_reply(kind: ScriptErrorKind, message: String) -> serde_json::Value {
    json!({ "error": { "name": kind.name(), "message": message } })
}

// ---------------------------------------------------------------------------
// Globals
// ---------------------------------------------------------------------------

/// Host state captured by every native global. It holds no boa values.
#[derive(Trace, Finalize)]
struct HostRef(#[unsafe_ignore_trace] Rc<Host>);

fn native<F>(host: &Rc<Host>, f: F) -> NativeFunction
where
    F: Fn(&Host, &[JsValue], &mut Context) -> JsResult<JsValue> + Copy + 'static,
{
    NativeFunction::from_copy_closure_with_captures(
        move |_this: &JsValue, args: &[JsValue], host: &HostRef, ctx: &mut Context| {
            f(&host.0, args, ctx)
        },
        HostRef(Rc::clone(host)),
    )
}

fn string_arg(args: &[JsValue], index: usize, ctx: &mut Context) -> JsResult<String> {
    Ok(args
        .get_or_undefined(index)
        .to_string(ctx)?
        .to_std_string_escaped())
}

fn install_globals(host: &Rc<Host>, ctx: &mut Context) -> JsResult<()> {
    let request = native(host, |host, args, ctx| {
        let method = string_arg(args, 0, ctx)?;
        let url = string_arg(args, 1, ctx)?;
        let body = match args.get_or_undefined(2) {
            v if v.is_null_or_undefined() => None,
            v => Some(v.to_string(ctx)?.to_std_string_escaped()),
        };
        let reply = host.request(method, url, body)?;
        JsValue::from_json(&reply, ctx)
    });
    let sleep = native(host, |host, args, ctx| {
        let millis = args.get_or_undefined(0).to_number(ctx)?;
        host.sleep(millis)?;
        Ok(JsValue::undefined())
    });
    let log = native(host, |host, args, ctx| {
        host.checkpoint()?;
        let level = LogLevel::parse(&string_arg(args, 0, ctx)?);
        let message = string_arg(args, 1, ctx)?;
        host.log(level, message);
        Ok(JsValue::undefined())
    });
    let uuid = native(host, |host, _args, _ctx| {
        host.checkpoint()?;
        let id = uuid::Uuid::new_v4().to_string();
        Ok(JsValue::from(JsString::from(id.as_str())))
    });

    let target = serde_json::to_value(&host.bindings.context.target)
        .map_err(|e| JsNativeError::error().with_message(e.to_string()))?;
    let target = JsValue::from_json(&target, ctx)?;

    let host_object = ObjectInitializer::new(ctx)
        .function(request, js_string!("request"), 3)
        .function(sleep, js_string!("sleep"), 1)
        .function(log, js_string!("log"), 2)
        .function(uuid, js_string!("uuid"), 0)
        .property(js_string!("target"), target, Attribute::READONLY)
        .build();

    let installer = ctx.eval(Source::from_bytes(PRELUDE))?;
    let installer = installer
        .as_callable()
        .cloned()
        .ok_or_else(|| JsNativeError::typ().with_message("prelude did not evaluate to a function"))?;
    installer.call(&JsValue::undefined(), &[host_object.into()], ctx)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// Completion value as JSON through the engine's own `JSON.stringify`, so
/// `undefined`, functions and symbols become `null` instead of failing.
fn completion_to_json(value: JsValue, ctx: &mut Context) -> serde_json::Value {
    if value.is_null_or_undefined() || value.is_callable() {
        return serde_json::Value::Null;
    }
    let global = ctx.global_object();
    if global
        .set(js_string!("__completion"), value, false, ctx)
        .is_err()
    {
        return serde_json::Value::Null;
    }
    match ctx.eval(Source::from_bytes("JSON.stringify(globalThis.__completion)")) {
        Ok(out) => out
            .as_string()
            .map(JsString::to_std_string_escaped)
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or(serde_json::Value::Null),
        Err(_) => serde_json::Value::Null,
    }
}

fn property_string(object: &boa_engine::JsObject, key: JsString, ctx: &mut Context) -> Option<String> {
    object
        .get(key, ctx)
        .ok()
        .filter(|v| !v.is_null_or_undefined())
        .and_then(|v| v.to_string(ctx).ok())
        .map(|s| s.to_std_string_escaped())
}

/// Classify an uncaught exception.
fn script_error(err: JsError, ctx: &mut Context) -> ScriptError {
    let Some(value) = err.as_opaque() else {
        return ScriptError::new(ScriptErrorKind::Exception, err.to_string());
    };
    let Some(object) = value.as_object() else {
        return ScriptError::new(
            ScriptErrorKind::Exception,
            format!("Uncaught {}", value.display()),
        );
    };

    let name = property_string(object, js_string!("name"), ctx).unwrap_or_else(|| "Error".into());
    let message = property_string(object, js_string!("message"), ctx).unwrap_or_default();
    match ScriptErrorKind::from_name(&name) {
        Some(kind) => ScriptError::new(kind, message),
        None => ScriptError::new(ScriptErrorKind::Exception, format!("{name}: {message}")),
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Poll the script evaluation slice by slice until it completes or the
/// host says the run is over. `None` means it was interrupted.
fn drive<F>(mut evaluation: Pin<&mut F>, host: &Host) -> Option<JsResult<JsValue>>
where
    F: Future<Output = JsResult<JsValue>>,
{
    let mut cx = task::Context::from_waker(noop_waker_ref());
    loop {
        match evaluation.as_mut().poll(&mut cx) {
            Poll::Ready(outcome) => return Some(outcome),
            Poll::Pending => {
                if host.between_slices().is_some() {
                    return None;
                }
            }
        }
    }
}

/// Run `source` to completion on the current thread.
///
/// Must not be called from inside a tokio runtime: outbound requests block
/// on `bindings.handle`.
pub(crate) fn run(
    source: &str,
    bindings: HostBindings,
    limits: SandboxLimits,
) -> Result<serde_json::Value, ScriptError> {
    let budget_ms = bindings.context.max_execution_time_ms;
    let mut ctx = Context::default();
    ctx.runtime_limits_mut()
        .set_loop_iteration_limit(limits.loop_iteration_limit);
    ctx.runtime_limits_mut()
        .set_recursion_limit(limits.recursion_limit);

    let host = Rc::new(Host::new(bindings));
    install_globals(&host, &mut ctx).map_err(|e| {
        ScriptError::new(
            ScriptErrorKind::Exception,
            format!("sandbox setup failed: {e}"),
        )
    })?;

    let script = Script::parse(Source::from_bytes(source), None, &mut ctx)
        .map_err(|e| script_error(e, &mut ctx))?;
    let completed = {
        let evaluation = pin!(script.evaluate_async_with_budget(&mut ctx, SLICE_BUDGET));
        drive(evaluation, &host)
    };
    if completed.is_some() {
        ctx.run_jobs();
    }

    if let Some(kind) = host.interrupted.get() {
        let message = match kind {
            ScriptErrorKind::Timeout => format!("execution exceeded {budget_ms} ms"),
            _ => "execution stopped".to_string(),
        };
        return Err(ScriptError::new(kind, message));
    }

    match completed {
        Some(Ok(value)) => Ok(completion_to_json(value, &mut ctx)),
        Some(Err(err)) => Err(script_error(err, &mut ctx)),
        None => Err(ScriptError::new(ScriptErrorKind::Cancelled, "execution stopped")),
    }
}
