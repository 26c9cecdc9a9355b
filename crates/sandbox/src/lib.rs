//! Sandboxed execution of user load-test scripts.
//!
//! [`validation::validate`] screens a script statically. [`ScriptEngine`]
//! runs a validated script in an embedded ECMAScript engine (boa) on its
//! own thread, with only the `http`, `utils`, `console` and `target`
//! globals available, under the limits of a [`ScriptExecutionContext`].

pub mod allowlist;
pub mod context;
pub mod control;
pub mod engine;
pub mod error;
pub mod events;
pub mod http;
pub mod result;
pub mod runtime;
pub mod validation;

pub use context::{ScriptExecutionContext, TargetInfo};
pub use control::ExecutionControl;
pub use engine::ScriptEngine;
pub use error::SandboxError;
pub use events::{EventReceiver, EventSender, LogLevel, ScriptEvent};
pub use http::{HttpMode, LiveHttp, OutboundHttp, SimulatedHttp};
pub use result::{ExecutionMetrics, RequestRecord, ScriptError, ScriptErrorKind, ScriptResult};
pub use runtime::SandboxLimits;
pub use validation::{validate, ValidationReport};
