//! Process-wide fault observers.
//!
//! Two kinds of faults can escape all other handling:
//! - a panic on any thread ([`FaultKind::UncaughtFault`])
//! - a background task that ended in an error nobody awaited
//!   ([`FaultKind::UnhandledAsyncFault`])
//!
//! Both are logged with full detail. Under [`FaultPolicy::Log`] the process keeps
//! running; under [`FaultPolicy::Exit`] it exits with status 1.
//!
//! A panic raised while a [`CaughtScope`] is active on the panicking thread is
//! recovered by its owner (the request pipeline answers 500), so the hook only
//! logs it and never applies the policy.

use std::backtrace::Backtrace;
use std::cell::Cell;
use std::fmt::Display;
use std::future::Future;
use std::panic::PanicHookInfo;
use std::sync::atomic::{AtomicBool, Ordering};

use strum::{Display, EnumString};
use tokio::task::AbortHandle;
use tracing::{debug, error, warn};

use crate::metrics;

/// What to do after a fault has been logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum FaultPolicy {
    /// Log and keep serving.
    #[default]
    Log,
    /// Log, then exit the process with status 1.
    Exit,
}

/// Fault classification used in logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FaultKind {
    /// A spawned task returned an error nobody handled.
    UnhandledAsyncFault,
    /// A panic escaped to the runtime or thread boundary.
    UncaughtFault,
}

/// Log a fault and apply the policy.
pub fn report(kind: FaultKind, policy: FaultPolicy, detail: &str) {
    metrics::inc_faults(kind);
    error!(kind = %kind, policy = %policy, "{}", detail);

    if policy == FaultPolicy::Exit {
        error!(kind = %kind, "Exiting on fault");
        std::process::exit(1);
    }
}

static PANIC_HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);

thread_local! {
    static CAUGHT_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Marks the current thread as running code whose panics are caught by the caller.
///
/// Scopes nest. The mark is removed on drop, including during unwinding, which
/// happens after the panic hook has run.
#[derive(Debug)]
pub struct CaughtScope {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl CaughtScope {
    /// Enter a scope on the current thread.
    pub fn enter() -> Self {
        CAUGHT_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self {
            _not_send: std::marker::PhantomData,
        }
    }

    /// True when the current thread is inside at least one scope.
    pub fn is_active() -> bool {
        CAUGHT_DEPTH.with(|depth| depth.get() > 0)
    }
}

impl Drop for CaughtScope {
    fn drop(&mut self) {
        CAUGHT_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Install the panic hook.
///
/// Panics outside any [`CaughtScope`] are reported as [`FaultKind::UncaughtFault`].
/// Panics inside one are logged as a warning and left to the scope owner.
/// Replaces the default hook, so panics are written through `tracing` only.
pub fn install_panic_hook(policy: FaultPolicy) {
    std::panic::set_hook(Box::new(move |info| {
        if CaughtScope::is_active() {
            warn!(location = %panic_location(info), "Recovered panic: {}", panic_payload(info));
            return;
        }
        let detail = describe_panic(info);
        report(FaultKind::UncaughtFault, policy, &detail);
    }));
    PANIC_HOOK_INSTALLED.store(true, Ordering::SeqCst);
    debug!(policy = %policy, "Panic hook installed");
}

/// True once [`install_panic_hook`] has run in this process.
pub fn panic_hook_installed() -> bool {
    PANIC_HOOK_INSTALLED.load(Ordering::SeqCst)
}

fn panic_payload(info: &PanicHookInfo<'_>) -> String {
    if let Some(s) = info.payload().downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = info.payload().downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

fn panic_location(info: &PanicHookInfo<'_>) -> String {
    info.location()
        .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
        .unwrap_or_else(|| "<unknown location>".to_string())
}

fn describe_panic(info: &PanicHookInfo<'_>) -> String {
    let payload = panic_payload(info);
    let location = panic_location(info);

    let thread = std::thread::current();
    let thread_name = thread.name().unwrap_or("<unnamed>");

    format!(
        "Uncaught fault in thread '{}' at {}: {}\n{}",
        thread_name,
        location,
        payload,
        Backtrace::force_capture()
    )
}

/// Spawn a background task whose failure is reported instead of silently dropped.
///
/// An `Err` return is reported as [`FaultKind::UnhandledAsyncFault`]. Panics have
/// already gone through the panic hook, and cancellation via the returned handle
/// is not a fault.
pub fn spawn_observed<F, E>(name: &'static str, policy: FaultPolicy, task: F) -> AbortHandle
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let handle = tokio::spawn(task);
    let abort = handle.abort_handle();

    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(())) => debug!(task = name, "Background task finished"),
            Ok(Err(e)) => report(
                FaultKind::UnhandledAsyncFault,
                policy,
                &format!("Unhandled async fault in task '{}': {}", name, e),
            ),
            Err(join) if join.is_cancelled() => debug!(task = name, "Background task cancelled"),
            Err(join) => error!(task = name, error = %join, "Background task panicked"),
        }
    });

    abort
}
