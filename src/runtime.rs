//! Tokio runtime behind the native side of async entry points.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use once_cell::sync::Lazy;
use tokio::runtime::{Builder, Runtime};

use crate::rustcalls::CallStatus;
use crate::scaffolding::{panic_buffer, panic_text};

static NATIVE_RUNTIME: Lazy<Runtime> = Lazy::new(|| {
    log::debug!(target: "wirecall::runtime", "starting native runtime");
    Builder::new_multi_thread()
        .enable_all()
        .thread_name("wirecall-runtime")
        .build()
        .expect("wirecall: failed to build tokio runtime")
});

/// Runs `task` on the native runtime, then hands its outcome to `complete`.
///
/// A panic inside `task` is reported as a PANIC status carrying the message.
pub(crate) fn spawn_reporting<F, C>(task: F, complete: C)
where
    F: Future<Output = ()> + Send + 'static,
    C: FnOnce(CallStatus) + Send + 'static,
{
    NATIVE_RUNTIME.spawn(async move {
        let status = match AssertUnwindSafe(task).catch_unwind().await {
            Ok(()) => CallStatus::default(),
            Err(panic) => {
                let message = panic_text(panic.as_ref());
                log::error!(target: "wirecall::runtime", "async task panicked: {message}");
                CallStatus::panic(panic_buffer(&message))
            }
        };
        complete(status);
    });
}
