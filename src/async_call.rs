//! Async dispatch: calls whose result arrives through a completion callback.
//!
//! The binding registers the invoking runtime and a pending-result slot in
//! process-wide handle tables and hands both handles to the native side.
//! Once the native side accepts the call, only the completion callback
//! releases them. Dropping the awaiting future does not, because the
//! native side still holds the raw handles until it fires.
//!
//! Each `PointerStrategy` has its own pair of tables. The completion
//! callback handed to the native side is instantiated per strategy, so a
//! handle always returns to the manager that issued it.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::Lazy;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::buffer::release;
use crate::error::{BridgeError, CallError};
use crate::native::NativeApi;
use crate::pointers::{PointerManager, PointerStrategy};
use crate::rustcalls::{CallStatus, ErrorConverter, check_call_status};

/// Completion callback invoked once by the native side.
pub type FutureCallback<R> = extern "C" fn(future: u64, value: R, status: CallStatus);

struct PendingCall<R> {
    sender: oneshot::Sender<Completion<R>>,
    executor: u64,
    api: NativeApi,
}

/// A delivered result. Frees an unread error payload when dropped, so a
/// completion that nobody receives does not leak it.
struct Completion<R> {
    value: Option<R>,
    status: Option<CallStatus>,
    api: NativeApi,
}

impl<R> Completion<R> {
    fn into_parts(mut self) -> (Option<R>, CallStatus) {
        (self.value.take(), self.status.take().unwrap_or_default())
    }
}

impl<R> Drop for Completion<R> {
    fn drop(&mut self) {
        if let Some(status) = self.status.take() {
            release(&self.api, status.error_buf);
        }
    }
}

type PendingSlot = Mutex<Option<Box<dyn Any + Send>>>;

struct AsyncHandles {
    event_loops: PointerManager<Handle>,
    calls: PointerManager<PendingSlot>,
    live_event_loops: AtomicUsize,
    live_calls: AtomicUsize,
}

impl AsyncHandles {
    fn new(strategy: PointerStrategy) -> Self {
        Self {
            event_loops: PointerManager::new(strategy),
            calls: PointerManager::new(strategy),
            live_event_loops: AtomicUsize::new(0),
            live_calls: AtomicUsize::new(0),
        }
    }

    fn register_event_loop(&self, event_loop: Handle) -> u64 {
        self.live_event_loops.fetch_add(1, Ordering::AcqRel);
        self.event_loops.new_pointer(Arc::new(event_loop))
    }

    fn register_call(&self, pending: Box<dyn Any + Send>) -> u64 {
        self.live_calls.fetch_add(1, Ordering::AcqRel);
        self.calls.new_pointer(Arc::new(Mutex::new(Some(pending))))
    }

    /// # Safety
    ///
    /// `executor` must come from `register_event_loop` on `self` and must
    /// not have been released already.
    unsafe fn release_event_loop(&self, executor: u64) {
        // Safety: forwarded from the caller.
        if unsafe { self.event_loops.release_pointer(executor) }.is_some() {
            self.live_event_loops.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// # Safety
    ///
    /// `future` must come from `register_call` on `self` and must not have
    /// been released already.
    unsafe fn release_call(&self, future: u64) -> Option<Box<dyn Any + Send>> {
        // Safety: forwarded from the caller.
        let slot = unsafe { self.calls.release_pointer(future) }?;
        self.live_calls.fetch_sub(1, Ordering::AcqRel);
        slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Selects the handle tables a completion callback releases into.
trait HandleScope: 'static {
    fn handles() -> &'static AsyncHandles;
}

enum TableScope {}
enum DirectScope {}

static TABLE_HANDLES: Lazy<AsyncHandles> = Lazy::new(|| AsyncHandles::new(PointerStrategy::Table));
static DIRECT_HANDLES: Lazy<AsyncHandles> = Lazy::new(|| AsyncHandles::new(PointerStrategy::Direct));

impl HandleScope for TableScope {
    fn handles() -> &'static AsyncHandles {
        &TABLE_HANDLES
    }
}

impl HandleScope for DirectScope {
    fn handles() -> &'static AsyncHandles {
        &DIRECT_HANDLES
    }
}

/// Number of async calls whose completion callback has not fired yet.
pub fn pending_calls() -> usize {
    TABLE_HANDLES.live_calls.load(Ordering::Acquire) + DIRECT_HANDLES.live_calls.load(Ordering::Acquire)
}

/// Number of registered event loop handles.
pub fn registered_event_loops() -> usize {
    TABLE_HANDLES.live_event_loops.load(Ordering::Acquire)
        + DIRECT_HANDLES.live_event_loops.load(Ordering::Acquire)
}

extern "C" fn complete<R: Send + 'static, S: HandleScope>(future: u64, value: R, status: CallStatus) {
    let handles = S::handles();
    // Safety: the native side fires this once per accepted call with the
    // handle it was given.
    let Some(pending) = (unsafe { handles.release_call(future) }) else {
        log::error!(target: "wirecall::async_call", "completion for unknown future handle {future}");
        return;
    };
    let pending = match pending.downcast::<PendingCall<R>>() {
        Ok(pending) => *pending,
        Err(_) => {
            log::error!(target: "wirecall::async_call", "completion for future {future} has the wrong return type");
            return;
        }
    };
    let PendingCall {
        sender,
        executor,
        api,
    } = pending;
    // Safety: registered together with `future`, released only here.
    unsafe { handles.release_event_loop(executor) };

    let completion = Completion {
        value: Some(value),
        status: Some(status),
        api,
    };
    // `send` wakes the receiver on its own runtime; a rejected completion is
    // dropped here and frees its payload.
    if sender.send(completion).is_err() {
        log::debug!(target: "wirecall::async_call", "future {future} was cancelled before completion");
    }
}

/// Starts an async native call and waits for its completion callback.
///
/// `start` receives the executor handle, the completion callback, the
/// future handle and the status slot for the synchronous part of the call.
/// `strategy` picks the handle manager both handles are issued from.
/// Must be awaited from inside a tokio runtime.
pub async fn rust_call_async<R, F>(
    api: &NativeApi,
    strategy: PointerStrategy,
    error: Option<ErrorConverter>,
    start: F,
) -> Result<R, CallError>
where
    R: Send + 'static,
    F: FnOnce(u64, FutureCallback<R>, u64, *mut CallStatus),
{
    match strategy {
        PointerStrategy::Table => call_in_scope::<R, F, TableScope>(api, error, start).await,
        PointerStrategy::Direct => call_in_scope::<R, F, DirectScope>(api, error, start).await,
    }
}

async fn call_in_scope<R, F, S>(
    api: &NativeApi,
    error: Option<ErrorConverter>,
    start: F,
) -> Result<R, CallError>
where
    R: Send + 'static,
    F: FnOnce(u64, FutureCallback<R>, u64, *mut CallStatus),
    S: HandleScope,
{
    let event_loop = Handle::try_current().map_err(|_| BridgeError::NoEventLoop)?;
    let handles = S::handles();
    let (sender, receiver) = oneshot::channel();
    let executor = handles.register_event_loop(event_loop);
    let future = handles.register_call(Box::new(PendingCall::<R> {
        sender,
        executor,
        api: api.clone(),
    }));

    let started = {
        let mut status = CallStatus::default();
        start(executor, complete::<R, S>, future, &mut status);
        if status.code != CallStatus::SUCCESS {
            // Safety: the callback will never fire, so the handles are still ours.
            unsafe {
                handles.release_call(future);
                handles.release_event_loop(executor);
            }
        }
        check_call_status(api, status, None)
    };
    started?;

    let completion = receiver.await.map_err(|_| BridgeError::AsyncAbandoned)?;
    let (value, status) = completion.into_parts();
    check_call_status(api, status, error.as_ref())?;
    value.ok_or_else(|| BridgeError::AsyncAbandoned.into())
}
