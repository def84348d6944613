//! Native side of the boundary: the C entry points a host binding calls.
//!
//! Every export that takes a status slot runs its body under
//! `catch_unwind`, so a panic is reported as `CALL_PANIC` instead of
//! unwinding into foreign frames.

mod functions;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::buffer::{ByteBuffer, ForeignBytes};
use crate::interface::CONTRACT_VERSION;
use crate::rustcalls::CallStatus;

pub use functions::*;

/// Runs `body` and records its outcome in `out_status`.
///
/// `Err` payloads become `CALL_ERROR` with that buffer; panics become
/// `CALL_PANIC` with the panic message. The return value is `R::default()`
/// whenever the call did not succeed.
pub(crate) fn handle_call<R, F>(out_status: *mut CallStatus, body: F) -> R
where
    R: Default,
    F: FnOnce() -> Result<R, ByteBuffer>,
{
    let outcome = panic::catch_unwind(AssertUnwindSafe(body));
    let status = match outcome {
        Ok(Ok(value)) => return value,
        Ok(Err(payload)) => CallStatus::error(payload),
        Err(panic) => {
            let message = panic_text(panic.as_ref());
            log::error!(target: "wirecall::scaffolding", "caught panic: {message}");
            CallStatus::panic(panic_buffer(&message))
        }
    };
    write_status(out_status, status);
    R::default()
}

/// Like `handle_call` for bodies with no declared error.
pub(crate) fn handle_infallible_call<R, F>(out_status: *mut CallStatus, body: F) -> R
where
    R: Default,
    F: FnOnce() -> R,
{
    handle_call(out_status, || Ok(body()))
}

pub(crate) fn write_status(out_status: *mut CallStatus, status: CallStatus) {
    // Safety: a non-null slot points to a live CallStatus owned by the caller.
    match unsafe { out_status.as_mut() } {
        Some(slot) => *slot = status,
        None => {
            log::error!(target: "wirecall::scaffolding", "call failed without a status slot: {status:?}");
            drop(status.error_buf.destroy_into_vec());
        }
    }
}

pub(crate) fn panic_text(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        String::new()
    }
}

/// Lowers a panic message as a length-prefixed string.
///
/// Falls back to an empty buffer if that itself panics.
pub(crate) fn panic_buffer(message: &str) -> ByteBuffer {
    if message.is_empty() {
        return ByteBuffer::empty();
    }
    panic::catch_unwind(|| lower_string(message)).unwrap_or_default()
}

pub(crate) fn lower_string(message: &str) -> ByteBuffer {
    let len = i32::try_from(message.len()).unwrap_or(i32::MAX);
    let mut v = Vec::with_capacity(4 + len as usize);
    v.extend_from_slice(&len.to_be_bytes());
    v.extend_from_slice(&message.as_bytes()[..len as usize]);
    ByteBuffer::from_vec(v)
}

fn to_usize(value: i32, what: &str) -> usize {
    usize::try_from(value).unwrap_or_else(|_| panic!("{what} must not be negative, got {value}"))
}

/// Allocates a buffer with at least `size` bytes of capacity and `len == 0`.
#[unsafe(no_mangle)]
pub extern "C" fn ffi_wirecall_rustbuffer_alloc(
    size: i32,
    out_status: *mut CallStatus,
) -> ByteBuffer {
    handle_infallible_call(out_status, || {
        let size = to_usize(size, "rustbuffer_alloc size");
        ByteBuffer::from_vec(Vec::with_capacity(size))
    })
}

/// Copies a foreign byte view into a new buffer.
#[unsafe(no_mangle)]
pub extern "C" fn ffi_wirecall_rustbuffer_from_bytes(
    bytes: ForeignBytes,
    out_status: *mut CallStatus,
) -> ByteBuffer {
    handle_infallible_call(out_status, || {
        to_usize(bytes.len, "foreign bytes length");
        ByteBuffer::from_vec(bytes.as_slice().to_vec())
    })
}

/// Frees a buffer previously returned by this library.
#[unsafe(no_mangle)]
pub extern "C" fn ffi_wirecall_rustbuffer_free(buf: ByteBuffer, out_status: *mut CallStatus) {
    handle_infallible_call(out_status, || drop(buf.destroy_into_vec()))
}

/// Grows `buf` so that at least `additional` more bytes fit after `len`.
///
/// The input buffer is consumed; the returned one replaces it.
#[unsafe(no_mangle)]
pub extern "C" fn ffi_wirecall_rustbuffer_reserve(
    buf: ByteBuffer,
    additional: i32,
    out_status: *mut CallStatus,
) -> ByteBuffer {
    handle_infallible_call(out_status, || {
        // Reclaimed first so a rejected request still drops the buffer.
        let mut v = buf.destroy_into_vec();
        v.reserve(to_usize(additional, "rustbuffer_reserve additional"));
        ByteBuffer::from_vec(v)
    })
}

/// Interface contract version implemented by this library.
#[unsafe(no_mangle)]
pub extern "C" fn ffi_wirecall_uniffi_contract_version() -> u32 {
    CONTRACT_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativeApi;
    use crate::stream::BufferStream;

    #[test]
    fn successful_call_leaves_status_untouched() {
        let mut status = CallStatus::default();
        let value = handle_infallible_call(&mut status, || 5u32);
        assert_eq!(value, 5);
        assert_eq!(status.code, CallStatus::SUCCESS);
        assert!(status.error_buf.is_null());
    }

    #[test]
    fn error_payload_is_handed_to_the_caller() {
        let mut status = CallStatus::default();
        let value: u32 = handle_call(&mut status, || Err(lower_string("denied")));
        assert_eq!(value, 0);
        assert_eq!(status.code, CallStatus::ERROR);
        assert_eq!(&status.error_buf.as_slice()[4..], b"denied");
        drop(status.error_buf.destroy_into_vec());
    }

    #[test]
    fn panics_become_panic_status_with_message() {
        let mut status = CallStatus::default();
        let value: u32 = handle_infallible_call(&mut status, || panic!("boom {}", 42));
        assert_eq!(value, 0);
        assert_eq!(status.code, CallStatus::PANIC);
        let message = status
            .error_buf
            .read_with_stream(|stream| {
                let len = stream.read_length("string")?;
                Ok(String::from_utf8_lossy(stream.read(len)?).into_owned())
            })
            .unwrap();
        assert_eq!(message, "boom 42");
        drop(status.error_buf.destroy_into_vec());
    }

    #[test]
    fn missing_status_slot_does_not_leak_or_crash() {
        let value: u32 = handle_call(std::ptr::null_mut(), || Err(lower_string("lost")));
        assert_eq!(value, 0);
    }

    #[test]
    fn from_bytes_handles_an_empty_view() {
        let api = NativeApi::in_process();
        let buf = api.from_bytes(&[]).unwrap();
        assert!(buf.is_empty());
        assert!(BufferStream::from_buffer(&buf).finish("test").is_ok());
        api.free(buf).unwrap();
    }

    #[test]
    fn contract_version_is_exported() {
        assert_eq!(ffi_wirecall_uniffi_contract_version(), CONTRACT_VERSION);
    }

    #[test]
    fn negative_reserve_reports_a_panic() {
        let mut status = CallStatus::default();
        let buf = ffi_wirecall_rustbuffer_reserve(ByteBuffer::from_vec(vec![1, 2, 3]), -4, &mut status);
        assert!(buf.is_null());
        assert_eq!(status.code, CallStatus::PANIC);
        let message = status
            .error_buf
            .read_with_stream(|stream| {
                let len = stream.read_length("string")?;
                Ok(String::from_utf8_lossy(stream.read(len)?).into_owned())
            })
            .unwrap();
        assert_eq!(message, "rustbuffer_reserve additional must not be negative, got -4");
        drop(status.error_buf.destroy_into_vec());
    }
}
