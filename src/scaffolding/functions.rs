//! Exports for the wrapped `test_fn` and its async twin.

use data_encoding::HEXLOWER;

use super::handle_infallible_call;
use crate::async_call::FutureCallback;
use crate::buffer::ByteBuffer;
use crate::error::DecodeError;
use crate::interface::{TEST_FN, TEST_FN_ASYNC};
use crate::runtime::spawn_reporting;
use crate::rustcalls::CallStatus;
use crate::stream::BufferStream;

/// Decodes a `CustomType` argument: an i32 count followed by that many bytes.
///
/// A malformed argument means the two sides disagree on the interface, so
/// it panics and is reported as `CALL_PANIC`.
fn lift_custom_type(buf: ByteBuffer) -> Vec<u8> {
    let bytes = buf.destroy_into_vec();
    let mut stream = BufferStream::new(&bytes);
    let decoded = (|| -> Result<Vec<u8>, DecodeError> {
        let count = stream.read_length("sequence")?;
        let items = stream.read(count)?.to_vec();
        stream.finish("CustomType argument")?;
        Ok(items)
    })();
    decoded.unwrap_or_else(|err| panic!("failed to lift CustomType argument: {err}"))
}

fn test_fn(custom: &[u8]) {
    log::debug!(
        target: "wirecall::scaffolding",
        "test_fn received {} bytes: {}",
        custom.len(),
        HEXLOWER.encode(custom)
    );
}

#[unsafe(no_mangle)]
pub extern "C" fn wirecall_fn_func_test_fn(type_param: ByteBuffer, out_status: *mut CallStatus) {
    handle_infallible_call(out_status, || {
        let custom = lift_custom_type(type_param);
        test_fn(&custom);
    })
}

/// Starts `test_fn` on the native runtime.
///
/// On SUCCESS the native side holds `executor` and `future` until it
/// invokes `callback(future, 0, status)` exactly once. On any other status
/// the callback never fires.
///
/// `executor` is opaque here. The work runs on the native runtime and the
/// binding resolves the handle itself when `callback` fires; the parameter
/// stays so the export matches the declared async call shape.
#[unsafe(no_mangle)]
pub extern "C" fn wirecall_fn_func_test_fn_async(
    type_param: ByteBuffer,
    executor: u64,
    callback: FutureCallback<u8>,
    future: u64,
    out_status: *mut CallStatus,
) {
    handle_infallible_call(out_status, || {
        let custom = lift_custom_type(type_param);
        log::trace!(
            target: "wirecall::scaffolding",
            "scheduling test_fn_async (executor {executor}, future {future})"
        );
        spawn_reporting(
            async move {
                tokio::task::yield_now().await;
                test_fn(&custom);
            },
            move |status| callback(future, 0, status),
        );
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn wirecall_checksum_func_test_fn() -> u16 {
    TEST_FN.checksum()
}

#[unsafe(no_mangle)]
pub extern "C" fn wirecall_checksum_func_test_fn_async() -> u16 {
    TEST_FN_ASYNC.checksum()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use once_cell::sync::Lazy;

    use super::*;

    static COMPLETED: Lazy<Mutex<Vec<(u64, i8)>>> = Lazy::new(|| Mutex::new(Vec::new()));

    extern "C" fn record_completion(future: u64, _value: u8, status: CallStatus) {
        COMPLETED.lock().unwrap().push((future, status.code));
    }

    fn custom_buffer(bytes: &[u8]) -> ByteBuffer {
        let mut v = (bytes.len() as i32).to_be_bytes().to_vec();
        v.extend_from_slice(bytes);
        ByteBuffer::from_vec(v)
    }

    #[test]
    fn test_fn_accepts_a_well_formed_argument() {
        let mut status = CallStatus::default();
        wirecall_fn_func_test_fn(custom_buffer(&[1, 2, 3]), &mut status);
        assert_eq!(status.code, CallStatus::SUCCESS);
    }

    #[test]
    fn malformed_argument_is_reported_as_panic() {
        let mut status = CallStatus::default();
        wirecall_fn_func_test_fn(ByteBuffer::from_vec(vec![0, 0, 0, 9, 1]), &mut status);
        assert_eq!(status.code, CallStatus::PANIC);
        assert!(!status.error_buf.is_empty());
        drop(status.error_buf.destroy_into_vec());
    }

    #[test]
    fn checksums_match_declarations() {
        assert_eq!(wirecall_checksum_func_test_fn(), TEST_FN.checksum());
        assert_eq!(wirecall_checksum_func_test_fn_async(), TEST_FN_ASYNC.checksum());
    }

    #[test]
    fn async_export_completes_without_reading_the_executor() {
        let future = 0xfeed;
        let mut status = CallStatus::default();
        wirecall_fn_func_test_fn_async(custom_buffer(&[9]), u64::MAX, record_completion, future, &mut status);
        assert_eq!(status.code, CallStatus::SUCCESS);

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if COMPLETED.lock().unwrap().contains(&(future, CallStatus::SUCCESS)) {
                break;
            }
            assert!(Instant::now() < deadline, "completion callback never fired");
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}
