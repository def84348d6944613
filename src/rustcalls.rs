//! Call status protocol and synchronous dispatch.
//!
//! Every native entry point takes a trailing `*mut CallStatus`. The binding
//! creates the slot, the native side fills it, and the binding turns the
//! outcome into a return value or an error.

use std::fmt;

use crate::buffer::{ByteBuffer, release};
use crate::convert::{FfiConverter, StringConverter};
use crate::error::{BridgeError, CallError};
use crate::native::NativeApi;
use crate::value::Value;

/// Message used when a panic arrives without a payload.
pub const UNKNOWN_PANIC_MESSAGE: &str = "unknown native panic";

/// Outcome slot written by the native side for each call.
#[repr(C)]
#[derive(Default)]
pub struct CallStatus {
    pub code: i8,
    pub error_buf: ByteBuffer,
}

impl CallStatus {
    pub const SUCCESS: i8 = 0;
    pub const ERROR: i8 = 1;
    pub const PANIC: i8 = 2;

    pub fn error(payload: ByteBuffer) -> Self {
        Self {
            code: Self::ERROR,
            error_buf: payload,
        }
    }

    pub fn panic(payload: ByteBuffer) -> Self {
        Self {
            code: Self::PANIC,
            error_buf: payload,
        }
    }
}

impl fmt::Debug for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Self::SUCCESS => f.write_str("CallStatus(CALL_SUCCESS)"),
            Self::ERROR => write!(f, "CallStatus(CALL_ERROR, {:?})", self.error_buf),
            Self::PANIC => write!(f, "CallStatus(CALL_PANIC, {:?})", self.error_buf),
            code => write!(f, "CallStatus(<invalid code {code}>)"),
        }
    }
}

/// Decodes the ERROR payload of a call that declares an error type.
#[derive(Clone, Copy)]
pub struct ErrorConverter {
    pub type_name: &'static str,
    lift: fn(&NativeApi, ByteBuffer) -> Result<Value, BridgeError>,
}

impl ErrorConverter {
    pub fn of<C: FfiConverter>() -> Self {
        Self {
            type_name: C::TYPE_NAME,
            lift: C::lift,
        }
    }

    pub fn lift(&self, api: &NativeApi, buf: ByteBuffer) -> Result<Value, BridgeError> {
        (self.lift)(api, buf)
    }
}

impl fmt::Debug for ErrorConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErrorConverter").field(&self.type_name).finish()
    }
}

/// SUCCESS yields `None`, ERROR yields its payload, everything else fails.
fn interpret_status(
    api: &NativeApi,
    status: CallStatus,
) -> Result<Option<ByteBuffer>, BridgeError> {
    let CallStatus { code, error_buf } = status;
    match code {
        CallStatus::SUCCESS => {
            release(api, error_buf);
            Ok(None)
        }
        CallStatus::ERROR => Ok(Some(error_buf)),
        CallStatus::PANIC => {
            let message = panic_message(api, error_buf);
            log::error!(target: "wirecall::rustcalls", "native panic: {message}");
            Err(BridgeError::Panic(message))
        }
        code => {
            // The payload of a corrupt status cannot be trusted, so it is not freed.
            log::error!(target: "wirecall::rustcalls", "invalid call status code {code}");
            Err(BridgeError::InvalidStatus(code))
        }
    }
}

fn panic_message(api: &NativeApi, payload: ByteBuffer) -> String {
    if payload.len <= 0 {
        release(api, payload);
        return UNKNOWN_PANIC_MESSAGE.to_string();
    }
    match StringConverter::lift(api, payload) {
        Ok(Value::String(message)) => message,
        Ok(other) => other.to_string(),
        Err(err) => format!("undecodable panic message: {err}"),
    }
}

/// Applies the status state machine after a call has returned.
///
/// With `error` set, an ERROR payload is lifted and raised as
/// `CallError::Declared`; without it, ERROR is a protocol violation.
pub fn check_call_status(
    api: &NativeApi,
    status: CallStatus,
    error: Option<&ErrorConverter>,
) -> Result<(), CallError> {
    let Some(payload) = interpret_status(api, status)? else {
        return Ok(());
    };
    match error {
        Some(converter) => {
            let payload = converter.lift(api, payload)?;
            log::debug!(
                target: "wirecall::rustcalls",
                "call failed with {}: {payload}",
                converter.type_name
            );
            Err(CallError::Declared {
                type_name: converter.type_name,
                payload,
            })
        }
        None => {
            release(api, payload);
            Err(BridgeError::UndeclaredError.into())
        }
    }
}

/// Calls a native function that does not declare an error type.
pub fn rust_call<R>(
    api: &NativeApi,
    call: impl FnOnce(*mut CallStatus) -> R,
) -> Result<R, BridgeError> {
    let mut status = CallStatus::default();
    let result = call(&mut status);
    match interpret_status(api, status)? {
        None => Ok(result),
        Some(payload) => {
            release(api, payload);
            Err(BridgeError::UndeclaredError)
        }
    }
}

/// Calls a native function whose ERROR payload is decoded with `E`.
pub fn rust_call_with_error<E: FfiConverter, R>(
    api: &NativeApi,
    call: impl FnOnce(*mut CallStatus) -> R,
) -> Result<R, CallError> {
    let mut status = CallStatus::default();
    let result = call(&mut status);
    check_call_status(api, status, Some(&ErrorConverter::of::<E>()))?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::native::BufferSymbols;
    use crate::scaffolding;

    thread_local! {
        static FREES: Cell<usize> = const { Cell::new(0) };
    }

    unsafe extern "C" fn counting_free(buf: ByteBuffer, out_status: *mut CallStatus) {
        if !buf.is_null() {
            FREES.with(|count| count.set(count.get() + 1));
        }
        scaffolding::ffi_wirecall_rustbuffer_free(buf, out_status);
    }

    fn counting_api() -> NativeApi {
        FREES.with(|count| count.set(0));
        NativeApi::new(BufferSymbols {
            free: counting_free,
            ..BufferSymbols::in_process()
        })
    }

    fn frees() -> usize {
        FREES.with(Cell::get)
    }

    fn string_payload(api: &NativeApi, message: &str) -> ByteBuffer {
        StringConverter::lower(api, &Value::from(message)).unwrap()
    }

    #[test]
    fn success_without_converter_returns_value() {
        let api = counting_api();
        let value = rust_call(&api, |_status| 7).unwrap();
        assert_eq!(value, 7);
        assert_eq!(frees(), 0);
    }

    #[test]
    fn error_with_converter_raises_declared_payload() {
        let api = counting_api();
        let payload = string_payload(&api, "not found");
        let err = check_call_status(
            &api,
            CallStatus::error(payload),
            Some(&ErrorConverter::of::<StringConverter>()),
        )
        .unwrap_err();
        match err {
            CallError::Declared { type_name, payload } => {
                assert_eq!(type_name, "String");
                assert_eq!(payload, Value::from("not found"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(frees(), 1);
    }

    #[test]
    fn error_without_converter_is_a_protocol_failure() {
        let api = counting_api();
        let payload = string_payload(&api, "oops");
        let err = check_call_status(&api, CallStatus::error(payload), None).unwrap_err();
        assert!(matches!(err, CallError::Internal(BridgeError::UndeclaredError)));
        assert_eq!(frees(), 1);
    }

    #[test]
    fn rust_call_rejects_error_status() {
        let api = counting_api();
        let payload = string_payload(&api, "oops");
        let mut payload = Some(payload);
        let err = rust_call(&api, |status| unsafe {
            *status = CallStatus::error(payload.take().unwrap_or_default());
        })
        .unwrap_err();
        assert!(matches!(err, BridgeError::UndeclaredError));
        assert_eq!(frees(), 1);
    }

    #[test]
    fn rust_call_with_error_lifts_the_declared_type() {
        let api = counting_api();
        let mut payload = Some(string_payload(&api, "quota exceeded"));
        let err = rust_call_with_error::<StringConverter, u32>(&api, |status| {
            unsafe { *status = CallStatus::error(payload.take().unwrap_or_default()) };
            0
        })
        .unwrap_err();
        assert!(err.is_declared());
        assert!(err.to_string().contains("quota exceeded"), "{err}");
        assert_eq!(frees(), 1);

        let value = rust_call_with_error::<StringConverter, u32>(&api, |_status| 3).unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn empty_panic_uses_generic_message() {
        let api = counting_api();
        let err = check_call_status(&api, CallStatus::panic(ByteBuffer::empty()), None).unwrap_err();
        match err {
            CallError::Internal(BridgeError::Panic(message)) => {
                assert_eq!(message, UNKNOWN_PANIC_MESSAGE)
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(frees(), 0);
    }

    #[test]
    fn panic_payload_is_decoded() {
        let api = counting_api();
        let payload = string_payload(&api, "index out of bounds");
        let err = check_call_status(
            &api,
            CallStatus::panic(payload),
            Some(&ErrorConverter::of::<StringConverter>()),
        )
        .unwrap_err();
        match err {
            CallError::Internal(BridgeError::Panic(message)) => {
                assert_eq!(message, "index out of bounds")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(frees(), 1);
    }

    #[test]
    fn unknown_status_code_is_corruption() {
        let api = counting_api();
        let status = CallStatus {
            code: 7,
            error_buf: ByteBuffer::empty(),
        };
        let err = check_call_status(&api, status, None).unwrap_err();
        assert!(matches!(err, CallError::Internal(BridgeError::InvalidStatus(7))));
    }

    #[test]
    fn status_debug_names_the_code() {
        assert_eq!(format!("{:?}", CallStatus::default()), "CallStatus(CALL_SUCCESS)");
        let status = CallStatus {
            code: -3,
            error_buf: ByteBuffer::empty(),
        };
        assert_eq!(format!("{status:?}"), "CallStatus(<invalid code -3>)");
    }
}
