//! Error taxonomy for both sides of the boundary.
//!
//! Rust callers see the `thiserror` enums below. C callers of the few
//! configuration exports receive an opaque `wirecall_error_t` through an
//! `out_error` pointer instead.

use std::ffi::CString;
use std::fmt;
use std::os::raw::c_char;
use std::path::PathBuf;
use std::ptr;

use thiserror::Error;

use crate::value::Value;

/// Malformed or truncated wire data. Never recoverable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("read past end of buffer: needed {needed} bytes, {remaining} remaining")]
    ReadPastEnd { needed: usize, remaining: usize },
    #[error("unexpected negative {what} length: {len}")]
    NegativeLength { what: &'static str, len: i32 },
    #[error("junk data left in buffer at end of {context}: {remaining} bytes")]
    JunkData {
        context: &'static str,
        remaining: usize,
    },
    #[error("invalid utf-8 in string: {0}")]
    InvalidUtf8(String),
    #[error("invalid {what} tag: {tag}")]
    InvalidTag { what: &'static str, tag: i8 },
}

/// A host value that cannot be lowered to the requested wire type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarshalError {
    #[error("'{got}' object cannot be converted to {expected}")]
    TypeMismatch {
        expected: &'static str,
        got: &'static str,
    },
    #[error("{type_name} requires {min} <= value < {max}, got {value}")]
    OutOfRange {
        type_name: &'static str,
        value: i128,
        min: i128,
        max: i128,
    },
    #[error("{len} bytes do not fit in an i32 length prefix")]
    TooLarge { len: usize },
    /// A finite real whose magnitude exceeds the target float type.
    #[error("{value} is too large for {type_name}")]
    FloatOverflow {
        type_name: &'static str,
        value: String,
    },
}

/// Failures raised while binding the native library, before any call is made.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("native library not found at {0}")]
    LibraryNotFound(PathBuf),
    #[error("failed to load native library {path}: {source}")]
    LoadFailed {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("symbol `{symbol}` not found in native library: {source}")]
    SymbolNotFound {
        symbol: String,
        #[source]
        source: libloading::Error,
    },
    #[error(
        "contract version mismatch (bindings {expected}, library {found}): try cleaning and rebuilding your project"
    )]
    ContractVersionMismatch { expected: u32, found: u32 },
    #[error(
        "API checksum mismatch for `{function}` (bindings {expected}, library {found}): try cleaning and rebuilding your project"
    )]
    ChecksumMismatch {
        function: &'static str,
        expected: u16,
        found: u16,
    },
}

/// Invalid binding configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}: expected one of {expected}")]
    InvalidValue {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("{key} must not be empty")]
    Empty { key: &'static str },
}

/// Failure to install or reconfigure the logger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoggingError {
    #[error("invalid {source_name} value `{filter}`: {reason}")]
    InvalidFilter {
        source_name: &'static str,
        filter: String,
        reason: String,
    },
    #[error("logging already initialized by another logger")]
    AlreadyInitialized,
}

/// Unrecoverable failure of the marshalling layer or the native side.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error("CALL_ERROR status, but no error converter was supplied")]
    UndeclaredError,
    #[error("{0}")]
    Panic(String),
    #[error("invalid call status code: {0}")]
    InvalidStatus(i8),
    #[error("buffer builder lost its buffer after a failed reserve")]
    BuilderPoisoned,
    #[error("async calls must be made from inside a tokio runtime")]
    NoEventLoop,
    #[error("async call completion was dropped before it fired")]
    AsyncAbandoned,
}

/// Outcome of a call that declares an error type.
#[derive(Debug, Error)]
pub enum CallError {
    /// The native side reported a typed, recoverable failure.
    #[error("{type_name}: {payload:?}")]
    Declared {
        type_name: &'static str,
        payload: Value,
    },
    #[error(transparent)]
    Internal(#[from] BridgeError),
}

impl CallError {
    pub fn is_declared(&self) -> bool {
        matches!(self, CallError::Declared { .. })
    }
}

/// Error handed to C callers through an `out_error` slot. Opaque to them;
/// read with `wirecall_error_message`, release with `wirecall_error_free`.
#[allow(non_camel_case_types)]
pub struct wirecall_error_t {
    message: CString,
}

/// Interior NULs become spaces so no message is ever dropped.
pub(crate) fn cstring_from_str_lossy(value: &str) -> CString {
    CString::new(value.replace('\0', " ")).unwrap_or_default()
}

/// Stores the outcome of a C entry point in `out_error`: null on success,
/// a fresh handle on failure. Returns whether `result` was a success.
pub(crate) fn report_to_c<E: fmt::Display>(out_error: *mut *mut wirecall_error_t, result: Result<(), E>) -> bool {
    let succeeded = result.is_ok();
    // Safety: a non-null slot is writable and owned by the caller.
    if let Some(slot) = unsafe { out_error.as_mut() } {
        *slot = match result {
            Ok(()) => ptr::null_mut(),
            Err(err) => Box::into_raw(Box::new(wirecall_error_t {
                message: cstring_from_str_lossy(&err.to_string()),
            })),
        };
    }
    succeeded
}

/// Message of `error`, valid until the handle is freed.
#[unsafe(no_mangle)]
pub extern "C" fn wirecall_error_message(error: *const wirecall_error_t) -> *const c_char {
    // Safety: a non-null handle was issued by `report_to_c` and not yet freed.
    unsafe { error.as_ref() }.map_or(ptr::null(), |error| error.message.as_ptr())
}

#[unsafe(no_mangle)]
pub extern "C" fn wirecall_error_free(error: *mut wirecall_error_t) {
    if !error.is_null() {
        // Safety: the handle was boxed by `report_to_c` and is freed once.
        drop(unsafe { Box::from_raw(error) });
    }
}
