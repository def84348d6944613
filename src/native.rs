//! The exported native surface as seen from the binding side.

use std::fmt;
use std::sync::Arc;

use libloading::Library;

use crate::buffer::{ByteBuffer, ForeignBytes};
use crate::error::BridgeError;
use crate::rustcalls::{CallStatus, rust_call};
use crate::scaffolding;

pub type AllocFn = unsafe extern "C" fn(size: i32, out_status: *mut CallStatus) -> ByteBuffer;
pub type ReserveFn = unsafe extern "C" fn(
    buf: ByteBuffer,
    additional: i32,
    out_status: *mut CallStatus,
) -> ByteBuffer;
pub type FreeFn = unsafe extern "C" fn(buf: ByteBuffer, out_status: *mut CallStatus);
pub type FromBytesFn =
    unsafe extern "C" fn(bytes: ForeignBytes, out_status: *mut CallStatus) -> ByteBuffer;
pub type ContractVersionFn = unsafe extern "C" fn() -> u32;
pub type ChecksumFn = unsafe extern "C" fn() -> u16;

/// Buffer management entry points exported by the native library.
#[derive(Clone, Copy)]
pub struct BufferSymbols {
    pub alloc: AllocFn,
    pub reserve: ReserveFn,
    pub free: FreeFn,
    pub from_bytes: FromBytesFn,
}

impl BufferSymbols {
    /// The scaffolding linked into this crate.
    pub fn in_process() -> Self {
        Self {
            alloc: scaffolding::ffi_wirecall_rustbuffer_alloc,
            reserve: scaffolding::ffi_wirecall_rustbuffer_reserve,
            free: scaffolding::ffi_wirecall_rustbuffer_free,
            from_bytes: scaffolding::ffi_wirecall_rustbuffer_from_bytes,
        }
    }
}

/// Handle to a native library's buffer allocator.
///
/// When the symbols were resolved from a loaded library, the library is
/// kept alive for as long as any clone of this handle exists.
#[derive(Clone)]
pub struct NativeApi {
    symbols: BufferSymbols,
    library: Option<Arc<Library>>,
}

impl NativeApi {
    pub fn new(symbols: BufferSymbols) -> Self {
        Self {
            symbols,
            library: None,
        }
    }

    pub fn in_process() -> Self {
        Self::new(BufferSymbols::in_process())
    }

    pub(crate) fn with_library(symbols: BufferSymbols, library: Arc<Library>) -> Self {
        Self {
            symbols,
            library: Some(library),
        }
    }

    /// Requests a buffer with at least `size` bytes of capacity and `len == 0`.
    pub fn alloc(&self, size: i32) -> Result<ByteBuffer, BridgeError> {
        let alloc = self.symbols.alloc;
        // Safety: the symbol matches `AllocFn` and the status slot is live.
        rust_call(self, |status| unsafe { alloc(size, status) })
    }

    /// Grows `buf` to hold `additional` more bytes. `buf` is consumed.
    pub fn reserve(&self, buf: ByteBuffer, additional: i32) -> Result<ByteBuffer, BridgeError> {
        let reserve = self.symbols.reserve;
        // Safety: the symbol matches `ReserveFn` and ownership of `buf` moves to it.
        rust_call(self, |status| unsafe { reserve(buf, additional, status) })
    }

    /// Releases `buf`. Must be called exactly once per live buffer.
    pub fn free(&self, buf: ByteBuffer) -> Result<(), BridgeError> {
        let free = self.symbols.free;
        // Safety: the symbol matches `FreeFn` and ownership of `buf` moves to it.
        rust_call(self, |status| unsafe { free(buf, status) })
    }

    /// Copies host bytes into a fresh native buffer.
    pub fn from_bytes(&self, bytes: &[u8]) -> Result<ByteBuffer, BridgeError> {
        let from_bytes = self.symbols.from_bytes;
        let view = ForeignBytes::from_slice(bytes);
        // Safety: `view` borrows `bytes`, which outlives the call.
        rust_call(self, |status| unsafe { from_bytes(view, status) })
    }
}

impl fmt::Debug for NativeApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeApi")
            .field("loaded", &self.library.is_some())
            .finish()
    }
}
