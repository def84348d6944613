//! The byte buffer that crosses the boundary and the scopes that own it.
//!
//! A `ByteBuffer` is allocated by the native side and moved, never
//! copied, between the two sides. It deliberately has no `Drop`: whichever
//! side holds it is responsible for freeing it exactly once, and the scoped
//! helpers here are the only places the binding does so.

use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr;
use std::slice;

use data_encoding::HEXLOWER;

use crate::error::BridgeError;
use crate::native::NativeApi;
use crate::stream::{BufferBuilder, BufferStream};

/// Initial capacity requested by `alloc_with_builder`.
pub const BUILDER_INITIAL_CAPACITY: i32 = 16;

/// Capacity-tracked memory region owned by the native allocator.
///
/// Layout is fixed: `{capacity: i32, len: i32, data: *mut u8}`.
#[repr(C)]
#[must_use = "a ByteBuffer must be freed or handed to the other side"]
pub struct ByteBuffer {
    pub capacity: i32,
    pub len: i32,
    pub data: *mut u8,
}

// Safety: a ByteBuffer uniquely owns its allocation, like a Vec<u8>.
unsafe impl Send for ByteBuffer {}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::empty()
    }
}

impl ByteBuffer {
    pub const fn empty() -> Self {
        Self {
            capacity: 0,
            len: 0,
            data: ptr::null_mut(),
        }
    }

    pub fn len(&self) -> usize {
        usize::try_from(self.len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        usize::try_from(self.capacity).unwrap_or(0)
    }

    /// True when there is no allocation behind this buffer at all.
    pub fn is_null(&self) -> bool {
        self.data.is_null()
    }

    /// The initialized `len` bytes.
    pub fn as_slice(&self) -> &[u8] {
        if self.data.is_null() || self.len <= 0 {
            return &[];
        }
        // Safety: the first `len` bytes of `data` are initialized by contract.
        unsafe { slice::from_raw_parts(self.data, self.len()) }
    }

    /// Appends `bytes` in place. Returns false if capacity is insufficient.
    pub(crate) fn append_within_capacity(&mut self, bytes: &[u8]) -> bool {
        let len = self.len();
        if bytes.is_empty() {
            return true;
        }
        if self.data.is_null() || len + bytes.len() > self.capacity() {
            return false;
        }
        // Safety: the destination range lies inside the allocation.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.data.add(len), bytes.len());
        }
        self.len += bytes.len() as i32;
        true
    }

    /// Takes ownership of a `Vec` allocated by this process's allocator.
    ///
    /// Panics if the vector is too large for the i32 header; scaffolding
    /// callers run under `catch_unwind`, so that becomes a PANIC status.
    pub fn from_vec(v: Vec<u8>) -> Self {
        let capacity = i32::try_from(v.capacity())
            .unwrap_or_else(|_| panic!("buffer capacity {} exceeds i32::MAX", v.capacity()));
        let len = i32::try_from(v.len())
            .unwrap_or_else(|_| panic!("buffer length {} exceeds i32::MAX", v.len()));
        let mut v = ManuallyDrop::new(v);
        Self {
            capacity,
            len,
            data: v.as_mut_ptr(),
        }
    }

    /// Reclaims a buffer produced by `from_vec` in this process.
    pub fn destroy_into_vec(self) -> Vec<u8> {
        if self.data.is_null() {
            assert!(
                self.capacity == 0 && self.len == 0,
                "null ByteBuffer with capacity {} and len {}",
                self.capacity,
                self.len
            );
            return Vec::new();
        }
        assert!(
            0 <= self.len && self.len <= self.capacity,
            "corrupt ByteBuffer: len {} capacity {}",
            self.len,
            self.capacity
        );
        // Safety: data/len/capacity came from `from_vec` on this allocator.
        unsafe { Vec::from_raw_parts(self.data, self.len(), self.capacity()) }
    }

    /// Builds a new buffer through a `BufferBuilder`.
    ///
    /// If `write` fails the partially built buffer is freed before the
    /// error is returned.
    pub fn alloc_with_builder<F>(api: &NativeApi, write: F) -> Result<ByteBuffer, BridgeError>
    where
        F: FnOnce(&mut BufferBuilder<'_>) -> Result<(), BridgeError>,
    {
        let mut builder = BufferBuilder::with_capacity(api, BUILDER_INITIAL_CAPACITY)?;
        write(&mut builder)?;
        builder.finalize()
    }

    /// Reads this buffer to the end and frees it, whatever the outcome.
    ///
    /// Leftover bytes after `read` returns are reported as junk data.
    pub fn consume_with_stream<T, F>(self, api: &NativeApi, read: F) -> Result<T, BridgeError>
    where
        F: FnOnce(&mut BufferStream<'_>) -> Result<T, BridgeError>,
    {
        let owned = OwnedBuffer::new(api, self);
        let mut stream = BufferStream::new(owned.as_slice());
        let value = read(&mut stream)?;
        stream.finish("consume_with_stream")?;
        Ok(value)
    }

    /// Like `consume_with_stream` for borrowed buffers: checks for junk
    /// data but leaves ownership with the caller.
    pub fn read_with_stream<T, F>(&self, read: F) -> Result<T, BridgeError>
    where
        F: FnOnce(&mut BufferStream<'_>) -> Result<T, BridgeError>,
    {
        let mut stream = BufferStream::new(self.as_slice());
        let value = read(&mut stream)?;
        stream.finish("read_with_stream")?;
        Ok(value)
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ByteBuffer(capacity={}, len={}, data={})",
            self.capacity,
            self.len,
            HEXLOWER.encode(self.as_slice())
        )
    }
}

/// Borrowed view of host-owned bytes, copied by `rustbuffer_from_bytes`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ForeignBytes {
    pub len: i32,
    pub data: *const u8,
}

impl ForeignBytes {
    /// The view must not outlive `bytes`.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            len: i32::try_from(bytes.len()).unwrap_or(i32::MAX),
            data: bytes.as_ptr(),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        if self.data.is_null() || self.len <= 0 {
            return &[];
        }
        // Safety: the host guarantees `len` readable bytes at `data`.
        unsafe { slice::from_raw_parts(self.data, self.len as usize) }
    }
}

impl fmt::Debug for ForeignBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ForeignBytes(len={}, data={})",
            self.len,
            HEXLOWER.encode(self.as_slice())
        )
    }
}

/// Scope guard that frees a buffer through the native allocator on drop.
pub struct OwnedBuffer<'a> {
    api: &'a NativeApi,
    buf: Option<ByteBuffer>,
}

impl<'a> OwnedBuffer<'a> {
    pub fn new(api: &'a NativeApi, buf: ByteBuffer) -> Self {
        Self {
            api,
            buf: Some(buf),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_ref().map_or(&[], ByteBuffer::as_slice)
    }

    /// Gives ownership back; the guard no longer frees.
    pub fn into_inner(mut self) -> ByteBuffer {
        self.buf.take().unwrap_or_default()
    }
}

impl Drop for OwnedBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            release(self.api, buf);
        }
    }
}

/// Frees `buf` if it holds an allocation, logging rather than raising.
///
/// Used on paths that are already reporting another failure.
pub(crate) fn release(api: &NativeApi, buf: ByteBuffer) {
    if buf.is_null() {
        return;
    }
    if let Err(err) = api.free(buf) {
        log::warn!(target: "wirecall::buffer", "failed to free buffer: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;

    #[test]
    fn vec_round_trip_preserves_contents() {
        let mut v = Vec::with_capacity(32);
        v.extend_from_slice(b"abc");
        let buf = ByteBuffer::from_vec(v);
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.capacity(), 32);
        assert_eq!(buf.as_slice(), b"abc");
        assert_eq!(buf.destroy_into_vec(), b"abc".to_vec());
    }

    #[test]
    fn empty_buffer_has_no_data() {
        let buf = ByteBuffer::empty();
        assert!(buf.is_null());
        assert!(buf.as_slice().is_empty());
        assert!(buf.destroy_into_vec().is_empty());
    }

    #[test]
    fn append_respects_capacity() {
        let mut buf = ByteBuffer::from_vec(Vec::with_capacity(4));
        assert!(buf.append_within_capacity(&[1, 2, 3]));
        assert!(!buf.append_within_capacity(&[4, 5]));
        assert!(buf.append_within_capacity(&[4]));
        assert_eq!(buf.destroy_into_vec(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn borrowed_read_rejects_trailing_bytes_and_keeps_ownership() {
        let api = NativeApi::in_process();
        let buf = api.from_bytes(&[7, 8, 9]).unwrap();
        let err = buf.read_with_stream(|stream| Ok(stream.read_u8()?)).unwrap_err();
        match err {
            BridgeError::Decode(DecodeError::JunkData { context, remaining }) => {
                assert_eq!((context, remaining), ("read_with_stream", 2))
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(buf.as_slice(), [7, 8, 9]);
        api.free(buf).unwrap();
    }

    #[test]
    fn debug_shows_hex_payload() {
        let buf = ByteBuffer::from_vec(vec![0, 0, 0, 2, b'h', b'i']);
        assert!(format!("{buf:?}").ends_with("data=000000026869)"));
        drop(buf.destroy_into_vec());
    }

    #[test]
    #[should_panic(expected = "corrupt ByteBuffer")]
    fn corrupt_header_is_rejected() {
        let mut v = vec![1u8; 2];
        let buf = ByteBuffer {
            capacity: 1,
            len: 2,
            data: v.as_mut_ptr(),
        };
        std::mem::forget(v);
        let _ = buf.destroy_into_vec();
    }
}
