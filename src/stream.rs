//! Cursor codecs over buffer bytes.
//!
//! Every multi-byte value is big-endian on the wire, including the
//! pointer-sized integer.

use crate::buffer::{ByteBuffer, release};
use crate::error::{BridgeError, DecodeError, MarshalError};
use crate::native::NativeApi;

/// Sequential reader over the initialized bytes of a buffer.
#[derive(Debug)]
pub struct BufferStream<'a> {
    data: &'a [u8],
    offset: usize,
}

macro_rules! read_be {
    ($($name:ident => $ty:ty),* $(,)?) => {
        $(
            pub fn $name(&mut self) -> Result<$ty, DecodeError> {
                Ok(<$ty>::from_be_bytes(self.read_array()?))
            }
        )*
    };
}

impl<'a> BufferStream<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn from_buffer(buf: &'a ByteBuffer) -> Self {
        Self::new(buf.as_slice())
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Raw byte run of exactly `size` bytes.
    pub fn read(&mut self, size: usize) -> Result<&'a [u8], DecodeError> {
        let remaining = self.remaining();
        if size > remaining {
            return Err(DecodeError::ReadPastEnd {
                needed: size,
                remaining,
            });
        }
        let bytes = &self.data[self.offset..self.offset + size];
        self.offset += size;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read(N)?);
        Ok(out)
    }

    read_be! {
        read_i8 => i8,
        read_u8 => u8,
        read_i16 => i16,
        read_u16 => u16,
        read_i32 => i32,
        read_u32 => u32,
        read_i64 => i64,
        read_u64 => u64,
        read_f32 => f32,
        read_f64 => f64,
        read_usize => usize,
    }

    /// An i32 length prefix that must not be negative.
    pub fn read_length(&mut self, what: &'static str) -> Result<usize, DecodeError> {
        let len = self.read_i32()?;
        usize::try_from(len).map_err(|_| DecodeError::NegativeLength { what, len })
    }

    /// Fails if any bytes were left unread.
    pub fn finish(&self, context: &'static str) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            remaining => Err(DecodeError::JunkData { context, remaining }),
        }
    }
}

/// Sequential writer that grows a native buffer on demand.
///
/// Dropping a builder that was not finalized frees its buffer.
pub struct BufferBuilder<'a> {
    api: &'a NativeApi,
    buf: Option<ByteBuffer>,
}

macro_rules! write_be {
    ($($name:ident => $ty:ty),* $(,)?) => {
        $(
            pub fn $name(&mut self, value: $ty) -> Result<(), BridgeError> {
                self.write(&value.to_be_bytes())
            }
        )*
    };
}

impl<'a> BufferBuilder<'a> {
    pub fn with_capacity(api: &'a NativeApi, capacity: i32) -> Result<Self, BridgeError> {
        let mut buf = api.alloc(capacity)?;
        buf.len = 0;
        Ok(Self {
            api,
            buf: Some(buf),
        })
    }

    pub fn len(&self) -> usize {
        self.buf.as_ref().map_or(0, ByteBuffer::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ensures room for `additional` bytes past the current length.
    ///
    /// A failed reserve leaves the builder without a buffer: the native
    /// side has already consumed the old one.
    fn reserve(&mut self, additional: usize) -> Result<&mut ByteBuffer, BridgeError> {
        let (len, capacity) = match self.buf.as_ref() {
            Some(buf) => (buf.len(), buf.capacity()),
            None => return Err(BridgeError::BuilderPoisoned),
        };
        let needed = len + additional;
        if i32::try_from(needed).is_err() {
            return Err(MarshalError::TooLarge { len: needed }.into());
        }
        if needed > capacity {
            let Some(current) = self.buf.take() else {
                return Err(BridgeError::BuilderPoisoned);
            };
            // `needed` fits in an i32, so `additional` does too.
            let grown = self.api.reserve(current, additional as i32)?;
            self.buf = Some(grown);
        }
        self.buf.as_mut().ok_or(BridgeError::BuilderPoisoned)
    }

    /// Raw byte run, no length prefix.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), BridgeError> {
        let buf = self.reserve(bytes.len())?;
        if buf.append_within_capacity(bytes) {
            Ok(())
        } else {
            Err(BridgeError::Panic(format!(
                "native reserve returned capacity {} for {} bytes",
                buf.capacity,
                buf.len() + bytes.len()
            )))
        }
    }

    write_be! {
        write_i8 => i8,
        write_u8 => u8,
        write_i16 => i16,
        write_u16 => u16,
        write_i32 => i32,
        write_u32 => u32,
        write_i64 => i64,
        write_u64 => u64,
        write_f32 => f32,
        write_f64 => f64,
        write_usize => usize,
    }

    /// An i32 length prefix for a run of `len` items.
    pub fn write_length(&mut self, len: usize) -> Result<(), BridgeError> {
        let len = i32::try_from(len).map_err(|_| MarshalError::TooLarge { len })?;
        self.write_i32(len)
    }

    /// Hands the built buffer to the caller.
    pub fn finalize(mut self) -> Result<ByteBuffer, BridgeError> {
        self.buf.take().ok_or(BridgeError::BuilderPoisoned)
    }
}

impl Drop for BufferBuilder<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            log::trace!(target: "wirecall::buffer", "discarding partially built buffer ({} bytes)", buf.len());
            release(self.api, buf);
        }
    }
}
