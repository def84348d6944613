//! Value converters: host `Value`s to and from the wire encoding.
//!
//! Each converter validates a host value against its wire type (`check`),
//! writes or reads it inside a larger buffer (`write_checked` / `read`), and
//! gets whole-buffer `lower` / `lift` for free.

use std::marker::PhantomData;

use crate::buffer::ByteBuffer;
use crate::error::{BridgeError, DecodeError, MarshalError};
use crate::native::NativeApi;
use crate::stream::{BufferBuilder, BufferStream};
use crate::value::Value;

pub trait FfiConverter {
    /// Name used in error messages and declared-error reports.
    const TYPE_NAME: &'static str;

    /// Validates `value` and returns its normalized form.
    fn check(value: &Value) -> Result<Value, MarshalError>;

    /// Writes a value that already passed `check`.
    fn write_checked(value: &Value, buf: &mut BufferBuilder<'_>) -> Result<(), BridgeError>;

    fn read(stream: &mut BufferStream<'_>) -> Result<Value, BridgeError>;

    fn write(value: &Value, buf: &mut BufferBuilder<'_>) -> Result<(), BridgeError> {
        let value = Self::check(value)?;
        Self::write_checked(&value, buf)
    }

    /// Produces a fresh buffer holding `value`.
    fn lower(api: &NativeApi, value: &Value) -> Result<ByteBuffer, BridgeError> {
        let value = Self::check(value)?;
        ByteBuffer::alloc_with_builder(api, |builder| Self::write_checked(&value, builder))
    }

    /// Consumes `buf`; the caller must not touch it afterwards.
    fn lift(api: &NativeApi, buf: ByteBuffer) -> Result<Value, BridgeError> {
        buf.consume_with_stream(api, Self::read)
    }
}

/// Converters whose values can also travel as plain FFI scalars.
pub trait FfiPrimitive: FfiConverter {
    type Ffi: Copy;

    fn lower_direct(value: &Value) -> Result<Self::Ffi, MarshalError>;

    fn lift_direct(value: Self::Ffi) -> Value;
}

fn mismatch(expected: &'static str, value: &Value) -> MarshalError {
    MarshalError::TypeMismatch {
        expected,
        got: value.type_name(),
    }
}

macro_rules! int_converter {
    ($(#[$meta:meta])* $name:ident, $ty:ty, $type_name:literal, $read:ident, $write:ident) => {
        $(#[$meta])*
        pub struct $name;

        impl $name {
            pub const VALUE_MIN: i128 = <$ty>::MIN as i128;
            /// Exclusive upper bound.
            pub const VALUE_MAX: i128 = <$ty>::MAX as i128 + 1;

            fn narrow(value: &Value) -> Result<$ty, MarshalError> {
                let int = value
                    .as_index()
                    .ok_or_else(|| mismatch("an integer", value))?;
                if !(Self::VALUE_MIN <= int && int < Self::VALUE_MAX) {
                    return Err(MarshalError::OutOfRange {
                        type_name: $type_name,
                        value: int,
                        min: Self::VALUE_MIN,
                        max: Self::VALUE_MAX,
                    });
                }
                // In range, so the cast is exact.
                Ok(int as $ty)
            }
        }

        impl FfiConverter for $name {
            const TYPE_NAME: &'static str = $type_name;

            fn check(value: &Value) -> Result<Value, MarshalError> {
                Self::narrow(value).map(|v| Value::Int(i128::from(v)))
            }

            fn write_checked(value: &Value, buf: &mut BufferBuilder<'_>) -> Result<(), BridgeError> {
                buf.$write(Self::narrow(value)?)
            }

            fn read(stream: &mut BufferStream<'_>) -> Result<Value, BridgeError> {
                Ok(Value::Int(i128::from(stream.$read()?)))
            }
        }

        impl FfiPrimitive for $name {
            type Ffi = $ty;

            fn lower_direct(value: &Value) -> Result<$ty, MarshalError> {
                Self::narrow(value)
            }

            fn lift_direct(value: $ty) -> Value {
                Value::Int(i128::from(value))
            }
        }
    };
}

int_converter!(Int8Converter, i8, "Int8", read_i8, write_i8);
int_converter!(UInt8Converter, u8, "UInt8", read_u8, write_u8);
int_converter!(Int16Converter, i16, "Int16", read_i16, write_i16);
int_converter!(UInt16Converter, u16, "UInt16", read_u16, write_u16);
int_converter!(Int32Converter, i32, "Int32", read_i32, write_i32);
int_converter!(UInt32Converter, u32, "UInt32", read_u32, write_u32);
int_converter!(Int64Converter, i64, "Int64", read_i64, write_i64);
int_converter!(UInt64Converter, u64, "UInt64", read_u64, write_u64);

pub struct Float32Converter;

impl FfiConverter for Float32Converter {
    const TYPE_NAME: &'static str = "Float32";

    fn check(value: &Value) -> Result<Value, MarshalError> {
        Self::lower_direct(value).map(Value::from)
    }

    fn write_checked(value: &Value, buf: &mut BufferBuilder<'_>) -> Result<(), BridgeError> {
        buf.write_f32(Self::lower_direct(value)?)
    }

    fn read(stream: &mut BufferStream<'_>) -> Result<Value, BridgeError> {
        Ok(Value::from(stream.read_f32()?))
    }
}

impl FfiPrimitive for Float32Converter {
    type Ffi = f32;

    fn lower_direct(value: &Value) -> Result<f32, MarshalError> {
        let real = value
            .as_real()
            .ok_or_else(|| mismatch("a real number", value))?;
        let narrowed = real as f32;
        // Infinities and NaN pass through; finite values must stay finite.
        if real.is_finite() && !narrowed.is_finite() {
            return Err(MarshalError::FloatOverflow {
                type_name: Self::TYPE_NAME,
                value: format!("{real:e}"),
            });
        }
        Ok(narrowed)
    }

    fn lift_direct(value: f32) -> Value {
        Value::from(value)
    }
}

pub struct Float64Converter;

impl FfiConverter for Float64Converter {
    const TYPE_NAME: &'static str = "Float64";

    fn check(value: &Value) -> Result<Value, MarshalError> {
        Self::lower_direct(value).map(Value::Float)
    }

    fn write_checked(value: &Value, buf: &mut BufferBuilder<'_>) -> Result<(), BridgeError> {
        buf.write_f64(Self::lower_direct(value)?)
    }

    fn read(stream: &mut BufferStream<'_>) -> Result<Value, BridgeError> {
        Ok(Value::Float(stream.read_f64()?))
    }
}

impl FfiPrimitive for Float64Converter {
    type Ffi = f64;

    fn lower_direct(value: &Value) -> Result<f64, MarshalError> {
        value
            .as_real()
            .ok_or_else(|| mismatch("a real number", value))
    }

    fn lift_direct(value: f64) -> Value {
        Value::Float(value)
    }
}

/// Booleans travel as an i8 that must be 0 or 1.
pub struct BooleanConverter;

impl FfiConverter for BooleanConverter {
    const TYPE_NAME: &'static str = "Boolean";

    fn check(value: &Value) -> Result<Value, MarshalError> {
        match value {
            Value::Bool(v) => Ok(Value::Bool(*v)),
            other => Err(mismatch("bool", other)),
        }
    }

    fn write_checked(value: &Value, buf: &mut BufferBuilder<'_>) -> Result<(), BridgeError> {
        buf.write_i8(Self::lower_direct(value)?)
    }

    fn read(stream: &mut BufferStream<'_>) -> Result<Value, BridgeError> {
        match stream.read_i8()? {
            0 => Ok(Value::Bool(false)),
            1 => Ok(Value::Bool(true)),
            tag => Err(DecodeError::InvalidTag {
                what: "boolean",
                tag,
            }
            .into()),
        }
    }
}

impl FfiPrimitive for BooleanConverter {
    type Ffi = i8;

    fn lower_direct(value: &Value) -> Result<i8, MarshalError> {
        match value {
            Value::Bool(v) => Ok(i8::from(*v)),
            other => Err(mismatch("bool", other)),
        }
    }

    fn lift_direct(value: i8) -> Value {
        Value::Bool(value != 0)
    }
}

/// UTF-8 text framed by an i32 byte length.
pub struct StringConverter;

impl FfiConverter for StringConverter {
    const TYPE_NAME: &'static str = "String";

    fn check(value: &Value) -> Result<Value, MarshalError> {
        match value {
            Value::String(_) => Ok(value.clone()),
            other => Err(mismatch("str", other)),
        }
    }

    fn write_checked(value: &Value, buf: &mut BufferBuilder<'_>) -> Result<(), BridgeError> {
        let Value::String(text) = value else {
            return Err(mismatch("str", value).into());
        };
        buf.write_length(text.len())?;
        buf.write(text.as_bytes())
    }

    fn read(stream: &mut BufferStream<'_>) -> Result<Value, BridgeError> {
        let size = stream.read_length("string")?;
        let bytes = stream.read(size)?;
        let text = std::str::from_utf8(bytes)
            .map_err(|err| DecodeError::InvalidUtf8(err.to_string()))?;
        Ok(Value::String(text.to_string()))
    }
}

/// Byte strings, framed like strings.
pub struct BytesConverter;

impl FfiConverter for BytesConverter {
    const TYPE_NAME: &'static str = "Bytes";

    fn check(value: &Value) -> Result<Value, MarshalError> {
        match value {
            Value::Bytes(_) => Ok(value.clone()),
            other => Err(mismatch("a bytes-like object", other)),
        }
    }

    fn write_checked(value: &Value, buf: &mut BufferBuilder<'_>) -> Result<(), BridgeError> {
        let Value::Bytes(bytes) = value else {
            return Err(mismatch("a bytes-like object", value).into());
        };
        buf.write_length(bytes.len())?;
        buf.write(bytes)
    }

    fn read(stream: &mut BufferStream<'_>) -> Result<Value, BridgeError> {
        let size = stream.read_length("byte string")?;
        Ok(Value::Bytes(stream.read(size)?.to_vec()))
    }
}

/// Lists of `C`, framed by an i32 item count.
pub struct SequenceConverter<C>(PhantomData<C>);

impl<C: FfiConverter> FfiConverter for SequenceConverter<C> {
    const TYPE_NAME: &'static str = "Sequence";

    fn check(value: &Value) -> Result<Value, MarshalError> {
        match value {
            Value::List(items) => items
                .iter()
                .map(C::check)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            other => Err(mismatch("list", other)),
        }
    }

    fn write_checked(value: &Value, buf: &mut BufferBuilder<'_>) -> Result<(), BridgeError> {
        let Value::List(items) = value else {
            return Err(mismatch("list", value).into());
        };
        buf.write_length(items.len())?;
        items.iter().try_for_each(|item| C::write_checked(item, buf))
    }

    fn read(stream: &mut BufferStream<'_>) -> Result<Value, BridgeError> {
        let count = stream.read_length("sequence")?;
        // Every item takes at least one byte, so a larger count cannot be honest.
        let mut items = Vec::with_capacity(count.min(stream.remaining()));
        for _ in 0..count {
            items.push(C::read(stream)?);
        }
        Ok(Value::List(items))
    }
}

/// `Null` or a `C`, preceded by an i8 presence tag.
pub struct OptionalConverter<C>(PhantomData<C>);

impl<C: FfiConverter> FfiConverter for OptionalConverter<C> {
    const TYPE_NAME: &'static str = "Optional";

    fn check(value: &Value) -> Result<Value, MarshalError> {
        match value {
            Value::Null => Ok(Value::Null),
            other => C::check(other),
        }
    }

    fn write_checked(value: &Value, buf: &mut BufferBuilder<'_>) -> Result<(), BridgeError> {
        match value {
            Value::Null => buf.write_i8(0),
            other => {
                buf.write_i8(1)?;
                C::write_checked(other, buf)
            }
        }
    }

    fn read(stream: &mut BufferStream<'_>) -> Result<Value, BridgeError> {
        match stream.read_i8()? {
            0 => Ok(Value::Null),
            1 => C::read(stream),
            tag => Err(DecodeError::InvalidTag {
                what: "optional",
                tag,
            }
            .into()),
        }
    }
}

/// Declares a named type with the same wire shape as an existing converter.
///
/// ```
/// wirecall::ffi_type_alias!(pub Checksum => wirecall::convert::UInt32Converter);
/// ```
#[macro_export]
macro_rules! ffi_type_alias {
    ($(#[$meta:meta])* $vis:vis $name:ident => $inner:ty) => {
        $(#[$meta])*
        $vis struct $name;

        impl $crate::convert::FfiConverter for $name {
            const TYPE_NAME: &'static str = stringify!($name);

            fn check(
                value: &$crate::value::Value,
            ) -> ::std::result::Result<$crate::value::Value, $crate::error::MarshalError> {
                <$inner as $crate::convert::FfiConverter>::check(value)
            }

            fn write_checked(
                value: &$crate::value::Value,
                buf: &mut $crate::stream::BufferBuilder<'_>,
            ) -> ::std::result::Result<(), $crate::error::BridgeError> {
                <$inner as $crate::convert::FfiConverter>::write_checked(value, buf)
            }

            fn read(
                stream: &mut $crate::stream::BufferStream<'_>,
            ) -> ::std::result::Result<$crate::value::Value, $crate::error::BridgeError> {
                <$inner as $crate::convert::FfiConverter>::read(stream)
            }

            fn lower(
                api: &$crate::native::NativeApi,
                value: &$crate::value::Value,
            ) -> ::std::result::Result<$crate::buffer::ByteBuffer, $crate::error::BridgeError> {
                <$inner as $crate::convert::FfiConverter>::lower(api, value)
            }

            fn lift(
                api: &$crate::native::NativeApi,
                buf: $crate::buffer::ByteBuffer,
            ) -> ::std::result::Result<$crate::value::Value, $crate::error::BridgeError> {
                <$inner as $crate::convert::FfiConverter>::lift(api, buf)
            }
        }
    };
}
