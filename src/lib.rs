//! Buffer-based value marshalling and call dispatch across a C ABI boundary.
//!
//! The native side (`scaffolding`) exports buffer management, a status
//! protocol and the component's functions. The binding side (`component`,
//! `rustcalls`, `async_call`) lowers host values into native buffers,
//! calls those exports and lifts results and errors back.

pub mod async_call;
pub mod buffer;
pub mod component;
pub mod config;
pub mod convert;
pub mod error;
mod ffi;
pub mod interface;
pub mod loader;
pub mod logging;
pub mod native;
pub mod pointers;
mod runtime;
pub mod rustcalls;
pub mod scaffolding;
pub mod stream;
pub mod value;

pub use buffer::{ByteBuffer, ForeignBytes};
pub use component::{Component, CustomType};
pub use config::BindingConfig;
pub use error::{BridgeError, CallError, ConfigError, DecodeError, MarshalError, StartupError};
pub use native::NativeApi;
pub use rustcalls::CallStatus;
pub use value::Value;
