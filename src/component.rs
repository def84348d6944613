//! Host-side binding for the exported component.
//!
//! Binding checks the contract version and every function checksum before
//! any call is allowed. Calls lower their arguments into native buffers,
//! hand ownership to the native side and interpret the returned status.

use crate::async_call::{FutureCallback, rust_call_async};
use crate::buffer::{ByteBuffer, OwnedBuffer};
use crate::config::BindingConfig;
use crate::convert::{FfiConverter, SequenceConverter, UInt8Converter};
use crate::error::{BridgeError, CallError, StartupError};
use crate::interface::{self, CONTRACT_VERSION, FUNCTIONS, FnSignature, TEST_FN, TEST_FN_ASYNC};
use crate::loader::LoadedLibrary;
use crate::native::{BufferSymbols, ChecksumFn, ContractVersionFn, NativeApi};
use crate::pointers::PointerStrategy;
use crate::rustcalls::{CallStatus, rust_call};
use crate::scaffolding;
use crate::value::Value;

crate::ffi_type_alias!(
    /// A list of bytes with its own declared name.
    pub CustomType => SequenceConverter<UInt8Converter>
);

pub type TestFn = unsafe extern "C" fn(type_param: ByteBuffer, out_status: *mut CallStatus);
pub type TestFnAsync = unsafe extern "C" fn(
    type_param: ByteBuffer,
    executor: u64,
    callback: FutureCallback<u8>,
    future: u64,
    out_status: *mut CallStatus,
);

/// Every entry point the binding needs from the native library.
#[derive(Clone, Copy)]
pub struct ComponentSymbols {
    pub buffers: BufferSymbols,
    pub contract_version: ContractVersionFn,
    pub checksum_test_fn: ChecksumFn,
    pub checksum_test_fn_async: ChecksumFn,
    pub test_fn: TestFn,
    pub test_fn_async: TestFnAsync,
}

impl ComponentSymbols {
    pub fn in_process() -> Self {
        Self {
            buffers: BufferSymbols::in_process(),
            contract_version: scaffolding::ffi_wirecall_uniffi_contract_version,
            checksum_test_fn: scaffolding::wirecall_checksum_func_test_fn,
            checksum_test_fn_async: scaffolding::wirecall_checksum_func_test_fn_async,
            test_fn: scaffolding::wirecall_fn_func_test_fn,
            test_fn_async: scaffolding::wirecall_fn_func_test_fn_async,
        }
    }

    /// # Safety
    ///
    /// The library must export these symbols with the signatures above.
    unsafe fn resolve(library: &LoadedLibrary) -> Result<Self, StartupError> {
        // Safety: forwarded from the caller.
        unsafe {
            Ok(Self {
                buffers: BufferSymbols {
                    alloc: library.symbol("ffi_wirecall_rustbuffer_alloc")?,
                    reserve: library.symbol("ffi_wirecall_rustbuffer_reserve")?,
                    free: library.symbol("ffi_wirecall_rustbuffer_free")?,
                    from_bytes: library.symbol("ffi_wirecall_rustbuffer_from_bytes")?,
                },
                contract_version: library.symbol(&interface::contract_version_symbol())?,
                checksum_test_fn: library.symbol(&TEST_FN.checksum_symbol())?,
                checksum_test_fn_async: library.symbol(&TEST_FN_ASYNC.checksum_symbol())?,
                test_fn: library.symbol(&TEST_FN.symbol())?,
                test_fn_async: library.symbol(&TEST_FN_ASYNC.symbol())?,
            })
        }
    }

    /// Checksum accessors in declaration order.
    fn checksums(&self) -> impl Iterator<Item = (&'static FnSignature, ChecksumFn)> {
        FUNCTIONS
            .iter()
            .zip([self.checksum_test_fn, self.checksum_test_fn_async])
    }
}

/// A bound, verified native component.
#[derive(Clone)]
pub struct Component {
    api: NativeApi,
    symbols: ComponentSymbols,
    strategy: PointerStrategy,
}

impl Component {
    /// Binds the scaffolding linked into this process.
    pub fn in_process() -> Result<Self, StartupError> {
        Self::bind(NativeApi::in_process(), ComponentSymbols::in_process())
    }

    /// Loads the configured library and binds it.
    pub fn load(config: &BindingConfig) -> Result<Self, StartupError> {
        let library = LoadedLibrary::open_configured(config)?;
        // Safety: the library is a wirecall native component.
        let symbols = unsafe { ComponentSymbols::resolve(&library) }?;
        let api = NativeApi::with_library(symbols.buffers, library.handle());
        let component = Self::bind(api, symbols)?.with_pointer_strategy(config.pointer_strategy);
        log::info!(
            target: "wirecall::component",
            "bound native component {}",
            library.path().display()
        );
        Ok(component)
    }

    /// Verifies `symbols` against the declared interface.
    pub fn bind(api: NativeApi, symbols: ComponentSymbols) -> Result<Self, StartupError> {
        check_contract_version(symbols.contract_version)?;
        check_api_checksums(&symbols)?;
        Ok(Self {
            api,
            symbols,
            strategy: PointerStrategy::default(),
        })
    }

    /// Issues async call handles from `strategy` instead of the default table.
    pub fn with_pointer_strategy(mut self, strategy: PointerStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn api(&self) -> &NativeApi {
        &self.api
    }

    pub fn pointer_strategy(&self) -> PointerStrategy {
        self.strategy
    }

    pub fn test_fn(&self, type_param: &Value) -> Result<(), BridgeError> {
        let arg = CustomType::lower(&self.api, type_param)?;
        let test_fn = self.symbols.test_fn;
        // Safety: the symbol matches `TestFn`; ownership of `arg` moves to it.
        rust_call(&self.api, |status| unsafe { test_fn(arg, status) })
    }

    /// Async twin of `test_fn`. Must be awaited inside a tokio runtime.
    pub async fn test_fn_async(&self, type_param: &Value) -> Result<(), BridgeError> {
        let arg = OwnedBuffer::new(&self.api, CustomType::lower(&self.api, type_param)?);
        let start = self.symbols.test_fn_async;
        let outcome = rust_call_async::<u8, _>(&self.api, self.strategy, None, |executor, callback, future, status| {
            // Safety: the symbol matches `TestFnAsync`; ownership of `arg` moves to it.
            unsafe { start(arg.into_inner(), executor, callback, future, status) }
        })
        .await;
        match outcome {
            Ok(_) => Ok(()),
            Err(CallError::Internal(err)) => Err(err),
            // No converter was supplied, so a declared error cannot arise.
            Err(CallError::Declared { .. }) => Err(BridgeError::UndeclaredError),
        }
    }
}

fn check_contract_version(contract_version: ContractVersionFn) -> Result<(), StartupError> {
    // Safety: the symbol matches `ContractVersionFn`.
    let found = unsafe { contract_version() };
    if found != CONTRACT_VERSION {
        log::error!(
            target: "wirecall::component",
            "contract version mismatch: expected {CONTRACT_VERSION}, found {found}"
        );
        return Err(StartupError::ContractVersionMismatch {
            expected: CONTRACT_VERSION,
            found,
        });
    }
    Ok(())
}

fn check_api_checksums(symbols: &ComponentSymbols) -> Result<(), StartupError> {
    for (signature, checksum) in symbols.checksums() {
        let expected = signature.checksum();
        // Safety: the symbol matches `ChecksumFn`.
        let found = unsafe { checksum() };
        if found != expected {
            log::error!(
                target: "wirecall::component",
                "checksum mismatch for {}: expected {expected}, found {found}",
                signature.name
            );
            return Err(StartupError::ChecksumMismatch {
                function: signature.name,
                expected,
                found,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::error::MarshalError;

    thread_local! {
        static RECEIVED: RefCell<Vec<Vec<u8>>> = const { RefCell::new(Vec::new()) };
    }

    unsafe extern "C" fn recording_test_fn(type_param: ByteBuffer, _out_status: *mut CallStatus) {
        let bytes = type_param.destroy_into_vec();
        RECEIVED.with(|received| received.borrow_mut().push(bytes));
    }

    unsafe extern "C" fn old_contract() -> u32 {
        CONTRACT_VERSION - 1
    }

    unsafe extern "C" fn wrong_checksum() -> u16 {
        TEST_FN_ASYNC.checksum().wrapping_add(1)
    }

    fn byte_list(bytes: &[u8]) -> Value {
        Value::List(bytes.iter().copied().map(Value::from).collect())
    }

    #[test]
    fn in_process_component_binds() {
        assert!(Component::in_process().is_ok());
    }

    #[test]
    fn contract_version_mismatch_refuses_to_bind() {
        let symbols = ComponentSymbols {
            contract_version: old_contract,
            ..ComponentSymbols::in_process()
        };
        match Component::bind(NativeApi::in_process(), symbols) {
            Err(StartupError::ContractVersionMismatch { expected, found }) => {
                assert_eq!((expected, found), (CONTRACT_VERSION, CONTRACT_VERSION - 1));
            }
            Err(other) => panic!("unexpected {other:?}"),
            Ok(_) => panic!("bound despite version mismatch"),
        }
    }

    #[test]
    fn checksum_mismatch_names_the_function() {
        let symbols = ComponentSymbols {
            checksum_test_fn_async: wrong_checksum,
            ..ComponentSymbols::in_process()
        };
        match Component::bind(NativeApi::in_process(), symbols) {
            Err(StartupError::ChecksumMismatch { function, .. }) => {
                assert_eq!(function, "test_fn_async")
            }
            Err(other) => panic!("unexpected {other:?}"),
            Ok(_) => panic!("bound despite checksum mismatch"),
        }
    }

    #[test]
    fn test_fn_sends_the_encoded_argument() {
        let symbols = ComponentSymbols {
            test_fn: recording_test_fn,
            ..ComponentSymbols::in_process()
        };
        let component = Component::bind(NativeApi::in_process(), symbols).unwrap();
        component.test_fn(&byte_list(&[1, 2, 255])).unwrap();
        let received = RECEIVED.with(|received| received.borrow_mut().pop());
        assert_eq!(received, Some(vec![0, 0, 0, 3, 1, 2, 255]));
    }

    #[rstest]
    #[case::not_a_list(Value::from("bytes"))]
    #[case::out_of_range(Value::List(vec![Value::from(1), Value::from(256)]))]
    fn invalid_arguments_never_reach_the_native_side(#[case] arg: Value) {
        let component = Component::in_process().unwrap();
        let err = component.test_fn(&arg).unwrap_err();
        assert!(matches!(err, BridgeError::Marshal(_)), "{err}");
    }

    #[test]
    fn out_of_range_byte_reports_bounds() {
        let component = Component::in_process().unwrap();
        let err = component.test_fn(&Value::List(vec![Value::from(-1)])).unwrap_err();
        match err {
            BridgeError::Marshal(MarshalError::OutOfRange { min, max, .. }) => {
                assert_eq!((min, max), (0, 256))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_library_fails_at_load() {
        let config = BindingConfig::default()
            .with_library_name("wirecall-missing")
            .with_library_dir(std::env::temp_dir());
        assert!(matches!(
            Component::load(&config),
            Err(StartupError::LibraryNotFound(_))
        ));
    }

    #[rstest]
    #[case::table(PointerStrategy::Table)]
    #[case::direct(PointerStrategy::Direct)]
    #[tokio::test]
    async fn async_call_completes_on_the_native_runtime(#[case] strategy: PointerStrategy) {
        let component = Component::in_process().unwrap().with_pointer_strategy(strategy);
        assert_eq!(component.pointer_strategy(), strategy);
        component.test_fn_async(&byte_list(&[4, 5])).await.unwrap();
    }
}
