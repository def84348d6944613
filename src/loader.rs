//! Locating and opening the native library with `libloading`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;

use crate::config::BindingConfig;
use crate::error::StartupError;

/// Platform file name for a bare library name.
///
/// `lib<name>.so` on Linux and other Unixes, `lib<name>.dylib` on macOS,
/// `<name>.dll` on Windows.
pub fn library_filename(name: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{name}.dll")
    } else if cfg!(target_os = "macos") {
        format!("lib{name}.dylib")
    } else {
        format!("lib{name}.so")
    }
}

pub fn library_path(config: &BindingConfig) -> PathBuf {
    config
        .library_dir
        .join(library_filename(&config.library_name))
}

/// An opened native library. Clones share the same handle.
#[derive(Clone)]
pub struct LoadedLibrary {
    path: PathBuf,
    library: Arc<Library>,
}

impl LoadedLibrary {
    /// Opens the library at `path`.
    ///
    /// Loading runs the library's initializers, so `path` must point to a
    /// trusted build of the native side.
    pub fn open(path: &Path) -> Result<Self, StartupError> {
        if !path.exists() {
            return Err(StartupError::LibraryNotFound(path.to_path_buf()));
        }
        log::debug!(target: "wirecall::loader", "loading native library {}", path.display());
        // Safety: see above.
        let library = unsafe { Library::new(path) }.map_err(|source| StartupError::LoadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            library: Arc::new(library),
        })
    }

    pub fn open_configured(config: &BindingConfig) -> Result<Self, StartupError> {
        Self::open(&library_path(config))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn handle(&self) -> Arc<Library> {
        Arc::clone(&self.library)
    }

    /// Resolves `symbol` as a value of type `T`, usually a fn pointer.
    ///
    /// # Safety
    ///
    /// `T` must match the symbol's real type, and the value must not be used
    /// after the last clone of this library is dropped.
    pub unsafe fn symbol<T: Copy>(&self, symbol: &str) -> Result<T, StartupError> {
        log::trace!(target: "wirecall::loader", "resolving {symbol}");
        // Safety: forwarded from the caller.
        let resolved = unsafe { self.library.get::<T>(symbol.as_bytes()) };
        resolved
            .map(|sym| *sym)
            .map_err(|source| StartupError::SymbolNotFound {
                symbol: symbol.to_string(),
                source,
            })
    }
}
