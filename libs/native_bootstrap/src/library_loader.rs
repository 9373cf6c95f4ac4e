//
// Copyright (C) 2025 The Android Open-Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::{
    ffi::{c_void, CString},
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
    ptr::NonNull,
};

use crate::config::{ModuleLoadList, ModuleSpec};
use crate::error::BootstrapError;

macro_rules! bail_with_dlerror {
    ($fmt:literal $(, $($arg:tt)+)?) => {
        {
            // SAFETY: trivially safe.
            let error = unsafe { libc::dlerror() };
            if !error.is_null() {
                // SAFETY: `error` is a pointer to a valid C string returned by `dlerror()`.
                let error_cstr = unsafe { std::ffi::CStr::from_ptr(error) };
                let dl_error_msg = error_cstr.to_string_lossy();

                anyhow::bail!(
                    concat!($fmt, ": {}"),
                    $($($arg)+,)?
                    dl_error_msg
                );
            } else {
                anyhow::bail!($fmt $(, $($arg)+)?);
            }
        }
    };
}

/// A module that has been made resident by a `ModuleLoader`.
pub trait NativeModule {
    fn name(&self) -> &str;

    /// Look up an exported symbol. The returned pointer is never null.
    fn find_symbol(&self, symbol_name: &str) -> Result<NonNull<c_void>>;
}

/// Makes modules resident. The bridge loads through this trait so that the load order can be
/// exercised without real shared objects.
pub trait ModuleLoader {
    type Module: NativeModule;

    /// Load one module. `library_dir` is where the platform put the app's native libraries.
    fn load(&mut self, module: &ModuleSpec, library_dir: Option<&Path>) -> Result<Self::Module>;
}

/// LoadedLibrary represents a library loaded to the memory space of the process.
pub struct LoadedLibrary {
    name: String,
    library_handle: NonNull<c_void>,
}

impl LoadedLibrary {
    /// Load a library to the process memory space. Its symbols are made available to libraries
    /// loaded afterwards.
    ///
    /// # Safety
    ///
    /// Users must ensure that the initialization and termination routines of the library are safe.
    pub unsafe fn open(name: &str, path: &Path) -> Result<Self> {
        let library = CString::new(path.as_os_str().as_bytes()).context("Invalid library path")?;

        // SAFETY: `library` is a valid C string. The caller ensured that the library is safe to
        // be loaded.
        let handle = unsafe { libc::dlopen(library.as_ptr(), libc::RTLD_NOW | libc::RTLD_GLOBAL) };
        match NonNull::new(handle) {
            Some(library_handle) => Ok(Self { name: name.to_string(), library_handle }),
            None => bail_with_dlerror!("Failed to open the library {}", path.display()),
        }
    }
}

// SAFETY: a dlopen handle is not tied to the thread that opened it; dlsym and dlclose may be
// called from any thread.
unsafe impl Send for LoadedLibrary {}

impl NativeModule for LoadedLibrary {
    fn name(&self) -> &str {
        &self.name
    }

    fn find_symbol(&self, symbol_name: &str) -> Result<NonNull<c_void>> {
        let symbol = CString::new(symbol_name).context("Invalid symbol name")?;
        // SAFETY: `self.library_handle` is a valid library handle and `symbol` is a valid C
        // string.
        let symbol_handle = unsafe { libc::dlsym(self.library_handle.as_ptr(), symbol.as_ptr()) };
        match NonNull::new(symbol_handle) {
            Some(symbol_handle) => Ok(symbol_handle),
            None => bail_with_dlerror!("Failed to find the symbol {}", symbol_name),
        }
    }
}

impl Drop for LoadedLibrary {
    fn drop(&mut self) {
        // SAFETY: the instance owns a valid handle to the opened library. The termination routine
        // is ensured to be safe.
        if unsafe { libc::dlclose(self.library_handle.as_ptr()) } != 0 {
            warn!("dlclose failed for {}", self.name);
        }
    }
}

/// `ModuleLoader` backed by the platform dynamic linker.
#[derive(Debug, Default)]
pub struct DlopenLoader {
    opened: Vec<PathBuf>,
}

impl DlopenLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths passed to the linker so far, in order.
    pub fn opened(&self) -> &[PathBuf] {
        &self.opened
    }
}

impl ModuleLoader for DlopenLoader {
    type Module = LoadedLibrary;

    fn load(&mut self, module: &ModuleSpec, library_dir: Option<&Path>) -> Result<LoadedLibrary> {
        let path = module.resolve_path(library_dir);
        self.opened.push(path.clone());
        // SAFETY: the modules come from the compiled-in load list; the application is
        // responsible for shipping libraries with safe initialization routines.
        unsafe { LoadedLibrary::open(module.name(), &path) }
    }
}

/// Load every module in `modules`, in order.
///
/// If any module fails, the ones already loaded are dropped in reverse order before the error
/// is returned, so nothing from a failed bootstrap stays resident.
pub fn load_modules<L: ModuleLoader>(
    loader: &mut L,
    modules: &ModuleLoadList,
    library_dir: Option<&Path>,
) -> Result<Vec<L::Module>, BootstrapError> {
    let mut loaded = Vec::with_capacity(modules.len());
    for module in modules {
        match loader.load(module, library_dir) {
            Ok(m) => {
                debug!("Loaded native module {}", module);
                loaded.push(m);
            }
            Err(source) => {
                unload_in_reverse(loaded);
                let module = module.name().to_string();
                return Err(BootstrapError::ModuleLoad { module, source });
            }
        }
    }
    Ok(loaded)
}

/// Drop modules last-loaded first, so dependents go before what they depend on.
pub(crate) fn unload_in_reverse<M>(mut modules: Vec<M>) {
    while let Some(module) = modules.pop() {
        drop(module);
    }
}
