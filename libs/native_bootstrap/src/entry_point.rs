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

use log::{info, warn};
use std::{
    ffi::{c_char, c_int, CString},
    thread::{self, JoinHandle},
};

use crate::config::{EntryPointName, ARGV0};
use crate::error::BootstrapError;
use crate::library_loader::NativeModule;

/// Type signature of the application's `main`.
pub type MainFunction = unsafe extern "C" fn(argc: c_int, argv: *mut *mut c_char) -> c_int;

const MAIN_THREAD_NAME: &str = "NativeMain";

/// The resolved entry symbol of the application module.
#[derive(Clone, Copy)]
pub struct EntryPoint {
    func: MainFunction,
}

impl EntryPoint {
    /// Resolve `name` in `module`.
    ///
    /// # Safety
    ///
    /// If `module` exports `name`, it must be a function with the `MainFunction` signature.
    pub unsafe fn resolve<M: NativeModule>(
        module: &M,
        name: &EntryPointName,
    ) -> Result<Self, BootstrapError> {
        let addr = module.find_symbol(name.as_str()).map_err(|source| {
            BootstrapError::SymbolResolution {
                symbol: name.to_string(),
                module: module.name().to_string(),
                source,
            }
        })?;
        // SAFETY: `addr` is a non-null pointer to a function exported by the loaded module and
        // the caller guarantees its signature.
        let func =
            unsafe { std::mem::transmute::<*mut std::ffi::c_void, MainFunction>(addr.as_ptr()) };
        Ok(Self { func })
    }

    /// Wrap a function pointer directly.
    pub fn from_fn(func: MainFunction) -> Self {
        Self { func }
    }

    /// Run the entry point on a new thread with `argv = [ARGV0, arguments...]`.
    pub fn launch(
        self,
        name: &EntryPointName,
        arguments: &[String],
    ) -> Result<NativeMain, BootstrapError> {
        let args = build_args(arguments);
        let symbol = name.to_string();
        let func = self.func;
        info!("Running {} with {} argument(s)", symbol, args.len());

        let handle = thread::Builder::new()
            .name(MAIN_THREAD_NAME.to_string())
            .spawn(move || {
                let mut argv: Vec<*mut c_char> =
                    args.iter().map(|arg| arg.as_ptr() as *mut c_char).collect();
                let argc = argv.len() as c_int;
                argv.push(std::ptr::null_mut());
                // SAFETY: `argv` is a NULL-terminated array of valid C strings that outlive the
                // call. The application implements `main` with the `MainFunction` signature.
                let status = unsafe { func(argc, argv.as_mut_ptr()) };
                info!("{} returned {}", symbol, status);
                status
            })
            .map_err(BootstrapError::Launch)?;
        Ok(NativeMain { handle: Some(handle), exit_status: None })
    }
}

fn build_args(arguments: &[String]) -> Vec<CString> {
    std::iter::once(ARGV0)
        .chain(arguments.iter().map(String::as_str))
        .filter_map(|arg| match CString::new(arg) {
            Ok(arg) => Some(arg),
            Err(_) => {
                warn!("Dropping argument with an interior NUL: {:?}", arg);
                None
            }
        })
        .collect()
}

/// The thread running the application's `main`.
pub struct NativeMain {
    handle: Option<JoinHandle<c_int>>,
    exit_status: Option<c_int>,
}

impl NativeMain {
    /// Whether `main` has not returned yet.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Collect the exit status if `main` has returned. Never blocks.
    pub fn poll_exit(&mut self) -> Option<c_int> {
        if self.exit_status.is_none() && self.handle.as_ref().is_some_and(JoinHandle::is_finished) {
            if let Some(handle) = self.handle.take() {
                match handle.join() {
                    Ok(status) => self.exit_status = Some(status),
                    Err(_) => warn!("The native main thread panicked"),
                }
            }
        }
        self.exit_status
    }
}
