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

//! # Native bootstrap
//!
//! Hands control of an app process to a native application built on a multimedia runtime
//! (SDL3). The host activity lifecycle drives a `NativeBootstrapBridge`, which
//!
//! - loads the native modules in their declared order,
//! - resolves the application's entry point and, unless the runtime does it, runs it once the
//!   activity starts,
//! - forwards every lifecycle event to the base implementation exactly once,
//! - relays status messages to the native side without blocking the host.

#[cfg(target_os = "android")]
mod android;
pub mod bridge;
pub mod config;
pub mod diagnostics;
pub mod entry_point;
pub mod error;
pub mod library_loader;
pub mod lifecycle;
pub mod logging;

pub use bridge::NativeBootstrapBridge;
pub use config::{BootstrapConfig, EntryPointName, ModuleLoadList, ModuleRole, ModuleSpec};
pub use error::{BootstrapError, LifecycleOrderingViolation};
pub use lifecycle::{BridgeState, LifecycleEvent, LifecycleHandler, LifecycleOutcome};
