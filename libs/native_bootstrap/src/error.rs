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

use thiserror::Error;

use crate::lifecycle::{BridgeState, LifecycleEvent};

/// Errors surfaced to the host by the bridge.
///
/// `ModuleLoad` and `SymbolResolution` are fatal: bootstrap is aborted and nothing stays
/// resident.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to load native module {module}: {source:#}")]
    ModuleLoad { module: String, source: anyhow::Error },
    #[error("failed to resolve symbol {symbol} in {module}: {source:#}")]
    SymbolResolution { symbol: String, module: String, source: anyhow::Error },
    #[error("failed to start the native entry point thread")]
    Launch(#[source] std::io::Error),
    #[error("the host lifecycle handler failed: {0:#}")]
    Host(#[source] anyhow::Error),
}

impl BootstrapError {
    /// Whether the process must not continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BootstrapError::ModuleLoad { .. } | BootstrapError::SymbolResolution { .. })
    }
}

/// An event arrived that the state machine does not allow in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("received {event} while {state}")]
pub struct LifecycleOrderingViolation {
    pub event: LifecycleEvent,
    pub state: BridgeState,
}
