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

use log::{debug, error, info, trace, warn};
use std::ffi::c_int;

use crate::config::{BootstrapConfig, EntryPointName, ModuleLoadList, ModuleSpec};
use crate::diagnostics::{DiagnosticChannel, LogSink, NativeStatusSink};
use crate::entry_point::{EntryPoint, NativeMain};
use crate::error::{BootstrapError, LifecycleOrderingViolation};
use crate::lifecycle::{BridgeState, LifecycleEvent, LifecycleHandler, LifecycleOutcome, Transition};
use crate::library_loader::{load_modules, unload_in_reverse, ModuleLoader, NativeModule};

/// NativeBootstrapBridge loads the native modules of an application, resolves its entry point
/// and forwards host lifecycle events to the base implementation `H`.
///
/// Every event received before the bridge is destroyed reaches `H` exactly once and in arrival
/// order, unless bootstrap failed: from then on nothing is forwarded. Events that do not fit the
/// state machine are reported as `LifecycleOrderingViolation` rather than treated as errors.
pub struct NativeBootstrapBridge<L: ModuleLoader, H: LifecycleHandler> {
    config: BootstrapConfig,
    loader: L,
    base: H,
    state: BridgeState,
    /// Resident modules in load order. Written once by `bootstrap`.
    modules: Vec<L::Module>,
    entry_point: Option<EntryPoint>,
    native_main: Option<NativeMain>,
    diagnostics: Option<DiagnosticChannel>,
    disconnected: bool,
    bootstrap_failed: bool,
}

impl<L: ModuleLoader, H: LifecycleHandler> NativeBootstrapBridge<L, H> {
    pub fn new(config: BootstrapConfig, loader: L, base: H) -> Self {
        Self {
            config,
            loader,
            base,
            state: BridgeState::Uninitialized,
            modules: Vec::new(),
            entry_point: None,
            native_main: None,
            diagnostics: None,
            disconnected: false,
            bootstrap_failed: false,
        }
    }

    pub fn module_load_list(&self) -> &ModuleLoadList {
        &self.config.modules
    }

    pub fn entry_point_name(&self) -> &EntryPointName {
        &self.config.entry_point
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn base(&self) -> &H {
        &self.base
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Names of the resident modules, in load order.
    pub fn loaded_modules(&self) -> Vec<&str> {
        self.modules.iter().map(NativeModule::name).collect()
    }

    pub fn entry_point(&self) -> Option<EntryPoint> {
        self.entry_point
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Whether bootstrap failed fatally. Lifecycle events are no longer forwarded.
    pub fn bootstrap_failed(&self) -> bool {
        self.bootstrap_failed
    }

    /// Exit status of the native `main`, once it has returned. Never blocks.
    pub fn native_exit_status(&mut self) -> Option<c_int> {
        self.native_main.as_mut().and_then(NativeMain::poll_exit)
    }

    /// Load every module and resolve the entry point. Moves the bridge to `Loaded`.
    ///
    /// Runs on Create; a host may call it earlier. Calling it again once loaded does nothing.
    /// On failure nothing stays resident, the bridge remains `Uninitialized` and later lifecycle
    /// events are not forwarded.
    pub fn bootstrap(&mut self) -> Result<(), BootstrapError> {
        if self.state != BridgeState::Uninitialized {
            debug!("Already bootstrapped, state={}", self.state);
            return Ok(());
        }
        let result = self.load();
        self.bootstrap_failed = result.is_err();
        result
    }

    fn load(&mut self) -> Result<(), BootstrapError> {
        if let Err(e) = self.config.modules.validate() {
            error!("Invalid module load list: {}", e);
            return Err(BootstrapError::ModuleLoad {
                module: e.module().to_string(),
                source: e.into(),
            });
        }
        if let Err(e) = self.config.validate_symbols() {
            error!("Invalid bootstrap configuration: {}", e);
            let symbol = e.symbol().unwrap_or_default().to_string();
            let modules = &self.config.modules;
            let module = modules.application().map_or("<application>", ModuleSpec::name);
            return Err(BootstrapError::SymbolResolution {
                symbol,
                module: module.to_string(),
                source: e.into(),
            });
        }

        info!("Loading native modules {:?}", self.config.modules.names());
        let library_dir = self.config.library_dir.as_deref();
        let modules = load_modules(&mut self.loader, &self.config.modules, library_dir)
            .inspect_err(|e| error!("Bootstrap failed: {}", e))?;

        let Some(application) = modules.last() else {
            return Err(BootstrapError::ModuleLoad {
                module: "<application>".to_string(),
                source: anyhow::anyhow!("no module was loaded"),
            });
        };
        // SAFETY: the application module is built to export the entry point with the
        // `MainFunction` signature.
        let resolved = unsafe { EntryPoint::resolve(application, &self.config.entry_point) };
        let entry_point = match resolved {
            Ok(entry_point) => entry_point,
            Err(e) => {
                error!("Bootstrap failed: {}", e);
                unload_in_reverse(modules);
                return Err(e);
            }
        };

        self.diagnostics = self.start_diagnostics(application);
        self.modules = modules;
        self.entry_point = Some(entry_point);
        self.state = BridgeState::Loaded;
        info!("Native modules loaded, entry point {} resolved", self.config.entry_point);
        Ok(())
    }

    fn start_diagnostics(&self, application: &L::Module) -> Option<DiagnosticChannel> {
        let native_sink = self.config.diagnostic_symbol.as_deref().and_then(|symbol| {
            match application.find_symbol(symbol) {
                // SAFETY: the application exports the status function with the
                // `StatusFunction` signature, and it stays resident as long as the bridge.
                Ok(addr) => Some(unsafe { NativeStatusSink::from_symbol(addr) }),
                Err(e) => {
                    debug!("No native status function, logging locally: {e:#}");
                    None
                }
            }
        });
        let channel = match native_sink {
            Some(sink) => DiagnosticChannel::start(sink),
            None => DiagnosticChannel::start(LogSink),
        };
        channel.inspect_err(|e| warn!("Status messages will be dropped: {e:#}")).ok()
    }

    /// Handle one host lifecycle event.
    ///
    /// Returns `Err` for a fatal bootstrap failure on Create, a failure to start the entry point
    /// on the first Start, or an error from the base handler. Out-of-order events come back as
    /// `LifecycleOutcome::Violation`.
    ///
    /// Create is forwarded only once the modules are loaded. After a fatal bootstrap failure no
    /// event reaches the base handler; Destroy still tears the bridge down.
    pub fn on_lifecycle_event(
        &mut self,
        event: LifecycleEvent,
        host_state: &H::State,
    ) -> Result<LifecycleOutcome, BootstrapError> {
        let transition = if self.bootstrap_failed {
            self.state.transition_after_failure(event)
        } else {
            self.state.transition(event)
        };
        match transition {
            Transition::Reject { forward } => {
                let violation = LifecycleOrderingViolation { event, state: self.state };
                warn!("Lifecycle ordering violation: {}", violation);
                if forward {
                    self.forward(event, host_state).map_err(BootstrapError::Host)?;
                }
                Ok(LifecycleOutcome::Violation { violation, forwarded: forward })
            }
            Transition::Bootstrap => {
                self.bootstrap()?;
                self.forward(event, host_state).map_err(BootstrapError::Host)?;
                Ok(LifecycleOutcome::Applied(self.state))
            }
            Transition::To(next) => {
                if next == BridgeState::Destroyed {
                    self.disconnect();
                }
                let forwarded = self.forward(event, host_state);
                let entered = self.enter(next);
                merge_results(forwarded, entered)?;
                Ok(LifecycleOutcome::Applied(next))
            }
            Transition::Discard(next) => {
                if next == BridgeState::Destroyed {
                    self.disconnect();
                }
                info!("Bootstrap failed, not forwarding {}", event);
                self.enter(next)?;
                Ok(LifecycleOutcome::Applied(next))
            }
        }
    }

    pub fn on_create(&mut self, host_state: &H::State) -> Result<LifecycleOutcome, BootstrapError> {
        self.on_lifecycle_event(LifecycleEvent::Create, host_state)
    }

    pub fn on_start(&mut self, host_state: &H::State) -> Result<LifecycleOutcome, BootstrapError> {
        self.on_lifecycle_event(LifecycleEvent::Start, host_state)
    }

    pub fn on_stop(&mut self, host_state: &H::State) -> Result<LifecycleOutcome, BootstrapError> {
        self.on_lifecycle_event(LifecycleEvent::Stop, host_state)
    }

    pub fn on_destroy(
        &mut self,
        host_state: &H::State,
    ) -> Result<LifecycleOutcome, BootstrapError> {
        self.on_lifecycle_event(LifecycleEvent::Destroy, host_state)
    }

    fn forward(&mut self, event: LifecycleEvent, host_state: &H::State) -> anyhow::Result<()> {
        trace!("Forwarding {}", event);
        self.base
            .on_lifecycle_event(event, host_state)
            .inspect_err(|e| error!("{} failed in the base handler: {e:#}", event))
    }

    /// Move to `next`. The state changes even if the side effect fails, since the host has
    /// already delivered the event.
    fn enter(&mut self, next: BridgeState) -> Result<(), BootstrapError> {
        let result = match next {
            BridgeState::Running if self.native_main.is_none() => self.launch(),
            BridgeState::Destroyed => {
                self.teardown();
                Ok(())
            }
            _ => Ok(()),
        };
        info!("{} -> {}", self.state, next);
        self.state = next;
        result
    }

    fn launch(&mut self) -> Result<(), BootstrapError> {
        let Some(entry_point) = self.entry_point else {
            return Ok(());
        };
        if !self.config.launch_entry_point {
            debug!("{} is run by the base runtime", self.config.entry_point);
            return Ok(());
        }
        let native_main = entry_point
            .launch(&self.config.entry_point, &self.config.arguments)
            .inspect_err(|e| error!("{e:#}"))?;
        self.native_main = Some(native_main);
        Ok(())
    }

    fn teardown(&mut self) {
        // Stop accepting messages. The worker is joined before any module is unloaded.
        if let Some(diagnostics) = self.diagnostics.as_mut() {
            diagnostics.close(false);
        }
        match self.native_main.as_mut() {
            Some(main) if main.is_running() => {
                info!("Native main is still running; it exits through the runtime")
            }
            Some(main) => {
                if let Some(status) = main.poll_exit() {
                    info!("Native main exited with status {}", status);
                }
            }
            None => {}
        }
    }

    /// Release bridge-local resources before Destroy is forwarded. There are none today, so
    /// this only records the call. Safe to call any number of times.
    pub fn disconnect(&mut self) {
        if self.disconnected {
            return;
        }
        self.disconnected = true;
        debug!("Disconnected");
    }

    /// Forward a human-readable status message to the native side without blocking.
    ///
    /// Before bootstrap and after Destroy there is no native side; the message is dropped.
    pub fn status_message(&self, text: &str) {
        let sender = match (self.state, &self.diagnostics) {
            (BridgeState::Uninitialized | BridgeState::Destroyed, _) | (_, None) => None,
            (_, Some(diagnostics)) => diagnostics.sender(),
        };
        match sender {
            Some(sender) => {
                if let Err(e) = sender.send(text.to_string()) {
                    debug!("Dropping status message {:?}: {e:#}", text);
                }
            }
            None => {
                debug!("Diagnostic channel unavailable while {}, dropping {:?}", self.state, text)
            }
        }
    }
}

/// Combine the base handler result with the bridge's own. Neither error is lost: the base error
/// comes first, with the bridge error attached as context.
fn merge_results(
    forwarded: anyhow::Result<()>,
    entered: Result<(), BootstrapError>,
) -> Result<(), BootstrapError> {
    match (forwarded, entered) {
        (Ok(()), entered) => entered,
        (Err(e), Ok(())) => Err(BootstrapError::Host(e)),
        (Err(e), Err(entered)) => {
            Err(BootstrapError::Host(e.context(format!("the bridge also failed: {entered}"))))
        }
    }
}

impl<L: ModuleLoader, H: LifecycleHandler> Drop for NativeBootstrapBridge<L, H> {
    fn drop(&mut self) {
        // The diagnostic worker may be inside the application's status function.
        if let Some(mut diagnostics) = self.diagnostics.take() {
            diagnostics.close(true);
        }
        let modules = std::mem::take(&mut self.modules);
        if self.native_main.as_ref().is_some_and(NativeMain::is_running) {
            warn!("Native main is still running; keeping {} module(s) resident", modules.len());
            std::mem::forget(modules);
        } else {
            unload_in_reverse(modules);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::io;

    fn launch_error() -> BootstrapError {
        BootstrapError::Launch(io::Error::other("out of threads"))
    }

    #[test]
    fn base_error_wins_and_keeps_the_bridge_error() {
        let err = merge_results(Err(anyhow!("onStart threw")), Err(launch_error())).unwrap_err();
        assert!(matches!(err, BootstrapError::Host(_)));
        let message = err.to_string();
        assert!(message.contains("onStart threw"), "{message}");
        assert!(message.contains("failed to start the native entry point thread"), "{message}");
    }

    #[test]
    fn single_errors_pass_through() {
        assert!(merge_results(Ok(()), Ok(())).is_ok());
        assert!(matches!(
            merge_results(Ok(()), Err(launch_error())),
            Err(BootstrapError::Launch(_))
        ));
        assert!(matches!(
            merge_results(Err(anyhow!("onStop threw")), Ok(())),
            Err(BootstrapError::Host(_))
        ));
    }
}
