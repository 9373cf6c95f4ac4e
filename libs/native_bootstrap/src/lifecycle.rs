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

//! # Lifecycle
//!
//! Host lifecycle events, the bridge state machine, and the trait the bridge forwards events to.

use anyhow::Result;
use std::fmt;

use crate::error::LifecycleOrderingViolation;

/// Lifecycle events delivered by the host framework, in host order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Create,
    Start,
    Stop,
    Destroy,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleEvent::Create => "onCreate",
            LifecycleEvent::Start => "onStart",
            LifecycleEvent::Stop => "onStop",
            LifecycleEvent::Destroy => "onDestroy",
        };
        f.write_str(name)
    }
}

/// State of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeState {
    /// No module is loaded. Also the state after a failed bootstrap.
    Uninitialized,
    /// Every module is loaded and the entry point is resolved.
    Loaded,
    Running,
    Stopped,
    /// Terminal.
    Destroyed,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgeState::Uninitialized => "uninitialized",
            BridgeState::Loaded => "loaded",
            BridgeState::Running => "running",
            BridgeState::Stopped => "stopped",
            BridgeState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// What the state machine says about an event, before any side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    /// Create on an uninitialized bridge: load the modules.
    Bootstrap,
    /// Move to the given state.
    To(BridgeState),
    /// Move to the given state without forwarding the event.
    Discard(BridgeState),
    /// Not allowed in the current state. `forward` tells whether the base handler may still see
    /// the event.
    Reject { forward: bool },
}

impl BridgeState {
    pub(crate) fn transition(self, event: LifecycleEvent) -> Transition {
        use BridgeState::*;
        use LifecycleEvent::*;

        match (self, event) {
            (Destroyed, _) => Transition::Reject { forward: false },
            (_, Destroy) => Transition::To(Destroyed),
            (Uninitialized, Create) => Transition::Bootstrap,
            (Loaded | Stopped, Start) => Transition::To(Running),
            (Running, Stop) => Transition::To(Stopped),
            _ => Transition::Reject { forward: true },
        }
    }

    /// Transitions once bootstrap has failed fatally. Native code never came up, so the base
    /// handler sees nothing more; Destroy only tears down the bridge.
    pub(crate) fn transition_after_failure(self, event: LifecycleEvent) -> Transition {
        match (self, event) {
            (BridgeState::Destroyed, _) => Transition::Reject { forward: false },
            (_, LifecycleEvent::Destroy) => Transition::Discard(BridgeState::Destroyed),
            _ => Transition::Reject { forward: false },
        }
    }
}

/// Result of handling one lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// The event was valid; the bridge is now in the given state.
    Applied(BridgeState),
    /// The event was out of order. The bridge state did not change.
    Violation { violation: LifecycleOrderingViolation, forwarded: bool },
}

impl LifecycleOutcome {
    pub fn is_violation(&self) -> bool {
        matches!(self, LifecycleOutcome::Violation { .. })
    }
}

/// The base lifecycle implementation the bridge forwards to.
///
/// On Android this is the superclass of the activity; tests use a recorder.
pub trait LifecycleHandler {
    /// Opaque state the host passes along with each event (e.g. the saved instance bundle).
    type State;

    /// Handle one event. Errors are passed back to the host unchanged.
    fn on_lifecycle_event(&mut self, event: LifecycleEvent, state: &Self::State) -> Result<()>;
}

impl<H: LifecycleHandler + ?Sized> LifecycleHandler for Box<H> {
    type State = H::State;

    fn on_lifecycle_event(&mut self, event: LifecycleEvent, state: &Self::State) -> Result<()> {
        (**self).on_lifecycle_event(event, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BridgeState::*;
    use LifecycleEvent::*;

    #[test]
    fn valid_transitions() {
        assert_eq!(Uninitialized.transition(Create), Transition::Bootstrap);
        assert_eq!(Loaded.transition(Start), Transition::To(Running));
        assert_eq!(Running.transition(Stop), Transition::To(Stopped));
        assert_eq!(Stopped.transition(Start), Transition::To(Running));
        for state in [Uninitialized, Loaded, Running, Stopped] {
            assert_eq!(state.transition(Destroy), Transition::To(Destroyed));
        }
    }

    #[test]
    fn out_of_order_events_are_rejected_but_forwarded() {
        let rejected = [
            (Uninitialized, Start),
            (Uninitialized, Stop),
            (Loaded, Create),
            (Loaded, Stop),
            (Running, Create),
            (Running, Start),
            (Stopped, Create),
            (Stopped, Stop),
        ];
        for (state, event) in rejected {
            assert_eq!(
                state.transition(event),
                Transition::Reject { forward: true },
                "{event} while {state}"
            );
        }
    }

    #[test]
    fn nothing_is_forwarded_after_destroy() {
        for event in [Create, Start, Stop, Destroy] {
            assert_eq!(Destroyed.transition(event), Transition::Reject { forward: false });
        }
    }

    #[test]
    fn failed_bootstrap_forwards_nothing() {
        for event in [Create, Start, Stop] {
            assert_eq!(
                Uninitialized.transition_after_failure(event),
                Transition::Reject { forward: false },
                "{event}"
            );
        }
        assert_eq!(
            Uninitialized.transition_after_failure(Destroy),
            Transition::Discard(Destroyed)
        );
        assert_eq!(
            Destroyed.transition_after_failure(Destroy),
            Transition::Reject { forward: false }
        );
    }

    #[test]
    fn display_uses_host_callback_names() {
        assert_eq!(Create.to_string(), "onCreate");
        assert_eq!(Destroy.to_string(), "onDestroy");
        assert_eq!(Running.to_string(), "running");
    }
}
