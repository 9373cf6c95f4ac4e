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

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info};
use std::{
    ffi::{c_char, c_void, CString},
    ptr::NonNull,
    sync::mpsc::{self, channel},
    thread::{self, JoinHandle},
};

const WORKER_THREAD_NAME: &str = "NativeStatus";

/// Type signature of the optional status function exported by the application module.
pub type StatusFunction = unsafe extern "C" fn(message: *const c_char);

/// Receives status messages on the diagnostic worker thread.
pub trait MessageSink: Send {
    /// Deliver one message. If this returns Err, the sink is dropped and later messages are only
    /// logged.
    fn deliver(&mut self, message: &str) -> Result<()>;
}

/// Forwards messages to a status function exported by the native application.
pub struct NativeStatusSink {
    func: StatusFunction,
}

impl NativeStatusSink {
    /// # Safety
    ///
    /// `addr` must point to a function with the `StatusFunction` signature that stays resident
    /// while the sink is alive.
    pub unsafe fn from_symbol(addr: NonNull<c_void>) -> Self {
        // SAFETY: guaranteed by the caller.
        let func = unsafe { std::mem::transmute::<*mut c_void, StatusFunction>(addr.as_ptr()) };
        Self { func }
    }

    pub fn from_fn(func: StatusFunction) -> Self {
        Self { func }
    }
}

impl MessageSink for NativeStatusSink {
    fn deliver(&mut self, message: &str) -> Result<()> {
        let message = CString::new(message).context("status message contains a NUL byte")?;
        // SAFETY: `message` is a valid C string that outlives the call.
        unsafe { (self.func)(message.as_ptr()) };
        Ok(())
    }
}

/// Used when the application does not export a status function.
pub struct LogSink;

impl MessageSink for LogSink {
    fn deliver(&mut self, message: &str) -> Result<()> {
        info!("status: {}", message);
        Ok(())
    }
}

/// A cloneable handle used to send messages to the worker without blocking.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<String>,
}

impl Sender {
    /// Queue a message. Fails only if the worker is gone.
    pub fn send(&self, message: String) -> Result<()> {
        self.tx.send(message).map_err(|_| anyhow!("Failed to send the status message"))
    }
}

/// A worker thread that hands queued messages to a `MessageSink` in order.
pub struct DiagnosticChannel {
    sender: Option<Sender>,
    worker: Option<JoinHandle<()>>,
}

impl DiagnosticChannel {
    pub fn start<S: MessageSink + 'static>(mut sink: S) -> Result<Self> {
        let (tx, rx) = channel::<String>();
        let worker = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let mut active = true;
                for message in rx {
                    if !active {
                        debug!("status (sink disabled): {}", message);
                        continue;
                    }
                    if let Err(e) = sink.deliver(&message) {
                        error!("Failed to deliver a status message, disabling the sink: {e:#}");
                        active = false;
                    }
                }
            })
            .context("Failed to spawn the diagnostic worker")?;

        info!("Diagnostic channel started");
        Ok(Self { sender: Some(Sender { tx }), worker: Some(worker) })
    }

    pub fn sender(&self) -> Option<&Sender> {
        self.sender.as_ref()
    }

    /// Stop accepting messages. Already queued messages are still delivered. Returns without
    /// waiting for the worker unless `wait` is set; the worker is never detached, so a later
    /// `close(true)` or drop still waits for it.
    pub fn close(&mut self, wait: bool) {
        self.sender = None;
        if !wait {
            return;
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("The diagnostic worker panicked");
            }
        }
    }
}

impl Drop for DiagnosticChannel {
    // The sink may call into a native module; whoever unloads it must drop the channel first.
    fn drop(&mut self) {
        self.close(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl MessageSink for Recorder {
        fn deliver(&mut self, message: &str) -> Result<()> {
            self.0.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    #[test]
    fn messages_are_delivered_in_order() {
        let _ = env_logger::try_init();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut channel = DiagnosticChannel::start(Recorder(seen.clone())).unwrap();

        let sender = channel.sender().unwrap().clone();
        for i in 0..3 {
            sender.send(format!("message {i}")).unwrap();
        }
        drop(sender);
        channel.close(true);

        assert_eq!(*seen.lock().unwrap(), vec!["message 0", "message 1", "message 2"]);
        assert!(channel.sender().is_none());
    }

    struct FailOnce(Arc<Mutex<usize>>);

    impl MessageSink for FailOnce {
        fn deliver(&mut self, _: &str) -> Result<()> {
            *self.0.lock().unwrap() += 1;
            Err(anyhow!("native side is gone"))
        }
    }

    #[test]
    fn failing_sink_is_disabled_after_first_error() {
        let calls = Arc::new(Mutex::new(0));
        let mut channel = DiagnosticChannel::start(FailOnce(calls.clone())).unwrap();
        let sender = channel.sender().unwrap().clone();
        sender.send("first".to_string()).unwrap();
        sender.send("second".to_string()).unwrap();
        drop(sender);
        channel.close(true);

        assert_eq!(*calls.lock().unwrap(), 1);
    }

    struct Slow(Arc<Mutex<Vec<String>>>);

    impl MessageSink for Slow {
        fn deliver(&mut self, message: &str) -> Result<()> {
            thread::sleep(std::time::Duration::from_millis(100));
            self.0.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    #[test]
    fn drop_waits_for_queued_messages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut channel = DiagnosticChannel::start(Slow(seen.clone())).unwrap();
        channel.sender().unwrap().send("first".to_string()).unwrap();
        channel.sender().unwrap().send("second".to_string()).unwrap();

        channel.close(false);
        assert!(channel.sender().is_none());
        drop(channel);

        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn native_sink_rejects_interior_nul() {
        unsafe extern "C" fn ignore(_: *const c_char) {}
        let mut sink = NativeStatusSink::from_fn(ignore);
        assert!(sink.deliver("fine").is_ok());
        assert!(sink.deliver("not\0fine").is_err());
    }
}
