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

use log::LevelFilter;

/// Install the process logger. Safe to call more than once; only the first call has an effect.
#[cfg(target_os = "android")]
pub fn init(tag: &str) {
    android_logger::init_once(
        android_logger::Config::default().with_tag(tag).with_max_level(LevelFilter::Trace),
    );
}

/// Install the process logger. Safe to call more than once; only the first call has an effect.
///
/// `RUST_LOG` overrides the default `info` level.
#[cfg(not(target_os = "android"))]
pub fn init(tag: &str) {
    let result = env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .try_init();
    if result.is_ok() {
        log::debug!("Logging initialized for {}", tag);
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_is_idempotent() {
        super::init("native_bootstrap");
        super::init("native_bootstrap");
        log::info!("still logging");
    }
}
