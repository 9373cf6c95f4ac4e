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

//! # Bootstrap configuration
//!
//! The ordered list of native modules to load and the name of the symbol that becomes the
//! process's entry point once they are resident.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// `argv[0]` handed to the native entry point. The SDL launcher uses the same value.
pub const ARGV0: &str = "app_process";

/// The role a module plays in the load order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleRole {
    /// A shared runtime other modules link against (e.g. SDL3, the C++ runtime).
    Runtime,
    /// An optional add-on to the runtime (e.g. SDL3_image).
    Support,
    /// The application module exporting the entry point. Always loaded last.
    Application,
}

/// A single module in the load list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSpec {
    name: String,
    role: ModuleRole,
}

impl ModuleSpec {
    pub fn new(name: impl Into<String>, role: ModuleRole) -> Self {
        Self { name: name.into(), role }
    }

    pub fn runtime(name: impl Into<String>) -> Self {
        Self::new(name, ModuleRole::Runtime)
    }

    pub fn support(name: impl Into<String>) -> Self {
        Self::new(name, ModuleRole::Support)
    }

    pub fn application(name: impl Into<String>) -> Self {
        Self::new(name, ModuleRole::Application)
    }

    /// The bare module name, e.g. `SDL3`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> ModuleRole {
        self.role
    }

    /// File name the platform loader resolves for this module, e.g. `libSDL3.so`.
    pub fn file_name(&self) -> String {
        format!("{}{}{}", std::env::consts::DLL_PREFIX, self.name, std::env::consts::DLL_SUFFIX)
    }

    /// Path to open: inside `library_dir` if given, otherwise the bare file name so that the
    /// platform search path applies.
    pub fn resolve_path(&self, library_dir: Option<&Path>) -> PathBuf {
        match library_dir {
            Some(dir) => dir.join(self.file_name()),
            None => PathBuf::from(self.file_name()),
        }
    }
}

impl fmt::Display for ModuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Problems with a `BootstrapConfig`. All of them are detected before anything is loaded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("the module load list is empty")]
    Empty,
    #[error("the module load list has no runtime module")]
    MissingRuntime,
    #[error("the module load list has no application module")]
    MissingApplication,
    #[error("only one application module is allowed, found {0}")]
    MultipleApplications(usize),
    #[error("the application module {0} must be the last entry")]
    ApplicationNotLast(String),
    #[error("module {0} is listed more than once")]
    DuplicateModule(String),
    #[error("invalid module name {0:?}")]
    InvalidModuleName(String),
    #[error("invalid entry point name {0:?}")]
    InvalidEntryPoint(String),
    #[error("invalid diagnostic symbol name {0:?}")]
    InvalidDiagnosticSymbol(String),
}

impl ConfigError {
    /// The module the error is about, or a placeholder for list-level errors.
    pub fn module(&self) -> &str {
        match self {
            ConfigError::ApplicationNotLast(name)
            | ConfigError::DuplicateModule(name)
            | ConfigError::InvalidModuleName(name) => name,
            ConfigError::MissingApplication | ConfigError::MultipleApplications(_) => {
                "<application>"
            }
            ConfigError::MissingRuntime => "<runtime>",
            ConfigError::Empty
            | ConfigError::InvalidEntryPoint(_)
            | ConfigError::InvalidDiagnosticSymbol(_) => "<none>",
        }
    }

    /// The symbol name the error is about, if it is a symbol error.
    pub fn symbol(&self) -> Option<&str> {
        match self {
            ConfigError::InvalidEntryPoint(symbol)
            | ConfigError::InvalidDiagnosticSymbol(symbol) => Some(symbol),
            _ => None,
        }
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['\0', '/', '\\'])
}

/// Ordered list of modules. Later entries may depend on symbols exported by earlier ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleLoadList(Vec<ModuleSpec>);

impl ModuleLoadList {
    pub fn new(modules: Vec<ModuleSpec>) -> Self {
        Self(modules)
    }

    pub fn modules(&self) -> &[ModuleSpec] {
        &self.0
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(ModuleSpec::name).collect()
    }

    /// The terminal application module, if the list has one in the last position.
    pub fn application(&self) -> Option<&ModuleSpec> {
        self.0.last().filter(|m| m.role == ModuleRole::Application)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleSpec> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let last = self.0.last().ok_or(ConfigError::Empty)?;

        let mut seen = HashSet::new();
        for module in &self.0 {
            if !is_valid_name(&module.name) {
                return Err(ConfigError::InvalidModuleName(module.name.clone()));
            }
            if !seen.insert(module.name.as_str()) {
                return Err(ConfigError::DuplicateModule(module.name.clone()));
            }
        }

        if !self.0.iter().any(|m| m.role == ModuleRole::Runtime) {
            return Err(ConfigError::MissingRuntime);
        }
        match self.0.iter().filter(|m| m.role == ModuleRole::Application).count() {
            0 => return Err(ConfigError::MissingApplication),
            1 => {}
            n => return Err(ConfigError::MultipleApplications(n)),
        }
        if last.role != ModuleRole::Application {
            let app = self.0.iter().find(|m| m.role == ModuleRole::Application);
            return Err(ConfigError::ApplicationNotLast(
                app.map(|m| m.name.clone()).unwrap_or_default(),
            ));
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ModuleLoadList {
    type Item = &'a ModuleSpec;
    type IntoIter = std::slice::Iter<'a, ModuleSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Name of the callable the application module exports as its `main`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPointName(String);

impl EntryPointName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.0.is_empty() || self.0.contains('\0') {
            return Err(ConfigError::InvalidEntryPoint(self.0.clone()));
        }
        Ok(())
    }
}

impl fmt::Display for EntryPointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything the bridge needs to bootstrap the native application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    pub modules: ModuleLoadList,
    pub entry_point: EntryPointName,
    /// Passed to the entry point after `argv[0]`.
    pub arguments: Vec<String>,
    /// Directory holding the extracted native libraries. `None` uses the loader search path.
    pub library_dir: Option<PathBuf>,
    /// Optional `extern "C" fn(*const c_char)` exported by the application module that
    /// receives status messages. Without one, status messages are logged.
    pub diagnostic_symbol: Option<String>,
    /// Whether the bridge runs the entry point itself on the first Start. Off when the base
    /// runtime (SDLActivity's SDLThread) already calls it.
    pub launch_entry_point: bool,
}

// Modules of the story player, in load order. The C++ runtime is needed by SDL3_image and the
// application, so it goes right after SDL3.
const STORY_PLAYER_MODULES: &[(&str, ModuleRole)] = &[
    ("SDL3", ModuleRole::Runtime),
    ("c++_shared", ModuleRole::Runtime),
    ("SDL3_image", ModuleRole::Support),
    ("main", ModuleRole::Application),
];
const STORY_PLAYER_ENTRY_POINT: &str = "main";

const _: () = {
    let n = STORY_PLAYER_MODULES.len();
    assert!(n > 0, "the module load list must not be empty");
    assert!(
        matches!(STORY_PLAYER_MODULES[0].1, ModuleRole::Runtime),
        "the first module must be a runtime"
    );
    assert!(
        matches!(STORY_PLAYER_MODULES[n - 1].1, ModuleRole::Application),
        "the application module must be loaded last"
    );
    let mut i = 0;
    while i < n - 1 {
        assert!(
            !matches!(STORY_PLAYER_MODULES[i].1, ModuleRole::Application),
            "only one application module is allowed"
        );
        i += 1;
    }
    assert!(!STORY_PLAYER_ENTRY_POINT.is_empty(), "the entry point name must not be empty");
};

impl BootstrapConfig {
    pub fn new(modules: ModuleLoadList, entry_point: EntryPointName) -> Self {
        Self {
            modules,
            entry_point,
            arguments: Vec::new(),
            library_dir: None,
            diagnostic_symbol: None,
            launch_entry_point: true,
        }
    }

    /// The configuration the story player ships with. SDLActivity runs `main` on its own
    /// thread, so the bridge only loads and resolves it.
    pub fn story_player() -> Self {
        let modules = STORY_PLAYER_MODULES
            .iter()
            .map(|&(name, role)| ModuleSpec::new(name, role))
            .collect();
        Self::new(ModuleLoadList::new(modules), EntryPointName::new(STORY_PLAYER_ENTRY_POINT))
            .with_entry_point_launch(false)
    }

    pub fn with_arguments<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = arguments.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.library_dir = Some(dir.into());
        self
    }

    pub fn with_diagnostic_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.diagnostic_symbol = Some(symbol.into());
        self
    }

    pub fn with_entry_point_launch(mut self, launch: bool) -> Self {
        self.launch_entry_point = launch;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.modules.validate()?;
        self.validate_symbols()
    }

    /// Check the entry point and diagnostic symbol names only.
    pub fn validate_symbols(&self) -> Result<(), ConfigError> {
        self.entry_point.validate()?;
        match &self.diagnostic_symbol {
            Some(symbol) if symbol.is_empty() || symbol.contains('\0') => {
                Err(ConfigError::InvalidDiagnosticSymbol(symbol.clone()))
            }
            _ => Ok(()),
        }
    }
}
