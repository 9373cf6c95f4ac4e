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

//! # Story player activity bindings
//!
//! JNI entry points for `org.openstoryteller.storyplayer.StoryActivity`. Each lifecycle override
//! of the activity calls the matching `native*` method, which drives the process-wide bridge.
//! The bridge forwards to the `org.libsdl.app.SDLActivity` implementation non-virtually, which is
//! what `super.onX()` does in Java.
//!
//! The activity itself is `java/org/openstoryteller/storyplayer/StoryActivity.java` in this crate.
//! SDLActivity runs the entry point on its own SDLThread, so the story player configuration does
//! not let the bridge launch it.

use anyhow::Result;
use jni::objects::{JObject, JString, JValue};
use jni::sys::{jobject, jobjectArray, jstring};
use jni::JNIEnv;
use log::{debug, error, info, trace};
use std::sync::{LazyLock, Mutex, PoisonError};

use crate::bridge::NativeBootstrapBridge;
use crate::config::BootstrapConfig;
use crate::error::BootstrapError;
use crate::library_loader::DlopenLoader;
use crate::lifecycle::{LifecycleEvent, LifecycleHandler};

const LOG_TAG: &str = "StoryActivity";
const SUPERCLASS: &str = "org/libsdl/app/SDLActivity";

type ActivityBridge = NativeBootstrapBridge<DlopenLoader, SuperclassHandler>;

// Created by nativeInit.
static BRIDGE: LazyLock<Mutex<Option<ActivityBridge>>> = LazyLock::new(|| Mutex::new(None));

/// The JNI arguments of the lifecycle call being forwarded. Only valid during that call.
pub struct HostCall {
    env: *mut jni::sys::JNIEnv,
    activity: jobject,
    saved_state: jobject,
}

/// Calls the `SDLActivity` implementation of each lifecycle method.
pub struct SuperclassHandler;

impl LifecycleHandler for SuperclassHandler {
    type State = HostCall;

    fn on_lifecycle_event(&mut self, event: LifecycleEvent, call: &HostCall) -> Result<()> {
        // SAFETY: `call.env` is the JNIEnv of the JNI call in progress on this thread.
        let mut env = unsafe { JNIEnv::from_raw(call.env) }?;
        // SAFETY: both references are owned by the JNI call in progress.
        let activity = unsafe { JObject::from_raw(call.activity) };
        let saved_state = unsafe { JObject::from_raw(call.saved_state) };

        let (name, sig) = match event {
            LifecycleEvent::Create => ("onCreate", "(Landroid/os/Bundle;)V"),
            LifecycleEvent::Start => ("onStart", "()V"),
            LifecycleEvent::Stop => ("onStop", "()V"),
            LifecycleEvent::Destroy => ("onDestroy", "()V"),
        };
        let create_args = [JValue::Object(&saved_state)];
        let args: &[JValue] = if event == LifecycleEvent::Create { &create_args } else { &[] };
        // A Java exception thrown by the superclass stays pending and reaches the caller of the
        // native method.
        env.call_nonvirtual_method(&activity, SUPERCLASS, name, sig, args)?;
        Ok(())
    }
}

fn lock_bridge() -> std::sync::MutexGuard<'static, Option<ActivityBridge>> {
    BRIDGE.lock().unwrap_or_else(PoisonError::into_inner)
}

fn throw(env: &mut JNIEnv, e: &BootstrapError) {
    if env.exception_check().unwrap_or(true) {
        return;
    }
    let class = if e.is_fatal() {
        "java/lang/UnsatisfiedLinkError"
    } else {
        "java/lang/IllegalStateException"
    };
    if env.throw_new(class, e.to_string()).is_err() {
        error!("Failed to throw {}: {}", class, e);
    }
}

fn dispatch(env: &mut JNIEnv, activity: &JObject, saved_state: &JObject, event: LifecycleEvent) {
    let call = HostCall {
        env: env.get_raw(),
        activity: activity.as_raw(),
        saved_state: saved_state.as_raw(),
    };
    let result = match lock_bridge().as_mut() {
        Some(bridge) => bridge.on_lifecycle_event(event, &call),
        None => {
            error!("{} received before nativeInit", event);
            return;
        }
    };
    match result {
        Ok(outcome) => trace!("{}: {:?}", event, outcome),
        Err(e) => {
            error!("{}: {}", event, e);
            throw(env, &e);
        }
    }
}

/// Initializes logging and the bridge. `library_dir` is `ApplicationInfo.nativeLibraryDir`.
#[no_mangle]
pub extern "system" fn Java_org_openstoryteller_storyplayer_StoryActivity_nativeInit<'a>(
    mut env: JNIEnv<'a>,
    _obj: JObject<'a>,
    library_dir: JString<'a>,
) {
    crate::logging::init(LOG_TAG);

    let mut config = BootstrapConfig::story_player();
    if !library_dir.as_raw().is_null() {
        match env.get_string(&library_dir) {
            Ok(dir) => config = config.with_library_dir(String::from(dir)),
            Err(e) => error!("Failed to read the native library dir, using the search path: {e}"),
        }
    }

    let mut bridge = lock_bridge();
    if bridge.is_some() {
        debug!("nativeInit called again, keeping the existing bridge");
        return;
    }
    info!("Native init, modules={:?}", config.modules.names());
    *bridge = Some(NativeBootstrapBridge::new(config, DlopenLoader::new(), SuperclassHandler));
}

/// Returns the names of the native libraries in load order.
#[no_mangle]
pub extern "system" fn Java_org_openstoryteller_storyplayer_StoryActivity_nativeGetLibraries<
    'a,
>(
    mut env: JNIEnv<'a>,
    _obj: JObject<'a>,
) -> jobjectArray {
    // Read from the compiled-in configuration: SDLActivity asks for it from inside onCreate,
    // while the bridge is locked.
    let config = BootstrapConfig::story_player();
    let names = config.modules.names();
    let build = |env: &mut JNIEnv<'a>| -> jni::errors::Result<jobjectArray> {
        let array = env.new_object_array(names.len() as i32, "java/lang/String", JObject::null())?;
        for (i, name) in names.iter().enumerate() {
            let name = env.new_string(*name)?;
            env.set_object_array_element(&array, i as i32, name)?;
        }
        Ok(array.into_raw())
    };
    build(&mut env).unwrap_or_else(|e| {
        error!("Failed to build the library list: {e}");
        std::ptr::null_mut()
    })
}

/// Returns the name of the native entry point.
#[no_mangle]
pub extern "system" fn Java_org_openstoryteller_storyplayer_StoryActivity_nativeGetMainFunction<
    'a,
>(
    mut env: JNIEnv<'a>,
    _obj: JObject<'a>,
) -> jstring {
    let config = BootstrapConfig::story_player();
    match env.new_string(config.entry_point.as_str()) {
        Ok(name) => name.into_raw(),
        Err(e) => {
            error!("Failed to return the entry point name: {e}");
            std::ptr::null_mut()
        }
    }
}

#[no_mangle]
pub extern "system" fn Java_org_openstoryteller_storyplayer_StoryActivity_nativeOnCreate<'a>(
    mut env: JNIEnv<'a>,
    obj: JObject<'a>,
    saved_state: JObject<'a>,
) {
    dispatch(&mut env, &obj, &saved_state, LifecycleEvent::Create);
}

#[no_mangle]
pub extern "system" fn Java_org_openstoryteller_storyplayer_StoryActivity_nativeOnStart<'a>(
    mut env: JNIEnv<'a>,
    obj: JObject<'a>,
) {
    dispatch(&mut env, &obj, &JObject::null(), LifecycleEvent::Start);
}

#[no_mangle]
pub extern "system" fn Java_org_openstoryteller_storyplayer_StoryActivity_nativeOnStop<'a>(
    mut env: JNIEnv<'a>,
    obj: JObject<'a>,
) {
    dispatch(&mut env, &obj, &JObject::null(), LifecycleEvent::Stop);
}

#[no_mangle]
pub extern "system" fn Java_org_openstoryteller_storyplayer_StoryActivity_nativeOnDestroy<'a>(
    mut env: JNIEnv<'a>,
    obj: JObject<'a>,
) {
    dispatch(&mut env, &obj, &JObject::null(), LifecycleEvent::Destroy);
}

/// Forwards a status string to the native application.
#[no_mangle]
pub extern "system" fn Java_org_openstoryteller_storyplayer_StoryActivity_printFromJava<'a>(
    mut env: JNIEnv<'a>,
    _obj: JObject<'a>,
    txt: JString<'a>,
) {
    let text: String = match env.get_string(&txt) {
        Ok(text) => text.into(),
        Err(e) => {
            debug!("Dropping an unreadable status message: {e}");
            return;
        }
    };
    // The bridge is locked while a lifecycle event is in progress, possibly on this very
    // thread. Never wait for it.
    match BRIDGE.try_lock() {
        Ok(guard) => match guard.as_ref() {
            Some(bridge) => bridge.status_message(&text),
            None => debug!("Dropping status message before nativeInit: {:?}", text),
        },
        Err(_) => debug!("Bridge busy, dropping status message {:?}", text),
    }
}
