//! Entry points called by the Java side, `com.cnting.nativehookstudy.MainActivity`.

use std::{ffi::c_void, sync::Once};

use jni::objects::JObject;
use jni::sys::{jint, jstring, JNI_VERSION_1_6};
use jni::JNIEnv;

use crate::config::JNI_HOOK_PATTERN;
use crate::greeting::GREETING;
use crate::{logging, thread_watch};

static WATCH_THREADS: Once = Once::new();

#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn JNI_OnLoad(_vm: *mut jni::sys::JavaVM, _reserved: *mut c_void) -> jint {
    logging::init(false);
    info!("native library loaded");
    JNI_VERSION_1_6
}

/// Returns the greeting. The first call also starts watching thread creation in the runtime.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn Java_com_cnting_nativehookstudy_MainActivity_stringFromJNI<'local>(
    env: JNIEnv<'local>,
    _this: JObject<'local>,
) -> jstring {
    logging::init(false);

    WATCH_THREADS.call_once(|| match thread_watch::install(JNI_HOOK_PATTERN) {
        Ok(count) => info!("thread watch active on {} slots", count),
        Err(e) => warn!("thread watch not installed: {}", e),
    });

    match env.new_string(GREETING) {
        Ok(text) => text.into_raw(),
        Err(e) => {
            error!("failed to create java string: {}", e);
            std::ptr::null_mut()
        }
    }
}
