use std::ffi::c_char;

macro_rules! greeting_text {
    () => {
        "Hello from Rust"
    };
}

pub const GREETING: &str = greeting_text!();

static GREETING_NUL: &str = concat!(greeting_text!(), "\0");

/// Returns a pointer to a static NUL-terminated greeting. The caller must not free it.
#[no_mangle]
pub extern "C" fn nativehook_greeting() -> *const c_char {
    GREETING_NUL.as_ptr().cast()
}
