#[macro_use]
extern crate log;

pub mod activity;
pub mod android_jni;
pub mod config;
pub mod elf;
pub mod error;
pub mod greeting;
pub mod hook;
pub mod loader;
pub mod logging;
pub mod proc;
pub mod thread_watch;

pub use activity::MainActivity;
pub use config::Config;
pub use error::{HookError, Result};
pub use loader::{DlLoader, LibraryLoader, LoadOnce, NativeLibrary};
