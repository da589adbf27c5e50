use std::{
    ffi::{c_char, c_void, CStr, CString},
    ptr::NonNull,
    sync::OnceLock,
};

use nix::libc;

use crate::config::Config;
use crate::error::{HookError, Result};

/// A loaded native library exposing the greeting entry point.
pub trait NativeLibrary: Send + Sync {
    fn greeting(&self) -> Result<String>;
}

/// Something that can bring a [`NativeLibrary`] into the process.
pub trait LibraryLoader {
    type Library: NativeLibrary;

    fn load(&self, name: &str) -> Result<Self::Library>;
}

/// Maps a bare library name to the file name the dynamic linker searches for.
///
/// Names that already look like a file (`libfoo.so`, `libc.so.6`, `./foo.so`) are kept as is.
pub fn library_filename(name: &str) -> String {
    let versioned_soname = name.starts_with("lib") && name.contains(".so");
    if name.contains('/') || name.ends_with(".so") || versioned_soname {
        name.to_string()
    } else {
        format!("lib{}.so", name)
    }
}

fn dlerror_message() -> String {
    // SAFETY: trivially safe.
    let error = unsafe { libc::dlerror() };
    if error.is_null() {
        return "unknown dynamic linker error".to_string();
    }
    // SAFETY: `error` is a valid C string returned by `dlerror()`.
    unsafe { CStr::from_ptr(error) }.to_string_lossy().into_owned()
}

fn c_string(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| HookError::InvalidName(name.to_string()))
}

/// A library opened with `dlopen`. The handle is never closed.
pub struct DlLibrary {
    name: String,
    handle: NonNull<c_void>,
    greeting_symbol: String,
}

// SAFETY: dlopen handles are process-global and the dl* functions are thread-safe.
unsafe impl Send for DlLibrary {}
unsafe impl Sync for DlLibrary {}

impl DlLibrary {
    pub fn open(name: &str, greeting_symbol: &str) -> Result<Self> {
        let file = library_filename(name);
        let c_file = c_string(&file)?;
        debug!("dlopen {}", file);

        // SAFETY: `c_file` is a valid C string. Running the library's initializers is the
        // whole point of loading it.
        let handle = unsafe { libc::dlopen(c_file.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        let handle = NonNull::new(handle).ok_or_else(|| HookError::LibraryLoad {
            name: file.clone(),
            reason: dlerror_message(),
        })?;

        info!("loaded {}", file);
        Ok(DlLibrary {
            name: file,
            handle,
            greeting_symbol: greeting_symbol.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn find_symbol(&self, symbol: &str) -> Result<NonNull<c_void>> {
        let c_symbol = c_string(symbol)?;
        // SAFETY: the handle is valid for the life of the process and `c_symbol` is a valid C
        // string.
        let address = unsafe { libc::dlsym(self.handle.as_ptr(), c_symbol.as_ptr()) };
        NonNull::new(address).ok_or_else(|| HookError::SymbolNotFound {
            name: symbol.to_string(),
            reason: dlerror_message(),
        })
    }
}

/// Calls a greeting entry point and copies its text.
///
/// # Safety
///
/// `address` must point to an `extern "C" fn() -> *const c_char` that returns null or a
/// NUL-terminated string valid for the duration of the call.
unsafe fn call_greeting(address: NonNull<c_void>) -> Result<String> {
    let greeting: extern "C" fn() -> *const c_char = std::mem::transmute(address.as_ptr());

    let text = greeting();
    if text.is_null() {
        return Ok(String::new());
    }
    Ok(CStr::from_ptr(text).to_str()?.to_owned())
}

impl NativeLibrary for DlLibrary {
    fn greeting(&self) -> Result<String> {
        let address = self.find_symbol(&self.greeting_symbol)?;
        // SAFETY: the greeting symbol is exported as `extern "C" fn() -> *const c_char`
        // returning a static string.
        unsafe { call_greeting(address) }
    }
}

/// Loads libraries with the platform dynamic linker.
pub struct DlLoader {
    greeting_symbol: String,
}

impl DlLoader {
    pub fn new(greeting_symbol: &str) -> Self {
        DlLoader {
            greeting_symbol: greeting_symbol.to_string(),
        }
    }
}

impl LibraryLoader for DlLoader {
    type Library = DlLibrary;

    fn load(&self, name: &str) -> Result<DlLibrary> {
        DlLibrary::open(name, &self.greeting_symbol)
    }
}

/// Guards a single load attempt of one named library.
///
/// The first [`LoadOnce::get_or_load`] runs the loader; every later call, from any thread,
/// observes that same outcome. A failed load is never retried.
pub struct LoadOnce<L: LibraryLoader> {
    loader: L,
    name: String,
    library: OnceLock<std::result::Result<L::Library, String>>,
}

impl<L: LibraryLoader> LoadOnce<L> {
    pub fn new(loader: L, name: &str) -> Self {
        LoadOnce {
            loader,
            name: name.to_string(),
            library: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.library.get(), Some(Ok(_)))
    }

    pub fn get_or_load(&self) -> Result<&L::Library> {
        let outcome = self.library.get_or_init(|| {
            info!("loading native library {}", self.name);
            self.loader.load(&self.name).map_err(|e| {
                error!("loading {} failed: {}", self.name, e);
                e.to_string()
            })
        });

        outcome.as_ref().map_err(|reason| HookError::Unavailable {
            name: self.name.clone(),
            reason: reason.clone(),
        })
    }
}

/// The process-wide guard for the real native library.
///
/// The first caller's configuration fixes the library name for the rest of the process.
pub fn process(config: &Config) -> &'static LoadOnce<DlLoader> {
    static PROCESS: OnceLock<LoadOnce<DlLoader>> = OnceLock::new();

    let guard = PROCESS.get_or_init(|| {
        LoadOnce::new(DlLoader::new(&config.greeting_symbol), &config.library_name)
    });
    if guard.name() != config.library_name {
        warn!(
            "native library already bound to {}, ignoring {}",
            guard.name(),
            config.library_name
        );
    }
    guard
}
