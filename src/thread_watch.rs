use std::{
    ffi::{c_int, c_void, CString},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use nix::libc::{self, pthread_attr_t, pthread_t};

use crate::error::{HookError, Result};
use crate::hook::{self, HookedSlot};

pub const SYMBOL: &str = "pthread_create";

type StartRoutine = extern "C" fn(*mut c_void) -> *mut c_void;
type PthreadCreate =
    unsafe extern "C" fn(*mut pthread_t, *const pthread_attr_t, StartRoutine, *mut c_void) -> c_int;

/// Address of the `pthread_create` the proxy forwards to. Zero until resolved.
static REAL: AtomicUsize = AtomicUsize::new(0);
static OBSERVED: AtomicUsize = AtomicUsize::new(0);
static INSTALLED: Mutex<Vec<HookedSlot>> = Mutex::new(Vec::new());

/// Looks up the next `pthread_create` after this object, or the global one.
fn resolve_real() -> Result<usize> {
    let name = CString::new(SYMBOL).map_err(|_| HookError::InvalidName(SYMBOL.to_string()))?;
    for handle in [libc::RTLD_NEXT, libc::RTLD_DEFAULT] {
        // SAFETY: pseudo handles are always valid and `name` is a valid C string.
        let address = unsafe { libc::dlsym(handle, name.as_ptr()) } as usize;
        if address != 0 && address != proxy_address() {
            return Ok(address);
        }
    }
    Err(HookError::SymbolNotFound {
        name: SYMBOL.to_string(),
        reason: "not exported by any loaded object".to_string(),
    })
}

/// The `pthread_create` the proxy forwards to, resolved on first use.
fn real() -> Result<PthreadCreate> {
    let mut address = REAL.load(Ordering::Acquire);
    if address == 0 {
        address = resolve_real()?;
        REAL.store(address, Ordering::Release);
    }
    // SAFETY: `address` was resolved by the dynamic linker for `pthread_create`.
    Ok(unsafe { std::mem::transmute::<usize, PthreadCreate>(address) })
}

/// Stands in for `pthread_create` in hooked modules.
///
/// # Safety
///
/// Same contract as `pthread_create`.
pub unsafe extern "C" fn proxy_pthread_create(
    thread: *mut pthread_t,
    attr: *const pthread_attr_t,
    start: StartRoutine,
    arg: *mut c_void,
) -> c_int {
    OBSERVED.fetch_add(1, Ordering::SeqCst);
    info!("thread creation observed");

    match real() {
        Ok(real) => real(thread, attr, start, arg),
        Err(e) => {
            error!("cannot forward thread creation: {}", e);
            libc::EAGAIN
        }
    }
}

fn proxy_address() -> usize {
    proxy_pthread_create as PthreadCreate as usize
}

/// Hooks `pthread_create` in every module matching `pattern`. Returns how many slots were
/// newly redirected; slots hooked by an earlier call are not counted again.
///
/// The forwarding target is resolved before any slot is written.
pub fn install(pattern: &str) -> Result<usize> {
    let mut installed = INSTALLED.lock().unwrap_or_else(|e| e.into_inner());
    real()?;
    let hooked = hook::install(pattern, SYMBOL, proxy_address())?;

    let count = hooked.len();
    installed.extend(hooked);

    info!("watching thread creation in {} ({} new slots)", pattern, count);
    Ok(count)
}

/// Restores every slot hooked so far.
pub fn uninstall() -> Result<()> {
    let mut installed = INSTALLED.lock().unwrap_or_else(|e| e.into_inner());
    while let Some(slot) = installed.pop() {
        if let Err(e) = hook::restore(&slot) {
            installed.push(slot);
            return Err(e);
        }
    }
    Ok(())
}

/// Thread creations seen by the proxy since process start.
pub fn observed() -> usize {
    OBSERVED.load(Ordering::SeqCst)
}
