use std::{ffi::c_void, path::PathBuf, ptr::NonNull};

use nix::sys::mman::{mprotect, ProtFlags};

use crate::elf;
use crate::error::{HookError, Result};
use crate::proc::{self, Maps};

/// A GOT slot that was redirected, with what it held before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookedSlot {
    pub module: PathBuf,
    pub symbol: String,
    pub address: usize,
    pub previous: usize,
    /// Protection of the slot's page before it was patched.
    pub protection: ProtFlags,
}

/// Translates `rwxp` flags into page protection bits.
pub fn protection(perms: &str) -> ProtFlags {
    let mut prot = ProtFlags::PROT_NONE;
    let mut flags = perms.chars();
    if flags.next() == Some('r') {
        prot |= ProtFlags::PROT_READ;
    }
    if flags.next() == Some('w') {
        prot |= ProtFlags::PROT_WRITE;
    }
    if flags.next() == Some('x') {
        prot |= ProtFlags::PROT_EXEC;
    }
    prot
}

/// Writes `value` into the pointer slot at `address` and returns the old value.
///
/// The slot's page is made writable for the store and set back to `restore` afterwards. Once
/// the store happened the old value is always returned; a failure to restore the protection
/// only leaves the page writable.
///
/// # Safety
///
/// `address` must be an aligned, mapped pointer slot whose page currently has protection
/// `restore`, and nothing may rely on the old value staying in place.
pub unsafe fn patch_slot(address: usize, value: usize, restore: ProtFlags) -> Result<usize> {
    let page_size = proc::page_size();
    let page = proc::page_start(address, page_size);
    let page_ptr = NonNull::new(page as *mut c_void).ok_or(HookError::Unmapped(address))?;

    mprotect(page_ptr, page_size, ProtFlags::PROT_READ | ProtFlags::PROT_WRITE)?;

    let slot = address as *mut usize;
    let previous = slot.read_volatile();
    slot.write_volatile(value);

    if let Err(e) = mprotect(page_ptr, page_size, restore) {
        warn!("page 0x{:x} left writable: {}", page, e);
    }
    Ok(previous)
}

/// A slot selected for patching, before anything was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSlot {
    pub module: PathBuf,
    pub symbol: String,
    pub address: usize,
    pub protection: ProtFlags,
}

/// Patches every planned slot with `replacement`.
///
/// All or nothing: if one slot fails, the slots patched before it are put back and the error
/// is returned.
pub fn patch_all(plan: &[PlannedSlot], replacement: usize) -> Result<Vec<HookedSlot>> {
    let mut hooked: Vec<HookedSlot> = Vec::new();

    for planned in plan {
        // SAFETY: planned slots are GOT entries inside live mappings with the recorded
        // protection.
        match unsafe { patch_slot(planned.address, replacement, planned.protection) } {
            Ok(previous) => {
                info!(
                    "hooked {} in {} at 0x{:x} (was 0x{:x})",
                    planned.symbol,
                    planned.module.display(),
                    planned.address,
                    previous
                );
                hooked.push(HookedSlot {
                    module: planned.module.clone(),
                    symbol: planned.symbol.clone(),
                    address: planned.address,
                    previous,
                    protection: planned.protection,
                });
            }
            Err(e) => {
                error!("patching 0x{:x} failed: {}, rolling back", planned.address, e);
                while let Some(slot) = hooked.pop() {
                    if let Err(e) = restore(&slot) {
                        error!("rollback of 0x{:x} failed: {}", slot.address, e);
                    }
                }
                return Err(e);
            }
        }
    }

    Ok(hooked)
}

/// Selects the slots that [`install`] would patch. Nothing is written.
pub fn plan(pattern: &str, symbol: &str, replacement: usize) -> Result<Vec<PlannedSlot>> {
    let maps = Maps::current()?;
    let modules = maps.modules(pattern)?;

    let mut imported = false;
    let mut plan: Vec<PlannedSlot> = Vec::new();

    for module in &modules {
        let slots = match elf::import_slots(module, symbol) {
            Ok(slots) => slots,
            Err(e) => {
                warn!("skipping {}: {}", module.path.display(), e);
                continue;
            }
        };

        for slot in slots {
            imported = true;
            let mapping = maps
                .find(slot.address)
                .ok_or(HookError::Unmapped(slot.address))?;

            // SAFETY: the slot lies in a live, readable mapping of `module`.
            let current = unsafe { (slot.address as *const usize).read_volatile() };
            if current == replacement {
                debug!("{}: 0x{:x} already hooked", module.path.display(), slot.address);
                continue;
            }

            plan.push(PlannedSlot {
                module: module.path.clone(),
                symbol: symbol.to_string(),
                address: slot.address,
                protection: protection(&mapping.perms),
            });
        }
    }

    if !imported {
        return Err(HookError::SymbolNotImported {
            pattern: pattern.to_string(),
            symbol: symbol.to_string(),
        });
    }
    Ok(plan)
}

/// Redirects every import of `symbol` in the modules matching `pattern` to `replacement`.
///
/// Slots already pointing at `replacement` are left alone and not reported. Modules that
/// don't import `symbol` are skipped; it is an error only if none of them does. On error no
/// slot is left redirected.
pub fn install(pattern: &str, symbol: &str, replacement: usize) -> Result<Vec<HookedSlot>> {
    let plan = plan(pattern, symbol, replacement)?;
    patch_all(&plan, replacement)
}

/// Puts back the value a slot held before [`install`].
pub fn restore(slot: &HookedSlot) -> Result<()> {
    // SAFETY: the slot was patched by `install` and its page still has the recorded
    // protection.
    unsafe { patch_slot(slot.address, slot.previous, slot.protection)? };
    info!(
        "restored {} in {} at 0x{:x}",
        slot.symbol,
        slot.module.display(),
        slot.address
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::mman::{mmap_anonymous, munmap, MapFlags};
    use std::num::NonZeroUsize;

    #[test]
    fn protection_from_perms() {
        assert_eq!(protection("r--p"), ProtFlags::PROT_READ);
        assert_eq!(
            protection("rw-p"),
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE
        );
        assert_eq!(
            protection("r-xp"),
            ProtFlags::PROT_READ | ProtFlags::PROT_EXEC
        );
        assert_eq!(protection("---p"), ProtFlags::PROT_NONE);
    }

    #[test]
    fn patch_read_only_slot() {
        let page_size = proc::page_size();
        // SAFETY: a fresh anonymous private mapping owned by this test.
        let page = unsafe {
            mmap_anonymous(
                None,
                NonZeroUsize::new(page_size).unwrap(),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE,
            )
        }
        .unwrap();

        let slot = page.as_ptr() as usize + 2 * std::mem::size_of::<usize>();
        unsafe {
            (slot as *mut usize).write(0x1111);
            mprotect(page, page_size, ProtFlags::PROT_READ).unwrap();
        }

        let previous = unsafe { patch_slot(slot, 0x2222, ProtFlags::PROT_READ) }.unwrap();
        assert_eq!(previous, 0x1111);
        assert_eq!(unsafe { (slot as *const usize).read() }, 0x2222);

        let hooked = HookedSlot {
            module: PathBuf::from("anonymous"),
            symbol: "test".to_string(),
            address: slot,
            previous,
            protection: ProtFlags::PROT_READ,
        };
        restore(&hooked).unwrap();
        assert_eq!(unsafe { (slot as *const usize).read() }, 0x1111);

        unsafe { munmap(page, page_size) }.unwrap();
    }

    #[test]
    fn failed_patch_rolls_back_earlier_slots() {
        let page_size = proc::page_size();
        // SAFETY: a fresh anonymous private mapping owned by this test.
        let pages = unsafe {
            mmap_anonymous(
                None,
                NonZeroUsize::new(2 * page_size).unwrap(),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE,
            )
        }
        .unwrap();
        let first = pages.as_ptr() as usize;
        let second = first + page_size;
        unsafe {
            (first as *mut usize).write(0x1111);
            munmap(NonNull::new(second as *mut c_void).unwrap(), page_size).unwrap();
        }

        let planned = |address| PlannedSlot {
            module: PathBuf::from("anonymous"),
            symbol: "test".to_string(),
            address,
            protection: ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
        };
        let result = patch_all(&[planned(first), planned(second)], 0x2222);

        assert!(matches!(result, Err(HookError::Protect(_))));
        assert_eq!(unsafe { (first as *const usize).read() }, 0x1111);

        unsafe { munmap(pages, page_size) }.unwrap();
    }

    #[test]
    fn missing_module_is_reported() {
        let _lock = crate::tests::process_lock();
        assert!(matches!(
            install("*/libnativehook-absent.so", "pthread_create", 0),
            Err(HookError::ModuleNotFound(_))
        ));
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn symbol_not_imported_is_reported() {
        let _lock = crate::tests::process_lock();
        let exe = std::env::current_exe().unwrap();
        let pattern = glob::Pattern::escape(&exe.to_string_lossy());
        assert!(matches!(
            install(&pattern, "nativehook_no_such_import", 0),
            Err(HookError::SymbolNotImported { .. })
        ));
    }
}
