use goblin::elf::header::{EM_386, EM_AARCH64, EM_ARM, EM_X86_64};
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::reloc::{
    R_386_GLOB_DAT, R_386_JMP_SLOT, R_AARCH64_GLOB_DAT, R_AARCH64_JUMP_SLOT, R_ARM_GLOB_DAT,
    R_ARM_JUMP_SLOT, R_X86_64_GLOB_DAT, R_X86_64_JUMP_SLOT,
};
use goblin::elf::Elf;

use crate::error::Result;
use crate::proc::{self, LoadedModule};

/// A pointer-sized cell the dynamic linker filled with an imported function's address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSlot {
    pub symbol: String,
    pub address: usize,
}

/// Whether `r_type` binds a GOT entry to a symbol's address on `machine`.
fn is_got_reloc(machine: u16, r_type: u32) -> bool {
    match machine {
        EM_X86_64 => r_type == R_X86_64_GLOB_DAT || r_type == R_X86_64_JUMP_SLOT,
        EM_AARCH64 => r_type == R_AARCH64_GLOB_DAT || r_type == R_AARCH64_JUMP_SLOT,
        EM_386 => r_type == R_386_GLOB_DAT || r_type == R_386_JMP_SLOT,
        EM_ARM => r_type == R_ARM_GLOB_DAT || r_type == R_ARM_JUMP_SLOT,
        _ => false,
    }
}

/// Difference between the module's runtime addresses and its link-time addresses.
pub fn load_bias(elf: &Elf, base: usize) -> usize {
    let first_load = elf
        .program_headers
        .iter()
        .filter(|ph| ph.p_type == PT_LOAD)
        .map(|ph| ph.p_vaddr as usize)
        .min()
        .unwrap_or(0);
    base.wrapping_sub(proc::page_start(first_load, proc::page_size()))
}

fn imports_symbol(elf: &Elf, r_sym: usize, symbol: &str) -> bool {
    elf.dynsyms
        .get(r_sym)
        .and_then(|sym| elf.dynstrtab.get_at(sym.st_name))
        .map_or(false, |name| name == symbol)
}

/// Runtime addresses of every GOT slot in `elf` that binds `symbol`.
///
/// PLT relocations come first; GOT relocations in the regular dynamic table are added after,
/// since objects linked without lazy binding resolve their imports there.
pub fn find_import_slots(elf: &Elf, bias: usize, symbol: &str) -> Vec<usize> {
    let mut slots: Vec<usize> = Vec::new();

    for reloc in elf.pltrelocs.iter() {
        if imports_symbol(elf, reloc.r_sym, symbol) {
            slots.push(bias.wrapping_add(reloc.r_offset as usize));
        }
    }

    let machine = elf.header.e_machine;
    for reloc in elf.dynrelas.iter().chain(elf.dynrels.iter()) {
        if !is_got_reloc(machine, reloc.r_type) || !imports_symbol(elf, reloc.r_sym, symbol) {
            continue;
        }
        let address = bias.wrapping_add(reloc.r_offset as usize);
        if !slots.contains(&address) {
            slots.push(address);
        }
    }

    slots
}

/// Reads `module` from disk and locates its import slots for `symbol`.
pub fn import_slots(module: &LoadedModule, symbol: &str) -> Result<Vec<ImportSlot>> {
    let bytes = std::fs::read(&module.path)?;
    let elf = Elf::parse(&bytes)?;
    let bias = load_bias(&elf, module.base);
    debug!(
        "{}: base 0x{:x} bias 0x{:x}",
        module.path.display(),
        module.base,
        bias
    );

    let slots = find_import_slots(&elf, bias, symbol)
        .into_iter()
        .map(|address| {
            debug!("{}: {} slot at 0x{:x}", module.path.display(), symbol, address);
            ImportSlot {
                symbol: symbol.to_string(),
                address,
            }
        })
        .collect();
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::Maps;

    #[test]
    fn got_relocation_kinds() {
        assert!(is_got_reloc(EM_X86_64, R_X86_64_JUMP_SLOT));
        assert!(is_got_reloc(EM_X86_64, R_X86_64_GLOB_DAT));
        assert!(is_got_reloc(EM_AARCH64, R_AARCH64_JUMP_SLOT));
        assert!(is_got_reloc(EM_ARM, R_ARM_GLOB_DAT));
        assert!(is_got_reloc(EM_386, R_386_JMP_SLOT));
        // R_X86_64_64 is a plain absolute pointer, not a GOT binding.
        assert!(!is_got_reloc(EM_X86_64, 1));
        assert!(!is_got_reloc(0, R_X86_64_JUMP_SLOT));
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn test_binary_imports_pthread_create() {
        use nix::libc;

        let _lock = crate::tests::process_lock();
        let exe = std::env::current_exe().unwrap();
        let maps = Maps::current().unwrap();
        let module = maps
            .modules(&glob::Pattern::escape(&exe.to_string_lossy()))
            .unwrap()
            .remove(0);

        let slots = import_slots(&module, "pthread_create").unwrap();
        assert!(!slots.is_empty());

        let real = libc::pthread_create as usize;
        for slot in &slots {
            let mapping = maps.find(slot.address).unwrap();
            assert_eq!(mapping.path.as_deref(), Some(exe.as_path()));
            // SAFETY: the slot lies inside a readable mapping of this executable.
            let value = unsafe { (slot.address as *const usize).read_volatile() };
            assert_eq!(value, real);
        }
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn missing_import_yields_no_slots() {
        let _lock = crate::tests::process_lock();
        let exe = std::env::current_exe().unwrap();
        let module = Maps::current()
            .unwrap()
            .modules(&glob::Pattern::escape(&exe.to_string_lossy()))
            .unwrap()
            .remove(0);
        assert!(import_slots(&module, "nativehook_no_such_import")
            .unwrap()
            .is_empty());
    }
}
