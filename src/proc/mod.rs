pub mod maps;

use nix::unistd::{sysconf, SysconfVar};

pub use maps::{LoadedModule, Mapping, Maps};

const FALLBACK_PAGE_SIZE: usize = 4096;

/// Size of a memory page in the current process.
pub fn page_size() -> usize {
    match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) if size > 0 => size as usize,
        _ => FALLBACK_PAGE_SIZE,
    }
}

/// Rounds `addr` down to the start of its page.
pub fn page_start(addr: usize, page_size: usize) -> usize {
    addr & !(page_size - 1)
}
