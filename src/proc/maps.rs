use std::path::{Path, PathBuf};

use glob::Pattern;
use proc_maps::{get_process_maps, MapRange, Pid};

use crate::error::{HookError, Result};

/// One line of `/proc/<pid>/maps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub start: usize,
    pub end: usize,
    pub offset: usize,
    /// `rwxp`-style flags.
    pub perms: String,
    pub path: Option<PathBuf>,
}

impl Mapping {
    pub fn is_readable(&self) -> bool {
        self.perms.starts_with('r')
    }

    pub fn is_private(&self) -> bool {
        self.perms.chars().nth(3) == Some('p')
    }

    pub fn contains(&self, addr: usize) -> bool {
        self.start <= addr && addr < self.end
    }

    /// The file backing this mapping, skipping pseudo paths like `[stack]`.
    pub fn file(&self) -> Option<&Path> {
        let path = self.path.as_deref()?;
        let text = path.to_str()?;
        (!text.is_empty() && !text.starts_with('[')).then_some(path)
    }
}

impl From<&MapRange> for Mapping {
    fn from(range: &MapRange) -> Self {
        Mapping {
            start: range.start(),
            end: range.start() + range.size(),
            offset: range.offset,
            perms: range.flags.clone(),
            path: range.filename().map(Path::to_path_buf),
        }
    }
}

/// A shared object or executable mapped into the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule {
    pub path: PathBuf,
    /// Address of the mapping that holds the ELF header.
    pub base: usize,
}

pub struct Maps {
    mappings: Vec<Mapping>,
}

impl Maps {
    /// Snapshot of the current process's mappings.
    pub fn current() -> Result<Self> {
        let pid = std::process::id() as Pid;
        let ranges = get_process_maps(pid).map_err(HookError::Maps)?;
        debug!("read {} mappings for pid {}", ranges.len(), pid);
        Ok(Self::from_mappings(ranges.iter().map(Mapping::from).collect()))
    }

    pub fn from_mappings(mappings: Vec<Mapping>) -> Self {
        Maps { mappings }
    }

    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    /// Modules whose path matches the glob `pattern`.
    ///
    /// A module's base is its readable, private mapping at file offset 0.
    pub fn modules(&self, pattern: &str) -> Result<Vec<LoadedModule>> {
        let matcher = Pattern::new(pattern)?;
        let mut modules: Vec<LoadedModule> = Vec::new();

        for mapping in &self.mappings {
            if !mapping.is_readable() || !mapping.is_private() || mapping.offset != 0 {
                continue;
            }
            let Some(path) = mapping.file() else {
                continue;
            };
            if !matcher.matches_path(path) {
                continue;
            }
            if modules.iter().any(|m| m.path == path) {
                continue;
            }

            debug!("module {} at 0x{:x}", path.display(), mapping.start);
            modules.push(LoadedModule {
                path: path.to_path_buf(),
                base: mapping.start,
            });
        }

        if modules.is_empty() {
            return Err(HookError::ModuleNotFound(pattern.to_string()));
        }
        Ok(modules)
    }

    pub fn find(&self, addr: usize) -> Option<&Mapping> {
        self.mappings.iter().find(|m| m.contains(addr))
    }
}
