use thiserror::Error;

pub type Result<T> = std::result::Result<T, HookError>;

#[derive(Error, Debug)]
pub enum HookError {
    #[error("failed to load library {name}: {reason}")]
    LibraryLoad { name: String, reason: String },

    #[error("native library {name} unavailable: {reason}")]
    Unavailable { name: String, reason: String },

    #[error("symbol {name} not found: {reason}")]
    SymbolNotFound { name: String, reason: String },

    #[error("name contains an interior NUL byte: {0:?}")]
    InvalidName(String),

    #[error("no loaded module matches {0}")]
    ModuleNotFound(String),

    #[error("no module matching {pattern} imports {symbol}")]
    SymbolNotImported { pattern: String, symbol: String },

    #[error("invalid module pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("failed to parse ELF: {0}")]
    Elf(#[from] goblin::error::Error),

    #[error("address 0x{0:x} is not mapped")]
    Unmapped(usize),

    #[error("failed to read process maps: {0}")]
    Maps(std::io::Error),

    #[error("mprotect failed: {0}")]
    Protect(#[from] nix::errno::Errno),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("native string is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
}
