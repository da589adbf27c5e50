use std::time::Duration;

/// Name passed to the loader, resolved to `lib<name>.so`.
pub const LIBRARY_NAME: &str = "nativehookstudy";

/// C entry point returning the greeting.
pub const GREETING_SYMBOL: &str = "nativehook_greeting";

/// Modules hooked by the JNI entry point on first call.
pub const JNI_HOOK_PATTERN: &str = "*/libart.so";

pub const TASK_DURATION: Duration = Duration::from_secs(10);

pub const LOG_TAG: &str = "nativehook";

#[derive(Debug, Clone)]
pub struct Config {
    pub library_name: String,
    pub greeting_symbol: String,
    pub task_duration: Duration,
    /// Glob of modules to watch for thread creation, if any.
    pub hook_pattern: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            library_name: LIBRARY_NAME.to_string(),
            greeting_symbol: GREETING_SYMBOL.to_string(),
            task_duration: TASK_DURATION,
            hook_pattern: None,
        }
    }
}

impl Config {
    pub fn with_library_name(mut self, name: impl Into<String>) -> Self {
        self.library_name = name.into();
        self
    }

    pub fn with_task_duration(mut self, duration: Duration) -> Self {
        self.task_duration = duration;
        self
    }

    pub fn with_hook_pattern(mut self, pattern: Option<String>) -> Self {
        self.hook_pattern = pattern;
        self
    }
}
