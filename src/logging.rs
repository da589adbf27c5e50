use log::LevelFilter;

/// Installs the process logger. Safe to call more than once.
#[cfg(target_os = "android")]
pub fn init(debug: bool) {
    let level = if debug { LevelFilter::Debug } else { LevelFilter::Info };
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(level)
            .with_tag(crate::config::LOG_TAG),
    );
}

/// Installs the process logger. Safe to call more than once.
#[cfg(not(target_os = "android"))]
pub fn init(debug: bool) {
    let level = if debug { LevelFilter::Debug } else { LevelFilter::Info };
    // A logger may already be set by an earlier call or by the embedding host.
    let _ = simple_logger::SimpleLogger::new().with_level(level).init();
}
