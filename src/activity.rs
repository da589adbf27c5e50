use std::{
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use crate::error::Result;
use crate::loader::{LibraryLoader, LoadOnce, NativeLibrary};

/// The host screen: one text region and one click target.
pub struct MainActivity {
    name: String,
    task_duration: Duration,
    text: Option<String>,
    clicks: AtomicUsize,
    started: AtomicUsize,
    live: Arc<AtomicUsize>,
}

/// Decrements the live worker count when the worker ends.
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MainActivity {
    pub fn new(name: &str, task_duration: Duration) -> Self {
        MainActivity {
            name: name.to_string(),
            task_duration,
            text: None,
            clicks: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Loads the native library if needed, then fetches and renders the greeting once.
    pub fn on_create<L: LibraryLoader>(&mut self, library: &LoadOnce<L>) -> Result<&str> {
        let library = library.get_or_load()?;
        let text = library.greeting()?;
        debug!("[{}] display text: {}", self.name, text);
        Ok(self.text.insert(text).as_str())
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Starts one detached worker that logs a line and sleeps.
    ///
    /// No handle is kept and nothing is reported back: every click adds another sleeping
    /// worker, without bound.
    pub fn on_click(&self) {
        let index = self.clicks.fetch_add(1, Ordering::SeqCst);
        let spawned = self.spawn_worker(index);
        self.record_spawn(index, spawned);
    }

    fn spawn_worker(&self, index: usize) -> io::Result<()> {
        self.live.fetch_add(1, Ordering::SeqCst);
        let guard = LiveGuard(self.live.clone());
        let duration = self.task_duration;

        // On failure the closure, and with it the guard, is dropped by `spawn`.
        thread::Builder::new()
            .name(format!("{}-worker-{}", self.name, index))
            .spawn(move || {
                let _guard = guard;
                info!("a worker thread is running");
                thread::sleep(duration);
            })
            .map(drop)
    }

    fn record_spawn(&self, index: usize, spawned: io::Result<()>) {
        match spawned {
            Ok(()) => {
                self.started.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => error!("[{}] failed to spawn worker {}: {}", self.name, index, e),
        }
    }

    /// Workers started since creation.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Workers still sleeping.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HookError;
    use crate::loader::tests::FakeLoader;
    use log::{Log, Metadata, Record};
    use std::sync::{Mutex, OnceLock};
    use std::time::Instant;

    /// Keeps `(thread name, message)` for every record logged in this test binary.
    struct CaptureLogger {
        records: Mutex<Vec<(String, String)>>,
    }

    impl Log for CaptureLogger {
        fn enabled(&self, _: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            let thread = thread::current().name().unwrap_or_default().to_string();
            self.records
                .lock()
                .unwrap()
                .push((thread, record.args().to_string()));
        }

        fn flush(&self) {}
    }

    fn capture() -> &'static CaptureLogger {
        static LOGGER: OnceLock<CaptureLogger> = OnceLock::new();
        let logger = LOGGER.get_or_init(|| CaptureLogger {
            records: Mutex::new(Vec::new()),
        });
        if log::set_logger(logger).is_ok() {
            log::set_max_level(log::LevelFilter::Trace);
        }
        logger
    }

    fn lines_from(prefix: &str) -> Vec<String> {
        capture()
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|(thread, _)| thread.starts_with(prefix))
            .map(|(_, message)| message.clone())
            .collect()
    }

    fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    #[test]
    fn display_text_matches_native_greeting() {
        let library = LoadOnce::new(FakeLoader::returning("Hello from native"), "fake");
        let mut activity = MainActivity::new("display", Duration::from_millis(1));

        assert_eq!(activity.on_create(&library).unwrap(), "Hello from native");
        assert_eq!(activity.text(), Some("Hello from native"));
    }

    #[test]
    fn load_precedes_greeting_and_happens_once() {
        let loader = FakeLoader::returning("hi");
        let journal = loader.journal.clone();
        let library = LoadOnce::new(loader, "fake");

        let mut first = MainActivity::new("first", Duration::from_millis(1));
        let mut second = MainActivity::new("second", Duration::from_millis(1));
        first.on_create(&library).unwrap();
        second.on_create(&library).unwrap();

        assert_eq!(journal.events(), vec!["load", "greeting", "greeting"]);
    }

    #[test]
    fn load_failure_leaves_screen_empty() {
        let mut loader = FakeLoader::returning("hi");
        loader.fail = true;
        let journal = loader.journal.clone();
        let library = LoadOnce::new(loader, "fake");
        let mut activity = MainActivity::new("broken", Duration::from_millis(1));

        assert!(matches!(
            activity.on_create(&library),
            Err(HookError::Unavailable { .. })
        ));
        assert_eq!(activity.text(), None);
        assert_eq!(journal.events(), vec!["load"]);
    }

    #[test]
    fn rapid_clicks_run_concurrently_without_blocking() {
        let activity = MainActivity::new("burst", Duration::from_secs(2));

        let begin = Instant::now();
        for _ in 0..5 {
            activity.on_click();
        }
        assert!(begin.elapsed() < Duration::from_secs(1));

        assert_eq!(activity.started(), 5);
        assert_eq!(activity.live(), 5);
        assert!(wait_until(Duration::from_secs(15), || activity.live() == 0));
        assert_eq!(activity.started(), 5);
    }

    #[test]
    fn each_worker_logs_once_before_sleeping() {
        capture();
        let activity = MainActivity::new("chatty", Duration::from_secs(3));
        activity.on_click();
        activity.on_click();

        assert!(wait_until(Duration::from_millis(1500), || {
            lines_from("chatty-worker-").len() == 2
        }));
        assert_eq!(activity.live(), 2);

        assert!(wait_until(Duration::from_secs(15), || activity.live() == 0));
        let lines = lines_from("chatty-worker-");
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|line| line == "a worker thread is running"));
    }

    #[test]
    fn failed_spawn_is_not_counted() {
        let activity = MainActivity::new("refused", Duration::from_millis(1));
        activity.record_spawn(0, Err(io::Error::new(io::ErrorKind::WouldBlock, "no threads")));
        assert_eq!(activity.started(), 0);

        activity.on_click();
        assert_eq!(activity.started(), 1);
        assert!(wait_until(Duration::from_secs(5), || activity.live() == 0));
    }
}
