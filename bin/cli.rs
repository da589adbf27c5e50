use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};

use nativehookstudy::{config, logging, loader, thread_watch, Config, MainActivity};

/// Load the native greeting library and drive the host screen from the command line
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// name of the native library, resolved to lib<NAME>.so
    #[arg(short, long, default_value = config::LIBRARY_NAME)]
    library: String,

    /// number of clicks to simulate
    #[arg(short, long, default_value_t = 1)]
    clicks: usize,

    /// how long each click's worker sleeps, in seconds
    #[arg(long, default_value_t = config::TASK_DURATION.as_secs())]
    task_secs: u64,

    /// watch thread creation in modules of this process matching the glob,
    /// e.g. "*/nativehook-cli"
    #[arg(long)]
    hook: Option<String>,

    /// wait for every worker to finish before exiting
    #[arg(short, long)]
    wait: bool,

    /// enable debug logs
    #[arg(short, long)]
    debug: bool,
}

fn main() {
    let args = Args::parse();
    logging::init(args.debug);

    let config = Config::default()
        .with_library_name(args.library)
        .with_task_duration(Duration::from_secs(args.task_secs))
        .with_hook_pattern(args.hook);

    if let Some(pattern) = &config.hook_pattern {
        match thread_watch::install(pattern) {
            Ok(count) => info!("thread watch installed on {} slots", count),
            Err(e) => {
                error!("Error installing thread watch: {}", e);
                std::process::exit(1);
            }
        }
    }

    let library = loader::process(&config);
    let mut activity = MainActivity::new("main", config.task_duration);
    match activity.on_create(library) {
        Ok(text) => println!("{}", text),
        Err(e) => {
            error!("Error starting up: {}", e);
            std::process::exit(1);
        }
    }

    for _ in 0..args.clicks {
        activity.on_click();
    }
    info!("{} workers started", activity.started());

    if args.wait {
        while activity.live() > 0 {
            std::thread::sleep(Duration::from_millis(100));
        }
        info!("all workers finished");
    } else if activity.live() > 0 {
        warn!("exiting with {} workers still sleeping", activity.live());
    }

    if config.hook_pattern.is_some() {
        info!("observed {} thread creations", thread_watch::observed());
    }
}
