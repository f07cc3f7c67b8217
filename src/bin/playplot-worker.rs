//! playplot-worker - child process running one audio or plot worker
//!
//! Started by a session in process isolation; not meant to be run by hand.
//! stdin and stdout carry the control channel, so logs go to
//! `$XDG_STATE_HOME/playplot/worker.log`.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use playplot_worker::{run_worker_process, PlotRegistry};
use tracing_subscriber::EnvFilter;

fn get_log_dir() -> Option<PathBuf> {
    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        return Some(PathBuf::from(xdg_state).join("playplot"));
    }
    dirs::home_dir().map(|home| home.join(".local").join("state").join("playplot"))
}

/// Logs to `worker.log`, or nowhere when the file cannot be opened.
fn init_logging() {
    let file = get_log_dir().and_then(|dir| {
        fs::create_dir_all(&dir).ok()?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("worker.log"))
            .ok()
    });

    match file {
        Some(file) => {
            let filter = EnvFilter::from_default_env().add_directive(
                "playplot=info"
                    .parse()
                    .unwrap_or_else(|_| tracing_subscriber::filter::Directive::from(tracing::Level::INFO)),
            );
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::new("off"))
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

fn main() -> ExitCode {
    init_logging();

    let mut registry = PlotRegistry::with_builtins();
    playplot_term::register(&mut registry);
    run_worker_process(registry)
}
