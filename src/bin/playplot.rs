//! playplot - play audio with a synchronized terminal waveform plot
//!
//! # Usage
//!
//! ```text
//! playplot play clip.wav                 # plot in a thread of this process
//! playplot play clip.wav --isolation process --loop
//! playplot play https://host/clip.wav --autoplay
//! playplot info clip.wav                 # print clip metadata
//! ```
//!
//! Settings come from the optional config file
//! (`$XDG_CONFIG_HOME/playplot/config.toml`), then `PLAYPLOT_*` environment
//! variables, then command line flags.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use playplot_core::{AudioSource, Isolation, SessionConfig};
use playplot_session::{PlotBinding, PlotRegistry, Session};
use playplot_term::WAVEFORM_PLOT;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI Arguments
// ============================================================================

/// playplot - audio playback linked to an interactive plot marker
#[derive(Parser, Debug)]
#[command(name = "playplot")]
#[command(about = "Play audio with a synchronized waveform plot")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Config file (default: $XDG_CONFIG_HOME/playplot/config.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play a clip with a terminal waveform plot
    Play(PlayArgs),
    /// Print metadata of a clip
    Info {
        /// File path or http(s) URL of a WAV clip
        source: String,
    },
}

#[derive(ClapArgs, Debug)]
struct PlayArgs {
    /// File path or http(s) URL of a WAV clip
    source: String,

    /// Run workers as threads or as child processes
    #[arg(long, short = 'i')]
    isolation: Option<Isolation>,

    /// Loop at the end of the clip
    #[arg(long = "loop", short = 'l')]
    looping: bool,

    /// Start playing immediately
    #[arg(long, short = 'a')]
    autoplay: bool,

    /// Initial volume in [0, 1]
    #[arg(long, short = 'v')]
    volume: Option<f32>,

    /// Initial position in seconds
    #[arg(long, short = 's')]
    start: Option<f64>,

    /// Marker redraw rate
    #[arg(long)]
    fps: Option<f64>,

    /// Plot title
    #[arg(long, short = 't')]
    title: Option<String>,

    /// Envelope resolution of the waveform
    #[arg(long)]
    buckets: Option<u64>,
}

// ============================================================================
// Logging
// ============================================================================

/// Returns the log directory path.
///
/// - Uses `$XDG_STATE_HOME/playplot` if set
/// - Falls back to `$HOME/.local/state/playplot`
fn get_log_dir() -> Option<PathBuf> {
    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        return Some(PathBuf::from(xdg_state).join("playplot"));
    }
    dirs::home_dir().map(|home| home.join(".local").join("state").join("playplot"))
}

fn create_log_file() -> Option<fs::File> {
    let log_dir = get_log_dir()?;
    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Failed to create log directory {log_dir:?}: {e}");
        return None;
    }
    let log_path = log_dir.join("playplot.log");
    match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => Some(file),
        Err(e) => {
            eprintln!("Warning: Failed to open log file {log_path:?}: {e}");
            None
        }
    }
}

/// Logs to a file; the terminal belongs to the plot.
fn init_logging() {
    match create_log_file() {
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
                .init();
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("playplot").join("config.toml"))
}

/// Loads the config file, if any, then applies environment overrides.
///
/// An explicit `--config` path must exist; the default path is optional.
fn load_config(explicit: Option<&PathBuf>) -> Result<SessionConfig> {
    let path = match explicit {
        Some(path) => Some(path.clone()),
        None => default_config_path().filter(|path| path.is_file()),
    };
    let config = match path {
        Some(path) => {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path.display()))?;
            let config: SessionConfig = toml::from_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?;
            info!(path = %path.display(), "Loaded config file");
            config
        }
        None => SessionConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

fn apply_flags(mut config: SessionConfig, args: &PlayArgs) -> SessionConfig {
    if let Some(isolation) = args.isolation {
        config = config.isolation(isolation);
    }
    if args.looping {
        config = config.looping(true);
    }
    if args.autoplay {
        config = config.autoplay(true);
    }
    if let Some(volume) = args.volume {
        config = config.volume(volume);
    }
    if let Some(start) = args.start {
        config = config.start_time(start);
    }
    if let Some(fps) = args.fps {
        config = config.fps_target(fps);
    }
    config
}

// ============================================================================
// Commands
// ============================================================================

fn registry() -> PlotRegistry {
    let mut registry = PlotRegistry::with_builtins();
    playplot_term::register(&mut registry);
    registry
}

async fn play(args: PlayArgs, config: SessionConfig) -> Result<ExitCode> {
    let config = apply_flags(config, &args);
    let source = AudioSource::parse(&args.source);

    let mut plot_args = json!({});
    if let Some(title) = &args.title {
        plot_args["title"] = json!(title);
    }
    if let Some(buckets) = args.buckets {
        plot_args["buckets"] = json!(buckets);
    }

    let mut session = Session::open(source, config)
        .await?
        .with_registry(registry());
    session.plot(PlotBinding::named(WAVEFORM_PLOT, plot_args))?;
    session.start().await?;
    info!(pids = ?session.worker_pids(), "Session running");

    tokio::select! {
        result = session.join(None) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping session");
            session.stop(true).await?;
            session.join(None).await?;
        }
    }

    let errors = session.retrieve_errors();
    for error in &errors {
        eprintln!("{}", error.report());
    }
    if errors.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(count = errors.len(), "Session ended with worker errors");
        Ok(ExitCode::FAILURE)
    }
}

async fn print_info(source: &str) -> Result<()> {
    let source = AudioSource::parse(source);
    let audio = source.load().await?;
    let peak = audio
        .samples()
        .iter()
        .fold(0.0_f32, |peak, sample| peak.max(sample.abs()));

    println!("source:      {source}");
    println!("duration:    {:.3} s", audio.duration());
    println!("sample rate: {} Hz", audio.sample_rate());
    println!("channels:    {}", audio.channels());
    println!("frames:      {}", audio.frames());
    println!("peak:        {peak:.3}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging();

    match args.command {
        Command::Play(play_args) => {
            let config = load_config(args.config.as_ref())?;
            info!(source = %play_args.source, isolation = %config.isolation, "playplot starting");
            play(play_args, config).await
        }
        Command::Info { source } => {
            print_info(&source).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
