//! Flick Compositor - A mobile-first Wayland compositor
//!
//! Features:
//! - Edge-swipe navigation (home, app switcher, quick settings, back)
//! - Fullscreen apps, one at a time
//! - hwcomposer output through flick-hwc, or a virtual display for development

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use flick_shell::{backend, config::default_path, FlickConfig};
use tracing::info;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "flick")]
#[command(about = "Flick mobile compositor for Droidian/libhybris devices", long_about = None)]
struct Args {
    /// Enable verbose debug output
    #[arg(short, long)]
    debug: bool,

    /// Config file (default: ~/.config/flick/compositor.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use the virtual composer instead of hardware
    #[arg(long = "virtual")]
    virtual_display: bool,
}

fn state_dir() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".local/state")))
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join("flick")
}

fn main() -> Result<()> {
    let log_dir = state_dir();
    std::fs::create_dir_all(&log_dir).ok();

    // Log panics before crashing
    let crash_log = log_dir.join("crash.log");
    std::panic::set_hook(Box::new(move |panic_info| {
        eprintln!("PANIC: {}", panic_info);
        if let Ok(mut f) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&crash_log)
        {
            use std::io::Write;
            let _ = writeln!(f, "[{}] PANIC: {}", chrono::Local::now(), panic_info);
        }
    }));

    let args = Args::parse();

    // Rotates daily
    let file_appender = rolling::daily(&log_dir, "compositor.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Quiet by default, verbose with --debug
    let default_filter = if args.debug {
        "debug,flick=debug,flick_shell=debug,flick_hwc=debug"
    } else {
        "warn,flick=info,flick_shell=info,flick_hwc=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    info!(log_path = %log_dir.display(), "Flick compositor starting");

    let config_path = args.config.clone().unwrap_or_else(default_path);
    let config = FlickConfig::load(Some(&config_path)).context("Failed to load config")?;
    info!(path = %config_path.display(), "Config loaded");

    backend::run(&config, args.virtual_display)
}
