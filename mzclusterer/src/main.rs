use std::fs;
use std::io;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::error;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

use mzclusterer::MzClusterer;

fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
}

fn main() {
    let args = MzClusterer::parse();

    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_filter(env_filter());
    let registry = tracing_subscriber::registry().with(stderr_layer);
    match &args.log_file {
        Some(path) => match fs::File::create(path) {
            Ok(handle) => {
                let file_layer = fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(handle))
                    .with_filter(env_filter());
                registry.with(file_layer).init();
            }
            Err(e) => {
                eprintln!("Failed to open log file {}: {e}", path.display());
                process::exit(3);
            }
        },
        None => registry.init(),
    }

    if let Err(err) = args.main() {
        error!("{err}");
        process::exit(err.exit_code());
    }
}
