use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use motioncam::{
    JpegSequenceSinkFactory, KeyboardQuitListener, MotionDrivenRecorder, MotioncamConfig,
    ReplayCamera,
};

#[derive(Parser, Debug)]
#[command(name = "motioncam")]
#[command(about = "Motion-triggered video recorder with pre-roll buffering")]
#[command(version)]
#[command(long_about = "Watches a frame stream, detects motion by frame \
differencing, and records motion events with a configurable pre-roll window \
and debounced extension. Sessions are written as JPEG frame sequences with \
metadata.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "motioncam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Listen for 'q'/Esc on the terminal to quit
    #[arg(long, help = "Enable interactive keyboard shutdown")]
    interactive: bool,

    /// Override the frame source directory from the configuration
    #[arg(long, value_name = "DIR", help = "Directory of frames to replay as the camera feed")]
    source: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        println!("# Motioncam configuration file");
        println!("# Default values for all available options");
        println!();
        println!("{}", MotioncamConfig::default_toml());
        return Ok(());
    }

    // Load and validate configuration
    let mut config = match MotioncamConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    if let Some(source) = &args.source {
        config.camera.source = source.clone();
    }

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    let _log_guard = init_logging(&args, &config)?;

    info!("Starting motioncam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    // Output root must exist before the first session opens
    let output_root = std::path::Path::new(&config.recording.output_directory);
    if !output_root.exists() {
        info!("making directory for output files: {}", output_root.display());
        std::fs::create_dir_all(output_root)?;
    }

    let camera = ReplayCamera::new(
        config.camera.source.clone(),
        config.camera.fps,
        config.camera.loop_playback,
    );
    let factory = JpegSequenceSinkFactory::new(config.recording.jpeg_quality);

    let (mut recorder, sender) =
        MotionDrivenRecorder::new(&config, Box::new(camera), Box::new(factory));

    // Signal handlers translate SIGINT/SIGTERM into a queued Quit command;
    // the loop consumes it between frame iterations
    let sigint_sender = sender.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received SIGINT signal (Ctrl+C)");
            sigint_sender.request_quit();
        }
    });

    #[cfg(unix)]
    {
        let sigterm_sender = sender.clone();
        tokio::spawn(async move {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM handler");
            if sigterm.recv().await.is_some() {
                info!("Received SIGTERM signal");
                sigterm_sender.request_quit();
            }
        });
    }

    let mut keyboard = if args.interactive {
        Some(KeyboardQuitListener::start(sender.clone()))
    } else {
        None
    };

    // The processing loop is synchronous and blocks on frame acquisition;
    // run it on a blocking thread and wait for it to finish
    let result = tokio::task::spawn_blocking(move || recorder.run()).await?;

    if let Some(keyboard) = keyboard.as_mut() {
        keyboard.stop();
    }

    match result {
        Ok(()) => {
            info!("motioncam exited cleanly");
            Ok(())
        }
        Err(e) => {
            error!("motioncam exited with error: {}", e);
            Err(e.into())
        }
    }
}

fn init_logging(
    args: &Args,
    config: &MotioncamConfig,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("motioncam={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer().with_target(true).boxed()
        }
    };

    let registry = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter);

    // Rolling file log alongside the console output, when enabled
    if config.log.file_logging {
        let appender = tracing_appender::rolling::daily(&config.log.directory, "motioncam.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        registry
            .with(fmt::layer().with_writer(writer).with_ansi(false))
            .init();
        Ok(Some(guard))
    } else {
        registry.init();
        Ok(None)
    }
}
