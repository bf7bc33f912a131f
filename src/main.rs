use atc_listener::app::{self, Options, RunError, Sink};
use atc_listener::names::{DirStore, NameResolver};
use atc_listener::output::influxdb::{InfluxConfig, InfluxWriter};
use atc_listener::output::line_protocol::LineProtocolWriter;
use atc_listener::source::bluer::BluerAdapter;
use clap::Parser;
use std::panic::{self, PanicHookInfo};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

/// Install the `tracing` subscriber on stderr.
///
/// `RUST_LOG` takes precedence; otherwise `info`, or `debug` with `--verbose`.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) -> std::io::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
            _ = terminate.recv() => tracing::info!("received SIGTERM"),
        }
        shutdown.cancel();
    });

    Ok(())
}

/// Main application entry point.
///
/// This function:
/// 1. Opens the BlueZ adapter
/// 2. Writes command-line aliases into the name store
/// 3. Creates the configured point writer
/// 4. Runs the pipeline until discovery ends or a signal arrives
///
/// # Errors
/// Returns `RunError` if Bluetooth initialization, alias seeding or the
/// final flush fails
async fn run(options: Options) -> Result<(), RunError> {
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone())?;

    let adapter = BluerAdapter::open().await?;

    let resolver = NameResolver::new(DirStore::new(&options.name_store), options.name_policy);
    let seeded = resolver.seed(&options.aliases).await?;
    if seeded > 0 {
        tracing::info!(aliases = seeded, store = %options.name_store.display(), "aliases stored");
    }

    let summary = match options.sink {
        Sink::Influxdb => {
            let writer = InfluxWriter::new(&InfluxConfig {
                url: options.url.clone(),
                token: options.token.clone().unwrap_or_default(),
                org: options.org.clone(),
                bucket: options.database.clone(),
                batch_size: options.batch_size,
                flush_interval: options.flush_interval,
            })?;
            tracing::info!(url = %options.url, bucket = %options.database, "writing to InfluxDB");
            app::run(adapter, resolver, writer, &options, shutdown).await?
        }
        Sink::Stdout => {
            let writer = LineProtocolWriter::new(std::io::stdout());
            app::run(adapter, resolver, writer, &options, shutdown).await?
        }
    };

    tracing::info!(
        points = summary.points_written,
        watchers = summary.dispatch.spawned,
        failed = summary.dispatch.watchers_failed,
        "stopped"
    );
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd, Telegraf execd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    init_logging(options.verbose);

    match run(options).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            eprintln!("error: {}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
