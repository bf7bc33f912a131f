//! Core application runner (business logic) for `atc-listener`.
//!
//! This module is decoupled from the Bluetooth stack, the name store and the
//! output sink so the whole pipeline can be tested deterministically with
//! injected fakes. The binary wires in the real implementations.

use crate::alias::{Alias, parse_alias};
use crate::decoder::Firmware;
use crate::dispatcher::{DispatchSummary, Dispatcher, WatchConfig};
use crate::names::{KeyValueStore, NamePolicy, NameResolver, StoreError};
use crate::output::{PointFormatter, PointWriter, WriteError};
use crate::source::{Adapter, AdapterError, DiscoveryFilter};
use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

/// Where points are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Sink {
    /// InfluxDB v2 HTTP write API
    #[default]
    Influxdb,
    /// Line protocol on stdout (Telegraf execd)
    Stdout,
}

/// Command-line configuration.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// InfluxDB server URL.
    #[arg(long, default_value = "http://localhost:8086")]
    pub url: String,

    /// InfluxDB API token.
    #[arg(long, env = "INFLUX_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// InfluxDB bucket.
    #[arg(long, default_value = "temperature")]
    pub database: String,

    /// InfluxDB organization.
    #[arg(long, default_value = "")]
    pub org: String,

    /// Output sink.
    #[arg(long, default_value_t, value_enum)]
    pub sink: Sink,

    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = "temperature")]
    pub measurement: String,

    /// Points per InfluxDB write request.
    #[arg(long, default_value_t = 20)]
    pub batch_size: usize,

    /// Send buffered points at least this often.
    /// Accepts duration with suffix: 3s, 1m, 500ms, 2h.
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    pub flush_interval: Duration,

    /// Directory holding one file per sensor with its display name.
    #[arg(long, default_value = "/var/lib/temperature")]
    pub name_store: PathBuf,

    /// Default name for sensors without an entry in the name store.
    #[arg(long, default_value_t, value_enum)]
    pub name_policy: NamePolicy,

    /// Specify human-readable name for a sensor, written to the name store.
    /// Format: --alias A4:C1:38:00:11:22=Kitchen
    #[arg(long = "alias", value_parser = parse_alias, value_name = "ALIAS")]
    pub aliases: Vec<Alias>,

    /// Advertisement format of the sensor firmware.
    #[arg(long, default_value_t, value_enum)]
    pub format: Firmware,

    /// Service-data UUID prefix of thermometer advertisements.
    #[arg(long, default_value = "0000181a")]
    pub service_data_prefix: String,

    /// Readings buffered between the watchers and the writer.
    #[arg(long, default_value_t = 100)]
    pub channel_capacity: usize,

    /// Run at most one watcher per sensor; a rediscovered sensor replaces
    /// its previous watcher.
    #[arg(long)]
    pub dedupe_watchers: bool,

    /// Verbose output, log per-advertisement details
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("dispatcher task failed: {0}")]
    Dispatcher(#[from] JoinError),
}

/// Totals for one completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub points_written: u64,
    pub dispatch: DispatchSummary,
}

/// Parse a duration such as `500ms`, `3s`, `1m` or `2h`.
///
/// Without suffix, the value is interpreted as seconds.
///
/// # Example
/// ```
/// use atc_listener::app::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    // "ms" must be tried before "m" and "s"
    let (num, unit, to_duration): (&str, &str, fn(u64) -> Duration) =
        if let Some(num) = src.strip_suffix("ms") {
            (num, "milliseconds", Duration::from_millis)
        } else if let Some(num) = src.strip_suffix('h') {
            (num, "hours", |n: u64| Duration::from_secs(n.saturating_mul(3600)))
        } else if let Some(num) = src.strip_suffix('m') {
            (num, "minutes", |n: u64| Duration::from_secs(n.saturating_mul(60)))
        } else if let Some(num) = src.strip_suffix('s') {
            (num, "seconds", Duration::from_secs)
        } else {
            (src, "seconds", Duration::from_secs)
        };

    let value: u64 = num
        .trim()
        .parse()
        .map_err(|_| format!("invalid {unit}: {num}"))?;
    if value == 0 {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(to_duration(value))
}

/// Run the ingestion pipeline until discovery ends or `shutdown` fires.
///
/// - Starts LE discovery on `adapter`; failure here is fatal.
/// - Spawns the dispatcher, which runs one watcher per discovered device.
/// - Resolves each reading's display name and hands the point to `writer`.
///
/// Every reading pushed onto the channel is written: the consumer drains
/// the channel until the dispatcher and all watchers have dropped their
/// senders. The writer is then flushed and closed.
///
/// # Errors
/// Returns [`RunError::Adapter`] if discovery cannot be started,
/// [`RunError::Dispatcher`] if the dispatcher task panicked and
/// [`RunError::Write`] if the final flush fails. The writer is closed in
/// every case once discovery has started.
pub async fn run<A, S, W>(
    adapter: A,
    resolver: NameResolver<S>,
    mut writer: W,
    options: &Options,
    shutdown: CancellationToken,
) -> Result<RunSummary, RunError>
where
    A: Adapter,
    S: KeyValueStore,
    W: PointWriter,
{
    let discovery = adapter.discover(DiscoveryFilter::default()).await?;
    tracing::info!("discovery started");

    let (tx, mut rx) = mpsc::channel(options.channel_capacity.max(1));
    let config = WatchConfig {
        prefix: options.service_data_prefix.clone(),
        format: options.format.format(),
        dedupe: options.dedupe_watchers,
    };
    let dispatcher = tokio::spawn(Dispatcher::new(adapter, tx, shutdown, config).run(discovery));

    let formatter = PointFormatter::new(options.measurement.as_str());
    let mut points_written = 0;

    while let Some(observation) = rx.recv().await {
        let name = resolver.resolve(observation.reading.address).await;
        writer.write_point(formatter.to_point(&name, &observation));
        points_written += 1;
    }

    // Buffered points are flushed even when the dispatcher task failed
    let joined = dispatcher.await;
    tracing::info!(points = points_written, "pipeline stopped, flushing writer");
    let closed = writer.close().await;
    let dispatch = joined?;
    closed?;

    Ok(RunSummary {
        points_written,
        dispatch,
    })
}
