//! InfluxDB v2 HTTP writer.
//!
//! Points are formatted immediately and handed to a background task which
//! batches them and posts each batch to `/api/v2/write`. A batch is sent
//! when it reaches `batch_size` points, on every `flush_interval` tick, and
//! on explicit [`PointWriter::flush`]. Failed posts are logged and the batch
//! is dropped.

use super::line_protocol::Point;
use super::{PointWriter, WriteError};
use reqwest::Url;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Connection and batching settings.
#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    pub batch_size: usize,
    pub flush_interval: Duration,
}

/// Destination for one newline-separated batch of lines.
pub trait BatchSink: Send + 'static {
    fn post(&self, body: String) -> impl Future<Output = Result<(), WriteError>> + Send;
}

/// Build the write endpoint for `base`, keeping any path prefix.
pub fn write_url(base: &str, org: &str, bucket: &str) -> Result<Url, WriteError> {
    let mut url = Url::parse(base).map_err(|err| WriteError::InvalidUrl(err.to_string()))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    let mut url = url
        .join("api/v2/write")
        .map_err(|err| WriteError::InvalidUrl(err.to_string()))?;
    url.query_pairs_mut()
        .append_pair("org", org)
        .append_pair("bucket", bucket)
        .append_pair("precision", "ns");
    Ok(url)
}

/// Posts batches with `reqwest`.
pub struct HttpSink {
    client: reqwest::Client,
    url: Url,
    token: String,
}

impl HttpSink {
    pub fn new(config: &InfluxConfig) -> Result<Self, WriteError> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()?,
            url: write_url(&config.url, &config.org, &config.bucket)?,
            token: config.token.clone(),
        })
    }
}

impl BatchSink for HttpSink {
    async fn post(&self, body: String) -> Result<(), WriteError> {
        let mut request = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body);
        if !self.token.is_empty() {
            request = request.header(AUTHORIZATION, format!("Token {}", self.token));
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(WriteError::Rejected {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }
}

enum Command {
    Line(String),
    Flush(oneshot::Sender<Result<(), WriteError>>),
}

struct Batcher<S> {
    sink: S,
    lines: Vec<String>,
    batch_size: usize,
}

impl<S: BatchSink> Batcher<S> {
    async fn send_batch(&mut self) -> Result<(), WriteError> {
        if self.lines.is_empty() {
            return Ok(());
        }

        let count = self.lines.len();
        let body = self.lines.join("\n");
        self.lines.clear();

        match self.sink.post(body).await {
            Ok(()) => {
                tracing::debug!(points = count, "batch written");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(%err, points = count, "failed to write batch, dropping it");
                Err(err)
            }
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Line(line)) => {
                        self.lines.push(line);
                        if self.lines.len() >= self.batch_size {
                            let _ = self.send_batch().await;
                        }
                    }
                    Some(Command::Flush(ack)) => {
                        let result = self.send_batch().await;
                        let _ = ack.send(result);
                    }
                    None => {
                        let _ = self.send_batch().await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    let _ = self.send_batch().await;
                }
            }
        }
    }
}

/// Batching InfluxDB writer.
pub struct InfluxWriter {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl InfluxWriter {
    /// Create a writer posting to the InfluxDB server in `config`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns [`WriteError`] if the URL is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: &InfluxConfig) -> Result<Self, WriteError> {
        let sink = HttpSink::new(config)?;
        Ok(Self::with_sink(sink, config.batch_size, config.flush_interval))
    }

    /// Create a writer that hands its batches to `sink`.
    pub fn with_sink<S: BatchSink>(sink: S, batch_size: usize, flush_interval: Duration) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let batcher = Batcher {
            sink,
            lines: Vec::with_capacity(batch_size),
            batch_size: batch_size.max(1),
        };
        let task = tokio::spawn(batcher.run(receiver, flush_interval));

        Self { commands, task }
    }
}

impl PointWriter for InfluxWriter {
    fn write_point(&mut self, point: Point) {
        if self.commands.send(Command::Line(point.to_string())).is_err() {
            tracing::error!("InfluxDB writer task has stopped, point dropped");
        }
    }

    async fn flush(&mut self) -> Result<(), WriteError> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(Command::Flush(ack))
            .map_err(|_| WriteError::Closed)?;
        done.await.map_err(|_| WriteError::Closed)?
    }

    async fn close(mut self) -> Result<(), WriteError> {
        let result = self.flush().await;
        drop(self.commands);
        if let Err(err) = self.task.await {
            tracing::error!(%err, "InfluxDB writer task failed");
        }
        result
    }
}
