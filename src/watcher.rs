//! Per-device watcher.
//!
//! A watcher subscribes to one device's property changes, decodes every
//! matching service-data entry and pushes the readings onto the shared
//! observation channel. It moves through `Subscribing → Streaming → Closed`
//! and ends when the property stream closes, the shutdown token fires or
//! the consumer goes away.

use crate::decoder::{DecodeError, RecordFormat, decode_with};
use crate::mac_address::MacAddress;
use crate::reading::Observation;
use crate::source::{Device, DeviceError, PropertyEvent, ServiceData, ServiceDataValue};
use futures::StreamExt;
use std::fmt;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Identifier assigned to each spawned watcher, unique for the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(pub u64);

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Subscribing,
    Streaming,
    Closed,
}

/// Why a watcher stopped streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The device's property stream ended (device removed, adapter stopped)
    SourceClosed,
    /// The shutdown token fired
    Cancelled,
    /// The observation channel was closed by the consumer
    ConsumerGone,
}

/// Outcome of a watcher that subscribed successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchReport {
    pub id: WatcherId,
    pub address: MacAddress,
    /// Readings pushed onto the channel
    pub readings: u64,
    /// Service-data entries that matched the prefix but failed to decode
    pub decode_errors: u64,
    pub end: EndReason,
}

/// Turns one device's property changes into observations.
pub struct Watcher<D> {
    id: WatcherId,
    device: D,
    tx: mpsc::Sender<Observation>,
    shutdown: CancellationToken,
    prefix: String,
    format: &'static RecordFormat,
    state: watch::Sender<WatcherState>,
}

impl<D: Device> Watcher<D> {
    /// # Arguments
    /// * `prefix` - Service-data keys are matched against this prefix, ignoring case
    /// * `format` - Record layout used to decode matching entries
    pub fn new(
        id: WatcherId,
        device: D,
        tx: mpsc::Sender<Observation>,
        shutdown: CancellationToken,
        prefix: &str,
        format: &'static RecordFormat,
    ) -> Self {
        Self {
            id,
            device,
            tx,
            shutdown,
            prefix: prefix.to_ascii_lowercase(),
            format,
            state: watch::Sender::new(WatcherState::Subscribing),
        }
    }

    /// Follow the watcher's lifecycle; the receiver outlives the watcher.
    pub fn state(&self) -> watch::Receiver<WatcherState> {
        self.state.subscribe()
    }

    fn matches(&self, key: &str) -> bool {
        key.get(..self.prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(&self.prefix))
    }

    /// Decode every matching entry of one service-data map.
    ///
    /// Failures are logged and counted; they never end the watcher.
    fn decode_entries(&self, data: &ServiceData, decode_errors: &mut u64) -> Vec<Observation> {
        let address = self.device.address();
        let mut observations = Vec::new();

        for (key, value) in data.iter().filter(|(key, _)| self.matches(key)) {
            let decoded = match value {
                ServiceDataValue::Bytes(bytes) => decode_with(self.format, bytes),
                ServiceDataValue::Unsupported(kind) => {
                    Err(DecodeError::UnexpectedType(kind.clone()))
                }
            };

            match decoded {
                Ok(reading) => {
                    if reading.address != address {
                        tracing::debug!(
                            watcher = %self.id,
                            %address,
                            payload_address = %reading.address,
                            "payload address differs from device address"
                        );
                    }
                    observations.push(Observation::now(reading));
                }
                Err(err) => {
                    *decode_errors += 1;
                    tracing::debug!(
                        watcher = %self.id,
                        %address,
                        key = %key,
                        %err,
                        "skipping advertisement"
                    );
                }
            }
        }

        observations
    }

    /// Run until the property stream closes or the watcher is cancelled.
    ///
    /// # Errors
    /// Returns [`DeviceError`] if the subscription cannot be established.
    /// This is terminal for the watcher; a later discovery event is the only
    /// way to watch the device again.
    pub async fn run(self) -> Result<WatchReport, DeviceError> {
        let address = self.device.address();
        let mut events = match self.device.watch_properties().await {
            Ok(events) => events,
            Err(err) => {
                self.state.send_replace(WatcherState::Closed);
                return Err(err);
            }
        };
        self.state.send_replace(WatcherState::Streaming);
        tracing::debug!(watcher = %self.id, %address, "watching device");

        let mut readings = 0;
        let mut decode_errors = 0;

        let end = 'stream: loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break EndReason::Cancelled,
                event = events.next() => event,
            };

            let data = match event {
                Some(PropertyEvent::ServiceData(data)) => data,
                Some(PropertyEvent::Other) => continue,
                None => break EndReason::SourceClosed,
            };

            for observation in self.decode_entries(&data, &mut decode_errors) {
                // Blocks while the consumer is behind
                if self.tx.send(observation).await.is_err() {
                    break 'stream EndReason::ConsumerGone;
                }
                readings += 1;
            }
        };

        // Releases the subscription
        drop(events);
        self.state.send_replace(WatcherState::Closed);

        Ok(WatchReport {
            id: self.id,
            address,
            readings,
            decode_errors,
            end,
        })
    }
}
