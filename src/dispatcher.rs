//! Discovery dispatcher.
//!
//! Consumes the adapter's discovery stream and spawns one [`Watcher`] per
//! resolved device. Watchers are tracked in a [`WatcherSet`] keyed by a
//! monotonic [`WatcherId`], so every task is joined before the dispatcher
//! returns.

use crate::decoder::RecordFormat;
use crate::mac_address::MacAddress;
use crate::reading::Observation;
use crate::source::{Adapter, Device, DeviceError, DiscoveryEvent, DiscoveryStream};
use crate::watcher::{WatchReport, Watcher, WatcherId};
use futures::StreamExt;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Settings shared by every spawned watcher.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Service-data key prefix, matched ignoring case
    pub prefix: String,
    pub format: &'static RecordFormat,
    /// Replace an active watcher when its device is reported again
    pub dedupe: bool,
}

/// Totals reported when the dispatcher finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Watchers started
    pub spawned: u64,
    /// Discovered devices for which no handle could be created
    pub resolve_failures: u64,
    /// Watchers that could not subscribe or panicked
    pub watchers_failed: u64,
    /// Readings pushed by all watchers
    pub readings: u64,
    /// Advertisements that failed to decode
    pub decode_errors: u64,
}

type WatchOutcome = (WatcherId, MacAddress, Result<WatchReport, DeviceError>);

/// Running watcher tasks.
pub struct WatcherSet {
    tasks: JoinSet<WatchOutcome>,
    next_id: u64,
    active: HashMap<MacAddress, (WatcherId, CancellationToken)>,
    dedupe: bool,
}

impl WatcherSet {
    pub fn new(dedupe: bool) -> Self {
        Self {
            tasks: JoinSet::new(),
            next_id: 1,
            active: HashMap::new(),
            dedupe,
        }
    }

    /// Number of watchers not yet joined.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Spawn a watcher for `device`.
    ///
    /// Each watcher gets a child of `shutdown`, so cancelling `shutdown`
    /// stops all of them. With deduplication a watcher already running for
    /// the same address is cancelled first.
    pub fn spawn<D: Device>(
        &mut self,
        device: D,
        tx: mpsc::Sender<Observation>,
        shutdown: &CancellationToken,
        config: &WatchConfig,
    ) -> WatcherId {
        let id = WatcherId(self.next_id);
        self.next_id += 1;

        let address = device.address();
        let token = shutdown.child_token();

        if self.dedupe
            && let Some((previous, old)) = self.active.insert(address, (id, token.clone()))
        {
            tracing::info!(watcher = %previous, %address, replaced_by = %id, "replacing watcher");
            old.cancel();
        }

        let watcher = Watcher::new(id, device, tx, token, &config.prefix, config.format);
        self.tasks.spawn(async move { (id, address, watcher.run().await) });

        tracing::info!(watcher = %id, %address, "watcher started");
        id
    }

    /// Collect watchers that have already finished.
    pub fn reap(&mut self, summary: &mut DispatchSummary) {
        while let Some(result) = self.tasks.try_join_next() {
            self.record(result, summary);
        }
    }

    /// Wait for every remaining watcher.
    pub async fn join_all(&mut self, summary: &mut DispatchSummary) {
        while let Some(result) = self.tasks.join_next().await {
            self.record(result, summary);
        }
    }

    fn record(&mut self, result: Result<WatchOutcome, JoinError>, summary: &mut DispatchSummary) {
        let (id, address, outcome) = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(%err, "watcher task failed");
                summary.watchers_failed += 1;
                return;
            }
        };

        if self
            .active
            .get(&address)
            .is_some_and(|(active, _)| *active == id)
        {
            self.active.remove(&address);
        }

        match outcome {
            Ok(report) => {
                summary.readings += report.readings;
                summary.decode_errors += report.decode_errors;
                tracing::info!(
                    watcher = %id,
                    %address,
                    readings = report.readings,
                    decode_errors = report.decode_errors,
                    end = ?report.end,
                    "watcher finished"
                );
            }
            Err(err) => {
                summary.watchers_failed += 1;
                tracing::warn!(watcher = %id, %address, %err, "watcher failed");
            }
        }
    }
}

/// Spawns watchers for discovered devices.
pub struct Dispatcher<A> {
    adapter: A,
    tx: mpsc::Sender<Observation>,
    shutdown: CancellationToken,
    config: WatchConfig,
}

impl<A: Adapter> Dispatcher<A> {
    /// # Arguments
    /// * `tx` - Sender cloned into every watcher; dropped when the dispatcher ends
    /// * `shutdown` - Stops discovery and every watcher when cancelled
    pub fn new(
        adapter: A,
        tx: mpsc::Sender<Observation>,
        shutdown: CancellationToken,
        config: WatchConfig,
    ) -> Self {
        Self {
            adapter,
            tx,
            shutdown,
            config,
        }
    }

    /// Dispatch until `discovery` ends or shutdown is requested, then wait
    /// for all watchers.
    ///
    /// Device lookup failures are expected when a peripheral disappears
    /// right after being discovered; they are logged and never stop
    /// discovery.
    pub async fn run(self, mut discovery: DiscoveryStream) -> DispatchSummary {
        let mut watchers = WatcherSet::new(self.config.dedupe);
        let mut summary = DispatchSummary::default();

        loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    tracing::info!("shutdown requested, stopping discovery");
                    break;
                }
                event = discovery.next() => event,
            };

            watchers.reap(&mut summary);

            match event {
                Some(DiscoveryEvent::DeviceAdded(address)) => match self.adapter.device(address) {
                    Ok(device) => {
                        watchers.spawn(device, self.tx.clone(), &self.shutdown, &self.config);
                        summary.spawned += 1;
                    }
                    Err(err) => {
                        summary.resolve_failures += 1;
                        tracing::warn!(%address, %err, "cannot get device handle");
                    }
                },
                Some(DiscoveryEvent::DeviceRemoved(address)) => {
                    tracing::debug!(%address, "device removed");
                }
                None => {
                    tracing::info!("discovery stream ended");
                    break;
                }
            }
        }

        // Dropping the stream stops discovery
        drop(discovery);
        drop(self.tx);

        tracing::debug!(watchers = watchers.len(), "waiting for watchers");
        watchers.join_all(&mut summary).await;
        summary
    }
}
