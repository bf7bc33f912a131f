use crate::mac_address::MacAddress;
use crate::names::{KeyValueStore, StoreError};
use crate::output::line_protocol::Point;
use crate::output::{PointWriter, WriteError};
use crate::reading::Reading;
use crate::source::{
    Adapter, AdapterError, Device, DeviceError, DiscoveryEvent, DiscoveryFilter, DiscoveryStream,
    PropertyEvent, PropertyStream, ServiceDataValue,
};
use futures::StreamExt;
use futures::channel::mpsc;
use futures::stream;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::Poll;

/// The sensor used throughout the tests.
pub const SAMPLE_MAC: MacAddress = MacAddress([0xA4, 0xC1, 0x38, 0x00, 0x11, 0x22]);

/// pvvx custom payload for [`SAMPLE_MAC`]: 25.00 °C, 55.00 %, 2980 mV, 87 %,
/// counter 12, flags 0x01.
pub fn sample_payload() -> Vec<u8> {
    vec![
        0x22, 0x11, 0x00, 0x38, 0xC1, 0xA4, // MAC, least significant first
        0xC4, 0x09, // 2500
        0x7C, 0x15, // 5500
        0xA4, 0x0B, // 2980 mV
        87,   // battery %
        12,   // counter
        0x01, // flags
    ]
}

/// The reading encoded by [`sample_payload`].
pub fn sample_reading() -> Reading {
    Reading {
        address: SAMPLE_MAC,
        temperature_centi: 2500,
        humidity_centi: 5500,
        battery_mv: 2980,
        battery_percent: 87,
        counter: 12,
        flags: 0x01,
    }
}

/// A property change carrying a single service-data entry.
pub fn service_data(key: &str, value: ServiceDataValue) -> PropertyEvent {
    PropertyEvent::ServiceData([(key.to_string(), value)].into_iter().collect())
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    writes: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

/// In-memory [`KeyValueStore`] with failure injection. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    /// Successful writes so far.
    pub fn writes(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let entries = self.inner.entries.lock().unwrap();
        entries
            .get(key)
            .map(|value| String::from_utf8_lossy(value).into_owned())
    }

    /// Edit an entry out-of-band, without counting a write.
    pub fn insert(&self, key: &str, value: &str) {
        let mut entries = self.inner.entries.lock().unwrap();
        entries.insert(key.to_string(), value.as_bytes().to_vec());
    }

    pub fn fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl KeyValueStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        if self.inner.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Io {
                key: key.to_string(),
                source: io::Error::other("injected read failure"),
            });
        }
        let entries = self.inner.entries.lock().unwrap();
        entries
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn write(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io {
                key: key.to_string(),
                source: io::Error::other("injected write failure"),
            });
        }
        self.inner
            .entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// [`PointWriter`] that keeps every point. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct RecordingWriter {
    points: Arc<Mutex<Vec<Point>>>,
    flushes: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl RecordingWriter {
    pub fn points(&self) -> Vec<Point> {
        self.points.lock().unwrap().clone()
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl PointWriter for RecordingWriter {
    fn write_point(&mut self, point: Point) {
        self.points.lock().unwrap().push(point);
    }

    async fn flush(&mut self) -> Result<(), WriteError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(mut self) -> Result<(), WriteError> {
        self.flush().await?;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Device whose property stream is scripted or fed by the test.
pub struct FakeDevice {
    address: MacAddress,
    events: Mutex<Option<PropertyStream>>,
}

impl FakeDevice {
    /// Emits `events`, then the stream ends.
    pub fn scripted(address: MacAddress, events: Vec<PropertyEvent>) -> Self {
        Self {
            address,
            events: Mutex::new(Some(stream::iter(events).boxed())),
        }
    }

    /// Stream stays open until the returned sender is dropped. The sender
    /// reports closed once the watcher releases the subscription.
    pub fn live(address: MacAddress) -> (Self, mpsc::UnboundedSender<PropertyEvent>) {
        let (tx, rx) = mpsc::unbounded();
        let device = Self {
            address,
            events: Mutex::new(Some(rx.boxed())),
        };
        (device, tx)
    }

    /// Refuses every subscription.
    pub fn failing(address: MacAddress) -> Self {
        Self {
            address,
            events: Mutex::new(None),
        }
    }
}

impl Device for FakeDevice {
    fn address(&self) -> MacAddress {
        self.address
    }

    async fn watch_properties(&self) -> Result<PropertyStream, DeviceError> {
        let events = self.events.lock().unwrap().take();
        events.ok_or(DeviceError::Subscribe {
            address: self.address,
            reason: "subscription refused".to_string(),
        })
    }
}

/// Adapter with a scripted or test-fed discovery stream. Each
/// `DeviceAdded` lookup hands out the next queued device for the address.
pub struct FakeAdapter {
    discovery: Mutex<Option<DiscoveryStream>>,
    devices: Mutex<HashMap<MacAddress, VecDeque<FakeDevice>>>,
    filter: Arc<Mutex<Option<DiscoveryFilter>>>,
    unavailable: bool,
}

impl FakeAdapter {
    fn with_discovery(discovery: Option<DiscoveryStream>) -> Self {
        Self {
            discovery: Mutex::new(discovery),
            devices: Mutex::new(HashMap::new()),
            filter: Arc::new(Mutex::new(None)),
            unavailable: false,
        }
    }

    /// Reports `events`, then discovery ends.
    pub fn scripted(events: Vec<DiscoveryEvent>) -> Self {
        Self::with_discovery(Some(stream::iter(events).boxed()))
    }

    /// Discovery stays open until the returned sender is dropped.
    pub fn live() -> (Self, mpsc::UnboundedSender<DiscoveryEvent>) {
        let (tx, rx) = mpsc::unbounded();
        (Self::with_discovery(Some(rx.boxed())), tx)
    }

    /// Discovery starts, but the dispatcher panics on its first poll.
    pub fn panicking() -> Self {
        let discovery = stream::poll_fn(|_| -> Poll<Option<DiscoveryEvent>> {
            panic!("discovery stream panicked")
        });
        Self::with_discovery(Some(discovery.boxed()))
    }

    /// Discovery cannot be started.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::with_discovery(None)
        }
    }

    pub fn with_device(self, device: FakeDevice) -> Self {
        self.devices
            .lock()
            .unwrap()
            .entry(device.address)
            .or_default()
            .push_back(device);
        self
    }

    /// Take the discovery stream without going through [`Adapter::discover`].
    pub fn take_discovery(&self) -> DiscoveryStream {
        self.discovery
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| stream::empty().boxed())
    }

    /// The filter passed to the last `discover` call.
    pub fn filter_log(&self) -> Arc<Mutex<Option<DiscoveryFilter>>> {
        Arc::clone(&self.filter)
    }
}

impl Adapter for FakeAdapter {
    type Device = FakeDevice;

    async fn discover(&self, filter: DiscoveryFilter) -> Result<DiscoveryStream, AdapterError> {
        if self.unavailable {
            return Err(AdapterError::NotAvailable);
        }
        *self.filter.lock().unwrap() = Some(filter);
        let discovery = self.discovery.lock().unwrap().take();
        discovery.ok_or_else(|| AdapterError::Bluetooth("discovery already started".to_string()))
    }

    fn device(&self, address: MacAddress) -> Result<FakeDevice, DeviceError> {
        self.devices
            .lock()
            .unwrap()
            .get_mut(&address)
            .and_then(VecDeque::pop_front)
            .ok_or(DeviceError::NotFound(address))
    }
}
