//! Integration benchmark for the ingestion pipeline.
//!
//! Benchmarks the full application loop with a fake adapter feeding
//! advertisements through discovery, watchers, name resolution and the line
//! protocol writer.

use atc_listener::app::{Options, run};
use atc_listener::decoder::encode_with;
use atc_listener::names::{KeyValueStore, NamePolicy, NameResolver, StoreError};
use atc_listener::output::line_protocol::LineProtocolWriter;
use atc_listener::source::{
    Adapter, AdapterError, Device, DeviceError, DiscoveryEvent, DiscoveryFilter, DiscoveryStream,
    PropertyEvent, PropertyStream, ServiceDataValue,
};
use atc_listener::{MacAddress, PVVX_CUSTOM, Reading};
use clap::Parser;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use futures::StreamExt;
use futures::stream;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

const UUID: &str = "0000181a-0000-1000-8000-00805f9b34fb";

fn mac(i: u8) -> MacAddress {
    MacAddress([0xA4, 0xC1, 0x38, 0x00, 0x00, i])
}

fn advertisement(address: MacAddress, counter: u8) -> PropertyEvent {
    let reading = Reading {
        address,
        temperature_centi: 2431,
        humidity_centi: 5349,
        battery_mv: 2977,
        battery_percent: 87,
        counter,
        flags: 0,
    };
    let payload = encode_with(&PVVX_CUSTOM, &reading);
    PropertyEvent::ServiceData(
        [(UUID.to_string(), ServiceDataValue::Bytes(payload))]
            .into_iter()
            .collect(),
    )
}

struct FakeDevice {
    address: MacAddress,
    events: Mutex<Option<PropertyStream>>,
}

impl Device for FakeDevice {
    fn address(&self) -> MacAddress {
        self.address
    }

    async fn watch_properties(&self) -> Result<PropertyStream, DeviceError> {
        let events = self.events.lock().unwrap().take();
        Ok(events.unwrap_or_else(|| stream::empty().boxed()))
    }
}

/// A fake adapter reporting `devices` sensors with `per_device` advertisements each.
struct FakeAdapter {
    devices: Mutex<HashMap<MacAddress, Vec<PropertyEvent>>>,
}

impl FakeAdapter {
    fn new(devices: u8, per_device: u8) -> Self {
        let devices = (0..devices)
            .map(|i| {
                let address = mac(i);
                let events = (0..per_device)
                    .map(|counter| advertisement(address, counter))
                    .collect();
                (address, events)
            })
            .collect();
        Self {
            devices: Mutex::new(devices),
        }
    }
}

impl Adapter for FakeAdapter {
    type Device = FakeDevice;

    async fn discover(&self, _filter: DiscoveryFilter) -> Result<DiscoveryStream, AdapterError> {
        let addresses: Vec<_> = self.devices.lock().unwrap().keys().copied().collect();
        Ok(stream::iter(addresses.into_iter().map(DiscoveryEvent::DeviceAdded)).boxed())
    }

    fn device(&self, address: MacAddress) -> Result<FakeDevice, DeviceError> {
        let events = self
            .devices
            .lock()
            .unwrap()
            .remove(&address)
            .ok_or(DeviceError::NotFound(address))?;
        Ok(FakeDevice {
            address,
            events: Mutex::new(Some(stream::iter(events).boxed())),
        })
    }
}

/// Name store where every sensor already has a name.
struct NamedStore;

impl KeyValueStore for NamedStore {
    async fn read(&self, _key: &str) -> Result<Vec<u8>, StoreError> {
        Ok(b"Kitchen".to_vec())
    }

    async fn write(&self, _key: &str, _value: &[u8]) -> Result<(), StoreError> {
        Ok(())
    }
}

fn options(capacity: usize) -> Options {
    Options::parse_from([
        "atc-listener",
        "--sink",
        "stdout",
        "--channel-capacity",
        capacity.to_string().as_str(),
    ])
}

/// Benchmark the full pipeline: discovery -> watcher -> decode -> resolve -> format -> write
fn bench_app_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("app_pipeline");
    let rt = Runtime::new().unwrap();

    for (devices, per_device) in [(1u8, 1u8), (1, 100), (10, 100)] {
        let total = u64::from(devices) * u64::from(per_device);
        group.throughput(Throughput::Elements(total));
        group.bench_with_input(
            BenchmarkId::new("devices_x_readings", format!("{devices}x{per_device}")),
            &(devices, per_device),
            |b, &(devices, per_device)| {
                let options = options(100);
                b.iter(|| {
                    let writer = LineProtocolWriter::new(Vec::<u8>::with_capacity(256 * 1024));
                    let summary = rt.block_on(run(
                        FakeAdapter::new(devices, per_device),
                        NameResolver::new(NamedStore, NamePolicy::Label),
                        writer,
                        &options,
                        CancellationToken::new(),
                    ));
                    black_box(summary.unwrap())
                })
            },
        );
    }

    group.finish();
}

/// Benchmark the effect of channel capacity on throughput
fn bench_channel_capacity(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_capacity");
    let rt = Runtime::new().unwrap();
    group.throughput(Throughput::Elements(1000));

    for capacity in [1usize, 16, 100] {
        let options = options(capacity);
        group.bench_function(BenchmarkId::from_parameter(capacity), |b| {
            b.iter(|| {
                let summary = rt.block_on(run(
                    FakeAdapter::new(10, 100),
                    NameResolver::new(NamedStore, NamePolicy::Label),
                    LineProtocolWriter::new(std::io::sink()),
                    &options,
                    CancellationToken::new(),
                ));
                black_box(summary.unwrap())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_app_pipeline, bench_channel_capacity);
criterion_main!(benches);
