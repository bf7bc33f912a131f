//! `atc-listener` library.
//!
//! Listens for BLE advertisements from Xiaomi thermometers running the
//! ATC/pvvx custom firmware and forwards decoded readings to InfluxDB.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup,
//! signal handling and process exit codes. The pipeline itself lives in
//! [`crate::app`] where it can be tested deterministically with an injected
//! adapter, name store and point writer:
//!
//! ```text
//! Adapter ─ discovery ─▶ Dispatcher ─ spawn ─▶ Watcher (one per device)
//!                                                 │ decode
//!                                                 ▼
//!                      PointWriter ◀─ name ─ consumer (app::run)
//! ```

pub mod alias;
pub mod app;
pub mod decoder;
pub mod dispatcher;
pub mod mac_address;
pub mod names;
pub mod output;
pub mod reading;
pub mod source;
pub mod watcher;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use alias::{Alias, parse_alias};
pub use app::{Options, RunError, RunSummary, Sink, parse_duration, run};
pub use decoder::{ATC1441, DecodeError, Firmware, PVVX_CUSTOM, RecordFormat, decode, decode_with};
pub use dispatcher::DispatchSummary;
pub use mac_address::MacAddress;
pub use names::{DirStore, KeyValueStore, NamePolicy, NameResolver, StoreError};
pub use output::influxdb::{InfluxConfig, InfluxWriter};
pub use output::line_protocol::{LineProtocolWriter, Point};
pub use output::{PointFormatter, PointWriter, WriteError};
pub use reading::{Observation, Reading};
pub use source::{Adapter, AdapterError, Device, DeviceError};
