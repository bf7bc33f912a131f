//! Advertisement source abstraction.
//!
//! The pipeline never talks to a Bluetooth stack directly. It consumes an
//! [`Adapter`] that yields device-appeared events and hands out [`Device`]
//! handles whose property changes carry the advertised service data. This
//! keeps the core testable without Bluetooth hardware.

#[cfg(feature = "bluer")]
pub mod bluer;

use crate::mac_address::MacAddress;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::future::Future;
use thiserror::Error;

/// Unrecoverable adapter failure, e.g. no default adapter or discovery
/// could not be started.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    #[error("no Bluetooth adapter available")]
    NotAvailable,
}

/// Failure scoped to a single device: it vanished before a handle could be
/// created, or its property notifications could not be subscribed to.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("device {0} not found")]
    NotFound(MacAddress),
    #[error("cannot watch device {address}: {reason}")]
    Subscribe {
        address: MacAddress,
        reason: String,
    },
}

/// Radio transport used during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    Auto,
    BrEdr,
    #[default]
    LowEnergy,
}

/// Discovery options passed to the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryFilter {
    pub transport: Transport,
    /// Report every advertisement, not only ones whose content changed
    pub duplicate_data: bool,
}

impl Default for DiscoveryFilter {
    fn default() -> Self {
        Self {
            transport: Transport::LowEnergy,
            duplicate_data: true,
        }
    }
}

/// Device lifecycle events reported by discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryEvent {
    DeviceAdded(MacAddress),
    DeviceRemoved(MacAddress),
}

/// Value of a single service-data entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceDataValue {
    Bytes(Vec<u8>),
    /// A value of some other type; carries a description of that type
    Unsupported(String),
}

/// Service data keyed by service identifier (UUID string).
pub type ServiceData = BTreeMap<String, ServiceDataValue>;

/// A change of one device property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyEvent {
    ServiceData(ServiceData),
    /// Any property the pipeline does not care about
    Other,
}

/// Stream of discovery events. Dropping it stops discovery.
pub type DiscoveryStream = BoxStream<'static, DiscoveryEvent>;

/// Stream of property changes for one device. Dropping it releases the
/// subscription.
pub type PropertyStream = BoxStream<'static, PropertyEvent>;

/// Local Bluetooth controller performing discovery.
pub trait Adapter: Send + Sync + 'static {
    type Device: Device;

    /// Start discovery. The returned stream is lazy, unbounded and cannot
    /// be restarted; dropping it cancels discovery.
    fn discover(
        &self,
        filter: DiscoveryFilter,
    ) -> impl Future<Output = Result<DiscoveryStream, AdapterError>> + Send;

    /// Resolve a handle for a discovered device.
    fn device(&self, address: MacAddress) -> Result<Self::Device, DeviceError>;
}

/// Handle to one discovered peripheral.
pub trait Device: Send + Sync + 'static {
    fn address(&self) -> MacAddress;

    /// Subscribe to the device's property-change notifications.
    fn watch_properties(
        &self,
    ) -> impl Future<Output = Result<PropertyStream, DeviceError>> + Send;
}
