//! BlueZ D-Bus backend.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.

use super::{
    Adapter, AdapterError, Device, DeviceError, DiscoveryEvent, DiscoveryFilter, DiscoveryStream,
    PropertyEvent, PropertyStream, ServiceDataValue, Transport,
};
use crate::mac_address::MacAddress;
use bluer::{AdapterEvent, DeviceEvent, DeviceProperty, DiscoveryTransport, Session};
use futures::StreamExt;
use std::collections::HashMap;

impl From<bluer::Error> for AdapterError {
    fn from(err: bluer::Error) -> Self {
        AdapterError::Bluetooth(err.to_string())
    }
}

impl From<Transport> for DiscoveryTransport {
    fn from(transport: Transport) -> Self {
        match transport {
            Transport::Auto => DiscoveryTransport::Auto,
            Transport::BrEdr => DiscoveryTransport::BrEdr,
            Transport::LowEnergy => DiscoveryTransport::Le,
        }
    }
}

/// The default BlueZ adapter, powered on.
pub struct BluerAdapter {
    // Keeps the D-Bus connection alive for as long as the adapter is used
    _session: Session,
    adapter: bluer::Adapter,
}

impl BluerAdapter {
    /// Open a BlueZ session and power on the default adapter.
    ///
    /// # Errors
    /// Returns [`AdapterError`] if the daemon is unreachable or no adapter
    /// is present.
    pub async fn open() -> Result<Self, AdapterError> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        tracing::info!(adapter = adapter.name(), "Bluetooth adapter ready");

        Ok(Self {
            _session: session,
            adapter,
        })
    }
}

impl Adapter for BluerAdapter {
    type Device = BluerDevice;

    async fn discover(&self, filter: DiscoveryFilter) -> Result<DiscoveryStream, AdapterError> {
        self.adapter
            .set_discovery_filter(bluer::DiscoveryFilter {
                transport: filter.transport.into(),
                duplicate_data: filter.duplicate_data,
                ..Default::default()
            })
            .await?;

        let events = self.adapter.discover_devices().await?;
        let stream = events.filter_map(|event| async move {
            match event {
                AdapterEvent::DeviceAdded(address) => {
                    Some(DiscoveryEvent::DeviceAdded(address.into()))
                }
                AdapterEvent::DeviceRemoved(address) => {
                    Some(DiscoveryEvent::DeviceRemoved(address.into()))
                }
                _ => None,
            }
        });

        Ok(stream.boxed())
    }

    fn device(&self, address: MacAddress) -> Result<BluerDevice, DeviceError> {
        self.adapter
            .device(address.into())
            .map(|inner| BluerDevice { inner })
            .map_err(|_| DeviceError::NotFound(address))
    }
}

/// A BlueZ device object.
pub struct BluerDevice {
    inner: bluer::Device,
}

impl Device for BluerDevice {
    fn address(&self) -> MacAddress {
        self.inner.address().into()
    }

    async fn watch_properties(&self) -> Result<PropertyStream, DeviceError> {
        let address = self.address();
        let events = self
            .inner
            .events()
            .await
            .map_err(|err| DeviceError::Subscribe {
                address,
                reason: err.to_string(),
            })?;

        let stream = events.map(|event| match event {
            DeviceEvent::PropertyChanged(DeviceProperty::ServiceData(data)) => {
                PropertyEvent::ServiceData(service_data(data))
            }
            _ => PropertyEvent::Other,
        });

        Ok(stream.boxed())
    }
}

/// BlueZ keys service data by UUID; the pipeline matches on the UUID string.
fn service_data(data: HashMap<bluer::Uuid, Vec<u8>>) -> super::ServiceData {
    data.into_iter()
        .map(|(uuid, bytes)| (uuid.to_string(), ServiceDataValue::Bytes(bytes)))
        .collect()
}
