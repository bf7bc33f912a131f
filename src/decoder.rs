//! Binary decoder for thermometer service-data advertisements.
//!
//! Each supported firmware record is described by a single [`RecordFormat`]
//! constant: byte order plus an ordered field table. Decoding and encoding
//! both walk that table, so the layout is never re-derived per call.
//!
//! | Format | Revision | Length | Byte order |
//! |--------|----------|--------|------------|
//! | [`PVVX_CUSTOM`] | 1 | 15 bytes | Little-endian |
//! | [`ATC1441`] | 1 | 13 bytes | Big-endian |
//!
//! See <https://github.com/pvvx/ATC_MiThermometer#reading-measurements-in-advertising-mode>.

use crate::mac_address::MacAddress;
use crate::reading::Reading;
use thiserror::Error;

/// Error types for decoding advertisement payloads.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// The payload is shorter than the record it should contain
    #[error("{format} payload must be at least {expected} bytes, got {actual}")]
    TooShort {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
    /// The service-data value was not a byte array
    #[error("unexpected service data value type {0} (expecting a byte array)")]
    UnexpectedType(String),
}

/// Byte order of the multi-byte fields in a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    fn read_u16(self, bytes: &[u8]) -> u16 {
        let raw = [bytes[0], bytes[1]];
        match self {
            ByteOrder::LittleEndian => u16::from_le_bytes(raw),
            ByteOrder::BigEndian => u16::from_be_bytes(raw),
        }
    }

    fn read_i16(self, bytes: &[u8]) -> i16 {
        let raw = [bytes[0], bytes[1]];
        match self {
            ByteOrder::LittleEndian => i16::from_le_bytes(raw),
            ByteOrder::BigEndian => i16::from_be_bytes(raw),
        }
    }

    fn u16_bytes(self, value: u16) -> [u8; 2] {
        match self {
            ByteOrder::LittleEndian => value.to_le_bytes(),
            ByteOrder::BigEndian => value.to_be_bytes(),
        }
    }

    fn i16_bytes(self, value: i16) -> [u8; 2] {
        match self {
            ByteOrder::LittleEndian => value.to_le_bytes(),
            ByteOrder::BigEndian => value.to_be_bytes(),
        }
    }

    fn read_address(self, bytes: &[u8]) -> MacAddress {
        let mut raw = [0u8; 6];
        raw.copy_from_slice(bytes);
        match self {
            ByteOrder::LittleEndian => MacAddress::from_le_bytes(raw),
            ByteOrder::BigEndian => MacAddress(raw),
        }
    }

    fn address_bytes(self, address: MacAddress) -> [u8; 6] {
        match self {
            ByteOrder::LittleEndian => address.to_le_bytes(),
            ByteOrder::BigEndian => address.0,
        }
    }
}

/// One field of a firmware record, in wire units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// 6-byte hardware address, in the record's byte order
    Address,
    /// i16, °C × 100
    TemperatureCenti,
    /// i16, °C × 10
    TemperatureDeci,
    /// u16, % × 100
    HumidityCenti,
    /// u8, whole percent
    HumidityWhole,
    /// u16, mV
    BatteryMilliVolt,
    /// u8, 0-100 %
    BatteryPercent,
    /// u8 sequence number
    Counter,
    /// u8 flag bits
    Flags,
}

impl Field {
    /// Number of bytes the field occupies on the wire.
    pub const fn width(self) -> usize {
        match self {
            Field::Address => 6,
            Field::TemperatureCenti
            | Field::TemperatureDeci
            | Field::HumidityCenti
            | Field::BatteryMilliVolt => 2,
            Field::HumidityWhole | Field::BatteryPercent | Field::Counter | Field::Flags => 1,
        }
    }
}

/// A versioned firmware advertisement layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordFormat {
    pub name: &'static str,
    pub revision: u8,
    pub byte_order: ByteOrder,
    pub fields: &'static [Field],
}

impl RecordFormat {
    /// Minimum payload length, the sum of all field widths.
    pub const fn record_len(&self) -> usize {
        let mut len = 0;
        let mut i = 0;
        while i < self.fields.len() {
            len += self.fields[i].width();
            i += 1;
        }
        len
    }
}

/// pvvx "custom" advertising format (service UUID 0x181A).
pub const PVVX_CUSTOM: RecordFormat = RecordFormat {
    name: "pvvx-custom",
    revision: 1,
    byte_order: ByteOrder::LittleEndian,
    fields: &[
        Field::Address,
        Field::TemperatureCenti,
        Field::HumidityCenti,
        Field::BatteryMilliVolt,
        Field::BatteryPercent,
        Field::Counter,
        Field::Flags,
    ],
};

/// atc1441 firmware advertising format (service UUID 0x181A).
pub const ATC1441: RecordFormat = RecordFormat {
    name: "atc1441",
    revision: 1,
    byte_order: ByteOrder::BigEndian,
    fields: &[
        Field::Address,
        Field::TemperatureDeci,
        Field::HumidityWhole,
        Field::BatteryPercent,
        Field::BatteryMilliVolt,
        Field::Counter,
    ],
};

/// Firmware selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Firmware {
    /// pvvx custom format, little-endian, 15 bytes
    #[default]
    Pvvx,
    /// atc1441 format, big-endian, 13 bytes
    Atc1441,
}

impl Firmware {
    pub fn format(self) -> &'static RecordFormat {
        match self {
            Firmware::Pvvx => &PVVX_CUSTOM,
            Firmware::Atc1441 => &ATC1441,
        }
    }
}

/// Decode a pvvx custom-format payload.
pub fn decode(payload: &[u8]) -> Result<Reading, DecodeError> {
    decode_with(&PVVX_CUSTOM, payload)
}

/// Decode a payload laid out as `format`.
///
/// Trailing bytes beyond [`RecordFormat::record_len`] are ignored. Either
/// every field decodes or the call fails; there is no partial reading.
///
/// # Errors
/// Returns [`DecodeError::TooShort`] if the payload cannot hold a full record.
pub fn decode_with(format: &RecordFormat, payload: &[u8]) -> Result<Reading, DecodeError> {
    let expected = format.record_len();
    if payload.len() < expected {
        return Err(DecodeError::TooShort {
            format: format.name,
            expected,
            actual: payload.len(),
        });
    }

    let order = format.byte_order;
    let mut reading = Reading::default();
    let mut offset = 0;

    for field in format.fields {
        let bytes = &payload[offset..offset + field.width()];
        offset += field.width();

        match field {
            Field::Address => reading.address = order.read_address(bytes),
            Field::TemperatureCenti => reading.temperature_centi = order.read_i16(bytes),
            Field::TemperatureDeci => {
                reading.temperature_centi = order.read_i16(bytes).saturating_mul(10);
            }
            Field::HumidityCenti => reading.humidity_centi = order.read_u16(bytes),
            Field::HumidityWhole => reading.humidity_centi = u16::from(bytes[0]) * 100,
            Field::BatteryMilliVolt => reading.battery_mv = order.read_u16(bytes),
            Field::BatteryPercent => reading.battery_percent = bytes[0],
            Field::Counter => reading.counter = bytes[0],
            Field::Flags => reading.flags = bytes[0],
        }
    }

    Ok(reading)
}

/// Encode a reading as `format`, the inverse of [`decode_with`].
///
/// Fields the format does not carry are dropped; values are truncated to
/// the format's resolution.
pub fn encode_with(format: &RecordFormat, reading: &Reading) -> Vec<u8> {
    let order = format.byte_order;
    let mut out = Vec::with_capacity(format.record_len());

    for field in format.fields {
        match field {
            Field::Address => out.extend_from_slice(&order.address_bytes(reading.address)),
            Field::TemperatureCenti => {
                out.extend_from_slice(&order.i16_bytes(reading.temperature_centi));
            }
            Field::TemperatureDeci => {
                out.extend_from_slice(&order.i16_bytes(reading.temperature_centi / 10));
            }
            Field::HumidityCenti => out.extend_from_slice(&order.u16_bytes(reading.humidity_centi)),
            Field::HumidityWhole => {
                out.push(u8::try_from(reading.humidity_centi / 100).unwrap_or(u8::MAX));
            }
            Field::BatteryMilliVolt => out.extend_from_slice(&order.u16_bytes(reading.battery_mv)),
            Field::BatteryPercent => out.push(reading.battery_percent),
            Field::Counter => out.push(reading.counter),
            Field::Flags => out.push(reading.flags),
        }
    }

    out
}
