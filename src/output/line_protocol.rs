//! InfluxDB line protocol.

use super::{PointWriter, WriteError};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::time::SystemTime;

/// Field values for InfluxDB line protocol
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    String(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::Integer(num) => write!(f, "{num}i"),
            FieldValue::String(s) => {
                f.write_str("\"")?;
                write_escaped(f, s, &['"', '\\'])?;
                f.write_str("\"")
            }
        }
    }
}

/// Data point in InfluxDB line protocol
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: Option<SystemTime>,
}

// A trailing backslash would otherwise escape the separator after it
const MEASUREMENT_SPECIAL: &[char] = &[',', ' ', '\\'];
const KEY_SPECIAL: &[char] = &[',', '=', ' ', '\\'];

fn write_escaped(f: &mut fmt::Formatter, value: &str, special: &[char]) -> fmt::Result {
    for c in value.chars() {
        if special.contains(&c) {
            f.write_str("\\")?;
        }
        write!(f, "{c}")?;
    }
    Ok(())
}

fn fmt_tags(point: &Point, f: &mut fmt::Formatter) -> fmt::Result {
    for (key, value) in &point.tags {
        f.write_str(",")?;
        write_escaped(f, key, KEY_SPECIAL)?;
        f.write_str("=")?;
        write_escaped(f, value, KEY_SPECIAL)?;
    }
    Ok(())
}

fn fmt_fields(point: &Point, f: &mut fmt::Formatter) -> fmt::Result {
    let mut first = true;
    for (key, value) in &point.fields {
        if first {
            first = false;
        } else {
            f.write_str(",")?;
        }
        write_escaped(f, key, KEY_SPECIAL)?;
        write!(f, "={value}")?;
    }
    Ok(())
}

fn fmt_timestamp(point: &Point, f: &mut fmt::Formatter) -> fmt::Result {
    // Times before the epoch are written without a timestamp
    if let Some(since_epoch) = point
        .timestamp
        .and_then(|time| time.duration_since(SystemTime::UNIX_EPOCH).ok())
    {
        write!(f, " {}", since_epoch.as_nanos())?;
    }
    Ok(())
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_escaped(f, &self.measurement, MEASUREMENT_SPECIAL)?;
        fmt_tags(self, f)?;
        f.write_str(" ")?;
        fmt_fields(self, f)?;
        fmt_timestamp(self, f)
    }
}

/// Writes one line per point to `out`, e.g. stdout for Telegraf `execd`.
pub struct LineProtocolWriter<W> {
    out: W,
}

impl<W: Write + Send> LineProtocolWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> PointWriter for LineProtocolWriter<W> {
    fn write_point(&mut self, point: Point) {
        if let Err(err) = writeln!(self.out, "{point}") {
            tracing::error!(%err, "failed to write point");
        }
    }

    async fn flush(&mut self) -> Result<(), WriteError> {
        self.out.flush()?;
        Ok(())
    }

    async fn close(mut self) -> Result<(), WriteError> {
        self.out.flush()?;
        Ok(())
    }
}
