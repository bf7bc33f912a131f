//! Point writers for decoded readings.
//!
//! This module provides the [`PointWriter`] trait the pipeline hands its
//! points to, the mapping from a named observation to an InfluxDB point,
//! and two sinks: line protocol on any [`std::io::Write`] (Telegraf `execd`
//! compatible) and the InfluxDB v2 HTTP write API.

pub mod influxdb;
pub mod line_protocol;

use crate::reading::Observation;
use line_protocol::{FieldValue, Point};
use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use thiserror::Error;

/// Errors reported by point writers.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("InfluxDB rejected write with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("invalid InfluxDB URL: {0}")]
    InvalidUrl(String),
    #[error("writer is closed")]
    Closed,
}

/// Sink for time-series points.
///
/// `write_point` is fire-and-forget: implementations buffer or write
/// without waiting on the network, and report failures through logging.
pub trait PointWriter: Send {
    fn write_point(&mut self, point: Point);

    /// Wait until every point written so far has been handed to the sink.
    fn flush(&mut self) -> impl Future<Output = Result<(), WriteError>> + Send;

    /// Flush and release the writer.
    fn close(self) -> impl Future<Output = Result<(), WriteError>> + Send
    where
        Self: Sized;
}

/// Builds InfluxDB points from named observations.
#[derive(Debug, Clone)]
pub struct PointFormatter {
    /// The measurement name in InfluxDB
    measurement: String,
}

impl PointFormatter {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
        }
    }

    /// Tags identify the sensor by display name and by address.
    fn tag_set(name: &str, observation: &Observation) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert("room".to_string(), name.to_string());
        tags.insert("mac".to_string(), observation.reading.address.to_string());
        tags
    }

    fn field_set(observation: &Observation) -> BTreeMap<String, FieldValue> {
        let r = &observation.reading;
        let mut fields = BTreeMap::new();

        fields.insert("temperature".into(), FieldValue::Float(r.temperature()));
        fields.insert("humidity".into(), FieldValue::Float(r.humidity()));
        fields.insert("batteryMv".into(), FieldValue::Integer(i64::from(r.battery_mv)));
        fields.insert(
            "batteryPercent".into(),
            FieldValue::Integer(i64::from(r.battery_percent)),
        );
        fields.insert(
            "measurementCounter".into(),
            FieldValue::Integer(i64::from(r.counter)),
        );
        fields.insert("flags".into(), FieldValue::Integer(i64::from(r.flags)));

        fields
    }

    pub fn to_point(&self, name: &str, observation: &Observation) -> Point {
        Point {
            measurement: self.measurement.clone(),
            tags: Self::tag_set(name, observation),
            fields: Self::field_set(observation),
            timestamp: Some(observation.observed_at),
        }
    }
}
