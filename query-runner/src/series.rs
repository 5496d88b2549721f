//! Conversion of raw API time series into numeric series.

use crate::resource_metrics::{ResourceMetrics, SeriesInfo};
use crate::types::{MetricsValue, ResourceId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::num::ParseFloatError;
use thiserror::Error;

pub const LABEL_ID: &str = "id";
pub const LABEL_NAME: &str = "name";
pub const LABEL_SERIES_NAME: &str = "series_name";
pub const LABEL_SERIES_DISPLAY_NAME: &str = "series_display_name";

#[derive(Error, Debug, Clone, PartialEq)]
#[error("series {series}: sample {index} has non-numeric value {value:?}: {source}")]
pub struct ValueParseError {
    pub series: String,
    pub index: usize,
    pub value: String,
    #[source]
    pub source: ParseFloatError,
}

/// One time series of one resource, ready to be rendered.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Series {
    pub resource_id: ResourceId,
    pub name: String,
    pub display_name: String,
    pub unit: String,
    pub labels: BTreeMap<String, String>,
    /// Unix timestamps in seconds
    pub timestamps: Vec<i64>,
    pub values: Vec<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Converts every series of `metrics` into a [`Series`], sorted by name.
///
/// Samples whose value is not a number become NaN and add a warning to
/// their series; the rest of the series is kept.
pub fn to_series<M: ResourceMetrics>(resource_id: ResourceId, metrics: &M) -> Vec<Series> {
    let mut series: Vec<Series> = metrics
        .time_series()
        .iter()
        .map(|(name, samples)| convert(resource_id, name, samples, M::series_info(name)))
        .collect();

    series.sort_by(|a, b| a.name.cmp(&b.name));
    series
}

fn convert(
    resource_id: ResourceId,
    name: &str,
    samples: &[MetricsValue],
    info: Option<SeriesInfo>,
) -> Series {
    let (display_name, unit) = match info {
        Some(info) => (info.display_name.to_string(), info.unit.to_string()),
        None => (name.to_string(), String::new()),
    };

    let mut timestamps = Vec::with_capacity(samples.len());
    let mut values = Vec::with_capacity(samples.len());
    let mut warnings = Vec::new();

    for (index, sample) in samples.iter().enumerate() {
        timestamps.push(sample.timestamp as i64);
        match parse_value(name, index, &sample.value) {
            Ok(value) => values.push(value),
            Err(e) => {
                tracing::debug!(resource_id, error = %e, "Unparseable metrics value");
                warnings.push(e.to_string());
                values.push(f64::NAN);
            }
        }
    }

    let labels = BTreeMap::from([
        (LABEL_ID.to_string(), resource_id.to_string()),
        (LABEL_SERIES_NAME.to_string(), name.to_string()),
        (LABEL_SERIES_DISPLAY_NAME.to_string(), display_name.clone()),
    ]);

    Series {
        resource_id,
        name: name.to_string(),
        display_name,
        unit,
        labels,
        timestamps,
        values,
        warnings,
    }
}

fn parse_value(series: &str, index: usize, value: &str) -> Result<f64, ValueParseError> {
    value.parse::<f64>().map_err(|source| ValueParseError {
        series: series.to_string(),
        index,
        value: value.to_string(),
        source,
    })
}
