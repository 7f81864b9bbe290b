//! Renders a sampled series as a JSON object of parallel arrays:
//!
//! ```json
//! {"dateandtime":[100,400],"temperature":[10.0,13.0],"humidity":[50.0,53.0]}
//! ```
//!
//! Key order is fixed and element `i` of every array belongs to the same
//! reading. Separators come from `serde_json`, so an empty column renders as
//! `[]` and a single-element column carries no comma.

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::io::Write;

use crate::error::SeriesError;
use crate::services::readings::Reading;

pub const KEY_DATEANDTIME: &str = "dateandtime";
pub const KEY_TEMPERATURE: &str = "temperature";
pub const KEY_HUMIDITY: &str = "humidity";

/// One element of a column.
///
/// Integers and decimals are written as bare JSON numbers, text is quoted and
/// escaped. Non-finite decimals have no JSON number form and become `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Decimal(f64),
    Text(String),
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Decimal(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesColumn {
    pub key: String,
    pub values: Vec<FieldValue>,
}

impl SeriesColumn {
    pub fn new(key: impl Into<String>, values: Vec<FieldValue>) -> Self {
        Self {
            key: key.into(),
            values,
        }
    }
}

/// An ordered set of equal-length columns.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesDocument {
    columns: Vec<SeriesColumn>,
}

impl SeriesDocument {
    pub fn from_columns(columns: Vec<SeriesColumn>) -> Result<Self, SeriesError> {
        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column.key.as_str()) {
                return Err(SeriesError::MalformedInput(format!(
                    "duplicate column key {:?}",
                    column.key
                )));
            }
        }

        if let Some(first) = columns.first() {
            let expected = first.values.len();
            if let Some(bad) = columns.iter().find(|c| c.values.len() != expected) {
                return Err(SeriesError::MalformedInput(format!(
                    "column {:?} has {} values, column {:?} has {}",
                    bad.key,
                    bad.values.len(),
                    first.key,
                    expected
                )));
            }
        }

        Ok(Self { columns })
    }

    pub fn from_readings(readings: &[Reading]) -> Self {
        let columns = vec![
            SeriesColumn::new(
                KEY_DATEANDTIME,
                readings.iter().map(|r| r.timestamp.into()).collect(),
            ),
            SeriesColumn::new(
                KEY_TEMPERATURE,
                readings.iter().map(|r| r.temperature.into()).collect(),
            ),
            SeriesColumn::new(
                KEY_HUMIDITY,
                readings.iter().map(|r| r.humidity.into()).collect(),
            ),
        ];
        Self { columns }
    }

    pub fn columns(&self) -> &[SeriesColumn] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.first().map(|c| c.values.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, SeriesError> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl Serialize for SeriesDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for column in &self.columns {
            map.serialize_entry(&column.key, &column.values)?;
        }
        map.end()
    }
}

/// Borrowed view that projects one field out of each reading while
/// serializing, so no per-column vectors are built.
struct Projected<'a, F> {
    readings: &'a [Reading],
    field: F,
}

impl<F> Serialize for Projected<'_, F>
where
    F: Fn(&Reading) -> FieldValue,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.readings.len()))?;
        for reading in self.readings {
            seq.serialize_element(&(self.field)(reading))?;
        }
        seq.end()
    }
}

struct ReadingsDocument<'a>(&'a [Reading]);

impl Serialize for ReadingsDocument<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry(
            KEY_DATEANDTIME,
            &Projected {
                readings: self.0,
                field: |r: &Reading| FieldValue::Integer(r.timestamp),
            },
        )?;
        map.serialize_entry(
            KEY_TEMPERATURE,
            &Projected {
                readings: self.0,
                field: |r: &Reading| FieldValue::Decimal(r.temperature),
            },
        )?;
        map.serialize_entry(
            KEY_HUMIDITY,
            &Projected {
                readings: self.0,
                field: |r: &Reading| FieldValue::Decimal(r.humidity),
            },
        )?;
        map.end()
    }
}

/// Writes the series document for `readings` straight into `writer`.
///
/// One forward pass; a failed sink leaves a partial document behind, so
/// callers that retry must discard what was written.
pub fn encode_to<W: Write>(writer: W, readings: &[Reading]) -> Result<(), SeriesError> {
    serde_json::to_writer(writer, &ReadingsDocument(readings))?;
    Ok(())
}

pub fn encode(readings: &[Reading]) -> Result<Vec<u8>, SeriesError> {
    // Roughly 12 bytes per timestamp and 6 per decimal, plus the keys.
    let mut buf = Vec::with_capacity(64 + readings.len() * 26);
    encode_to(&mut buf, readings)?;
    Ok(buf)
}
