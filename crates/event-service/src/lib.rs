// Copyright (C) 2024-present The Transtats Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied.
// See the License for the specific language governing permissions and
// limitations under the License.

pub mod reader;

pub use reader::{DeliveryEventReader, LineErrorCallback};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use transtats_analytics::aggregation::TimeSeriesData;

/// The only event type carried by the delivery feed; events with any other
/// `event_name` are dropped during ingestion
pub const DELIVERY_EVENT_NAME: &str = "translation_delivered";

/// Wire format of event timestamps, e.g. `2018-12-26 18:11:08.509654`
pub(crate) mod timestamp_format {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&date.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&value, FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

/// One `translation_delivered` event as carried on the wire, one JSON
/// object per line.
///
/// Only `timestamp` and `duration` feed the aggregation; the remaining
/// payload fields are optional and carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryEvent {
    #[serde(with = "timestamp_format")]
    pub timestamp: DateTime<Utc>,
    pub duration: f64,
    pub event_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nr_words: Option<u64>,
}

impl TimeSeriesData for DeliveryEvent {
    fn get_ts(&self) -> DateTime<Utc> {
        self.timestamp
    }
    fn get_duration(&self) -> f64 {
        self.duration
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Display)]
pub enum EventSourceError {
    #[strum(to_string = "JSON error in {context}: {reason}")]
    JsonError { context: String, reason: String },

    #[strum(to_string = "Invalid event in {context}: {reason}")]
    InvalidEvent { context: String, reason: String },

    #[strum(to_string = "IO error in {context}: {reason}")]
    IoError { context: String, reason: String },
}

impl std::error::Error for EventSourceError {}

impl EventSourceError {
    /// Returns a static category label for metrics classification.
    pub fn category(&self) -> &'static str {
        match self {
            Self::JsonError { .. } => "json_error",
            Self::InvalidEvent { .. } => "invalid_event",
            Self::IoError { .. } => "io_error",
        }
    }
}
