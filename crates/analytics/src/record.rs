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

//! The per-minute aggregate record and its wire representation.
//!
//! Downstream consumers byte-compare the textual form of these records, so
//! both the field order and the number rendering are fixed: `date` first,
//! formatted `YYYY-MM-DD HH:MM:SS`, then `average_delivery_time` rendered
//! as the integer `0` when the window was empty and with exactly one
//! decimal place otherwise (`20.0`, `25.5`).

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{
    de, ser::SerializeStruct, Deserialize, Deserializer, Serialize, Serializer,
};
use std::fmt;

/// Textual format of the `date` field
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Rounds a mean to one decimal place, half away from zero
pub(crate) fn round_to_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// One aggregate record: the mean delivery duration, in seconds, over the
/// trailing window ending at the minute boundary `date`
#[derive(Debug, Clone, PartialEq)]
pub struct MinuteAverage {
    date: DateTime<Utc>,
    average_delivery_time: f64,
}

impl MinuteAverage {
    pub fn new(date: DateTime<Utc>, average_delivery_time: f64) -> Self {
        Self {
            date,
            average_delivery_time,
        }
    }
    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }
    pub fn average_delivery_time(&self) -> f64 {
        self.average_delivery_time
    }
}

impl fmt::Display for MinuteAverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{\"date\": \"{}\", \"average_delivery_time\": ",
            self.date.format(DATE_FORMAT)
        )?;
        // An empty window renders as the integer `0`, not `0.0`
        if self.average_delivery_time == 0.0 {
            write!(f, "0}}")
        } else {
            write!(f, "{:.1}}}", self.average_delivery_time)
        }
    }
}

impl Serialize for MinuteAverage {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("MinuteAverage", 2)?;
        state.serialize_field("date", &self.date.format(DATE_FORMAT).to_string())?;
        if self.average_delivery_time == 0.0 {
            state.serialize_field("average_delivery_time", &0u32)?;
        } else {
            state.serialize_field("average_delivery_time", &self.average_delivery_time)?;
        }
        state.end()
    }
}

impl<'de> Deserialize<'de> for MinuteAverage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            date: String,
            average_delivery_time: f64,
        }
        let raw = Raw::deserialize(deserializer)?;
        let date = NaiveDateTime::parse_from_str(&raw.date, DATE_FORMAT)
            .map_err(de::Error::custom)?
            .and_utc();
        Ok(MinuteAverage {
            date,
            average_delivery_time: raw.average_delivery_time,
        })
    }
}
