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

//! A module that provides moving-average aggregation of time-series data
//! over a trailing minute window.
//!
//! The main components are:
//! - `TimeSeriesData`: A trait that defines required methods for time-series
//!   data points
//! - `MovingAverageAggregator`: Core struct that owns the trailing window and
//!   the per-minute emission cursor
//! - `MovingAverageAdaptor`: Iterator adapter providing an ergonomic API over
//!   MovingAverageAggregator
//! - `MovingAverageStreamAdaptor`: The same API over an async `Stream`
//!
//! The windowing system features:
//! - A virtual per-minute clock advanced by event time, independent of
//!   wall-clock time, that emits one aggregate per minute including minutes
//!   with no events
//! - A bounded working set of events still inside the trailing window, with
//!   O(1) amortized admission and eviction
//! - A drain phase after the source is exhausted that keeps emitting until
//!   the window has aged past the last event
//!
//! Example usage:
//! ```text
//! use transtats_analytics::aggregation::{AggregationConfig, MovingAverageExt};
//!
//! let config = AggregationConfig { window_size: 10 };
//! let records = get_delivery_event_iterator()
//!     .moving_average(&config)?
//!     .filter_map(|x| x.left()) // Keep only aggregate records
//!     .collect::<Vec<_>>();
//! ```

use crate::record::{round_to_tenth, MinuteAverage};
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use futures_core::Stream;
use pin_project::pin_project;
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    pin::Pin,
    task::{Context, Poll},
};

/// A trait for defining time-series data points consumed by the moving
/// average window
pub trait TimeSeriesData {
    fn get_ts(&self) -> DateTime<Utc>;
    fn get_duration(&self) -> f64;
}

#[derive(Debug, Clone)]
pub enum ConfigurationError {
    InvalidWindowSize,
}

impl std::fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidWindowSize => write!(f, "window_size must be greater than 0"),
        }
    }
}

impl std::error::Error for ConfigurationError {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Size of the trailing interval, in minutes, over which the mean is
    /// computed
    pub window_size: u32,
}

impl AggregationConfig {
    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.window_size == 0 {
            return Err(ConfigurationError::InvalidWindowSize);
        }
        Ok(())
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        AggregationConfig { window_size: 10 }
    }
}

/// Helper function to return the start of the minute containing the given
/// timestamp
pub(crate) fn get_minute_start(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(
        timestamp.year(),
        timestamp.month(),
        timestamp.day(),
        timestamp.hour(),
        timestamp.minute(),
        0,
    )
    .unwrap()
}

/// A struct for moving-average aggregation of time-series data over a
/// trailing minute window.
///
/// The struct maintains the set of events still inside the trailing window
/// and a per-minute emission cursor. Events must arrive in non-decreasing
/// timestamp order; an event older than the previously admitted one is not
/// admitted and is handed back to the caller instead.
#[derive(Clone, Debug)]
pub struct MovingAverageAggregator<T> {
    /// Events inside the trailing window, oldest at the head
    window: VecDeque<T>,
    /// Next minute boundary to emit, unset until the first event is admitted
    current_minute: Option<DateTime<Utc>>,
    /// Minute of the most recently admitted event, anchors the drain endpoint
    last_event_minute: Option<DateTime<Utc>>,
    /// Timestamp of the most recently admitted event, guards input order
    last_event_ts: Option<DateTime<Utc>>,
    /// Length of the trailing window
    window_duration: Duration,
}

impl<T: TimeSeriesData> MovingAverageAggregator<T> {
    /// Create a new `MovingAverageAggregator` with the given window
    /// configuration
    pub fn new(config: &AggregationConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            window: VecDeque::new(),
            current_minute: None,
            last_event_minute: None,
            last_event_ts: None,
            window_duration: Duration::minutes(i64::from(config.window_size())),
        })
    }

    /// Admits one event, emitting one aggregate record per minute the
    /// emission cursor advances to catch up with the event's minute.
    ///
    /// An event whose timestamp is older than the previously admitted
    /// event's is returned on the second side instead of being admitted.
    pub fn process_item(
        &mut self,
        item: T,
    ) -> (
        impl Iterator<Item = MinuteAverage>,
        impl Iterator<Item = T>,
    ) {
        let ts = item.get_ts();
        let mut records = Vec::new();
        let mut late_items = Vec::with_capacity(1);
        if self.last_event_ts.is_some_and(|last| ts < last) {
            late_items.push(item);
        } else {
            let event_minute = get_minute_start(ts);
            let mut minute = *self.current_minute.get_or_insert(event_minute);
            self.last_event_minute = Some(event_minute);
            self.last_event_ts = Some(ts);
            while minute <= event_minute {
                records.push(self.emit_step(minute));
                minute += Duration::minutes(1);
            }
            self.current_minute = Some(minute);
            self.window.push_back(item);
        }
        (records.into_iter(), late_items.into_iter())
    }

    /// Drains the aggregator after the source is exhausted, emitting one
    /// record per minute until the window has aged `window_size` minutes
    /// past the last admitted event. Emits nothing if no event was ever
    /// admitted, and nothing on a repeated call.
    pub fn flush(&mut self) -> impl Iterator<Item = MinuteAverage> {
        let mut records = Vec::new();
        if let (Some(mut minute), Some(last_event_minute)) =
            (self.current_minute, self.last_event_minute.take())
        {
            let end = last_event_minute + self.window_duration;
            while minute <= end {
                records.push(self.emit_step(minute));
                minute += Duration::minutes(1);
            }
            self.current_minute = Some(minute);
        }
        records.into_iter()
    }

    /// Evicts events that fell out of the trailing window ending at
    /// `minute`, then produces the aggregate record for that minute.
    fn emit_step(&mut self, minute: DateTime<Utc>) -> MinuteAverage {
        // An event exactly `window_size` minutes old is already outside:
        // the window covers [minute - window_size, minute)
        while let Some(front) = self.window.front() {
            if minute - front.get_ts() >= self.window_duration {
                self.window.pop_front();
            } else {
                break;
            }
        }
        let average = if self.window.is_empty() {
            0.0
        } else {
            let total: f64 = self.window.iter().map(|e| e.get_duration()).sum();
            round_to_tenth(total / self.window.len() as f64)
        };
        MinuteAverage::new(minute, average)
    }
}

/// An iterator adaptor that provides an ergonomic API for moving-average
/// aggregation
///
/// The adaptor takes an iterator of time-series data points and yields
/// `Either::Left` aggregate records, one per minute covered by the input
/// plus the drain tail. Events rejected for arriving out of order are
/// yielded as `Either::Right`.
pub struct MovingAverageAdaptor<Input, I: Iterator<Item = Input>> {
    source: I,
    aggregator: MovingAverageAggregator<Input>,
    buffer: VecDeque<MinuteAverage>,
    late_buffer: VecDeque<Input>,
}

impl<Input: TimeSeriesData, I: Iterator<Item = Input>> MovingAverageAdaptor<Input, I> {
    fn new(source: I, aggregator: MovingAverageAggregator<Input>) -> Self {
        Self {
            source,
            aggregator,
            buffer: VecDeque::new(),
            late_buffer: VecDeque::new(),
        }
    }

    #[inline]
    fn get_next(&mut self) -> Option<either::Either<MinuteAverage, Input>> {
        if let Some(late) = self.late_buffer.pop_front() {
            return Some(either::Right(late));
        }
        if let Some(record) = self.buffer.pop_front() {
            return Some(either::Left(record));
        }
        None
    }
}

impl<Input: TimeSeriesData, I: Iterator<Item = Input>> Iterator
    for MovingAverageAdaptor<Input, I>
{
    type Item = either::Either<MinuteAverage, Input>;
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            // First, return any buffered results
            if let Some(next) = self.get_next() {
                return Some(next);
            }
            // Get next item from source
            match self.source.next() {
                Some(item) => {
                    let (records, late) = self.aggregator.process_item(item);
                    self.buffer.extend(records);
                    self.late_buffer.extend(late);
                }
                None => {
                    // Source is exhausted, drain the window tail. flush()
                    // emits nothing on repeated calls.
                    self.buffer.extend(self.aggregator.flush());
                    return self.get_next();
                }
            }
        }
    }
}

pub trait MovingAverageExt<Input: TimeSeriesData>: Iterator<Item = Input> + Sized {
    fn moving_average(
        self,
        config: &AggregationConfig,
    ) -> Result<MovingAverageAdaptor<Input, Self>, ConfigurationError> {
        Ok(MovingAverageAdaptor::new(
            self,
            MovingAverageAggregator::new(config)?,
        ))
    }
}

impl<Input: TimeSeriesData, I: Iterator<Item = Input>> MovingAverageExt<Input> for I {}

/// The moving-average adaptor over an async `Stream` of time-series data
/// points. The aggregation itself stays synchronous; suspension happens
/// only while waiting for the next source item.
#[pin_project]
pub struct MovingAverageStreamAdaptor<Input, S: Stream<Item = Input>> {
    #[pin]
    source: S,
    aggregator: MovingAverageAggregator<Input>,
    buffer: VecDeque<MinuteAverage>,
    late_buffer: VecDeque<Input>,
}

impl<Input: TimeSeriesData, S: Stream<Item = Input>> MovingAverageStreamAdaptor<Input, S> {
    fn new(source: S, aggregator: MovingAverageAggregator<Input>) -> Self {
        Self {
            source,
            aggregator,
            buffer: VecDeque::new(),
            late_buffer: VecDeque::new(),
        }
    }
}

impl<Input: TimeSeriesData, S: Stream<Item = Input>> Stream
    for MovingAverageStreamAdaptor<Input, S>
{
    type Item = either::Either<MinuteAverage, Input>;
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            // First, return any buffered results
            if let Some(late) = this.late_buffer.pop_front() {
                return Poll::Ready(Some(either::Right(late)));
            }
            if let Some(record) = this.buffer.pop_front() {
                return Poll::Ready(Some(either::Left(record)));
            }
            // Get next item from source
            match this.source.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => {
                    let (records, late) = this.aggregator.process_item(item);
                    this.buffer.extend(records);
                    this.late_buffer.extend(late);
                }
                Poll::Ready(None) => {
                    // Source is exhausted, drain the window tail. flush()
                    // emits nothing on repeated calls.
                    this.buffer.extend(this.aggregator.flush());
                    if let Some(record) = this.buffer.pop_front() {
                        return Poll::Ready(Some(either::Left(record)));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

pub trait MovingAverageStreamExt<Input: TimeSeriesData>: Stream<Item = Input> {
    fn moving_average(
        self,
        config: &AggregationConfig,
    ) -> Result<MovingAverageStreamAdaptor<Input, Self>, ConfigurationError>
    where
        Self: Sized,
    {
        Ok(MovingAverageStreamAdaptor::new(
            self,
            MovingAverageAggregator::new(config)?,
        ))
    }
}

impl<Input: TimeSeriesData, S: Stream<Item = Input>> MovingAverageStreamExt<Input> for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use futures::{stream, StreamExt};

    // Test item that can be aggregated over the trailing window
    #[derive(Debug, Clone, PartialEq)]
    struct TestItem {
        ts: DateTime<Utc>,
        duration: f64,
    }

    impl TimeSeriesData for TestItem {
        fn get_ts(&self) -> DateTime<Utc> {
            self.ts
        }
        fn get_duration(&self) -> f64 {
            self.duration
        }
    }

    fn item(h: u32, m: u32, s: u32, micros: i64, duration: f64) -> TestItem {
        TestItem {
            ts: Utc.with_ymd_and_hms(2018, 12, 26, h, m, s).unwrap()
                + Duration::microseconds(micros),
            duration,
        }
    }

    fn config(window_size: u32) -> AggregationConfig {
        AggregationConfig { window_size }
    }

    // The three delivery events of the reference input, spanning gaps in
    // the input and a drain tail
    fn reference_input() -> Vec<TestItem> {
        vec![
            item(18, 11, 8, 509654, 20.0),
            item(18, 15, 19, 903159, 31.0),
            item(18, 23, 19, 903159, 54.0),
        ]
    }

    fn reference_output() -> Vec<&'static str> {
        vec![
            "{\"date\": \"2018-12-26 18:11:00\", \"average_delivery_time\": 0}",
            "{\"date\": \"2018-12-26 18:12:00\", \"average_delivery_time\": 20.0}",
            "{\"date\": \"2018-12-26 18:13:00\", \"average_delivery_time\": 20.0}",
            "{\"date\": \"2018-12-26 18:14:00\", \"average_delivery_time\": 20.0}",
            "{\"date\": \"2018-12-26 18:15:00\", \"average_delivery_time\": 20.0}",
            "{\"date\": \"2018-12-26 18:16:00\", \"average_delivery_time\": 25.5}",
            "{\"date\": \"2018-12-26 18:17:00\", \"average_delivery_time\": 25.5}",
            "{\"date\": \"2018-12-26 18:18:00\", \"average_delivery_time\": 25.5}",
            "{\"date\": \"2018-12-26 18:19:00\", \"average_delivery_time\": 25.5}",
            "{\"date\": \"2018-12-26 18:20:00\", \"average_delivery_time\": 25.5}",
            "{\"date\": \"2018-12-26 18:21:00\", \"average_delivery_time\": 25.5}",
            "{\"date\": \"2018-12-26 18:22:00\", \"average_delivery_time\": 31.0}",
            "{\"date\": \"2018-12-26 18:23:00\", \"average_delivery_time\": 31.0}",
            "{\"date\": \"2018-12-26 18:24:00\", \"average_delivery_time\": 42.5}",
            "{\"date\": \"2018-12-26 18:25:00\", \"average_delivery_time\": 42.5}",
            "{\"date\": \"2018-12-26 18:26:00\", \"average_delivery_time\": 54.0}",
            "{\"date\": \"2018-12-26 18:27:00\", \"average_delivery_time\": 54.0}",
            "{\"date\": \"2018-12-26 18:28:00\", \"average_delivery_time\": 54.0}",
            "{\"date\": \"2018-12-26 18:29:00\", \"average_delivery_time\": 54.0}",
            "{\"date\": \"2018-12-26 18:30:00\", \"average_delivery_time\": 54.0}",
            "{\"date\": \"2018-12-26 18:31:00\", \"average_delivery_time\": 54.0}",
            "{\"date\": \"2018-12-26 18:32:00\", \"average_delivery_time\": 54.0}",
            "{\"date\": \"2018-12-26 18:33:00\", \"average_delivery_time\": 54.0}",
        ]
    }

    #[test]
    fn test_invalid_window_size() {
        assert!(config(0).validate().is_err());
        assert!(MovingAverageAggregator::<TestItem>::new(&config(0)).is_err());
        assert!(MovingAverageAggregator::<TestItem>::new(&config(1)).is_ok());
    }

    #[test]
    fn test_flush_without_events_emits_nothing() {
        let mut aggregator = MovingAverageAggregator::<TestItem>::new(&config(10)).unwrap();
        assert_eq!(aggregator.flush().count(), 0);
    }

    #[test]
    fn test_reference_aggregation() {
        let mut aggregator = MovingAverageAggregator::new(&config(10)).unwrap();
        let mut records = Vec::new();
        for event in reference_input() {
            let (results, late) = aggregator.process_item(event);
            records.extend(results);
            assert_eq!(late.count(), 0);
        }
        records.extend(aggregator.flush());

        let lines: Vec<String> = records.iter().map(|r| r.to_string()).collect();
        assert_eq!(lines, reference_output());
    }

    #[test]
    fn test_minutes_are_contiguous() {
        let mut aggregator = MovingAverageAggregator::new(&config(10)).unwrap();
        let mut records = Vec::new();
        for event in reference_input() {
            let (results, _) = aggregator.process_item(event);
            records.extend(results);
        }
        records.extend(aggregator.flush());
        for pair in records.windows(2) {
            assert_eq!(pair[1].date() - pair[0].date(), Duration::minutes(1));
        }
    }

    #[test]
    fn test_flush_is_idempotent() {
        let mut aggregator = MovingAverageAggregator::new(&config(10)).unwrap();
        let _ = aggregator.process_item(item(18, 11, 8, 0, 20.0));
        assert!(aggregator.flush().count() > 0);
        assert_eq!(aggregator.flush().count(), 0);
    }

    #[test]
    fn test_single_event_decay() {
        let mut aggregator = MovingAverageAggregator::new(&config(3)).unwrap();
        let (results, _) = aggregator.process_item(item(18, 11, 8, 509654, 20.0));
        let mut records: Vec<_> = results.collect();
        records.extend(aggregator.flush());

        // The event's own minute is emitted before the event is admitted,
        // so the window is still empty there
        let averages: Vec<f64> = records.iter().map(|r| r.average_delivery_time()).collect();
        assert_eq!(averages, vec![0.0, 20.0, 20.0, 20.0]);
        assert_eq!(
            records.last().unwrap().date(),
            Utc.with_ymd_and_hms(2018, 12, 26, 18, 14, 0).unwrap()
        );
    }

    #[test]
    fn test_eviction_boundary_is_closed_open() {
        // An event sitting exactly on a minute boundary is exactly
        // `window_size` minutes old at the final drained minute and must
        // be excluded there
        let mut aggregator = MovingAverageAggregator::new(&config(5)).unwrap();
        let (results, _) = aggregator.process_item(item(18, 0, 0, 0, 10.0));
        let mut records: Vec<_> = results.collect();
        records.extend(aggregator.flush());

        let averages: Vec<f64> = records.iter().map(|r| r.average_delivery_time()).collect();
        assert_eq!(averages, vec![0.0, 10.0, 10.0, 10.0, 10.0, 0.0]);
    }

    #[test]
    fn test_out_of_order_item_is_rejected() {
        let mut aggregator = MovingAverageAggregator::new(&config(10)).unwrap();
        let (_, late) = aggregator.process_item(item(18, 5, 30, 0, 20.0));
        assert_eq!(late.count(), 0);

        let stale = item(18, 3, 0, 0, 99.0);
        let (results, late) = aggregator.process_item(stale.clone());
        assert_eq!(results.count(), 0);
        assert_eq!(late.collect::<Vec<_>>(), vec![stale]);

        // Cursor and window are untouched: the next minute emitted is
        // 18:06 and the mean reflects only the admitted event
        let (results, late) = aggregator.process_item(item(18, 6, 0, 0, 40.0));
        assert_eq!(late.count(), 0);
        let records: Vec<_> = results.collect();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].date(),
            Utc.with_ymd_and_hms(2018, 12, 26, 18, 6, 0).unwrap()
        );
        assert_eq!(records[0].average_delivery_time(), 20.0);
    }

    #[test]
    fn test_equal_timestamps_are_admitted() {
        let mut aggregator = MovingAverageAggregator::new(&config(10)).unwrap();
        let (_, late) = aggregator.process_item(item(18, 11, 8, 0, 20.0));
        assert_eq!(late.count(), 0);
        let (results, late) = aggregator.process_item(item(18, 11, 8, 0, 40.0));
        assert_eq!(late.count(), 0);
        assert_eq!(results.count(), 0);

        // Both events are inside the window on the next emitted minute
        let flushed: Vec<_> = aggregator.flush().collect();
        assert_eq!(flushed[0].average_delivery_time(), 30.0);
    }

    #[test]
    fn test_moving_average_iterator() {
        let lines: Vec<String> = reference_input()
            .into_iter()
            .moving_average(&config(10))
            .unwrap()
            .filter_map(|x| x.left())
            .map(|r| r.to_string())
            .collect();
        assert_eq!(lines, reference_output());
    }

    #[test]
    fn test_moving_average_iterator_yields_rejected_items() {
        let stale = item(18, 3, 0, 0, 99.0);
        let input = vec![item(18, 5, 30, 0, 20.0), stale.clone(), item(18, 6, 0, 0, 40.0)];
        let rejected: Vec<TestItem> = input
            .into_iter()
            .moving_average(&config(10))
            .unwrap()
            .filter_map(|x| x.right())
            .collect();
        assert_eq!(rejected, vec![stale]);
    }

    #[test]
    fn test_empty_source_emits_nothing() {
        let records: Vec<_> = std::iter::empty::<TestItem>()
            .moving_average(&config(10))
            .unwrap()
            .collect();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_moving_average_stream() {
        let lines: Vec<String> = stream::iter(reference_input())
            .moving_average(&config(10))
            .unwrap()
            .filter_map(|x| async move { x.left() })
            .map(|r| r.to_string())
            .collect()
            .await;
        assert_eq!(lines, reference_output());
    }
}
