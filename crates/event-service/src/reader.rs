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

//! Delivery event file reading
//!
//! This module provides functionality to read newline-delimited JSON
//! delivery events from a file, validating each line and reporting
//! malformed or invalid lines through an injected diagnostics callback
//! rather than aborting the stream.

use crate::{DeliveryEvent, EventSourceError, DELIVERY_EVENT_NAME};
use std::{
    fs::File,
    io::{BufRead, BufReader, Lines},
    path::PathBuf,
};

/// Line processing error callback type
pub type LineErrorCallback = fn(&str);

/// `DeliveryEventReader` iterates the delivery events of a
/// newline-delimited JSON file in file order.
///
/// # Features
/// - Lazy line-by-line reading, one event yielded per `next()`
/// - Malformed lines (bad JSON, missing fields) are skipped; the
///   diagnostic identifies the file, line number and parse error
/// - Lines whose event fails validation (wrong `event_name`, negative
///   `duration`) are skipped with a similar diagnostic
/// - Blank lines are skipped silently
///
/// Failing to open the file is a fatal error reported by [`Self::open`];
/// the reader never yields an empty stream in place of an error.
#[derive(Debug)]
pub struct DeliveryEventReader<F = LineErrorCallback>
where
    F: Fn(&str),
{
    lines: Lines<BufReader<File>>,
    path: PathBuf,
    line_no: usize,
    line_error_callback: Option<F>,
}

impl<F> DeliveryEventReader<F>
where
    F: Fn(&str),
{
    /// Opens the given file for event iteration. Per-line failures later
    /// in the iteration are reported through `line_error_callback`.
    pub fn open(
        path: impl Into<PathBuf>,
        line_error_callback: Option<F>,
    ) -> Result<Self, EventSourceError> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| EventSourceError::IoError {
            context: format!("opening file '{}'", path.display()),
            reason: e.to_string(),
        })?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            path,
            line_no: 0,
            line_error_callback,
        })
    }

    fn report(&self, error: &EventSourceError) {
        if let Some(ref callback) = self.line_error_callback {
            callback(&error.to_string());
        }
    }

    fn parse_line(&self, line: &str) -> Result<DeliveryEvent, EventSourceError> {
        let context = format!("{}:{}", self.path.display(), self.line_no);
        let event: DeliveryEvent =
            serde_json::from_str(line).map_err(|e| EventSourceError::JsonError {
                context: context.clone(),
                reason: e.to_string(),
            })?;
        if event.event_name != DELIVERY_EVENT_NAME {
            return Err(EventSourceError::InvalidEvent {
                context,
                reason: format!("unexpected event_name '{}'", event.event_name),
            });
        }
        if event.duration < 0.0 {
            return Err(EventSourceError::InvalidEvent {
                context,
                reason: format!("negative duration {}", event.duration),
            });
        }
        Ok(event)
    }
}

impl<F> Iterator for DeliveryEventReader<F>
where
    F: Fn(&str),
{
    type Item = DeliveryEvent;

    fn next(&mut self) -> Option<DeliveryEvent> {
        loop {
            let line = self.lines.next()?;
            self.line_no += 1;
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    self.report(&EventSourceError::IoError {
                        context: format!("reading '{}' line {}", self.path.display(), self.line_no),
                        reason: e.to_string(),
                    });
                    return None;
                }
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match self.parse_line(trimmed) {
                Ok(event) => return Some(event),
                Err(e) => self.report(&e),
            }
        }
    }
}
