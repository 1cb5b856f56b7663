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

//! Wiring between the delivery event source and the moving-average
//! aggregation, producing one aggregate record per line on the given
//! output.
//!
//! Aggregate records go to the output sink untouched; everything else
//! (skipped input lines, discarded out-of-order events) is reported as
//! `warn!` diagnostics so the record stream stays machine-readable.

use either::Either;
use std::{io::Write, path::Path};
use tracing::warn;
use transtats_analytics::aggregation::{AggregationConfig, MovingAverageExt};
use transtats_event_service::DeliveryEventReader;

pub fn run_aggregation<W: Write>(
    input_file: &Path,
    config: &AggregationConfig,
    output: &mut W,
) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let events = DeliveryEventReader::open(
        input_file,
        Some(|err: &str| warn!("skipping input line: {err}")),
    )?;
    for item in events.moving_average(config)? {
        match item {
            Either::Left(record) => writeln!(output, "{record}")?,
            Either::Right(event) => {
                warn!(
                    "discarding out-of-order event with timestamp {}",
                    event.timestamp
                );
            }
        }
    }
    Ok(())
}
