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

use clap::Parser;
use std::{path::PathBuf, str::FromStr};
use tracing::Level;
use transtats_analytics::aggregation::AggregationConfig;
use transtats_collector::run_aggregation;

#[derive(clap::Parser, Debug)]
#[command(about = "Moving average of translation delivery times per minute")]
struct Args {
    /// Path to the newline-delimited JSON events file
    #[arg(long)]
    input_file: PathBuf,

    /// Size of the trailing window, in minutes, over which the mean is
    /// computed
    #[arg(long)]
    window_size: u32,

    /// Logging level for diagnostics, emitted on stderr
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn init_tracing(level: &'_ str) {
    // Diagnostics go to stderr so the aggregate records on stdout stay
    // machine-readable
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(Level::from_str(level).expect("invalid logging level"))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = AggregationConfig {
        window_size: args.window_size,
    };
    if let Err(err) = config.validate() {
        return Err(format!("Invalid configuration: {err}").into());
    }

    let stdout = std::io::stdout();
    let mut output = stdout.lock();
    run_aggregation(&args.input_file, &config, &mut output)
}
