// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

use clap::Parser;
use tracing::error;

use quay::config::Config;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    quay::run::init_tracing(&config);

    if let Err(e) = quay::run::run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
