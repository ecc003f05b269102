// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::path::Path;
use std::process::ExitCode;

use statsd_server::config::Config;
use statsd_server::daemon;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
pub async fn main() -> ExitCode {
    // Usage: statsd-daemon [config.yml]; defaults apply without a file.
    let config = match env::args().nth(1) {
        Some(path) => match Config::from_yaml_file(Path::new(&path)) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };

    let log_level = env::var("STATSD_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or_else(|_| config.log_level.clone());
    let env_filter = format!("hyper=off,{}", log_level);

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_new(env_filter).unwrap_or_else(|_| {
            eprintln!("could not parse log level '{log_level}'; defaulting to info");
            EnvFilter::new("info")
        }))
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("setting default subscriber failed");
        return ExitCode::FAILURE;
    }

    debug!("Logging subsystem enabled");
    info!(
        "Going to listen on {}:{} (flush every {}s to {}:{})",
        config.bind, config.port, config.flush_interval, config.graphite_host, config.graphite_port
    );

    let cancel_token = CancellationToken::new();
    let signal_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            signal_token.cancel();
        }
    });

    match daemon::run(config, cancel_token).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Error when starting statsd daemon: {e}");
            ExitCode::FAILURE
        }
    }
}
