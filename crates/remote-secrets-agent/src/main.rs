// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use remote_secrets::{ArgumentsSource, Component, ComponentOptions, Exports, ENV_CONFIG_FILE};
use tokio_util::sync::CancellationToken;

const COMPONENT_ID: &str = "remote.secrets";
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
pub async fn main() {
    let log_level = env::var("SECRETS_WATCH_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let source = ArgumentsSource::from_os_env();
    let args = match source.load() {
        Ok(args) => args,
        Err(e) => {
            error!("Error reading secret watcher configuration: {e}");
            return;
        }
    };

    let options = ComponentOptions::new(COMPONENT_ID, |exports: Exports| {
        let keys: Vec<&str> = exports.data.keys().map(String::as_str).collect();
        info!(?keys, "secret exports updated");
    });

    let component = match Component::new(options, args).await {
        Ok(component) => Arc::new(component),
        Err(e) => {
            error!("Error creating secret watcher on startup: {e}");
            return;
        }
    };
    log_health(&component);

    let cancel = CancellationToken::new();
    let runner = tokio::spawn({
        let component = Arc::clone(&component);
        let cancel = cancel.clone();
        async move { component.run(cancel).await }
    });
    if source.is_reloadable() {
        tokio::spawn(reload_on_hangup(Arc::clone(&component), source, cancel.clone()));
    } else {
        debug!("{ENV_CONFIG_FILE} is not set, SIGHUP reload disabled");
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut health_interval = interval(HEALTH_LOG_INTERVAL);
    health_interval.tick().await; // discard first tick, which is instantaneous

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    error!("Unable to listen for shutdown signal: {e}");
                }
                break;
            }
            _ = health_interval.tick() => log_health(&component),
        }
    }

    info!("Shutting down secret watcher");
    cancel.cancel();
    if let Err(e) = runner.await {
        error!("Secret watcher task failed: {e:?}");
    }
}

fn log_health(component: &Component) {
    let health = component.current_health();
    if health.is_healthy() {
        info!(health = %health.to_json(), "secret watcher health");
    } else {
        warn!(health = %health.to_json(), "secret watcher health");
    }
}

/// Re-reads the configuration file and reconfigures the component on every SIGHUP.
#[cfg(unix)]
async fn reload_on_hangup(
    component: Arc<Component>,
    source: ArgumentsSource,
    cancel: CancellationToken,
) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(hangups) => hangups,
        Err(e) => {
            error!("Unable to listen for SIGHUP, reload disabled: {e}");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            received = hangups.recv() => {
                if received.is_none() {
                    return;
                }
                reload(&component, &source).await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(
    _component: Arc<Component>,
    _source: ArgumentsSource,
    cancel: CancellationToken,
) {
    cancel.cancelled().await;
}

#[cfg(unix)]
async fn reload(component: &Component, source: &ArgumentsSource) {
    let args = match source.load() {
        Ok(args) => args,
        Err(e) => {
            error!("Ignoring reload, configuration is invalid: {e}");
            return;
        }
    };
    match component.update(args).await {
        Ok(()) => info!("Secret watcher configuration reloaded"),
        Err(e) => error!("Ignoring reload, configuration was rejected: {e}"),
    }
}
