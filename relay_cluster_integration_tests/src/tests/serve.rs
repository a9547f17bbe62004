// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Run one instance until interrupted, greeting the least loaded member of the
//! application every few seconds. Several processes started with each other's
//! addresses form a cluster.

use std::collections::BTreeMap;

use clap::Args;
use relay::concurrency::{sleep, Duration};
use relay::{ApplicationId, Reply, RoutingStrategy, Target};
use relay_cluster::{ClusterConfig, InstanceBuilder};

use crate::greeter;

/// Configuration
#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    /// Port to listen on
    port: u16,
    /// The application every process of the cluster serves
    application: ApplicationId,
    /// Addresses (host:port) of the other processes
    peers: Vec<String>,
    /// Optional properties file with `relay.*` keys, one `key=value` per line
    #[arg(long)]
    properties: Option<std::path::PathBuf>,
    /// Seconds between greetings
    #[arg(long, default_value_t = 5)]
    interval: u64,
}

fn load(config: &ServeConfig) -> Result<ClusterConfig, String> {
    let mut properties = BTreeMap::new();
    if let Some(path) = &config.properties {
        let text = std::fs::read_to_string(path)
            .map_err(|err| format!("Unable to read {}: {err}", path.display()))?;
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                properties.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }
    let cluster = ClusterConfig::from_properties(properties).map_err(|err| err.to_string())?;
    Ok(cluster
        .with_bind_address(format!("0.0.0.0:{}", config.port))
        .with_static_hosts(config.peers.clone()))
}

pub async fn test(config: ServeConfig) -> i32 {
    let cluster = match load(&config) {
        Ok(cluster) => cluster,
        Err(err) => {
            log::error!("Invalid configuration: {err}");
            return -1;
        }
    };
    let methods = match greeter::methods() {
        Ok(methods) => methods,
        Err(err) => {
            log::error!("Failed to register greeter methods: {err}");
            return -1;
        }
    };

    let builder = InstanceBuilder::new(cluster);
    let name = format!("port-{}", config.port);
    let (builder, node) = greeter::with_greeter(builder, config.application, &name);
    let instance = match builder.build() {
        Ok(instance) => instance,
        Err(err) => {
            log::error!("Failed to build instance: {err}");
            return -2;
        }
    };
    if let Err(err) = instance.start().await {
        log::error!("Failed to start instance: {err}");
        return -2;
    }
    log::info!("Serving node {node} on port {}", config.port);

    loop {
        sleep(Duration::from_secs(config.interval)).await;
        let call = match greeter::call(
            &methods,
            "hello",
            RoutingStrategy::Any,
            Target::Application(config.application),
        ) {
            Ok(call) => call,
            Err(err) => {
                log::error!("{err}");
                break;
            }
        };
        match instance.dispatcher().invoke(call).await {
            Ok(Reply::Value(greeting)) => {
                log::info!("{}", String::from_utf8_lossy(&greeting))
            }
            Ok(other) => log::warn!("Unexpected reply {other:?}"),
            Err(err) => log::warn!("Greeting failed: {err}"),
        }
    }

    instance.stop().await;
    0
}
