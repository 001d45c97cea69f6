/*
Copyright 2024 The Kubernetes Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use std::sync::Arc;

use clap::Parser;
use controlplane::cluster::KubeClusterClient;
use controlplane::config::ControllerConfig;
use controlplane::*;

use kube::Client;
use loadbalancer::HttpLoadBalancerClient;
use tokio::try_join;
use tokio_util::sync::CancellationToken;
use tracing::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,kube=warn")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ControllerConfig::parse();
    let client = Client::try_default().await?;
    let lb = HttpLoadBalancerClient::new(
        &config.lb_api_endpoint,
        config.lb_api_token.clone(),
        config.lb_api_timeout(),
    )?;

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let ctx = Arc::new(Context::new(
        Arc::new(KubeClusterClient::new(client.clone())),
        Arc::new(lb),
        config.settings(),
        shutdown,
    ));
    info!(endpoint = %config.lb_api_endpoint, "starting controllers");

    if let Err(error) = try_join!(
        gatewayclass_controller(client.clone(), ctx.clone()),
        gateway_controller(client.clone(), ctx.clone()),
        httproute_controller(client, ctx),
    ) {
        error!("failed to start controllers: {error:?}");
        std::process::exit(1);
    }
    Ok(())
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutting down");
    shutdown.cancel();
}
