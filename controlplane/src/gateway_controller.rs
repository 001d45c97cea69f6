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

use std::{ops::Sub, sync::Arc, time::Instant};

use crate::{consts::*, *};
use gateway_model::ResolvedGatewayDetails;
use resources_model::{ResourcesModel, SetConditionParams};
use traits::StatusResource;

use futures::StreamExt;
use gateway_api::apis::standard::gateways::Gateway;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{Api, ListParams},
    runtime::{controller::Action, watcher::Config, Controller},
    Client,
};
use tracing::{debug, info, warn};

use crate::crd::GatewayConfig;

/// Records a [`StatusError`] as a `False` condition. An Accepted failure also marks the
/// resource as not programmed.
pub async fn process_resource_error<K: StatusResource>(
    resources: &ResourcesModel,
    resource: &mut K,
    error: &StatusError,
) -> Result<()> {
    warn!(
        condition = %error.condition_type,
        reason = %error.reason,
        "{}",
        error.message
    );
    resources
        .set_condition(
            resource,
            SetConditionParams::new(
                error.condition_type.as_str(),
                false,
                error.reason.as_str(),
                error.message.as_str(),
            ),
        )
        .await?;
    if error.condition_type == CONDITION_ACCEPTED {
        resources
            .set_condition(
                resource,
                SetConditionParams::new(
                    CONDITION_PROGRAMMED,
                    false,
                    REASON_INVALID,
                    error.message.as_str(),
                ),
            )
            .await?;
    }
    Ok(())
}

async fn program(details: &mut ResolvedGatewayDetails, ctx: &Context) -> Result<()> {
    if ctx.gateway_model.is_programmed(details) {
        debug!("gateway {} is already programmed", details.key());
        return Ok(());
    }
    ctx.gateway_model.program_gateway(details).await?;
    ctx.gateway_model.set_programmed(details).await
}

pub async fn reconcile(gateway: Arc<Gateway>, ctx: Arc<Context>) -> Result<Action> {
    let start = Instant::now();
    let key = NamespacedName::of(gateway.as_ref());

    let outcome = match ctx.gateway_model.resolve_reconcile_request(&key).await {
        Ok(None) => Ok(false),
        Ok(Some(details)) if details.gateway.metadata.deletion_timestamp.is_some() => {
            debug!("gateway {} is being deleted", key);
            Ok(false)
        }
        Ok(Some(mut details)) => program(&mut details, &ctx).await.map(|_| true),
        Err(e) => Err(e),
    };

    let action = match outcome {
        Ok(true) => Action::requeue(ctx.settings.resync_interval),
        Ok(false) => Action::await_change(),
        Err(Error::Status(status_error)) => {
            let mut gw = gateway.as_ref().clone();
            process_resource_error(&ctx.resources, &mut gw, &status_error).await?;
            Action::await_change()
        }
        Err(e) => return Err(e),
    };

    ctx.requeue.reset(&format!("Gateway {key}"));
    let duration = Instant::now().sub(start);
    info!("finished reconciling in {:?} ms", duration.as_millis());
    Ok(action)
}

pub async fn controller(client: Client, ctx: Arc<Context>) -> Result<()> {
    let gateway = Api::<Gateway>::all(client.clone());
    gateway
        .list(&ListParams::default().limit(1))
        .await
        .map_err(Error::CRDNotFoundError)?;

    let controller = Controller::new(gateway, Config::default().any_semantic());
    let secrets_store = controller.store();
    let configs_store = controller.store();
    let shutdown = ctx.shutdown.clone();

    controller
        .watches(
            Api::<Secret>::all(client.clone()),
            Config::default(),
            move |secret| watches::gateways_for_secret(&secrets_store.state(), &secret),
        )
        .watches(
            Api::<GatewayConfig>::all(client),
            Config::default(),
            move |config| watches::gateways_for_config(&configs_store.state(), &config),
        )
        .graceful_shutdown_on(async move { shutdown.cancelled().await })
        .run(reconcile, error_policy, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

fn error_policy(gateway: Arc<Gateway>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = NamespacedName::of(gateway.as_ref());
    let delay = ctx.requeue.next_delay(&format!("Gateway {key}"));
    warn!("reconcile of gateway {} failed: {:?}, retrying in {:?}", key, error, delay);
    Action::requeue(delay)
}
