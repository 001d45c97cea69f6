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

use std::collections::{BTreeMap, BTreeSet};
use std::{ops::Sub, sync::Arc, time::Instant};

use crate::*;
use httproute_model::ResolvedRouteDetails;

use futures::StreamExt;
use gateway_api::apis::standard::{gateways::Gateway, httproutes::HTTPRoute};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::{
    api::{Api, ListParams},
    runtime::{controller::Action, watcher::Config, Controller},
    Client,
};
use tracing::{debug, info, warn};

async fn reconcile_parent(details: &mut ResolvedRouteDetails, ctx: &Context) -> Result<()> {
    let model = &ctx.route_model;
    if !model.is_programming_required(details).await? {
        debug!(
            "route {} is programmed for gateway {}, syncing endpoints",
            details.route_key(),
            details.gateway.key()
        );
        return model.sync_endpoints(details).await;
    }

    details.route = model.accept_route(details).await?;
    let services = model.resolve_backend_refs(&details.route).await?;
    let programmed = model.program_route(details, &services).await?;
    model.set_programmed(details, &services, &programmed).await
}

pub async fn reconcile(route: Arc<HTTPRoute>, ctx: Arc<Context>) -> Result<Action> {
    let start = Instant::now();
    let key = NamespacedName::of(route.as_ref());
    let model = &ctx.route_model;

    let resolved = model.resolve_request(&key).await?;
    let deleting = route.metadata.deletion_timestamp.is_some()
        || resolved
            .values()
            .any(|d| d.route.metadata.deletion_timestamp.is_some());

    if deleting {
        // Gone routes were deprovisioned before; the cached copy still names their load balancers.
        let latest = ctx.cluster.get_http_route(&key.namespace, &key.name).await?;
        model
            .deprovision_route(latest.as_ref().unwrap_or(route.as_ref()), &resolved)
            .await?;
        if let Some(latest) = latest {
            model.remove_finalizer(&latest).await?;
        }
        ctx.requeue.reset(&format!("HTTPRoute {key}"));
        info!("route {} deprovisioned", key);
        return Ok(Action::await_change());
    }

    let attached = !resolved.is_empty();
    let mut programmed_on: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut current: Option<HTTPRoute> = None;
    for (_, mut details) in resolved {
        if let Some(route) = current.take() {
            details.route = route;
        }
        let lb_id = details.gateway.lb_id().to_string();
        let kept: Vec<String> = match reconcile_parent(&mut details, &ctx).await {
            Ok(()) => details
                .matched_listeners
                .iter()
                .map(|l| l.name.clone())
                .collect(),
            Err(Error::Status(status_error)) => {
                warn!(
                    route = %key,
                    gateway = %details.gateway.key(),
                    condition = %status_error.condition_type,
                    reason = %status_error.reason,
                    "{}",
                    status_error.message
                );
                model.set_failed(&mut details, &status_error).await?;
                vec![]
            }
            Err(e) => return Err(e),
        };
        programmed_on.entry(lb_id).or_default().extend(kept);
        current = Some(details.route);
    }
    model.remove_stale_rules(&key, &programmed_on).await?;

    ctx.requeue.reset(&format!("HTTPRoute {key}"));
    if !attached {
        return Ok(Action::await_change());
    }
    let duration = Instant::now().sub(start);
    info!("finished reconciling in {:?} ms", duration.as_millis());
    Ok(Action::requeue(ctx.settings.resync_interval))
}

pub async fn controller(client: Client, ctx: Arc<Context>) -> Result<()> {
    let routes = Api::<HTTPRoute>::all(client.clone());
    routes
        .list(&ListParams::default().limit(1))
        .await
        .map_err(Error::CRDNotFoundError)?;

    let controller = Controller::new(routes, Config::default().any_semantic());
    let slices_store = controller.store();
    let services_store = controller.store();
    let gateways_store = controller.store();
    let shutdown = ctx.shutdown.clone();

    controller
        .watches(
            Api::<EndpointSlice>::all(client.clone()),
            Config::default(),
            move |slice| watches::routes_for_endpoint_slice(&slices_store.state(), &slice),
        )
        .watches(
            Api::<Service>::all(client.clone()),
            Config::default(),
            move |service| watches::routes_for_service(&services_store.state(), &service),
        )
        .watches(
            Api::<Gateway>::all(client),
            Config::default(),
            move |gateway| watches::routes_for_gateway(&gateways_store.state(), &gateway),
        )
        .graceful_shutdown_on(async move { shutdown.cancelled().await })
        .run(reconcile, error_policy, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

fn error_policy(route: Arc<HTTPRoute>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = NamespacedName::of(route.as_ref());
    let delay = ctx.requeue.next_delay(&format!("HTTPRoute {key}"));
    warn!("reconcile of route {} failed: {:?}, retrying in {:?}", key, error, delay);
    Action::requeue(delay)
}
