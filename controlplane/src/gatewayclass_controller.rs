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

use futures::StreamExt;
use std::{
    collections::BTreeMap,
    ops::Sub,
    sync::Arc,
    time::Instant,
};

use crate::*;
use consts::*;
use gateway_api::apis::standard::gatewayclasses::GatewayClass;
use gateway_model::is_gateway_class_ours;
use kube::{
    api::{Api, ListParams},
    runtime::{controller::Action, watcher::Config, Controller},
    Client, ResourceExt,
};
use resources_model::{ResourcesModel, SetConditionParams};

use tracing::*;

pub async fn reconcile(gateway_class: Arc<GatewayClass>, ctx: Arc<Context>) -> Result<Action> {
    let start = Instant::now();
    let name = gateway_class.name_any();

    if !is_gateway_class_ours(&gateway_class) {
        debug!("ignoring gateway class {:?} of another controller", name);
        return Ok(Action::await_change());
    }

    if !ResourcesModel::is_condition_set(
        gateway_class.as_ref(),
        CONDITION_ACCEPTED,
        &BTreeMap::new(),
    ) {
        info!("marking gateway class {:?} as accepted", name);
        let mut gwc = gateway_class.as_ref().clone();
        ctx.resources
            .set_condition(
                &mut gwc,
                SetConditionParams::new(
                    CONDITION_ACCEPTED,
                    true,
                    REASON_ACCEPTED,
                    "GatewayClass is accepted by this controller",
                ),
            )
            .await?;
    }

    ctx.requeue.reset(&name);
    let duration = Instant::now().sub(start);
    info!("finished reconciling in {:?} ms", duration.as_millis());
    Ok(Action::await_change())
}

pub async fn controller(client: Client, ctx: Arc<Context>) -> Result<()> {
    let gwc_api = Api::<GatewayClass>::all(client);
    gwc_api
        .list(&ListParams::default().limit(1))
        .await
        .map_err(Error::CRDNotFoundError)?;

    let shutdown = ctx.shutdown.clone();
    Controller::new(gwc_api, Config::default().any_semantic())
        .graceful_shutdown_on(async move { shutdown.cancelled().await })
        .run(reconcile, error_policy, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

fn error_policy(gateway_class: Arc<GatewayClass>, error: &Error, ctx: Arc<Context>) -> Action {
    let delay = ctx.requeue.next_delay(&gateway_class.name_any());
    warn!("reconcile failed: {:?}, retrying in {:?}", error, delay);
    Action::requeue(delay)
}
