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

use std::collections::BTreeMap;
use std::sync::Arc;

use gateway_api::apis::standard::{gatewayclasses::GatewayClass, gateways::Gateway};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::cluster::ClusterClient;
use crate::consts::*;
use crate::crd::GatewayConfig;
use crate::gateway_utils::*;
use crate::lb_model::{validate_listener, LoadBalancerModel};
use crate::resources_model::{is_condition_true, ResourcesModel, SetConditionParams};
use crate::traits::HasConditions;
use crate::*;

/// Everything needed to program a Gateway, read in one go at the start of a reconcile.
#[derive(Clone, Debug)]
pub struct ResolvedGatewayDetails {
    pub gateway: Gateway,
    pub gateway_class: GatewayClass,
    pub config: GatewayConfig,
    pub listeners: Vec<ListenerSpec>,
    pub secrets: BTreeMap<NamespacedName, Secret>,
}

impl ResolvedGatewayDetails {
    pub fn key(&self) -> NamespacedName {
        NamespacedName::of(&self.gateway)
    }

    pub fn lb_id(&self) -> &str {
        &self.config.spec.load_balancer_id
    }

    /// Annotations that record what the Gateway was programmed with.
    pub fn programmed_annotations(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                USED_SECRETS_ANNOTATION.to_string(),
                used_versions_value(&self.secrets),
            ),
            (
                PROGRAMMING_REVISION_ANNOTATION.to_string(),
                PROGRAMMING_REVISION.to_string(),
            ),
        ])
    }
}

pub fn is_gateway_class_ours(gateway_class: &GatewayClass) -> bool {
    gateway_class.spec.controller_name == GATEWAY_CLASS_CONTROLLER_NAME
}

#[derive(Clone)]
pub struct GatewayModel {
    cluster: Arc<dyn ClusterClient>,
    resources: ResourcesModel,
    lb: LoadBalancerModel,
}

impl GatewayModel {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        resources: ResourcesModel,
        lb: LoadBalancerModel,
    ) -> Self {
        GatewayModel {
            cluster,
            resources,
            lb,
        }
    }

    /// Reads the Gateway with its class, parameters and TLS Secrets.
    ///
    /// Returns `None` when the Gateway is gone or belongs to another controller.
    pub async fn resolve_reconcile_request(
        &self,
        key: &NamespacedName,
    ) -> Result<Option<ResolvedGatewayDetails>> {
        let Some(gateway) = self.cluster.get_gateway(&key.namespace, &key.name).await? else {
            debug!(gateway = %key, "gateway not found");
            return Ok(None);
        };
        let class_name = gateway.spec.gateway_class_name.clone();
        let Some(gateway_class) = self.cluster.get_gateway_class(&class_name).await? else {
            debug!(gateway = %key, gateway_class = %class_name, "gateway class not found");
            return Ok(None);
        };
        if !is_gateway_class_ours(&gateway_class) {
            debug!(gateway = %key, gateway_class = %class_name, "gateway class belongs to another controller");
            return Ok(None);
        }

        let params = parameters_ref(&gateway)?.ok_or_else(|| {
            StatusError::new(
                CONDITION_ACCEPTED,
                REASON_INVALID_PARAMETERS,
                "spec.infrastructure is missing parametersRef",
            )
        })?;
        let config = self
            .cluster
            .get_gateway_config(&key.namespace, &params.name)
            .await?
            .ok_or_else(|| {
                StatusError::new(
                    CONDITION_ACCEPTED,
                    REASON_INVALID_PARAMETERS,
                    format!(
                        "GatewayConfig {}/{} referenced by spec.infrastructure.parametersRef not found",
                        key.namespace, params.name
                    ),
                )
            })?;

        let listeners = gateway_listeners(&gateway)?;
        let mut secrets = BTreeMap::new();
        for listener in &listeners {
            for secret_ref in listener.certificate_refs(&key.namespace) {
                if secrets.contains_key(&secret_ref) {
                    continue;
                }
                let secret = self
                    .cluster
                    .get_secret(&secret_ref.namespace, &secret_ref.name)
                    .await?
                    .ok_or_else(|| {
                        StatusError::new(
                            CONDITION_ACCEPTED,
                            REASON_INVALID_PARAMETERS,
                            format!(
                                "Secret {secret_ref} referenced by listener {} not found",
                                listener.name
                            ),
                        )
                    })?;
                secrets.insert(secret_ref, secret);
            }
        }

        Ok(Some(ResolvedGatewayDetails {
            gateway,
            gateway_class,
            config,
            listeners,
            secrets,
        }))
    }

    pub fn is_programmed(&self, details: &ResolvedGatewayDetails) -> bool {
        is_condition_true(
            details.gateway.conditions(),
            CONDITION_PROGRAMMED,
            details.gateway.metadata.generation,
        ) && ResourcesModel::is_condition_set(
            &details.gateway,
            CONDITION_PROGRAMMED,
            &details.programmed_annotations(),
        )
    }

    /// Converges the load balancer to the Gateway: default backend set, certificates,
    /// listeners in declaration order, then removal of what is no longer declared.
    pub async fn program_gateway(&self, details: &ResolvedGatewayDetails) -> Result<()> {
        let lb_id = details.lb_id();
        let namespace = details.gateway.namespace().unwrap_or_default();
        for listener in &details.listeners {
            validate_listener(listener)?;
        }

        let lb = match self.lb.get_load_balancer(lb_id).await {
            Err(e) if e.lb_error().is_some_and(|source| source.is_not_found()) => {
                return Err(StatusError::new(
                    CONDITION_ACCEPTED,
                    REASON_INVALID_PARAMETERS,
                    format!("load balancer {lb_id} not found"),
                )
                .with_cause(e)
                .into());
            }
            result => result?,
        };
        info!(gateway = %details.key(), lb_id, "programming gateway");

        let result: Result<()> = async {
            let default_backend_set = self
                .lb
                .reconcile_default_backend_set(&lb, &details.gateway)
                .await?;
            let certificates = self
                .lb
                .reconcile_listeners_certificates(
                    &lb,
                    &namespace,
                    &details.listeners,
                    &details.secrets,
                )
                .await?;
            for listener in &details.listeners {
                let listener_certificates = certificates
                    .get(&listener.name)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                self.lb
                    .reconcile_http_listener(
                        &lb,
                        &default_backend_set,
                        listener,
                        listener_certificates,
                    )
                    .await?;
            }
            self.lb
                .remove_missing_listeners(&lb, &details.listeners)
                .await?;
            let lb = self.lb.get_load_balancer(lb_id).await?;
            self.lb.remove_unused_certificates(&lb).await
        }
        .await;

        result.map_err(invalid_on_client_error)
    }

    /// Records Accepted and Programmed together with the annotations that mark what was
    /// programmed.
    pub async fn set_programmed(&self, details: &mut ResolvedGatewayDetails) -> Result<()> {
        let annotations = details.programmed_annotations();
        let message = format!("Gateway is programmed on load balancer {}", details.lb_id());
        let generation = details.gateway.metadata.generation;
        if !is_condition_true(
            details.gateway.conditions(),
            CONDITION_ACCEPTED,
            generation,
        ) {
            self.resources
                .set_condition(
                    &mut details.gateway,
                    SetConditionParams::new(
                        CONDITION_ACCEPTED,
                        true,
                        REASON_ACCEPTED,
                        "Gateway is accepted",
                    ),
                )
                .await?;
        }
        self.resources
            .set_condition(
                &mut details.gateway,
                SetConditionParams::new(CONDITION_PROGRAMMED, true, REASON_PROGRAMMED, message)
                    .with_annotations(annotations),
            )
            .await?;
        debug!(gateway = %details.key(), "gateway marked programmed");
        Ok(())
    }
}

/// Client errors from the load balancer will not go away by retrying, so they are reported on
/// the Gateway instead.
pub(crate) fn invalid_on_client_error(e: Error) -> Error {
    let message = e
        .lb_error()
        .filter(|source| source.is_client_error())
        .map(|source| source.message());
    match message {
        Some(message) => StatusError::new(CONDITION_PROGRAMMED, REASON_INVALID, message)
            .with_cause(e)
            .into(),
        None => e,
    }
}
