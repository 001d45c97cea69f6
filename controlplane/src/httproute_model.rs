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
use std::sync::Arc;

use gateway_api::apis::standard::httproutes::HTTPRoute;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::cluster::ClusterClient;
use crate::consts::*;
use crate::gateway_model::{invalid_on_client_error, GatewayModel, ResolvedGatewayDetails};
use crate::gateway_utils::*;
use crate::lb_model::LoadBalancerModel;
use crate::lb_routing::{
    is_service_ref, route_backends, ProgramRouteRulesParams, ProgrammedRules,
    RemoveRouteRulesParams,
};
use crate::resources_model::{ResourcesModel, SetConditionParams};
use crate::routing_rules::{condition_for_match, RouteMatch};
use crate::*;

const KIND_GATEWAY: &str = "Gateway";
const KIND_HTTP_ROUTE: &str = "HTTPRoute";

const FROM_SAME: &str = "Same";
const FROM_ALL: &str = "All";
const FROM_SELECTOR: &str = "Selector";

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParentReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

impl ParentReference {
    /// The same reference without section name and port.
    pub fn target_only(&self) -> Self {
        ParentReference {
            group: self.group.clone(),
            kind: self.kind.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            section_name: None,
            port: None,
        }
    }

    pub fn same_target(&self, other: &ParentReference) -> bool {
        self.target_only() == other.target_only()
    }

    pub fn is_gateway(&self) -> bool {
        self.group.as_deref().unwrap_or(GATEWAY_API_GROUP) == GATEWAY_API_GROUP
            && self.kind.as_deref().unwrap_or(KIND_GATEWAY) == KIND_GATEWAY
    }

    pub fn gateway_key(&self, route_namespace: &str) -> NamespacedName {
        NamespacedName::new(
            self.namespace.as_deref().unwrap_or(route_namespace),
            self.name.as_str(),
        )
    }

    fn selects(&self, listener: &ListenerSpec) -> bool {
        self.section_name.as_ref().is_none_or(|s| *s == listener.name)
            && self.port.is_none_or(|p| p == listener.port)
    }
}

/// Status of the route as seen by one parent.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteParentStatus {
    pub parent_ref: ParentReference,
    pub controller_name: String,
    #[serde(default)]
    pub conditions: Vec<metav1::Condition>,
}

pub fn parent_refs(route: &HTTPRoute) -> Result<Vec<ParentReference>> {
    let refs = serde_json::to_value(&route.spec.parent_refs)?;
    if refs.is_null() {
        return Ok(vec![]);
    }
    Ok(serde_json::from_value(refs)?)
}

pub fn route_parent_statuses(route: &HTTPRoute) -> Result<Vec<RouteParentStatus>> {
    let status = serde_json::to_value(&route.status)?;
    match status.pointer("/parents") {
        Some(parents) if !parents.is_null() => Ok(serde_json::from_value(parents.clone())?),
        _ => Ok(vec![]),
    }
}

pub fn set_route_parent_statuses(route: &mut HTTPRoute, parents: &[RouteParentStatus]) -> Result<()> {
    route.status = Some(serde_json::from_value(json!({ "parents": parents }))?);
    Ok(())
}

fn find_parent_status<'a>(
    statuses: &'a [RouteParentStatus],
    parent_ref: &ParentReference,
) -> Option<&'a RouteParentStatus> {
    statuses.iter().find(|s| {
        s.controller_name == GATEWAY_CLASS_CONTROLLER_NAME && s.parent_ref.same_target(parent_ref)
    })
}

/// True iff the parent status of the route carries the condition as `True` for the current
/// generation.
pub fn is_route_condition_true(
    route: &HTTPRoute,
    parent_ref: &ParentReference,
    condition_type: &str,
) -> Result<bool> {
    let statuses = route_parent_statuses(route)?;
    Ok(find_parent_status(&statuses, parent_ref).is_some_and(|status| {
        resources_model::is_condition_true(
            &status.conditions,
            condition_type,
            route.metadata.generation,
        )
    }))
}

/// Evaluates a label selector; an empty selector selects everything.
pub fn selector_matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> bool {
    let labels_match = selector
        .match_labels
        .iter()
        .flatten()
        .all(|(key, value)| labels.get(key) == Some(value));
    let expressions_match = selector.match_expressions.iter().flatten().all(|expr| {
        let values = expr.values.as_deref().unwrap_or_default();
        match expr.operator.as_str() {
            "In" => labels.get(&expr.key).is_some_and(|v| values.contains(v)),
            "NotIn" => labels.get(&expr.key).is_none_or(|v| !values.contains(v)),
            "Exists" => labels.contains_key(&expr.key),
            "DoesNotExist" => !labels.contains_key(&expr.key),
            _ => false,
        }
    });
    labels_match && expressions_match
}

fn allows_http_route_kind(listener: &ListenerSpec) -> bool {
    let kinds = listener
        .allowed_routes
        .as_ref()
        .and_then(|r| r.kinds.as_deref())
        .unwrap_or_default();
    kinds.is_empty()
        || kinds.iter().any(|k| {
            k.kind == KIND_HTTP_ROUTE
                && k.group.as_deref().unwrap_or(GATEWAY_API_GROUP) == GATEWAY_API_GROUP
        })
}

/// A route bound to one parent Gateway, with the listeners it attaches to.
#[derive(Clone, Debug)]
pub struct ResolvedRouteDetails {
    pub route: HTTPRoute,
    pub gateway: ResolvedGatewayDetails,
    pub matched_ref: ParentReference,
    pub matched_listeners: Vec<ListenerSpec>,
}

impl ResolvedRouteDetails {
    pub fn route_key(&self) -> NamespacedName {
        NamespacedName::of(&self.route)
    }

    fn parent_status(&self) -> RouteParentStatus {
        RouteParentStatus {
            parent_ref: self.matched_ref.target_only(),
            controller_name: self.gateway.gateway_class.spec.controller_name.clone(),
            conditions: vec![],
        }
    }
}

#[derive(Clone)]
pub struct HttpRouteModel {
    cluster: Arc<dyn ClusterClient>,
    resources: ResourcesModel,
    gateway_model: GatewayModel,
    lb: LoadBalancerModel,
}

impl HttpRouteModel {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        resources: ResourcesModel,
        gateway_model: GatewayModel,
        lb: LoadBalancerModel,
    ) -> Self {
        HttpRouteModel {
            cluster,
            resources,
            gateway_model,
            lb,
        }
    }

    /// Resolves every parent Gateway of ours that the route may attach to, keyed by Gateway.
    /// A route that no longer exists resolves to nothing.
    pub async fn resolve_request(
        &self,
        key: &NamespacedName,
    ) -> Result<BTreeMap<NamespacedName, ResolvedRouteDetails>> {
        let mut results: BTreeMap<NamespacedName, ResolvedRouteDetails> = BTreeMap::new();
        let Some(route) = self.cluster.get_http_route(&key.namespace, &key.name).await? else {
            debug!(route = %key, "route not found");
            return Ok(results);
        };
        let mut namespace_labels: Option<BTreeMap<String, String>> = None;

        for parent_ref in parent_refs(&route)? {
            if !parent_ref.is_gateway() {
                continue;
            }
            let gateway_key = parent_ref.gateway_key(&key.namespace);
            let gateway = match self.gateway_model.resolve_reconcile_request(&gateway_key).await {
                Ok(Some(gateway)) => gateway,
                Ok(None) => continue,
                Err(Error::Status(e)) => {
                    debug!(route = %key, gateway = %gateway_key, error = %e, "parent gateway is not valid");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let mut matched = vec![];
            for listener in gateway.listeners.iter() {
                if !parent_ref.selects(listener) || !listener.is_http() {
                    continue;
                }
                if !allows_http_route_kind(listener) {
                    continue;
                }
                let namespaces = listener
                    .allowed_routes
                    .as_ref()
                    .and_then(|r| r.namespaces.as_ref());
                let allowed = match namespaces.and_then(|n| n.from.as_deref()).unwrap_or(FROM_SAME) {
                    FROM_ALL => true,
                    FROM_SAME => gateway_key.namespace == key.namespace,
                    FROM_SELECTOR => {
                        if namespace_labels.is_none() {
                            namespace_labels = Some(
                                self.cluster
                                    .get_namespace(&key.namespace)
                                    .await?
                                    .and_then(|ns| ns.metadata.labels)
                                    .unwrap_or_default(),
                            );
                        }
                        let selector = namespaces.and_then(|n| n.selector.clone()).unwrap_or_default();
                        selector_matches(&selector, namespace_labels.as_ref().unwrap_or(&BTreeMap::new()))
                    }
                    _ => false,
                };
                if allowed {
                    matched.push(listener.clone());
                }
            }
            if matched.is_empty() {
                debug!(route = %key, gateway = %gateway_key, "no listener of the gateway accepts the route");
                continue;
            }

            match results.get_mut(&gateway_key) {
                Some(existing) => {
                    for listener in matched {
                        if !existing.matched_listeners.iter().any(|l| l.name == listener.name) {
                            existing.matched_listeners.push(listener);
                        }
                    }
                }
                None => {
                    results.insert(
                        gateway_key,
                        ResolvedRouteDetails {
                            route: route.clone(),
                            gateway,
                            matched_ref: parent_ref.target_only(),
                            matched_listeners: matched,
                        },
                    );
                }
            }
        }

        if results.is_empty() {
            info!(route = %key, "no relevant gateway found for route");
        }
        Ok(results)
    }

    /// True unless the route was programmed for its current generation against the current
    /// versions of all Services it references.
    pub async fn is_programming_required(&self, details: &ResolvedRouteDetails) -> Result<bool> {
        if !is_route_condition_true(&details.route, &details.matched_ref, CONDITION_PROGRAMMED)? {
            return Ok(true);
        }
        let recorded_versions = used_services(&details.route);
        for (service_key, _) in route_backends(&details.route) {
            let Some(service) = self
                .cluster
                .get_service(&service_key.namespace, &service_key.name)
                .await?
            else {
                return Ok(true);
            };
            let recorded = recorded_versions.get(&service_key.to_string());
            if recorded != service.metadata.resource_version.as_ref() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Validates the route and marks it accepted by the parent, adding the cleanup finalizer.
    pub async fn accept_route(&self, details: &ResolvedRouteDetails) -> Result<HTTPRoute> {
        validate_route(&details.route)?;

        let mut route = details.route.clone();
        if is_route_condition_true(&route, &details.matched_ref, CONDITION_ACCEPTED)?
            && route.finalizers().iter().any(|f| f == HTTPROUTE_FINALIZER)
        {
            debug!(route = %details.route_key(), gateway = %details.gateway.key(), "route is already accepted");
            return Ok(route);
        }
        info!(route = %details.route_key(), gateway = %details.gateway.key(), "accepting route");
        self.resources
            .set_route_parent_conditions(
                &mut route,
                details.parent_status(),
                vec![SetConditionParams::new(
                    CONDITION_ACCEPTED,
                    true,
                    REASON_ACCEPTED,
                    format!("Route accepted by {}", details.gateway.key()),
                )
                .with_finalizer(HTTPROUTE_FINALIZER)],
            )
            .await?;
        Ok(route)
    }

    /// Reads every Service the route references.
    pub async fn resolve_backend_refs(
        &self,
        route: &HTTPRoute,
    ) -> Result<BTreeMap<NamespacedName, Service>> {
        let mut services = BTreeMap::new();
        for (service_key, _) in route_backends(route) {
            if services.contains_key(&service_key) {
                continue;
            }
            let service = self
                .cluster
                .get_service(&service_key.namespace, &service_key.name)
                .await?
                .ok_or_else(|| {
                    StatusError::new(
                        CONDITION_RESOLVED_REFS,
                        REASON_BACKEND_NOT_FOUND,
                        format!("Service {service_key} not found"),
                    )
                })?;
            debug!(route = %NamespacedName::of(route), service = %service_key, "backend ref resolved");
            services.insert(service_key, service);
        }
        Ok(services)
    }

    /// Programs the route rules into the policy of every matched listener and syncs the
    /// endpoints of its backend sets.
    pub async fn program_route(
        &self,
        details: &ResolvedRouteDetails,
        services: &BTreeMap<NamespacedName, Service>,
    ) -> Result<ProgrammedRules> {
        let lb_id = details.gateway.lb_id();
        let default_backend_set = default_backend_set_name(&details.gateway.gateway)?;
        let gateway_key = details.gateway.key();
        let all_routes = self.cluster.list_http_routes().await?;

        let mut programmed = ProgrammedRules::default();
        for listener in &details.matched_listeners {
            let attached = attached_routes(&all_routes, &gateway_key, listener)?;
            let result = self
                .lb
                .program_route_rules(ProgramRouteRulesParams {
                    lb_id,
                    listener,
                    default_backend_set: &default_backend_set,
                    route: &details.route,
                    services,
                    attached_routes: &attached,
                })
                .await
                .map_err(invalid_on_client_error)?;
            for name in result.rule_names {
                if !programmed.rule_names.contains(&name) {
                    programmed.rule_names.push(name);
                }
            }
            for warning in result.warnings {
                if !programmed.warnings.contains(&warning) {
                    warn!(route = %details.route_key(), listener = %listener.name, %warning, "route programmed with warning");
                    programmed.warnings.push(warning);
                }
            }
        }

        self.lb
            .sync_route_endpoints(lb_id, &details.route, services)
            .await
            .map_err(invalid_on_client_error)?;
        Ok(programmed)
    }

    pub async fn sync_endpoints(&self, details: &ResolvedRouteDetails) -> Result<()> {
        let services = self.resolve_backend_refs(&details.route).await?;
        self.lb
            .sync_route_endpoints(details.gateway.lb_id(), &details.route, &services)
            .await
    }

    /// Marks the route programmed for the parent and records the programmed rules and the
    /// versions of the Services it was programmed with.
    pub async fn set_programmed(
        &self,
        details: &mut ResolvedRouteDetails,
        services: &BTreeMap<NamespacedName, Service>,
        programmed: &ProgrammedRules,
    ) -> Result<()> {
        let mut load_balancers = programmed_load_balancers(&details.route);
        load_balancers.insert(details.gateway.lb_id().to_string());
        let annotations = BTreeMap::from([
            (
                USED_SERVICES_ANNOTATION.to_string(),
                used_versions_value(services),
            ),
            (
                PROGRAMMED_RULES_ANNOTATION.to_string(),
                programmed.rule_names.join(","),
            ),
            (
                PROGRAMMED_LOAD_BALANCERS_ANNOTATION.to_string(),
                load_balancers.into_iter().collect::<Vec<_>>().join(","),
            ),
        ]);

        let mut message = format!("Route programmed by {}", details.gateway.key());
        if !programmed.warnings.is_empty() {
            message = format!("{message}; {}", programmed.warnings.join("; "));
        }
        let parent_status = details.parent_status();
        self.resources
            .set_route_parent_conditions(
                &mut details.route,
                parent_status,
                vec![
                    SetConditionParams::new(
                        CONDITION_RESOLVED_REFS,
                        true,
                        REASON_RESOLVED_REFS,
                        "All references resolved",
                    ),
                    SetConditionParams::new(CONDITION_PROGRAMMED, true, REASON_PROGRAMMED, message)
                        .with_annotations(annotations),
                ],
            )
            .await?;
        info!(route = %details.route_key(), gateway = %details.gateway.key(), "route programmed");
        Ok(())
    }

    /// Records a failure as a `False` condition on the parent status.
    pub async fn set_failed(
        &self,
        details: &mut ResolvedRouteDetails,
        error: &StatusError,
    ) -> Result<()> {
        let parent_status = details.parent_status();
        self.resources
            .set_route_parent_conditions(
                &mut details.route,
                parent_status,
                vec![SetConditionParams::new(
                    error.condition_type.as_str(),
                    false,
                    error.reason.as_str(),
                    error.message.as_str(),
                )],
            )
            .await
    }

    /// Removes the rules of the route from the load balancers of its parents and from every
    /// load balancer it was recorded to have rules on.
    pub async fn deprovision_route(
        &self,
        route: &HTTPRoute,
        resolved: &BTreeMap<NamespacedName, ResolvedRouteDetails>,
    ) -> Result<()> {
        let key = NamespacedName::of(route);
        let rules = programmed_rules(route);
        let mut load_balancers = programmed_load_balancers(route);
        load_balancers.extend(resolved.values().map(|d| d.gateway.lb_id().to_string()));
        for lb_id in &load_balancers {
            info!(route = %key, lb_id = %lb_id, "deprovisioning route");
            self.lb.deprovision_route(lb_id, route, &rules).await?;
        }
        Ok(())
    }

    /// Removes the rules of the route from every listener it is not programmed on anymore.
    /// `programmed_on` maps load balancer ids to the listeners that keep the rules; load
    /// balancers only recorded on the route keep none. Afterwards the route records the load
    /// balancers it still has rules on.
    pub async fn remove_stale_rules(
        &self,
        key: &NamespacedName,
        programmed_on: &BTreeMap<String, BTreeSet<String>>,
    ) -> Result<()> {
        let Some(route) = self.cluster.get_http_route(&key.namespace, &key.name).await? else {
            return Ok(());
        };
        let rules = programmed_rules(&route);
        let recorded = programmed_load_balancers(&route);
        let none = BTreeSet::new();
        let load_balancers: BTreeSet<&String> = recorded.iter().chain(programmed_on.keys()).collect();
        for lb_id in load_balancers {
            let removed = self
                .lb
                .remove_route_rules(RemoveRouteRulesParams {
                    lb_id,
                    route: &route,
                    keep_listeners: programmed_on.get(lb_id).unwrap_or(&none),
                    programmed_rules: &rules,
                })
                .await?;
            if removed {
                self.lb.delete_unused_backend_sets(lb_id, &route).await?;
            }
        }

        let remaining: BTreeSet<String> = programmed_on
            .iter()
            .filter(|(_, listeners)| !listeners.is_empty())
            .map(|(lb_id, _)| lb_id.clone())
            .collect();
        if remaining != recorded {
            let mut updated = route.clone();
            let annotations = updated.annotations_mut();
            if remaining.is_empty() {
                annotations.remove(PROGRAMMED_LOAD_BALANCERS_ANNOTATION);
            } else {
                annotations.insert(
                    PROGRAMMED_LOAD_BALANCERS_ANNOTATION.to_string(),
                    remaining.into_iter().collect::<Vec<_>>().join(","),
                );
            }
            debug!(route = %key, "recording load balancers of route");
            self.cluster.update_http_route_metadata(&updated).await?;
        }
        Ok(())
    }

    /// Removes the cleanup finalizer, returning the updated route.
    pub async fn remove_finalizer(&self, route: &HTTPRoute) -> Result<HTTPRoute> {
        if !route.finalizers().iter().any(|f| f == HTTPROUTE_FINALIZER) {
            return Ok(route.clone());
        }
        let mut updated = route.clone();
        updated.finalizers_mut().retain(|f| f != HTTPROUTE_FINALIZER);
        debug!(route = %NamespacedName::of(route), "removing finalizer");
        self.cluster.update_http_route_metadata(&updated).await
    }
}

/// Routes other than the one being programmed are only included once this controller accepted
/// them for the same Gateway.
fn attached_routes(
    routes: &[HTTPRoute],
    gateway_key: &NamespacedName,
    listener: &ListenerSpec,
) -> Result<Vec<HTTPRoute>> {
    let mut attached = vec![];
    for route in routes {
        if route.metadata.deletion_timestamp.is_some() {
            continue;
        }
        let namespace = route.namespace().unwrap_or_default();
        let statuses = route_parent_statuses(route)?;
        let targets_listener = parent_refs(route)?.iter().any(|parent_ref| {
            parent_ref.is_gateway()
                && parent_ref.gateway_key(&namespace) == *gateway_key
                && parent_ref.selects(listener)
                && find_parent_status(&statuses, parent_ref).is_some_and(|status| {
                    status.conditions.iter().any(|c| {
                        c.type_ == CONDITION_ACCEPTED && c.status == "True"
                    })
                })
        });
        if targets_listener {
            attached.push(route.clone());
        }
    }
    Ok(attached)
}

/// Checks what the load balancer can express: translatable matches and same-namespace Service
/// backends with a port.
pub fn validate_route(route: &HTTPRoute) -> Result<()> {
    let namespace = route.namespace().unwrap_or_default();
    for (rule_index, rule) in route.spec.rules.iter().flatten().enumerate() {
        for m in rule.matches.iter().flatten() {
            let translated = RouteMatch::from_api(m).and_then(|m| condition_for_match(&m));
            if let Err(e) = translated {
                return Err(StatusError::new(
                    CONDITION_ACCEPTED,
                    REASON_UNSUPPORTED_VALUE,
                    format!("rule {rule_index}: {e}"),
                )
                .with_cause(e)
                .into());
            }
        }
        for backend in rule.backend_refs.iter().flatten() {
            if !is_service_ref(backend.group.as_deref(), backend.kind.as_deref()) {
                return Err(StatusError::new(
                    CONDITION_RESOLVED_REFS,
                    REASON_INVALID_KIND,
                    format!(
                        "rule {rule_index}: backend {} has unsupported kind {}",
                        backend.name,
                        backend.kind.as_deref().unwrap_or_default()
                    ),
                )
                .into());
            }
            if backend.namespace.as_deref().is_some_and(|ns| ns != namespace) {
                return Err(StatusError::new(
                    CONDITION_RESOLVED_REFS,
                    REASON_REF_NOT_PERMITTED,
                    format!(
                        "rule {rule_index}: backend {} in another namespace is not permitted",
                        backend.name
                    ),
                )
                .into());
            }
            if backend.port.is_none() {
                return Err(StatusError::new(
                    CONDITION_ACCEPTED,
                    REASON_UNSUPPORTED_VALUE,
                    format!("rule {rule_index}: backend {} is missing a port", backend.name),
                )
                .into());
            }
        }
    }
    Ok(())
}

/// Gateways the route names as parents, for mapping Gateway events to routes.
pub fn parent_gateways(route: &HTTPRoute) -> BTreeSet<NamespacedName> {
    let namespace = route.namespace().unwrap_or_default();
    parent_refs(route)
        .unwrap_or_default()
        .iter()
        .filter(|r| r.is_gateway())
        .map(|r| r.gateway_key(&namespace))
        .collect()
}
