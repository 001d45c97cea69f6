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

//! Programming of HTTPRoute rules into a listener's routing policy.
//!
//! The policy of a listener is always recomputed from every route attached to it, so the
//! precedence order does not depend on the order routes are reconciled in.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use gateway_api::apis::standard::httproutes::{HTTPRoute, HTTPRouteRules};
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use loadbalancer::models::*;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::consts::*;
use crate::gateway_utils::ListenerSpec;
use crate::lb_model::{default_health_checker, LoadBalancerModel};
use crate::routing_rules::{condition_for_match, RouteMatch, PATH_TYPE_EXACT};
use crate::*;

static RULE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+-\d+$").expect("valid regex"));

/// A `Service` backendRef of a route rule.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServiceBackend {
    pub service: NamespacedName,
    pub port: i32,
    pub weight: i32,
}

impl ServiceBackend {
    pub fn backend_set_name(&self) -> String {
        backend_set_name(&self.service, self.port)
    }
}

pub fn backend_set_name(service: &NamespacedName, port: i32) -> String {
    format!("{}-{}-{}", service.namespace, service.name, port)
}

pub fn routing_rule_name(route: &NamespacedName, rule_index: usize, match_index: usize) -> String {
    format!("{}-{}-{rule_index}-{match_index}", route.namespace, route.name)
}

/// Whether a routing rule was generated for the given route.
pub fn rule_belongs_to(rule_name: &str, route: &NamespacedName) -> bool {
    rule_name
        .strip_prefix(&format!("{}-{}-", route.namespace, route.name))
        .is_some_and(|rest| RULE_SUFFIX.is_match(rest))
}

pub fn is_service_ref(group: Option<&str>, kind: Option<&str>) -> bool {
    group.unwrap_or_default().is_empty() && kind.unwrap_or("Service") == "Service"
}

pub fn rule_backends(route_namespace: &str, rule: &HTTPRouteRules) -> Vec<ServiceBackend> {
    rule.backend_refs
        .iter()
        .flatten()
        .filter(|r| is_service_ref(r.group.as_deref(), r.kind.as_deref()))
        .filter_map(|r| {
            Some(ServiceBackend {
                service: NamespacedName::new(
                    r.namespace.as_deref().unwrap_or(route_namespace),
                    r.name.as_str(),
                ),
                port: r.port?,
                weight: r.weight.unwrap_or(1),
            })
        })
        .collect()
}

/// Every Service backend referenced by the route, across all rules.
pub fn route_backends(route: &HTTPRoute) -> BTreeSet<(NamespacedName, i32)> {
    let namespace = route.namespace().unwrap_or_default();
    route
        .spec
        .rules
        .iter()
        .flatten()
        .flat_map(|rule| rule_backends(&namespace, rule))
        .map(|b| (b.service, b.port))
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Precedence {
    exact: Reverse<bool>,
    path_len: Reverse<usize>,
    headers: Reverse<usize>,
    created: (bool, Option<DateTime<Utc>>),
    route: NamespacedName,
    rule_index: usize,
    match_index: usize,
}

#[derive(Clone, Debug)]
struct DesiredRule {
    precedence: Precedence,
    rule: RoutingRule,
}

/// Rules generated for one route, plus any warnings worth reporting on its status.
#[derive(Clone, Debug, Default)]
struct RouteRules {
    rules: Vec<DesiredRule>,
    warnings: Vec<String>,
}

impl RouteRules {
    fn backend_sets(&self) -> BTreeSet<String> {
        self.rules
            .iter()
            .flat_map(|r| r.rule.actions.iter().map(|a| a.backend_set_name().to_string()))
            .collect()
    }
}

/// Translates a route into one routing rule per match. The highest weighted backend of a rule
/// receives all of its traffic; rules without backends go to `default_backend_set`.
fn route_rules(route: &HTTPRoute, default_backend_set: &str) -> Result<RouteRules> {
    let key = NamespacedName::of(route);
    let created = route.metadata.creation_timestamp.as_ref().map(|t| t.0);
    let mut result = RouteRules::default();

    for (rule_index, rule) in route.spec.rules.iter().flatten().enumerate() {
        let backends = rule_backends(&key.namespace, rule);
        let eligible: Vec<&ServiceBackend> = backends.iter().filter(|b| b.weight > 0).collect();
        let mut chosen: Option<&ServiceBackend> = None;
        for &backend in &eligible {
            if chosen.is_none_or(|c| backend.weight > c.weight) {
                chosen = Some(backend);
            }
        }
        let target = chosen
            .map(ServiceBackend::backend_set_name)
            .unwrap_or_else(|| default_backend_set.to_string());
        if eligible.len() > 1 {
            result.warnings.push(format!(
                "rule {rule_index}: traffic splitting is not supported, all traffic goes to {target}"
            ));
        }

        let matches = match rule.matches.as_deref() {
            Some(matches) if !matches.is_empty() => matches
                .iter()
                .map(RouteMatch::from_api)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(unsupported_value)?,
            _ => vec![RouteMatch::default_prefix()],
        };

        for (match_index, m) in matches.iter().enumerate() {
            let mut condition = condition_for_match(m).map_err(unsupported_value)?;
            if condition.is_empty() {
                condition =
                    condition_for_match(&RouteMatch::default_prefix()).map_err(unsupported_value)?;
            }
            let path = m.path.as_ref();
            let precedence = Precedence {
                exact: Reverse(path.and_then(|p| p.type_.as_deref()) == Some(PATH_TYPE_EXACT)),
                path_len: Reverse(path.and_then(|p| p.value.as_ref()).map_or(0, String::len)),
                headers: Reverse(m.header_count()),
                created: (created.is_none(), created),
                route: key.clone(),
                rule_index,
                match_index,
            };
            result.rules.push(DesiredRule {
                precedence,
                rule: RoutingRule {
                    name: routing_rule_name(&key, rule_index, match_index),
                    condition,
                    actions: vec![Action::ForwardToBackendSet {
                        backend_set_name: target.clone(),
                    }],
                },
            });
        }
    }
    Ok(result)
}

fn unsupported_value(e: routing_rules::RoutingRuleError) -> Error {
    StatusError::new(CONDITION_ACCEPTED, REASON_UNSUPPORTED_VALUE, e.to_string())
        .with_cause(e)
        .into()
}

pub struct ProgramRouteRulesParams<'a> {
    pub lb_id: &'a str,
    pub listener: &'a ListenerSpec,
    pub default_backend_set: &'a str,
    pub route: &'a HTTPRoute,
    /// Services the route references, already resolved.
    pub services: &'a BTreeMap<NamespacedName, Service>,
    /// Every route attached to the listener. May or may not include `route`.
    pub attached_routes: &'a [HTTPRoute],
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgrammedRules {
    pub rule_names: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct RemoveRouteRulesParams<'a> {
    pub lb_id: &'a str,
    pub route: &'a HTTPRoute,
    /// Listeners whose policies keep the rules of the route.
    pub keep_listeners: &'a BTreeSet<String>,
    /// Rule names recorded on the route when it was last programmed.
    pub programmed_rules: &'a [String],
}

impl LoadBalancerModel {
    pub async fn program_route_rules(
        &self,
        params: ProgramRouteRulesParams<'_>,
    ) -> Result<ProgrammedRules> {
        let lb_id = params.lb_id;
        let route_key = NamespacedName::of(params.route);
        let listener_name = params.listener.name.as_str();
        let lb = self.get_load_balancer(lb_id).await?;
        if !lb.listeners.contains_key(listener_name) {
            return Err(Error::ListenerNotProgrammed {
                lb_id: lb_id.to_string(),
                listener: listener_name.to_string(),
            });
        }

        let own = route_rules(params.route, params.default_backend_set)?;
        let backend_services: BTreeMap<String, NamespacedName> = route_backends(params.route)
            .into_iter()
            .map(|(service, port)| (backend_set_name(&service, port), service))
            .collect();
        for backend_set in own.backend_sets() {
            if backend_set == params.default_backend_set || lb.backend_sets.contains_key(&backend_set)
            {
                continue;
            }
            let service_known = backend_services
                .get(&backend_set)
                .is_some_and(|svc| params.services.contains_key(svc));
            if !service_known {
                return Err(StatusError::new(
                    CONDITION_RESOLVED_REFS,
                    REASON_BACKEND_NOT_FOUND,
                    format!("backend set {backend_set} does not match a resolved Service"),
                )
                .into());
            }
            self.submit(
                lb_id,
                format!("create backend set {backend_set}"),
                self.client
                    .create_backend_set(
                        lb_id,
                        &BackendSetDetails {
                            name: backend_set.clone(),
                            policy: POLICY_ROUND_ROBIN.to_string(),
                            health_checker: default_health_checker(),
                            backends: vec![],
                        },
                    )
                    .await,
            )
            .await?;
        }

        let current_rules: Vec<RoutingRule> = lb
            .routing_policies
            .get(listener_name)
            .map(|p| p.rules.clone())
            .unwrap_or_default();

        let mut desired: Vec<DesiredRule> = own.rules.clone();
        let mut preserved: Vec<RoutingRule> = vec![];
        for other in params.attached_routes {
            let other_key = NamespacedName::of(other);
            if other_key == route_key || other.metadata.deletion_timestamp.is_some() {
                continue;
            }
            let ready = route_rules(other, params.default_backend_set).ok().filter(|rules| {
                rules.backend_sets().iter().all(|bs| {
                    bs == params.default_backend_set || lb.backend_sets.contains_key(bs)
                })
            });
            match ready {
                Some(rules) => desired.extend(rules.rules),
                None => {
                    debug!(route = %other_key, "route is not programmable, keeping its current rules");
                    preserved.extend(
                        current_rules
                            .iter()
                            .filter(|r| rule_belongs_to(&r.name, &other_key))
                            .cloned(),
                    );
                }
            }
        }
        desired.sort_by(|a, b| a.precedence.cmp(&b.precedence));

        let mut rules: Vec<RoutingRule> = desired.into_iter().map(|d| d.rule).collect();
        rules.extend(preserved);

        self.apply_listener_policy(&lb, listener_name, rules).await?;

        Ok(ProgrammedRules {
            rule_names: own.rules.into_iter().map(|d| d.rule.name).collect(),
            warnings: own.warnings,
        })
    }

    /// Replaces the rules of the listener's routing policy and attaches the policy to the
    /// listener only while it has rules.
    async fn apply_listener_policy(
        &self,
        lb: &LoadBalancer,
        listener_name: &str,
        rules: Vec<RoutingRule>,
    ) -> Result<()> {
        let lb_id = lb.id.as_str();
        let Some(listener) = lb.listeners.get(listener_name) else {
            return Ok(());
        };
        let policy = lb.routing_policies.get(listener_name);
        let details = RoutingPolicyDetails {
            name: listener_name.to_string(),
            condition_language_version: CONDITION_LANGUAGE_V1.to_string(),
            rules,
        };
        let attach = !details.rules.is_empty();
        let mut listener_details = ListenerDetails::from(listener);

        if !attach && listener_details.routing_policy_name.is_some() {
            listener_details.routing_policy_name = None;
            self.submit(
                lb_id,
                format!("detach routing policy from listener {listener_name}"),
                self.client.update_listener(lb_id, &listener_details).await,
            )
            .await?;
        }

        match policy {
            None => {
                self.submit(
                    lb_id,
                    format!("create routing policy {listener_name}"),
                    self.client.create_routing_policy(lb_id, &details).await,
                )
                .await?
            }
            Some(p) if p.rules != details.rules => {
                info!(lb_id, listener = listener_name, rules = details.rules.len(), "updating routing policy");
                self.submit(
                    lb_id,
                    format!("update routing policy {listener_name}"),
                    self.client.update_routing_policy(lb_id, &details).await,
                )
                .await?
            }
            Some(_) => debug!(listener = listener_name, "routing policy is up to date"),
        }

        if attach && listener_details.routing_policy_name.as_deref() != Some(listener_name) {
            listener_details.routing_policy_name = Some(listener_name.to_string());
            self.submit(
                lb_id,
                format!("attach routing policy to listener {listener_name}"),
                self.client.update_listener(lb_id, &listener_details).await,
            )
            .await?;
        }
        Ok(())
    }

    /// Removes the rules of the route from the policy of every listener outside
    /// `keep_listeners`. Returns whether any rule was removed. A load balancer that no longer
    /// exists has nothing to remove.
    pub async fn remove_route_rules(&self, params: RemoveRouteRulesParams<'_>) -> Result<bool> {
        let lb_id = params.lb_id;
        let route_key = NamespacedName::of(params.route);
        let recorded: BTreeSet<&str> = params.programmed_rules.iter().map(String::as_str).collect();
        let owned = |rule: &RoutingRule| {
            rule_belongs_to(&rule.name, &route_key) || recorded.contains(rule.name.as_str())
        };

        let lb = match self.get_load_balancer(lb_id).await {
            Err(e) if e.lb_error().is_some_and(|source| source.is_not_found()) => {
                debug!(lb_id, route = %route_key, "load balancer not found, no rules to remove");
                return Ok(false);
            }
            result => result?,
        };
        let mut removed = false;
        for (name, policy) in &lb.routing_policies {
            if params.keep_listeners.contains(name) || !policy.rules.iter().any(&owned) {
                continue;
            }
            let remaining: Vec<RoutingRule> =
                policy.rules.iter().filter(|r| !owned(r)).cloned().collect();
            info!(lb_id, route = %route_key, listener = %name, "removing route rules");
            self.apply_listener_policy(&lb, name, remaining).await?;
            removed = true;
        }
        Ok(removed)
    }

    /// Deletes the backend sets of the route that no rule or listener references anymore.
    pub async fn delete_unused_backend_sets(&self, lb_id: &str, route: &HTTPRoute) -> Result<()> {
        let lb = match self.get_load_balancer(lb_id).await {
            Err(e) if e.lb_error().is_some_and(|source| source.is_not_found()) => return Ok(()),
            result => result?,
        };
        let referenced: BTreeSet<&str> = lb
            .routing_policies
            .values()
            .flat_map(|p| p.rules.iter())
            .flat_map(|r| r.actions.iter().map(Action::backend_set_name))
            .chain(lb.listeners.values().map(|l| l.default_backend_set_name.as_str()))
            .collect();

        for (service, port) in route_backends(route) {
            let name = backend_set_name(&service, port);
            if !lb.backend_sets.contains_key(&name) || referenced.contains(name.as_str()) {
                continue;
            }
            let submitted = self.client.delete_backend_set(lb_id, &name).await;
            match submitted {
                Err(e) if e.status() == Some(400) => {
                    warn!(lb_id, backend_set = %name, error = %e, "backend set is still in use, skipping");
                }
                submitted => {
                    self.submit_delete(lb_id, format!("delete backend set {name}"), submitted)
                        .await?
                }
            }
        }
        Ok(())
    }

    /// Removes every rule of the route from the load balancer, then deletes backend sets of the
    /// route that nothing references anymore.
    pub async fn deprovision_route(
        &self,
        lb_id: &str,
        route: &HTTPRoute,
        programmed_rules: &[String],
    ) -> Result<()> {
        self.remove_route_rules(RemoveRouteRulesParams {
            lb_id,
            route,
            keep_listeners: &BTreeSet::new(),
            programmed_rules,
        })
        .await?;
        self.delete_unused_backend_sets(lb_id, route).await
    }
}
