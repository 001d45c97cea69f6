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

mod common;

use std::sync::Arc;

use common::*;
use controlplane::consts::*;
use controlplane::gateway_utils::used_services;
use controlplane::httproute_model::route_parent_statuses;
use controlplane::{gateway_controller, httproute_controller};
use gateway_api::apis::standard::httproutes::HTTPRoute;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::ResourceExt;
use loadbalancer::models::{Action, LoadBalancer, RoutingRule};
use serde_json::json;

fn api_prefix_rule() -> serde_json::Value {
    json!([{
        "matches": [{"path": {"type": "PathPrefix", "value": "/api"}}],
        "backendRefs": [{"name": "svc", "port": 8080}]
    }])
}

fn rule_names(lb: &LoadBalancer, listener: &str) -> Vec<String> {
    lb.routing_policies
        .get(listener)
        .map(|p| p.rules.iter().map(|r| r.name.clone()).collect())
        .unwrap_or_default()
}

fn parent_condition(route: &HTTPRoute, type_: &str) -> Condition {
    let statuses = route_parent_statuses(route).unwrap();
    assert_eq!(statuses.len(), 1, "{statuses:?}");
    assert_eq!(statuses[0].controller_name, GATEWAY_CLASS_CONTROLLER_NAME);
    statuses[0]
        .conditions
        .iter()
        .find(|c| c.type_ == type_)
        .cloned()
        .unwrap_or_else(|| panic!("condition {type_} not set"))
}

/// Programs Gateway `demo/gw` with an `http` listener.
async fn programmed_gateway() -> anyhow::Result<Harness> {
    let h = Harness::new();
    h.cluster.put_gateway(gateway(Some("p"), http_listener()));
    let gw = h.cluster.gateway("demo", "gw");
    gateway_controller::reconcile(Arc::new(gw), h.ctx.clone()).await?;
    h.lb.clear_calls();
    Ok(h)
}

async fn reconcile_route(h: &Harness, name: &str) -> controlplane::Result<()> {
    let route = h
        .cluster
        .route("demo", name)
        .unwrap_or_else(|| panic!("route {name} not found"));
    httproute_controller::reconcile(Arc::new(route), h.ctx.clone()).await?;
    Ok(())
}

/// Gateway with `demo/r1` routing `/api` to `svc:8080`, backed by `10.0.0.5:9000`.
async fn programmed_route() -> anyhow::Result<Harness> {
    let h = programmed_gateway().await?;
    h.cluster.put_service(service("svc", "s1"));
    h.cluster
        .put_endpoint_slice(endpoint_slice("svc", &["10.0.0.5"]));
    h.cluster.put_route(route("r1", api_prefix_rule()));
    reconcile_route(&h, "r1").await?;
    Ok(h)
}

#[tokio::test]
async fn unsupported_match_rejects_route() -> anyhow::Result<()> {
    let h = programmed_gateway().await?;
    h.cluster.put_service(service("svc", "s1"));
    h.cluster.put_route(route(
        "r1",
        json!([{
            "matches": [{"path": {"type": "PathPrefix", "value": "/api"}, "method": "POST"}],
            "backendRefs": [{"name": "svc", "port": 8080}]
        }]),
    ));

    reconcile_route(&h, "r1").await?;

    let route = h.cluster.route("demo", "r1").unwrap();
    let accepted = parent_condition(&route, CONDITION_ACCEPTED);
    assert_eq!(accepted.status, "False");
    assert_eq!(accepted.reason, REASON_UNSUPPORTED_VALUE);
    assert!(h.lb.snapshot(LB_ID).routing_policies["http"].rules.is_empty());
    assert!(
        h.lb.calls().iter().all(|c| c.starts_with("get_")),
        "unexpected calls {:?}",
        h.lb.calls()
    );
    Ok(())
}

#[tokio::test]
async fn route_is_programmed_with_endpoints() -> anyhow::Result<()> {
    let h = programmed_route().await?;

    let lb = h.lb.snapshot(LB_ID);
    let backends: Vec<(String, i32)> = lb.backend_sets["demo-svc-8080"]
        .backends
        .iter()
        .map(|b| (b.ip_address.clone(), b.port))
        .collect();
    assert_eq!(backends, vec![("10.0.0.5".to_string(), 9000)]);
    assert_eq!(
        lb.routing_policies["http"].rules,
        vec![RoutingRule {
            name: "demo-r1-0-0".to_string(),
            condition: "http.request.url.path sw '/api'".to_string(),
            actions: vec![Action::ForwardToBackendSet {
                backend_set_name: "demo-svc-8080".to_string()
            }],
        }]
    );
    assert_eq!(
        lb.listeners["http"].routing_policy_name.as_deref(),
        Some("http")
    );

    let route = h.cluster.route("demo", "r1").unwrap();
    for type_ in [CONDITION_ACCEPTED, CONDITION_RESOLVED_REFS, CONDITION_PROGRAMMED] {
        let c = parent_condition(&route, type_);
        assert_eq!(c.status, "True", "{type_}");
        assert_eq!(c.observed_generation, Some(1), "{type_}");
    }
    assert!(route.finalizers().iter().any(|f| f == HTTPROUTE_FINALIZER));
    assert_eq!(
        route.annotations().get(PROGRAMMED_RULES_ANNOTATION),
        Some(&"demo-r1-0-0".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn programmed_route_only_syncs_endpoints() -> anyhow::Result<()> {
    let h = programmed_route().await?;
    h.lb.clear_calls();
    let writes = h.cluster.status_writes();

    h.cluster
        .put_endpoint_slice(endpoint_slice("svc", &["10.0.0.6"]));
    reconcile_route(&h, "r1").await?;

    let calls = h.lb.calls();
    assert!(
        calls
            .iter()
            .all(|c| c.starts_with("get_") || c.contains("_backend demo-svc-8080")),
        "unexpected calls {calls:?}"
    );
    let lb = h.lb.snapshot(LB_ID);
    let backends: Vec<&str> = lb.backend_sets["demo-svc-8080"]
        .backends
        .iter()
        .map(|b| b.name.as_str())
        .collect();
    assert_eq!(backends, vec!["10.0.0.6:9000"]);
    assert_eq!(h.cluster.status_writes(), writes);
    Ok(())
}

#[tokio::test]
async fn changed_service_reprograms_route() -> anyhow::Result<()> {
    let h = programmed_route().await?;
    h.cluster.put_service(service("svc", "s2"));

    reconcile_route(&h, "r1").await?;

    let route = h.cluster.route("demo", "r1").unwrap();
    assert_eq!(used_services(&route).get("demo/svc"), Some(&"s2".to_string()));
    Ok(())
}

#[tokio::test]
async fn rules_of_routes_are_ordered_by_precedence() -> anyhow::Result<()> {
    let h = programmed_route().await?;
    h.cluster.put_route(route(
        "r2",
        json!([{
            "matches": [{"path": {"type": "Exact", "value": "/api/health"}}],
            "backendRefs": [{"name": "svc", "port": 8080}]
        }]),
    ));

    reconcile_route(&h, "r2").await?;

    let lb = h.lb.snapshot(LB_ID);
    let names: Vec<&str> = lb.routing_policies["http"]
        .rules
        .iter()
        .map(|r| r.name.as_str())
        .collect();
    assert_eq!(names, vec!["demo-r2-0-0", "demo-r1-0-0"]);
    Ok(())
}

#[tokio::test]
async fn missing_service_reports_unresolved_refs() -> anyhow::Result<()> {
    let h = programmed_gateway().await?;
    h.cluster.put_route(route("r1", api_prefix_rule()));

    reconcile_route(&h, "r1").await?;

    let route = h.cluster.route("demo", "r1").unwrap();
    let resolved = parent_condition(&route, CONDITION_RESOLVED_REFS);
    assert_eq!(resolved.status, "False");
    assert_eq!(resolved.reason, REASON_BACKEND_NOT_FOUND);
    assert!(!h.lb.snapshot(LB_ID).backend_sets.contains_key("demo-svc-8080"));
    Ok(())
}

#[tokio::test]
async fn deleted_route_is_deprovisioned() -> anyhow::Result<()> {
    let h = programmed_route().await?;
    h.cluster.delete_route("demo", "r1");

    reconcile_route(&h, "r1").await?;

    let lb = h.lb.snapshot(LB_ID);
    assert!(lb
        .routing_policies
        .values()
        .flat_map(|p| p.rules.iter())
        .all(|r| !r.name.starts_with("demo-r1-")));
    assert!(!lb.backend_sets.contains_key("demo-svc-8080"));
    assert!(lb.backend_sets.contains_key(DEFAULT_BACKEND_SET));
    let listener = &lb.listeners["http"];
    assert_eq!(listener.default_backend_set_name, DEFAULT_BACKEND_SET);
    assert!(listener.routing_policy_name.is_none());
    assert!(h.cluster.route("demo", "r1").is_none());
    Ok(())
}

#[tokio::test]
async fn shared_backend_set_survives_deletion_of_one_route() -> anyhow::Result<()> {
    let h = programmed_route().await?;
    h.cluster.put_route(route(
        "r2",
        json!([{
            "matches": [{"path": {"type": "PathPrefix", "value": "/shop"}}],
            "backendRefs": [{"name": "svc", "port": 8080}]
        }]),
    ));
    reconcile_route(&h, "r2").await?;

    h.cluster.delete_route("demo", "r1");
    reconcile_route(&h, "r1").await?;

    let lb = h.lb.snapshot(LB_ID);
    assert!(lb.backend_sets.contains_key("demo-svc-8080"));
    let names: Vec<&str> = lb.routing_policies["http"]
        .rules
        .iter()
        .map(|r| r.name.as_str())
        .collect();
    assert_eq!(names, vec!["demo-r2-0-0"]);
    Ok(())
}

#[tokio::test]
async fn route_moved_to_another_listener_leaves_no_rules_behind() -> anyhow::Result<()> {
    let h = Harness::new();
    h.cluster.put_gateway(gateway(
        Some("p"),
        json!([
            {"name": "http", "port": 80, "protocol": "HTTP"},
            {"name": "alt", "port": 8080, "protocol": "HTTP"}
        ]),
    ));
    gateway_controller::reconcile(Arc::new(h.cluster.gateway("demo", "gw")), h.ctx.clone()).await?;
    h.cluster.put_service(service("svc", "s1"));
    h.cluster
        .put_endpoint_slice(endpoint_slice("svc", &["10.0.0.5"]));
    let mut r1 = route("r1", api_prefix_rule());
    r1.spec.parent_refs = Some(serde_json::from_value(
        json!([{"name": "gw", "sectionName": "http"}]),
    )?);
    h.cluster.put_route(r1);
    reconcile_route(&h, "r1").await?;
    assert_eq!(rule_names(&h.lb.snapshot(LB_ID), "http"), vec!["demo-r1-0-0"]);

    let mut moved = h.cluster.route("demo", "r1").unwrap();
    moved.spec.parent_refs = Some(serde_json::from_value(
        json!([{"name": "gw", "sectionName": "alt"}]),
    )?);
    moved.metadata.generation = Some(2);
    h.cluster.put_route(moved);
    reconcile_route(&h, "r1").await?;

    let lb = h.lb.snapshot(LB_ID);
    assert!(rule_names(&lb, "http").is_empty());
    assert!(lb.listeners["http"].routing_policy_name.is_none());
    assert_eq!(rule_names(&lb, "alt"), vec!["demo-r1-0-0"]);
    assert!(lb.backend_sets.contains_key("demo-svc-8080"));

    h.cluster.delete_route("demo", "r1");
    reconcile_route(&h, "r1").await?;

    let lb = h.lb.snapshot(LB_ID);
    assert!(rule_names(&lb, "http").is_empty());
    assert!(rule_names(&lb, "alt").is_empty());
    assert!(!lb.backend_sets.contains_key("demo-svc-8080"));
    assert!(h.cluster.route("demo", "r1").is_none());
    Ok(())
}

#[tokio::test]
async fn route_moved_to_another_gateway_is_removed_from_the_old_load_balancer() -> anyhow::Result<()> {
    let h = programmed_route().await?;
    h.lb.add_load_balancer("lb-2");
    h.cluster.put_config(gateway_config("demo", "p2", "lb-2"));
    let mut gw2 = gateway(Some("p2"), http_listener());
    gw2.metadata.name = Some("gw2".to_string());
    gw2.metadata.uid = Some("7d2e4b10-3c5a-4f61-9a0b-2c4d6e8f0a1b".to_string());
    h.cluster.put_gateway(gw2);
    gateway_controller::reconcile(Arc::new(h.cluster.gateway("demo", "gw2")), h.ctx.clone()).await?;

    let mut moved = h.cluster.route("demo", "r1").unwrap();
    moved.spec.parent_refs = Some(serde_json::from_value(json!([{"name": "gw2"}]))?);
    moved.metadata.generation = Some(2);
    h.cluster.put_route(moved);
    reconcile_route(&h, "r1").await?;

    let old = h.lb.snapshot(LB_ID);
    assert!(rule_names(&old, "http").is_empty());
    assert!(!old.backend_sets.contains_key("demo-svc-8080"));
    let new = h.lb.snapshot("lb-2");
    assert_eq!(rule_names(&new, "http"), vec!["demo-r1-0-0"]);
    assert!(new.backend_sets.contains_key("demo-svc-8080"));

    let route = h.cluster.route("demo", "r1").unwrap();
    assert_eq!(
        route.annotations().get(PROGRAMMED_LOAD_BALANCERS_ANNOTATION),
        Some(&"lb-2".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn programmed_route_with_unsupported_match_loses_its_rules() -> anyhow::Result<()> {
    let h = programmed_route().await?;
    let mut updated = h.cluster.route("demo", "r1").unwrap();
    updated.spec.rules = Some(serde_json::from_value(json!([{
        "matches": [{"path": {"type": "PathPrefix", "value": "/api"}, "method": "POST"}],
        "backendRefs": [{"name": "svc", "port": 8080}]
    }]))?);
    updated.metadata.generation = Some(2);
    h.cluster.put_route(updated);

    reconcile_route(&h, "r1").await?;

    let route = h.cluster.route("demo", "r1").unwrap();
    let accepted = parent_condition(&route, CONDITION_ACCEPTED);
    assert_eq!(accepted.status, "False");
    assert_eq!(accepted.reason, REASON_UNSUPPORTED_VALUE);
    let lb = h.lb.snapshot(LB_ID);
    assert!(rule_names(&lb, "http").is_empty());
    assert!(lb.listeners["http"].routing_policy_name.is_none());
    assert!(!lb.backend_sets.contains_key("demo-svc-8080"));
    assert!(route
        .annotations()
        .get(PROGRAMMED_LOAD_BALANCERS_ANNOTATION)
        .is_none());
    Ok(())
}

#[tokio::test]
async fn traffic_split_warning_is_reported_on_programmed() -> anyhow::Result<()> {
    let h = programmed_gateway().await?;
    h.cluster.put_service(service("svc", "s1"));
    h.cluster.put_service(service("canary", "c1"));
    h.cluster
        .put_endpoint_slice(endpoint_slice("canary", &["10.0.0.9"]));
    h.cluster.put_route(route(
        "r1",
        json!([{
            "matches": [{"path": {"type": "PathPrefix", "value": "/api"}}],
            "backendRefs": [
                {"name": "svc", "port": 8080, "weight": 20},
                {"name": "canary", "port": 8080, "weight": 80}
            ]
        }]),
    ));

    reconcile_route(&h, "r1").await?;

    let route = h.cluster.route("demo", "r1").unwrap();
    let programmed = parent_condition(&route, CONDITION_PROGRAMMED);
    assert_eq!(programmed.status, "True");
    assert!(
        programmed.message.contains("traffic splitting is not supported"),
        "{}",
        programmed.message
    );
    assert!(programmed.message.contains("demo-canary-8080"));

    let lb = h.lb.snapshot(LB_ID);
    assert_eq!(
        lb.routing_policies["http"].rules[0].actions,
        vec![Action::ForwardToBackendSet {
            backend_set_name: "demo-canary-8080".to_string()
        }]
    );
    assert!(!lb.backend_sets.contains_key("demo-svc-8080"));
    Ok(())
}

#[tokio::test]
async fn cancelled_reconcile_writes_nothing() -> anyhow::Result<()> {
    let h = programmed_gateway().await?;
    h.cluster.put_service(service("svc", "s1"));
    h.cluster.put_route(route("r1", api_prefix_rule()));
    let writes = h.cluster.status_writes();
    h.ctx.shutdown.cancel();

    let route = h.cluster.route("demo", "r1").unwrap();
    let err = httproute_controller::reconcile(Arc::new(route), h.ctx.clone())
        .await
        .unwrap_err();

    assert!(matches!(err, controlplane::Error::Cancelled), "{err:?}");
    assert_eq!(h.cluster.status_writes(), writes);
    assert!(
        h.lb.calls().iter().all(|c| c.starts_with("get_")),
        "unexpected calls {:?}",
        h.lb.calls()
    );
    let route = h.cluster.route("demo", "r1").unwrap();
    assert!(route_parent_statuses(&route)?.is_empty());
    assert!(route.finalizers().is_empty());
    Ok(())
}

#[tokio::test]
async fn deprovisioning_twice_changes_nothing() -> anyhow::Result<()> {
    let h = programmed_route().await?;
    h.cluster.delete_route("demo", "r1");
    let deleted = Arc::new(h.cluster.route("demo", "r1").unwrap());

    httproute_controller::reconcile(deleted.clone(), h.ctx.clone()).await?;
    let after_first = h.lb.snapshot(LB_ID);
    h.lb.clear_calls();

    httproute_controller::reconcile(deleted, h.ctx.clone()).await?;

    assert!(
        h.lb.calls().iter().all(|c| c.starts_with("get_")),
        "unexpected calls {:?}",
        h.lb.calls()
    );
    assert_eq!(h.lb.snapshot(LB_ID), after_first);
    assert!(h.cluster.route("demo", "r1").is_none());
    Ok(())
}

#[tokio::test]
async fn route_waits_for_its_listener() -> anyhow::Result<()> {
    let h = Harness::new();
    h.cluster.put_gateway(gateway(Some("p"), http_listener()));
    h.cluster.put_service(service("svc", "s1"));
    h.cluster.put_route(route("r1", api_prefix_rule()));

    let err = reconcile_route(&h, "r1").await.unwrap_err();
    assert!(
        matches!(&err, controlplane::Error::ListenerNotProgrammed { listener, .. } if listener == "http"),
        "{err:?}"
    );

    gateway_controller::reconcile(Arc::new(h.cluster.gateway("demo", "gw")), h.ctx.clone()).await?;
    reconcile_route(&h, "r1").await?;

    assert_eq!(rule_names(&h.lb.snapshot(LB_ID), "http"), vec!["demo-r1-0-0"]);
    let route = h.cluster.route("demo", "r1").unwrap();
    assert_eq!(parent_condition(&route, CONDITION_PROGRAMMED).status, "True");
    Ok(())
}
