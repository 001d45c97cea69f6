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

//! In-memory cluster and load balancer used by the reconcile tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use controlplane::cluster::ClusterClient;
use controlplane::consts::{GATEWAY_CLASS_CONTROLLER_NAME, SERVICE_NAME_LABEL};
use controlplane::crd::GatewayConfig;
use controlplane::{Context, NamespacedName, Result, Settings};
use gateway_api::apis::standard::{
    gatewayclasses::GatewayClass, gateways::Gateway, httproutes::HTTPRoute,
};
use k8s_openapi::api::core::v1::{Namespace, Secret, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Resource, ResourceExt};
use loadbalancer::models::*;
use loadbalancer::LoadBalancerClient;
use serde_json::json;
use tokio_util::sync::CancellationToken;

pub const GATEWAY_UID: &str = "0f3c9a7e-5b1d-4c2a-9e8f-123456789abc";
pub const DEFAULT_BACKEND_SET: &str = "default-0f3c9a7e";
pub const LB_ID: &str = "lb-1";

type Key = (String, String);

fn key_of<K: Resource>(obj: &K) -> Key {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

#[derive(Default)]
struct ClusterState {
    revision: u64,
    gateway_classes: BTreeMap<String, GatewayClass>,
    gateways: BTreeMap<Key, Gateway>,
    configs: BTreeMap<Key, GatewayConfig>,
    secrets: BTreeMap<Key, Secret>,
    services: BTreeMap<Key, Service>,
    namespaces: BTreeMap<String, Namespace>,
    routes: BTreeMap<Key, HTTPRoute>,
    slices: Vec<EndpointSlice>,
    status_writes: usize,
}

impl ClusterState {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        format!("r{}", self.revision)
    }
}

fn not_found(kind: &str, name: &str) -> controlplane::Error {
    controlplane::Error::InvalidConfigError(format!("{kind} {name} not found"))
}

/// Object store standing in for the API server. Status writes only replace the status, metadata
/// writes only replace labels, annotations and finalizers, like the real sub-resources do.
#[derive(Default, Clone)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut ClusterState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn put_gateway_class(&self, gateway_class: GatewayClass) {
        self.with(|s| {
            s.gateway_classes
                .insert(gateway_class.name_any(), gateway_class);
        });
    }

    pub fn put_gateway(&self, gateway: Gateway) {
        self.with(|s| {
            s.gateways.insert(key_of(&gateway), gateway);
        });
    }

    pub fn put_config(&self, config: GatewayConfig) {
        self.with(|s| {
            s.configs.insert(key_of(&config), config);
        });
    }

    pub fn put_secret(&self, secret: Secret) {
        self.with(|s| {
            s.secrets.insert(key_of(&secret), secret);
        });
    }

    pub fn put_service(&self, service: Service) {
        self.with(|s| {
            s.services.insert(key_of(&service), service);
        });
    }

    pub fn put_route(&self, route: HTTPRoute) {
        self.with(|s| {
            s.routes.insert(key_of(&route), route);
        });
    }

    pub fn put_endpoint_slice(&self, slice: EndpointSlice) {
        self.with(|s| {
            s.slices.retain(|other| key_of(other) != key_of(&slice));
            s.slices.push(slice);
        });
    }

    /// Marks the route as deleted. Without finalizers it is removed right away.
    pub fn delete_route(&self, namespace: &str, name: &str) {
        self.with(|s| {
            let key = (namespace.to_string(), name.to_string());
            let Some(route) = s.routes.get_mut(&key) else {
                return;
            };
            if route.finalizers().is_empty() {
                s.routes.remove(&key);
            } else {
                route.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
            }
        });
    }

    pub fn gateway(&self, namespace: &str, name: &str) -> Gateway {
        self.with(|s| s.gateways[&(namespace.to_string(), name.to_string())].clone())
    }

    pub fn gateway_class(&self, name: &str) -> GatewayClass {
        self.with(|s| s.gateway_classes[name].clone())
    }

    pub fn route(&self, namespace: &str, name: &str) -> Option<HTTPRoute> {
        self.with(|s| {
            s.routes
                .get(&(namespace.to_string(), name.to_string()))
                .cloned()
        })
    }

    pub fn status_writes(&self) -> usize {
        self.with(|s| s.status_writes)
    }
}

fn write_metadata<K: Resource + Clone>(stored: &mut K, from: &K, revision: String) -> K {
    let meta = stored.meta_mut();
    meta.labels.clone_from(&from.meta().labels);
    meta.annotations.clone_from(&from.meta().annotations);
    meta.finalizers.clone_from(&from.meta().finalizers);
    meta.resource_version = Some(revision);
    stored.clone()
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_gateway_class(&self, name: &str) -> Result<Option<GatewayClass>> {
        Ok(self.with(|s| s.gateway_classes.get(name).cloned()))
    }

    async fn get_gateway(&self, namespace: &str, name: &str) -> Result<Option<Gateway>> {
        Ok(self.with(|s| {
            s.gateways
                .get(&(namespace.to_string(), name.to_string()))
                .cloned()
        }))
    }

    async fn get_gateway_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<GatewayConfig>> {
        Ok(self.with(|s| {
            s.configs
                .get(&(namespace.to_string(), name.to_string()))
                .cloned()
        }))
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.with(|s| {
            s.secrets
                .get(&(namespace.to_string(), name.to_string()))
                .cloned()
        }))
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        Ok(self.with(|s| {
            s.services
                .get(&(namespace.to_string(), name.to_string()))
                .cloned()
        }))
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        Ok(self.with(|s| s.namespaces.get(name).cloned()))
    }

    async fn get_http_route(&self, namespace: &str, name: &str) -> Result<Option<HTTPRoute>> {
        Ok(self.route(namespace, name))
    }

    async fn list_http_routes(&self) -> Result<Vec<HTTPRoute>> {
        Ok(self.with(|s| s.routes.values().cloned().collect()))
    }

    async fn list_endpoint_slices(
        &self,
        namespace: &str,
        service_name: &str,
    ) -> Result<Vec<EndpointSlice>> {
        Ok(self.with(|s| {
            s.slices
                .iter()
                .filter(|slice| {
                    slice.namespace().as_deref() == Some(namespace)
                        && slice.labels().get(SERVICE_NAME_LABEL).map(String::as_str)
                            == Some(service_name)
                })
                .cloned()
                .collect()
        }))
    }

    async fn update_gateway_class_status(
        &self,
        gateway_class: &GatewayClass,
    ) -> Result<GatewayClass> {
        self.with(|s| {
            let revision = s.next_revision();
            s.status_writes += 1;
            let name = gateway_class.name_any();
            let stored = s
                .gateway_classes
                .get_mut(&name)
                .ok_or_else(|| not_found("GatewayClass", &name))?;
            stored.status.clone_from(&gateway_class.status);
            stored.metadata.resource_version = Some(revision);
            Ok(stored.clone())
        })
    }

    async fn update_gateway_class_metadata(
        &self,
        gateway_class: &GatewayClass,
    ) -> Result<GatewayClass> {
        self.with(|s| {
            let revision = s.next_revision();
            let name = gateway_class.name_any();
            let stored = s
                .gateway_classes
                .get_mut(&name)
                .ok_or_else(|| not_found("GatewayClass", &name))?;
            Ok(write_metadata(stored, gateway_class, revision))
        })
    }

    async fn update_gateway_status(&self, gateway: &Gateway) -> Result<Gateway> {
        self.with(|s| {
            let revision = s.next_revision();
            s.status_writes += 1;
            let key = key_of(gateway);
            let stored = s
                .gateways
                .get_mut(&key)
                .ok_or_else(|| not_found("Gateway", &key.1))?;
            stored.status.clone_from(&gateway.status);
            stored.metadata.resource_version = Some(revision);
            Ok(stored.clone())
        })
    }

    async fn update_gateway_metadata(&self, gateway: &Gateway) -> Result<Gateway> {
        self.with(|s| {
            let revision = s.next_revision();
            let key = key_of(gateway);
            let stored = s
                .gateways
                .get_mut(&key)
                .ok_or_else(|| not_found("Gateway", &key.1))?;
            Ok(write_metadata(stored, gateway, revision))
        })
    }

    async fn update_http_route_status(&self, route: &HTTPRoute) -> Result<HTTPRoute> {
        self.with(|s| {
            let revision = s.next_revision();
            s.status_writes += 1;
            let key = key_of(route);
            let stored = s
                .routes
                .get_mut(&key)
                .ok_or_else(|| not_found("HTTPRoute", &key.1))?;
            stored.status.clone_from(&route.status);
            stored.metadata.resource_version = Some(revision);
            Ok(stored.clone())
        })
    }

    async fn update_http_route_metadata(&self, route: &HTTPRoute) -> Result<HTTPRoute> {
        self.with(|s| {
            let revision = s.next_revision();
            let key = key_of(route);
            let stored = s
                .routes
                .get_mut(&key)
                .ok_or_else(|| not_found("HTTPRoute", &key.1))?;
            let updated = write_metadata(stored, route, revision);
            if updated.metadata.deletion_timestamp.is_some() && updated.finalizers().is_empty() {
                s.routes.remove(&key);
            }
            Ok(updated)
        })
    }
}

#[derive(Default)]
struct LoadBalancerState {
    balancers: BTreeMap<String, LoadBalancer>,
    calls: Vec<String>,
    failures: BTreeMap<String, u16>,
    work_requests: u64,
}

/// Load balancer that applies every change immediately and reports its work requests as
/// succeeded. Calls are recorded as `<operation> <name>`.
#[derive(Default, Clone)]
pub struct FakeLoadBalancer {
    state: Arc<Mutex<LoadBalancerState>>,
}

fn api_error(status: u16, message: impl Into<String>) -> loadbalancer::Error {
    let code = match status {
        404 => "NotAuthorizedOrNotFound",
        409 => "Conflict",
        _ => "InvalidParameter",
    };
    loadbalancer::Error::api(status, code, message)
}

impl FakeLoadBalancer {
    pub fn with_load_balancer(lb_id: &str) -> Self {
        let fake = Self::default();
        fake.add_load_balancer(lb_id);
        fake
    }

    pub fn add_load_balancer(&self, lb_id: &str) {
        self.state.lock().unwrap().balancers.insert(
            lb_id.to_string(),
            LoadBalancer {
                id: lb_id.to_string(),
                ..Default::default()
            },
        );
    }

    pub fn snapshot(&self, lb_id: &str) -> LoadBalancer {
        self.state.lock().unwrap().balancers[lb_id].clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Makes the next call recorded as `call` fail with `status`.
    pub fn fail_next(&self, call: &str, status: u16) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(call.to_string(), status);
    }

    fn mutate(
        &self,
        lb_id: &str,
        call: String,
        f: impl FnOnce(&mut LoadBalancer) -> loadbalancer::Result<()>,
    ) -> loadbalancer::Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call.clone());
        if let Some(status) = state.failures.remove(&call) {
            return Err(api_error(status, format!("{call} failed")));
        }
        let lb = state
            .balancers
            .get_mut(lb_id)
            .ok_or_else(|| api_error(404, format!("load balancer {lb_id} not found")))?;
        f(lb)?;
        state.work_requests += 1;
        Ok(format!("wr-{}", state.work_requests))
    }
}

#[async_trait]
impl LoadBalancerClient for FakeLoadBalancer {
    async fn get_load_balancer(&self, lb_id: &str) -> loadbalancer::Result<LoadBalancer> {
        let mut state = self.state.lock().unwrap();
        let call = format!("get_load_balancer {lb_id}");
        state.calls.push(call.clone());
        if let Some(status) = state.failures.remove(&call) {
            return Err(api_error(status, format!("{call} failed")));
        }
        state
            .balancers
            .get(lb_id)
            .cloned()
            .ok_or_else(|| api_error(404, format!("load balancer {lb_id} not found")))
    }

    async fn get_routing_policy(
        &self,
        lb_id: &str,
        name: &str,
    ) -> loadbalancer::Result<RoutingPolicy> {
        let state = self.state.lock().unwrap();
        state
            .balancers
            .get(lb_id)
            .and_then(|lb| lb.routing_policies.get(name))
            .cloned()
            .ok_or_else(|| api_error(404, format!("routing policy {name} not found")))
    }

    async fn create_backend_set(
        &self,
        lb_id: &str,
        details: &BackendSetDetails,
    ) -> loadbalancer::Result<String> {
        self.mutate(lb_id, format!("create_backend_set {}", details.name), |lb| {
            if lb.backend_sets.contains_key(&details.name) {
                return Err(api_error(400, "backend set exists"));
            }
            lb.backend_sets.insert(
                details.name.clone(),
                BackendSet {
                    name: details.name.clone(),
                    policy: details.policy.clone(),
                    health_checker: details.health_checker.clone(),
                    backends: details
                        .backends
                        .iter()
                        .map(|b| Backend {
                            name: Backend::backend_name(&b.ip_address, b.port),
                            ip_address: b.ip_address.clone(),
                            port: b.port,
                            weight: b.weight,
                        })
                        .collect(),
                },
            );
            Ok(())
        })
    }

    async fn delete_backend_set(&self, lb_id: &str, name: &str) -> loadbalancer::Result<String> {
        self.mutate(lb_id, format!("delete_backend_set {name}"), |lb| {
            let in_use = lb
                .listeners
                .values()
                .any(|l| l.default_backend_set_name == name)
                || lb
                    .routing_policies
                    .values()
                    .flat_map(|p| p.rules.iter())
                    .flat_map(|r| r.actions.iter())
                    .any(|a| a.backend_set_name() == name);
            if in_use {
                return Err(api_error(400, format!("backend set {name} is in use")));
            }
            lb.backend_sets
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| api_error(404, format!("backend set {name} not found")))
        })
    }

    async fn create_backend(
        &self,
        lb_id: &str,
        backend_set_name: &str,
        details: &BackendDetails,
    ) -> loadbalancer::Result<String> {
        let name = Backend::backend_name(&details.ip_address, details.port);
        self.mutate(lb_id, format!("create_backend {backend_set_name} {name}"), |lb| {
            let set = lb
                .backend_sets
                .get_mut(backend_set_name)
                .ok_or_else(|| api_error(404, format!("backend set {backend_set_name} not found")))?;
            set.backends.push(Backend {
                name: name.clone(),
                ip_address: details.ip_address.clone(),
                port: details.port,
                weight: details.weight,
            });
            Ok(())
        })
    }

    async fn delete_backend(
        &self,
        lb_id: &str,
        backend_set_name: &str,
        backend_name: &str,
    ) -> loadbalancer::Result<String> {
        self.mutate(
            lb_id,
            format!("delete_backend {backend_set_name} {backend_name}"),
            |lb| {
                let set = lb.backend_sets.get_mut(backend_set_name).ok_or_else(|| {
                    api_error(404, format!("backend set {backend_set_name} not found"))
                })?;
                let before = set.backends.len();
                set.backends.retain(|b| b.name != backend_name);
                if set.backends.len() == before {
                    return Err(api_error(404, format!("backend {backend_name} not found")));
                }
                Ok(())
            },
        )
    }

    async fn create_listener(
        &self,
        lb_id: &str,
        details: &ListenerDetails,
    ) -> loadbalancer::Result<String> {
        self.mutate(lb_id, format!("create_listener {}", details.name), |lb| {
            if lb.listeners.contains_key(&details.name) {
                return Err(api_error(400, "listener exists"));
            }
            lb.listeners.insert(details.name.clone(), listener_of(details));
            Ok(())
        })
    }

    async fn update_listener(
        &self,
        lb_id: &str,
        details: &ListenerDetails,
    ) -> loadbalancer::Result<String> {
        self.mutate(lb_id, format!("update_listener {}", details.name), |lb| {
            let listener = lb
                .listeners
                .get_mut(&details.name)
                .ok_or_else(|| api_error(404, format!("listener {} not found", details.name)))?;
            *listener = listener_of(details);
            Ok(())
        })
    }

    async fn delete_listener(&self, lb_id: &str, name: &str) -> loadbalancer::Result<String> {
        self.mutate(lb_id, format!("delete_listener {name}"), |lb| {
            lb.listeners
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| api_error(404, format!("listener {name} not found")))
        })
    }

    async fn create_routing_policy(
        &self,
        lb_id: &str,
        details: &RoutingPolicyDetails,
    ) -> loadbalancer::Result<String> {
        self.mutate(lb_id, format!("create_routing_policy {}", details.name), |lb| {
            lb.routing_policies
                .insert(details.name.clone(), policy_of(details));
            Ok(())
        })
    }

    async fn update_routing_policy(
        &self,
        lb_id: &str,
        details: &RoutingPolicyDetails,
    ) -> loadbalancer::Result<String> {
        self.mutate(lb_id, format!("update_routing_policy {}", details.name), |lb| {
            let policy = lb
                .routing_policies
                .get_mut(&details.name)
                .ok_or_else(|| api_error(404, format!("routing policy {} not found", details.name)))?;
            *policy = policy_of(details);
            Ok(())
        })
    }

    async fn delete_routing_policy(&self, lb_id: &str, name: &str) -> loadbalancer::Result<String> {
        self.mutate(lb_id, format!("delete_routing_policy {name}"), |lb| {
            lb.routing_policies
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| api_error(404, format!("routing policy {name} not found")))
        })
    }

    async fn create_certificate(
        &self,
        lb_id: &str,
        details: &CertificateDetails,
    ) -> loadbalancer::Result<String> {
        self.mutate(
            lb_id,
            format!("create_certificate {}", details.certificate_name),
            |lb| {
                lb.certificates.insert(
                    details.certificate_name.clone(),
                    Certificate {
                        certificate_name: details.certificate_name.clone(),
                        public_certificate: Some(details.public_certificate.clone()),
                        ca_certificate: details.ca_certificate.clone(),
                    },
                );
                Ok(())
            },
        )
    }

    async fn delete_certificate(&self, lb_id: &str, name: &str) -> loadbalancer::Result<String> {
        self.mutate(lb_id, format!("delete_certificate {name}"), |lb| {
            lb.certificates
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| api_error(404, format!("certificate {name} not found")))
        })
    }

    async fn get_work_request(&self, work_request_id: &str) -> loadbalancer::Result<WorkRequest> {
        Ok(WorkRequest {
            id: work_request_id.to_string(),
            load_balancer_id: String::new(),
            type_: String::new(),
            lifecycle_state: WorkRequestState::Succeeded,
            message: String::new(),
            error_details: vec![],
        })
    }
}

fn listener_of(details: &ListenerDetails) -> Listener {
    Listener {
        name: details.name.clone(),
        default_backend_set_name: details.default_backend_set_name.clone(),
        port: details.port,
        protocol: details.protocol.clone(),
        routing_policy_name: details.routing_policy_name.clone(),
        ssl_configuration: details.ssl_configuration.clone(),
    }
}

fn policy_of(details: &RoutingPolicyDetails) -> RoutingPolicy {
    RoutingPolicy {
        name: details.name.clone(),
        condition_language_version: details.condition_language_version.clone(),
        rules: details.rules.clone(),
    }
}

pub fn test_settings() -> Settings {
    Settings {
        work_request_poll_interval: Duration::from_millis(10),
        work_request_timeout: Duration::from_secs(5),
        resync_interval: Duration::from_secs(300),
        max_error_requeue: Duration::from_secs(10),
    }
}

pub struct Harness {
    pub cluster: FakeCluster,
    pub lb: FakeLoadBalancer,
    pub ctx: Arc<Context>,
}

impl Harness {
    /// A cluster holding our GatewayClass `lbgate`, parameters `demo/p` pointing at `lb-1` and an
    /// empty load balancer `lb-1`.
    pub fn new() -> Self {
        let cluster = FakeCluster::new();
        let lb = FakeLoadBalancer::with_load_balancer(LB_ID);
        cluster.put_gateway_class(gateway_class("lbgate", GATEWAY_CLASS_CONTROLLER_NAME));
        cluster.put_config(gateway_config("demo", "p", LB_ID));
        let ctx = Arc::new(Context::new(
            Arc::new(cluster.clone()),
            Arc::new(lb.clone()),
            test_settings(),
            CancellationToken::new(),
        ));
        Harness { cluster, lb, ctx }
    }

    pub fn gateway_key(&self) -> NamespacedName {
        NamespacedName::new("demo", "gw")
    }
}

pub fn gateway_class(name: &str, controller: &str) -> GatewayClass {
    serde_json::from_value(json!({
        "apiVersion": "gateway.networking.k8s.io/v1",
        "kind": "GatewayClass",
        "metadata": {"name": name, "generation": 1, "resourceVersion": "1"},
        "spec": {"controllerName": controller}
    }))
    .unwrap()
}

pub fn gateway_config(namespace: &str, name: &str, lb_id: &str) -> GatewayConfig {
    serde_json::from_value(json!({
        "apiVersion": "lbgate.gateway.networking.k8s.io/v1alpha1",
        "kind": "GatewayConfig",
        "metadata": {"name": name, "namespace": namespace},
        "spec": {"loadBalancerId": lb_id}
    }))
    .unwrap()
}

/// Gateway `demo/gw` of class `lbgate`, with `spec.infrastructure` only when `params` is set.
pub fn gateway(params: Option<&str>, listeners: serde_json::Value) -> Gateway {
    let mut spec = json!({
        "gatewayClassName": "lbgate",
        "listeners": listeners,
    });
    if let Some(params) = params {
        spec["infrastructure"] = json!({"parametersRef": {
            "group": "lbgate.gateway.networking.k8s.io",
            "kind": "GatewayConfig",
            "name": params
        }});
    }
    serde_json::from_value(json!({
        "apiVersion": "gateway.networking.k8s.io/v1",
        "kind": "Gateway",
        "metadata": {
            "name": "gw",
            "namespace": "demo",
            "uid": GATEWAY_UID,
            "generation": 1,
            "resourceVersion": "1"
        },
        "spec": spec
    }))
    .unwrap()
}

pub fn http_listener() -> serde_json::Value {
    json!([{"name": "http", "port": 80, "protocol": "HTTP"}])
}

pub fn tls_secret(name: &str, resource_version: &str) -> Secret {
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {"name": name, "namespace": "demo", "resourceVersion": resource_version},
        "type": "kubernetes.io/tls",
        "stringData": {
            "tls.crt": format!("CERT {resource_version}"),
            "tls.key": format!("KEY {resource_version}")
        }
    }))
    .unwrap()
}

pub fn route(name: &str, rules: serde_json::Value) -> HTTPRoute {
    serde_json::from_value(json!({
        "apiVersion": "gateway.networking.k8s.io/v1",
        "kind": "HTTPRoute",
        "metadata": {
            "name": name,
            "namespace": "demo",
            "generation": 1,
            "resourceVersion": "1",
            "creationTimestamp": "2024-01-01T00:00:00Z"
        },
        "spec": {
            "parentRefs": [{"name": "gw"}],
            "rules": rules
        }
    }))
    .unwrap()
}

pub fn service(name: &str, resource_version: &str) -> Service {
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {"name": name, "namespace": "demo", "resourceVersion": resource_version},
        "spec": {"ports": [{"name": "http", "port": 8080, "targetPort": 9000}]}
    }))
    .unwrap()
}

pub fn endpoint_slice(service: &str, addresses: &[&str]) -> EndpointSlice {
    let endpoints: Vec<serde_json::Value> = addresses
        .iter()
        .map(|address| json!({"addresses": [address], "conditions": {"ready": true}}))
        .collect();
    serde_json::from_value(json!({
        "apiVersion": "discovery.k8s.io/v1",
        "kind": "EndpointSlice",
        "metadata": {
            "name": format!("{service}-abc12"),
            "namespace": "demo",
            "labels": {"kubernetes.io/service-name": service}
        },
        "addressType": "IPv4",
        "ports": [{"name": "http", "port": 9000, "protocol": "TCP"}],
        "endpoints": endpoints
    }))
    .unwrap()
}
