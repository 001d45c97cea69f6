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

use gateway_api::apis::standard::httproutes::HTTPRoute;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use loadbalancer::models::{Backend, BackendDetails};
use tracing::{debug, info};

use crate::lb_model::LoadBalancerModel;
use crate::lb_routing::{backend_set_name, route_backends};
use crate::*;

/// An address traffic for a Service port is sent to.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Endpoint {
    pub ip_address: String,
    pub port: i32,
}

/// Ready endpoints of `service` for the Service port `port`.
///
/// The target port is taken from the slice port with the same name as the Service port, then
/// from a numeric `targetPort`, and finally defaults to the Service port itself.
pub fn resolve_backend_endpoints(
    service: &Service,
    port: i32,
    slices: &[EndpointSlice],
) -> BTreeSet<Endpoint> {
    let service_port = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .and_then(|ports| ports.iter().find(|p| p.port == port));
    let port_name = service_port.and_then(|p| p.name.as_deref()).unwrap_or_default();
    let numeric_target = service_port
        .and_then(|p| p.target_port.as_ref())
        .and_then(|target| match target {
            IntOrString::Int(n) => Some(*n),
            IntOrString::String(_) => None,
        });

    let mut endpoints = BTreeSet::new();
    for slice in slices {
        let target_port = slice
            .ports
            .iter()
            .flatten()
            .find(|p| p.name.as_deref().unwrap_or_default() == port_name)
            .and_then(|p| p.port)
            .or(numeric_target)
            .unwrap_or(port);
        for endpoint in &slice.endpoints {
            let ready = endpoint
                .conditions
                .as_ref()
                .and_then(|c| c.ready)
                .unwrap_or(true);
            if !ready {
                continue;
            }
            for address in &endpoint.addresses {
                endpoints.insert(Endpoint {
                    ip_address: address.clone(),
                    port: target_port,
                });
            }
        }
    }
    endpoints
}

impl LoadBalancerModel {
    /// Makes the backends of every backend set used by the route match the ready endpoints of
    /// its Service. Backend sets that are not programmed yet are skipped.
    pub async fn sync_route_endpoints(
        &self,
        lb_id: &str,
        route: &HTTPRoute,
        services: &BTreeMap<NamespacedName, Service>,
    ) -> Result<()> {
        let lb = self.get_load_balancer(lb_id).await?;
        for (service_key, port) in route_backends(route) {
            let name = backend_set_name(&service_key, port);
            let Some(backend_set) = lb.backend_sets.get(&name) else {
                debug!(backend_set = %name, "backend set not programmed yet");
                continue;
            };
            let Some(service) = services.get(&service_key) else {
                continue;
            };
            let slices = self
                .cluster
                .list_endpoint_slices(&service_key.namespace, &service_key.name)
                .await?;
            let desired = resolve_backend_endpoints(service, port, &slices);
            let current: BTreeMap<Endpoint, &Backend> = backend_set
                .backends
                .iter()
                .map(|b| {
                    (
                        Endpoint {
                            ip_address: b.ip_address.clone(),
                            port: b.port,
                        },
                        b,
                    )
                })
                .collect();

            for endpoint in desired.iter().filter(|e| !current.contains_key(*e)) {
                info!(backend_set = %name, ip = %endpoint.ip_address, port = endpoint.port, "adding backend");
                let details = BackendDetails {
                    ip_address: endpoint.ip_address.clone(),
                    port: endpoint.port,
                    weight: Some(1),
                };
                self.submit(
                    lb_id,
                    format!("create backend {}:{} in {name}", endpoint.ip_address, endpoint.port),
                    self.client.create_backend(lb_id, &name, &details).await,
                )
                .await?;
            }

            for (endpoint, backend) in current.iter().filter(|(e, _)| !desired.contains(*e)) {
                info!(backend_set = %name, ip = %endpoint.ip_address, port = endpoint.port, "removing backend");
                self.submit_delete(
                    lb_id,
                    format!("delete backend {} from {name}", backend.name),
                    self.client.delete_backend(lb_id, &name, &backend.name).await,
                )
                .await?;
            }
        }
        Ok(())
    }
}
