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

//! Mappers from related objects to the Gateways and HTTPRoutes that must be reconciled again
//! when they change.

use std::sync::Arc;

use gateway_api::apis::standard::{gateways::Gateway, httproutes::HTTPRoute};
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;

use crate::consts::SERVICE_NAME_LABEL;
use crate::crd::GatewayConfig;
use crate::gateway_utils::{gateway_listeners, parameters_ref};
use crate::httproute_model::parent_gateways;
use crate::lb_routing::route_backends;
use crate::NamespacedName;

pub fn gateways_for_secret(gateways: &[Arc<Gateway>], secret: &Secret) -> Vec<ObjectRef<Gateway>> {
    let key = NamespacedName::of(secret);
    gateways
        .iter()
        .filter(|gw| {
            let namespace = gw.namespace().unwrap_or_default();
            gateway_listeners(gw)
                .unwrap_or_default()
                .iter()
                .any(|l| l.certificate_refs(&namespace).contains(&key))
        })
        .map(|gw| ObjectRef::from_obj(gw.as_ref()))
        .collect()
}

pub fn gateways_for_config(
    gateways: &[Arc<Gateway>],
    config: &GatewayConfig,
) -> Vec<ObjectRef<Gateway>> {
    let key = NamespacedName::of(config);
    gateways
        .iter()
        .filter(|gw| {
            gw.namespace().unwrap_or_default() == key.namespace
                && parameters_ref(gw)
                    .ok()
                    .flatten()
                    .is_some_and(|params| params.name == key.name)
        })
        .map(|gw| ObjectRef::from_obj(gw.as_ref()))
        .collect()
}

pub fn routes_for_gateway(routes: &[Arc<HTTPRoute>], gateway: &Gateway) -> Vec<ObjectRef<HTTPRoute>> {
    let key = NamespacedName::of(gateway);
    routes
        .iter()
        .filter(|route| parent_gateways(route).contains(&key))
        .map(|route| ObjectRef::from_obj(route.as_ref()))
        .collect()
}

fn routes_for_service_key(
    routes: &[Arc<HTTPRoute>],
    service: &NamespacedName,
) -> Vec<ObjectRef<HTTPRoute>> {
    routes
        .iter()
        .filter(|route| route_backends(route).iter().any(|(svc, _)| svc == service))
        .map(|route| ObjectRef::from_obj(route.as_ref()))
        .collect()
}

pub fn routes_for_service(routes: &[Arc<HTTPRoute>], service: &Service) -> Vec<ObjectRef<HTTPRoute>> {
    routes_for_service_key(routes, &NamespacedName::of(service))
}

pub fn routes_for_endpoint_slice(
    routes: &[Arc<HTTPRoute>],
    slice: &EndpointSlice,
) -> Vec<ObjectRef<HTTPRoute>> {
    let Some(service_name) = slice.labels().get(SERVICE_NAME_LABEL) else {
        return vec![];
    };
    let service = NamespacedName::new(slice.namespace().unwrap_or_default(), service_name.as_str());
    routes_for_service_key(routes, &service)
}
