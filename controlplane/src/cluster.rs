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

use std::fmt::Debug;

use async_trait::async_trait;
use gateway_api::apis::standard::{
    gatewayclasses::GatewayClass, gateways::Gateway, httproutes::HTTPRoute,
};
use k8s_openapi::api::core::v1::{Namespace, Secret, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::{
    api::{Api, ListParams, Patch, PatchParams, PostParams},
    Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;

use crate::consts::{LBGATE_FIELD_MANAGER, SERVICE_NAME_LABEL};
use crate::crd::GatewayConfig;
use crate::{Error, Result};

/// Cluster reads and writes performed by the models.
///
/// Lookups return `None` when the object does not exist. Status writes go through the status
/// sub-resource, metadata writes (annotations and finalizers) through a regular update.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_gateway_class(&self, name: &str) -> Result<Option<GatewayClass>>;

    async fn get_gateway(&self, namespace: &str, name: &str) -> Result<Option<Gateway>>;

    async fn get_gateway_config(&self, namespace: &str, name: &str)
        -> Result<Option<GatewayConfig>>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;

    async fn get_http_route(&self, namespace: &str, name: &str) -> Result<Option<HTTPRoute>>;

    async fn list_http_routes(&self) -> Result<Vec<HTTPRoute>>;

    /// EndpointSlices labelled as belonging to the given Service.
    async fn list_endpoint_slices(
        &self,
        namespace: &str,
        service_name: &str,
    ) -> Result<Vec<EndpointSlice>>;

    async fn update_gateway_class_status(&self, gateway_class: &GatewayClass)
        -> Result<GatewayClass>;

    async fn update_gateway_class_metadata(
        &self,
        gateway_class: &GatewayClass,
    ) -> Result<GatewayClass>;

    async fn update_gateway_status(&self, gateway: &Gateway) -> Result<Gateway>;

    async fn update_gateway_metadata(&self, gateway: &Gateway) -> Result<Gateway>;

    async fn update_http_route_status(&self, route: &HTTPRoute) -> Result<HTTPRoute>;

    async fn update_http_route_metadata(&self, route: &HTTPRoute) -> Result<HTTPRoute>;
}

/// [`ClusterClient`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        KubeClusterClient { client }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

async fn get_opt<K>(api: &Api<K>, name: &str) -> Result<Option<K>>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    api.get_opt(name).await.map_err(Error::KubeError)
}

async fn apply_status<K>(api: &Api<K>, obj: &K, status: serde_json::Value) -> Result<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug,
{
    let patch = Patch::Apply(json!({
        "apiVersion": K::api_version(&()),
        "kind": K::kind(&()),
        "status": status,
    }));
    let params = PatchParams::apply(LBGATE_FIELD_MANAGER).force();
    api.patch_status(&obj.name_any(), &params, &patch)
        .await
        .map_err(Error::KubeError)
}

async fn replace<K>(api: &Api<K>, obj: &K) -> Result<K>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    api.replace(&obj.name_any(), &PostParams::default(), obj)
        .await
        .map_err(Error::KubeError)
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_gateway_class(&self, name: &str) -> Result<Option<GatewayClass>> {
        get_opt(&Api::<GatewayClass>::all(self.client.clone()), name).await
    }

    async fn get_gateway(&self, namespace: &str, name: &str) -> Result<Option<Gateway>> {
        get_opt(&self.namespaced::<Gateway>(namespace), name).await
    }

    async fn get_gateway_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<GatewayConfig>> {
        get_opt(&self.namespaced::<GatewayConfig>(namespace), name).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        get_opt(&self.namespaced::<Secret>(namespace), name).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        get_opt(&self.namespaced::<Service>(namespace), name).await
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        get_opt(&Api::<Namespace>::all(self.client.clone()), name).await
    }

    async fn get_http_route(&self, namespace: &str, name: &str) -> Result<Option<HTTPRoute>> {
        get_opt(&self.namespaced::<HTTPRoute>(namespace), name).await
    }

    async fn list_http_routes(&self) -> Result<Vec<HTTPRoute>> {
        let routes = Api::<HTTPRoute>::all(self.client.clone())
            .list(&ListParams::default())
            .await
            .map_err(Error::KubeError)?;
        Ok(routes.items)
    }

    async fn list_endpoint_slices(
        &self,
        namespace: &str,
        service_name: &str,
    ) -> Result<Vec<EndpointSlice>> {
        let slices = self
            .namespaced::<EndpointSlice>(namespace)
            .list(&ListParams::default().labels(&format!("{SERVICE_NAME_LABEL}={service_name}")))
            .await
            .map_err(Error::KubeError)?;
        Ok(slices.items)
    }

    async fn update_gateway_class_status(
        &self,
        gateway_class: &GatewayClass,
    ) -> Result<GatewayClass> {
        let status = serde_json::to_value(gateway_class.status.clone().unwrap_or_default())?;
        apply_status(
            &Api::<GatewayClass>::all(self.client.clone()),
            gateway_class,
            status,
        )
        .await
    }

    async fn update_gateway_class_metadata(
        &self,
        gateway_class: &GatewayClass,
    ) -> Result<GatewayClass> {
        replace(&Api::<GatewayClass>::all(self.client.clone()), gateway_class).await
    }

    async fn update_gateway_status(&self, gateway: &Gateway) -> Result<Gateway> {
        let api = self.namespaced::<Gateway>(&gateway.namespace().unwrap_or_default());
        let status = serde_json::to_value(gateway.status.clone().unwrap_or_default())?;
        apply_status(&api, gateway, status).await
    }

    async fn update_gateway_metadata(&self, gateway: &Gateway) -> Result<Gateway> {
        let api = self.namespaced::<Gateway>(&gateway.namespace().unwrap_or_default());
        replace(&api, gateway).await
    }

    async fn update_http_route_status(&self, route: &HTTPRoute) -> Result<HTTPRoute> {
        let api = self.namespaced::<HTTPRoute>(&route.namespace().unwrap_or_default());
        let status = serde_json::to_value(&route.status)?;
        apply_status(&api, route, status).await
    }

    async fn update_http_route_metadata(&self, route: &HTTPRoute) -> Result<HTTPRoute> {
        let api = self.namespaced::<HTTPRoute>(&route.namespace().unwrap_or_default());
        replace(&api, route).await
    }
}
