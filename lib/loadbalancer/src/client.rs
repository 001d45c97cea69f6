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

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::*;

/// Header carrying the id of the work request started by a mutation.
pub const WORK_REQUEST_ID_HEADER: &str = "opc-work-request-id";

/// Operations the controller needs from the managed load balancer API.
///
/// Every mutation is asynchronous on the load balancer side and returns the id of the work
/// request tracking it.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait LoadBalancerClient: Send + Sync {
    async fn get_load_balancer(&self, lb_id: &str) -> Result<LoadBalancer>;

    async fn get_routing_policy(&self, lb_id: &str, name: &str) -> Result<RoutingPolicy>;

    async fn create_backend_set(&self, lb_id: &str, details: &BackendSetDetails) -> Result<String>;

    async fn delete_backend_set(&self, lb_id: &str, name: &str) -> Result<String>;

    async fn create_backend(
        &self,
        lb_id: &str,
        backend_set_name: &str,
        details: &BackendDetails,
    ) -> Result<String>;

    async fn delete_backend(
        &self,
        lb_id: &str,
        backend_set_name: &str,
        backend_name: &str,
    ) -> Result<String>;

    async fn create_listener(&self, lb_id: &str, details: &ListenerDetails) -> Result<String>;

    async fn update_listener(&self, lb_id: &str, details: &ListenerDetails) -> Result<String>;

    async fn delete_listener(&self, lb_id: &str, name: &str) -> Result<String>;

    async fn create_routing_policy(
        &self,
        lb_id: &str,
        details: &RoutingPolicyDetails,
    ) -> Result<String>;

    async fn update_routing_policy(
        &self,
        lb_id: &str,
        details: &RoutingPolicyDetails,
    ) -> Result<String>;

    async fn delete_routing_policy(&self, lb_id: &str, name: &str) -> Result<String>;

    async fn create_certificate(&self, lb_id: &str, details: &CertificateDetails)
        -> Result<String>;

    async fn delete_certificate(&self, lb_id: &str, name: &str) -> Result<String>;

    async fn get_work_request(&self, work_request_id: &str) -> Result<WorkRequest>;
}

#[derive(Deserialize, Default)]
struct ApiErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// JSON over HTTPS client for the load balancer REST API.
#[derive(Clone)]
pub struct HttpLoadBalancerClient {
    http: reqwest::Client,
    endpoint: Url,
    token: Option<String>,
}

impl HttpLoadBalancerClient {
    pub fn new(endpoint: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| Error::InvalidEndpoint(e.to_string()))?;
        if endpoint.cannot_be_a_base() {
            return Err(Error::InvalidEndpoint(endpoint.to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::Transport)?;
        Ok(HttpLoadBalancerClient {
            http,
            endpoint,
            token,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidEndpoint(self.endpoint.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let body: ApiErrorBody = serde_json::from_str(&text).unwrap_or_else(|_| ApiErrorBody {
            code: status.canonical_reason().unwrap_or_default().to_string(),
            message: text,
        });
        Err(Error::api(status.as_u16(), body.code, body.message))
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = self.url(segments)?;
        debug!(%url, "GET");
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(Error::Transport)?;
        Self::check(response)
            .await?
            .json::<T>()
            .await
            .map_err(Error::Transport)
    }

    async fn mutate<B: Serialize + ?Sized>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
    ) -> Result<String> {
        let url = self.url(segments)?;
        debug!(%url, %method, "mutating load balancer");
        let operation = format!("{method} {url}");
        let mut builder = self.request(method, url);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder.send().await.map_err(Error::Transport)?;
        let response = Self::check(response).await?;
        response
            .headers()
            .get(WORK_REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(Error::MissingWorkRequestId(operation))
    }
}

#[async_trait]
impl LoadBalancerClient for HttpLoadBalancerClient {
    async fn get_load_balancer(&self, lb_id: &str) -> Result<LoadBalancer> {
        self.get(&["loadBalancers", lb_id]).await
    }

    async fn get_routing_policy(&self, lb_id: &str, name: &str) -> Result<RoutingPolicy> {
        self.get(&["loadBalancers", lb_id, "routingPolicies", name])
            .await
    }

    async fn create_backend_set(&self, lb_id: &str, details: &BackendSetDetails) -> Result<String> {
        self.mutate(
            Method::POST,
            &["loadBalancers", lb_id, "backendSets"],
            Some(details),
        )
        .await
    }

    async fn delete_backend_set(&self, lb_id: &str, name: &str) -> Result<String> {
        self.mutate::<()>(
            Method::DELETE,
            &["loadBalancers", lb_id, "backendSets", name],
            None,
        )
        .await
    }

    async fn create_backend(
        &self,
        lb_id: &str,
        backend_set_name: &str,
        details: &BackendDetails,
    ) -> Result<String> {
        self.mutate(
            Method::POST,
            &["loadBalancers", lb_id, "backendSets", backend_set_name, "backends"],
            Some(details),
        )
        .await
    }

    async fn delete_backend(
        &self,
        lb_id: &str,
        backend_set_name: &str,
        backend_name: &str,
    ) -> Result<String> {
        self.mutate::<()>(
            Method::DELETE,
            &[
                "loadBalancers",
                lb_id,
                "backendSets",
                backend_set_name,
                "backends",
                backend_name,
            ],
            None,
        )
        .await
    }

    async fn create_listener(&self, lb_id: &str, details: &ListenerDetails) -> Result<String> {
        self.mutate(
            Method::POST,
            &["loadBalancers", lb_id, "listeners"],
            Some(details),
        )
        .await
    }

    async fn update_listener(&self, lb_id: &str, details: &ListenerDetails) -> Result<String> {
        self.mutate(
            Method::PUT,
            &["loadBalancers", lb_id, "listeners", &details.name],
            Some(details),
        )
        .await
    }

    async fn delete_listener(&self, lb_id: &str, name: &str) -> Result<String> {
        self.mutate::<()>(
            Method::DELETE,
            &["loadBalancers", lb_id, "listeners", name],
            None,
        )
        .await
    }

    async fn create_routing_policy(
        &self,
        lb_id: &str,
        details: &RoutingPolicyDetails,
    ) -> Result<String> {
        self.mutate(
            Method::POST,
            &["loadBalancers", lb_id, "routingPolicies"],
            Some(details),
        )
        .await
    }

    async fn update_routing_policy(
        &self,
        lb_id: &str,
        details: &RoutingPolicyDetails,
    ) -> Result<String> {
        self.mutate(
            Method::PUT,
            &["loadBalancers", lb_id, "routingPolicies", &details.name],
            Some(details),
        )
        .await
    }

    async fn delete_routing_policy(&self, lb_id: &str, name: &str) -> Result<String> {
        self.mutate::<()>(
            Method::DELETE,
            &["loadBalancers", lb_id, "routingPolicies", name],
            None,
        )
        .await
    }

    async fn create_certificate(
        &self,
        lb_id: &str,
        details: &CertificateDetails,
    ) -> Result<String> {
        self.mutate(
            Method::POST,
            &["loadBalancers", lb_id, "certificates"],
            Some(details),
        )
        .await
    }

    async fn delete_certificate(&self, lb_id: &str, name: &str) -> Result<String> {
        self.mutate::<()>(
            Method::DELETE,
            &["loadBalancers", lb_id, "certificates", name],
            None,
        )
        .await
    }

    async fn get_work_request(&self, work_request_id: &str) -> Result<WorkRequest> {
        self.get(&["loadBalancerWorkRequests", work_request_id])
            .await
    }
}
