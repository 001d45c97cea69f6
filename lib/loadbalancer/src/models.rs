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

//! Wire models of the managed load balancer API.
//!
//! Listeners, backend sets, routing policies and certificates are addressed by name and
//! returned by the API as maps keyed by that name.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The only routing condition language the load balancer understands.
pub const CONDITION_LANGUAGE_V1: &str = "V1";

/// Load balancing policy used for every backend set this project creates.
pub const POLICY_ROUND_ROBIN: &str = "ROUND_ROBIN";

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancer {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub listeners: BTreeMap<String, Listener>,
    #[serde(default)]
    pub backend_sets: BTreeMap<String, BackendSet>,
    #[serde(default)]
    pub routing_policies: BTreeMap<String, RoutingPolicy>,
    #[serde(default)]
    pub certificates: BTreeMap<String, Certificate>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    pub name: String,
    pub default_backend_set_name: String,
    pub port: i32,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_policy_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_configuration: Option<SslConfiguration>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SslConfiguration {
    #[serde(default)]
    pub certificate_names: Vec<String>,
    #[serde(default)]
    pub verify_peer_certificate: bool,
}

/// Desired state of a listener, used for both create and update calls.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListenerDetails {
    pub name: String,
    pub default_backend_set_name: String,
    pub port: i32,
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing_policy_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_configuration: Option<SslConfiguration>,
}

impl From<&Listener> for ListenerDetails {
    fn from(listener: &Listener) -> Self {
        ListenerDetails {
            name: listener.name.clone(),
            default_backend_set_name: listener.default_backend_set_name.clone(),
            port: listener.port,
            protocol: listener.protocol.clone(),
            routing_policy_name: listener.routing_policy_name.clone(),
            ssl_configuration: listener.ssl_configuration.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthChecker {
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    /// Backends are named `<ip>:<port>` by the load balancer.
    pub name: String,
    pub ip_address: String,
    pub port: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
}

impl Backend {
    pub fn backend_name(ip_address: &str, port: i32) -> String {
        format!("{ip_address}:{port}")
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackendDetails {
    pub ip_address: String,
    pub port: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackendSet {
    pub name: String,
    pub policy: String,
    pub health_checker: HealthChecker,
    #[serde(default)]
    pub backends: Vec<Backend>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackendSetDetails {
    pub name: String,
    pub policy: String,
    pub health_checker: HealthChecker,
    #[serde(default)]
    pub backends: Vec<BackendDetails>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "name", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    #[serde(rename_all = "camelCase")]
    ForwardToBackendSet { backend_set_name: String },
}

impl Action {
    pub fn backend_set_name(&self) -> &str {
        match self {
            Action::ForwardToBackendSet { backend_set_name } => backend_set_name,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRule {
    pub name: String,
    pub condition: String,
    #[serde(default)]
    pub actions: Vec<Action>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoutingPolicy {
    pub name: String,
    pub condition_language_version: String,
    #[serde(default)]
    pub rules: Vec<RoutingRule>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoutingPolicyDetails {
    pub name: String,
    pub condition_language_version: String,
    #[serde(default)]
    pub rules: Vec<RoutingRule>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub certificate_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_certificate: Option<String>,
}

/// Certificate upload payload. The private key is kept out of `Debug` output.
#[derive(Serialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateDetails {
    pub certificate_name: String,
    pub public_certificate: String,
    pub private_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_certificate: Option<String>,
}

impl fmt::Debug for CertificateDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateDetails")
            .field("certificate_name", &self.certificate_name)
            .field("public_certificate", &self.public_certificate)
            .field("private_key", &"<redacted>")
            .field("ca_certificate", &self.ca_certificate)
            .finish()
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkRequestState {
    Accepted,
    InProgress,
    Succeeded,
    Failed,
    Canceling,
    Canceled,
}

impl fmt::Display for WorkRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkRequestState::Accepted => "ACCEPTED",
            WorkRequestState::InProgress => "IN_PROGRESS",
            WorkRequestState::Succeeded => "SUCCEEDED",
            WorkRequestState::Failed => "FAILED",
            WorkRequestState::Canceling => "CANCELING",
            WorkRequestState::Canceled => "CANCELED",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkRequestError {
    #[serde(default)]
    pub error_code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkRequest {
    pub id: String,
    #[serde(default)]
    pub load_balancer_id: String,
    #[serde(default, rename = "type")]
    pub type_: String,
    pub lifecycle_state: WorkRequestState,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error_details: Vec<WorkRequestError>,
}
