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

use gateway_api::apis::standard::gateways::Gateway;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};

use crate::consts::{
    PROGRAMMED_LOAD_BALANCERS_ANNOTATION, PROGRAMMED_RULES_ANNOTATION, USED_SECRETS_ANNOTATION,
    USED_SERVICES_ANNOTATION,
};
use crate::*;

pub const PROTOCOL_HTTP: &str = "HTTP";
pub const PROTOCOL_HTTPS: &str = "HTTPS";

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretObjectReference {
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListenerTls {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub certificate_refs: Option<Vec<SecretObjectReference>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RouteGroupKind {
    #[serde(default)]
    pub group: Option<String>,
    pub kind: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteNamespaces {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub selector: Option<LabelSelector>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AllowedRoutes {
    #[serde(default)]
    pub namespaces: Option<RouteNamespaces>,
    #[serde(default)]
    pub kinds: Option<Vec<RouteGroupKind>>,
}

/// A Gateway listener as declared in the Gateway spec.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListenerSpec {
    pub name: String,
    #[serde(default)]
    pub hostname: Option<String>,
    pub port: i32,
    pub protocol: String,
    #[serde(default)]
    pub tls: Option<ListenerTls>,
    #[serde(default)]
    pub allowed_routes: Option<AllowedRoutes>,
}

impl ListenerSpec {
    pub fn is_http(&self) -> bool {
        self.protocol == PROTOCOL_HTTP || self.protocol == PROTOCOL_HTTPS
    }

    /// Secrets referenced by the TLS block; the namespace defaults to the Gateway's.
    pub fn certificate_refs(&self, gateway_namespace: &str) -> Vec<NamespacedName> {
        self.tls
            .iter()
            .flat_map(|tls| tls.certificate_refs.iter().flatten())
            .map(|r| {
                NamespacedName::new(
                    r.namespace.as_deref().unwrap_or(gateway_namespace),
                    r.name.as_str(),
                )
            })
            .collect()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParametersReference {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub kind: String,
    pub name: String,
}

pub fn gateway_listeners(gateway: &Gateway) -> Result<Vec<ListenerSpec>> {
    let listeners = serde_json::to_value(&gateway.spec.listeners)?;
    Ok(serde_json::from_value(listeners)?)
}

/// `spec.infrastructure.parametersRef` of the Gateway, if set.
pub fn parameters_ref(gateway: &Gateway) -> Result<Option<ParametersReference>> {
    let spec = serde_json::to_value(&gateway.spec)?;
    match spec.pointer("/infrastructure/parametersRef") {
        Some(value) if !value.is_null() => Ok(Some(serde_json::from_value(value.clone())?)),
        _ => Ok(None),
    }
}

/// First 8 hex characters of the Gateway UID.
pub fn gateway_uid_short(gateway: &Gateway) -> Result<String> {
    let uid = gateway
        .metadata
        .uid
        .as_deref()
        .ok_or(Error::InvalidConfigError("Gateway uid not found".to_string()))?;
    Ok(uid.chars().filter(|c| *c != '-').take(8).collect())
}

pub fn default_backend_set_name(gateway: &Gateway) -> Result<String> {
    Ok(format!("default-{}", gateway_uid_short(gateway)?))
}

/// LB certificate name for a Secret. Including the resourceVersion makes rotated Secrets
/// materialize as new certificates.
pub fn certificate_name(secret: &Secret) -> String {
    format!(
        "{}-{}-{}",
        secret.namespace().unwrap_or_default(),
        secret.name_any(),
        secret.resource_version().unwrap_or_default()
    )
}

/// Encodes the resourceVersions of referenced objects as an annotation value. Object names go
/// into the value since annotation key names are limited to 63 characters.
pub fn used_versions_value<'a, K>(
    objects: impl IntoIterator<Item = (&'a NamespacedName, &'a K)>,
) -> String
where
    K: kube::Resource + 'a,
{
    let versions: serde_json::Map<String, serde_json::Value> = objects
        .into_iter()
        .map(|(key, obj)| {
            (
                key.to_string(),
                serde_json::Value::String(obj.resource_version().unwrap_or_default()),
            )
        })
        .collect::<BTreeMap<_, _>>()
        .into_iter()
        .collect();
    serde_json::Value::Object(versions).to_string()
}

/// Decodes a value written by [`used_versions_value`]; unreadable values decode as empty.
pub fn used_versions(
    annotations: &BTreeMap<String, String>,
    annotation: &str,
) -> BTreeMap<String, String> {
    annotations
        .get(annotation)
        .and_then(|value| serde_json::from_str(value).ok())
        .unwrap_or_default()
}

pub fn used_secrets(gateway: &Gateway) -> BTreeMap<String, String> {
    used_versions(gateway.annotations(), USED_SECRETS_ANNOTATION)
}

pub fn used_services<K: kube::Resource>(obj: &K) -> BTreeMap<String, String> {
    used_versions(obj.annotations(), USED_SERVICES_ANNOTATION)
}

fn comma_separated(annotations: &BTreeMap<String, String>, annotation: &str) -> Vec<String> {
    annotations
        .get(annotation)
        .map(|value| {
            value
                .split(',')
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Names of the routing rules recorded when the object was last programmed.
pub fn programmed_rules<K: kube::Resource>(obj: &K) -> Vec<String> {
    comma_separated(obj.annotations(), PROGRAMMED_RULES_ANNOTATION)
}

/// Ids of the load balancers the object was recorded to have rules on.
pub fn programmed_load_balancers<K: kube::Resource>(obj: &K) -> BTreeSet<String> {
    comma_separated(obj.annotations(), PROGRAMMED_LOAD_BALANCERS_ANNOTATION)
        .into_iter()
        .collect()
}
