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

//! Converges the Gateway owned parts of a load balancer: the default backend set, listeners,
//! their routing policy shells and TLS certificates.
//!
//! Every mutation is followed by waiting on its work request. Decisions are always taken on a
//! snapshot read from the load balancer, never on cached state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use gateway_api::apis::standard::gateways::Gateway;
use k8s_openapi::api::core::v1::Secret;
use loadbalancer::models::*;
use loadbalancer::LoadBalancerClient;
use tracing::{debug, info, warn};

use crate::cluster::ClusterClient;
use crate::consts::*;
use crate::gateway_utils::*;
use crate::work_requests::WorkRequestWaiter;
use crate::*;

pub const TLS_MODE_PASSTHROUGH: &str = "Passthrough";

const SECRET_TLS_CERT: &str = "tls.crt";
const SECRET_TLS_KEY: &str = "tls.key";
const SECRET_CA_CERT: &str = "ca.crt";

/// Health check used for every backend set: HTTP `GET /` expecting 200 on the backend port.
pub fn default_health_checker() -> HealthChecker {
    HealthChecker {
        protocol: "HTTP".to_string(),
        url_path: Some("/".to_string()),
        port: None,
        return_code: Some(200),
    }
}

#[derive(Clone)]
pub struct LoadBalancerModel {
    pub(crate) client: Arc<dyn LoadBalancerClient>,
    pub(crate) cluster: Arc<dyn ClusterClient>,
    waiter: WorkRequestWaiter,
}

impl LoadBalancerModel {
    pub fn new(
        client: Arc<dyn LoadBalancerClient>,
        cluster: Arc<dyn ClusterClient>,
        waiter: WorkRequestWaiter,
    ) -> Self {
        LoadBalancerModel {
            client,
            cluster,
            waiter,
        }
    }

    pub async fn get_load_balancer(&self, lb_id: &str) -> Result<LoadBalancer> {
        self.client
            .get_load_balancer(lb_id)
            .await
            .map_err(|e| Error::lb(format!("get load balancer {lb_id}"), e))
    }

    /// Waits for the work request started by a mutation.
    pub(crate) async fn submit(
        &self,
        lb_id: &str,
        operation: String,
        submitted: loadbalancer::Result<String>,
    ) -> Result<()> {
        let work_request_id = submitted.map_err(|e| {
            if e.is_conflict() {
                Error::LoadBalancerBusy(lb_id.to_string())
            } else {
                Error::lb(operation.clone(), e)
            }
        })?;
        info!(lb_id, %operation, work_request = %work_request_id, "waiting for load balancer change");
        self.waiter.wait_for(&work_request_id).await
    }

    /// Like [`Self::submit`] for deletions, where a missing object counts as deleted.
    pub(crate) async fn submit_delete(
        &self,
        lb_id: &str,
        operation: String,
        submitted: loadbalancer::Result<String>,
    ) -> Result<()> {
        match submitted {
            Err(e) if e.is_not_found() => {
                debug!(lb_id, %operation, "already deleted");
                Ok(())
            }
            submitted => self.submit(lb_id, operation, submitted).await,
        }
    }

    pub async fn reconcile_default_backend_set(
        &self,
        lb: &LoadBalancer,
        gateway: &Gateway,
    ) -> Result<String> {
        let name = default_backend_set_name(gateway)?;
        if lb.backend_sets.contains_key(&name) {
            return Ok(name);
        }
        let details = BackendSetDetails {
            name: name.clone(),
            policy: POLICY_ROUND_ROBIN.to_string(),
            health_checker: default_health_checker(),
            backends: vec![],
        };
        self.submit(
            &lb.id,
            format!("create default backend set {name}"),
            self.client.create_backend_set(&lb.id, &details).await,
        )
        .await?;
        Ok(name)
    }

    /// Uploads the certificates of every TLS listener that are not on the load balancer yet and
    /// returns the certificate names per listener.
    pub async fn reconcile_listeners_certificates(
        &self,
        lb: &LoadBalancer,
        gateway_namespace: &str,
        listeners: &[ListenerSpec],
        secrets: &BTreeMap<NamespacedName, Secret>,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        let mut result: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut uploaded: BTreeSet<String> = BTreeSet::new();

        for listener in listeners.iter().filter(|l| l.tls.is_some()) {
            let names = result.entry(listener.name.clone()).or_default();
            for secret_ref in listener.certificate_refs(gateway_namespace) {
                let secret = secrets.get(&secret_ref).ok_or_else(|| {
                    StatusError::new(
                        CONDITION_ACCEPTED,
                        REASON_INVALID_PARAMETERS,
                        format!("Secret {secret_ref} not found"),
                    )
                })?;
                let certificate_name = certificate_name(secret);
                if !lb.certificates.contains_key(&certificate_name)
                    && !uploaded.contains(&certificate_name)
                {
                    let details = certificate_details(&secret_ref, secret, &certificate_name)?;
                    self.submit(
                        &lb.id,
                        format!("create certificate {certificate_name}"),
                        self.client.create_certificate(&lb.id, &details).await,
                    )
                    .await?;
                    uploaded.insert(certificate_name.clone());
                }
                names.push(certificate_name);
            }
        }
        Ok(result)
    }

    /// Ensures the listener, its routing policy shell, and attaches the policy when it has rules.
    pub async fn reconcile_http_listener(
        &self,
        lb: &LoadBalancer,
        default_backend_set: &str,
        listener: &ListenerSpec,
        certificates: &[String],
    ) -> Result<()> {
        validate_listener(listener)?;

        let current = lb.listeners.get(&listener.name);
        let mut desired = ListenerDetails {
            name: listener.name.clone(),
            default_backend_set_name: default_backend_set.to_string(),
            port: listener.port,
            protocol: listener.protocol.clone(),
            routing_policy_name: current.and_then(|l| l.routing_policy_name.clone()),
            ssl_configuration: listener.tls.as_ref().map(|_| SslConfiguration {
                certificate_names: certificates.to_vec(),
                verify_peer_certificate: false,
            }),
        };

        match current {
            None => {
                desired.routing_policy_name = None;
                self.submit(
                    &lb.id,
                    format!("create listener {}", listener.name),
                    self.client.create_listener(&lb.id, &desired).await,
                )
                .await?;
            }
            Some(current) if ListenerDetails::from(current) != desired => {
                self.submit(
                    &lb.id,
                    format!("update listener {}", listener.name),
                    self.client.update_listener(&lb.id, &desired).await,
                )
                .await?;
            }
            Some(_) => debug!(listener = %listener.name, "listener is up to date"),
        }

        let policy = lb.routing_policies.get(&listener.name);
        if policy.is_none() {
            let details = RoutingPolicyDetails {
                name: listener.name.clone(),
                condition_language_version: CONDITION_LANGUAGE_V1.to_string(),
                rules: vec![],
            };
            self.submit(
                &lb.id,
                format!("create routing policy {}", listener.name),
                self.client.create_routing_policy(&lb.id, &details).await,
            )
            .await?;
        }

        let has_rules = policy.is_some_and(|p| !p.rules.is_empty());
        let attached = has_rules.then(|| listener.name.clone());
        if desired.routing_policy_name != attached {
            desired.routing_policy_name = attached;
            self.submit(
                &lb.id,
                format!("attach routing policy to listener {}", listener.name),
                self.client.update_listener(&lb.id, &desired).await,
            )
            .await?;
        }
        Ok(())
    }

    /// Deletes listeners that are no longer declared, followed by their routing policies.
    /// Every deletion is attempted; the first failure is returned.
    pub async fn remove_missing_listeners(
        &self,
        lb: &LoadBalancer,
        listeners: &[ListenerSpec],
    ) -> Result<()> {
        let declared: BTreeSet<&str> = listeners.iter().map(|l| l.name.as_str()).collect();
        let mut errors = vec![];
        let mut retired_policies = BTreeSet::new();

        for (name, listener) in &lb.listeners {
            if declared.contains(name.as_str()) {
                continue;
            }
            info!(lb_id = %lb.id, listener = %name, "removing listener");
            if let Err(e) = self
                .submit_delete(
                    &lb.id,
                    format!("delete listener {name}"),
                    self.client.delete_listener(&lb.id, name).await,
                )
                .await
            {
                warn!(listener = %name, error = %e, "failed to remove listener");
                errors.push(e);
                continue;
            }
            let policy = listener.routing_policy_name.clone().unwrap_or(name.clone());
            if lb.routing_policies.contains_key(&policy) {
                retired_policies.insert(policy);
            }
        }

        for name in lb.routing_policies.keys() {
            if !declared.contains(name.as_str()) && !lb.listeners.contains_key(name) {
                retired_policies.insert(name.clone());
            }
        }

        for name in retired_policies {
            if let Err(e) = self
                .submit_delete(
                    &lb.id,
                    format!("delete routing policy {name}"),
                    self.client.delete_routing_policy(&lb.id, &name).await,
                )
                .await
            {
                warn!(policy = %name, error = %e, "failed to remove routing policy");
                errors.push(e);
            }
        }

        match errors.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Deletes certificates that no listener references. Must run on a snapshot taken after all
    /// listener updates.
    pub async fn remove_unused_certificates(&self, lb: &LoadBalancer) -> Result<()> {
        let referenced: BTreeSet<&str> = lb
            .listeners
            .values()
            .filter_map(|l| l.ssl_configuration.as_ref())
            .flat_map(|ssl| ssl.certificate_names.iter().map(String::as_str))
            .collect();

        for name in lb.certificates.keys() {
            if referenced.contains(name.as_str()) {
                continue;
            }
            info!(lb_id = %lb.id, certificate = %name, "removing unused certificate");
            self.submit_delete(
                &lb.id,
                format!("delete certificate {name}"),
                self.client.delete_certificate(&lb.id, name).await,
            )
            .await?;
        }
        Ok(())
    }
}

pub fn validate_listener(listener: &ListenerSpec) -> Result<()> {
    if !listener.is_http() {
        return Err(StatusError::new(
            CONDITION_ACCEPTED,
            REASON_LISTENERS_NOT_VALID,
            format!(
                "listener {} has unsupported protocol {}; must be one of HTTP or HTTPS",
                listener.name, listener.protocol
            ),
        )
        .into());
    }
    if listener
        .tls
        .as_ref()
        .and_then(|tls| tls.mode.as_deref())
        .is_some_and(|mode| mode == TLS_MODE_PASSTHROUGH)
    {
        return Err(StatusError::new(
            CONDITION_ACCEPTED,
            REASON_LISTENERS_NOT_VALID,
            format!("listener {} uses unsupported TLS mode Passthrough", listener.name),
        )
        .into());
    }
    Ok(())
}

fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .and_then(|bytes| String::from_utf8(bytes.0.clone()).ok())
        .or_else(|| {
            secret
                .string_data
                .as_ref()
                .and_then(|data| data.get(key).cloned())
        })
}

fn certificate_details(
    secret_ref: &NamespacedName,
    secret: &Secret,
    certificate_name: &str,
) -> Result<CertificateDetails> {
    let missing = |key: &str| -> Error {
        StatusError::new(
            CONDITION_ACCEPTED,
            REASON_INVALID_PARAMETERS,
            format!("Secret {secret_ref} is missing {key}"),
        )
        .into()
    };
    Ok(CertificateDetails {
        certificate_name: certificate_name.to_string(),
        public_certificate: secret_value(secret, SECRET_TLS_CERT)
            .ok_or_else(|| missing(SECRET_TLS_CERT))?,
        private_key: secret_value(secret, SECRET_TLS_KEY).ok_or_else(|| missing(SECRET_TLS_KEY))?,
        ca_certificate: secret_value(secret, SECRET_CA_CERT),
    })
}
