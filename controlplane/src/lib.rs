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

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use loadbalancer::LoadBalancerClient;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use gateway_controller::controller as gateway_controller;
pub use gatewayclass_controller::controller as gatewayclass_controller;
pub use httproute_controller::controller as httproute_controller;

pub mod cluster;
pub mod config;
pub mod consts;
pub mod crd;
pub mod gateway_controller;
pub mod gateway_model;
pub mod gateway_utils;
pub mod gatewayclass_controller;
pub mod httpbackend_model;
pub mod httproute_controller;
pub mod httproute_model;
pub mod lb_model;
pub mod lb_routing;
pub mod resources_model;
pub mod routing_rules;
pub mod traits;
pub mod watches;
pub mod work_requests;

mod requeue;

use cluster::ClusterClient;
use gateway_model::GatewayModel;
use httproute_model::HttpRouteModel;
use lb_model::LoadBalancerModel;
use requeue::RequeueBackoff;
use resources_model::ResourcesModel;
use work_requests::WorkRequestWaiter;

/// Timing knobs shared by the models and controllers.
#[derive(Clone, Debug)]
pub struct Settings {
    pub work_request_poll_interval: Duration,
    pub work_request_timeout: Duration,
    pub resync_interval: Duration,
    pub max_error_requeue: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            work_request_poll_interval: Duration::from_secs(2),
            work_request_timeout: Duration::from_secs(20 * 60),
            resync_interval: Duration::from_secs(300),
            max_error_requeue: Duration::from_secs(300),
        }
    }
}

// Context for our reconcilers
pub struct Context {
    pub cluster: Arc<dyn ClusterClient>,
    pub resources: ResourcesModel,
    pub gateway_model: GatewayModel,
    pub route_model: HttpRouteModel,
    pub settings: Settings,
    pub shutdown: CancellationToken,
    requeue: RequeueBackoff,
}

impl Context {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        lb: Arc<dyn LoadBalancerClient>,
        settings: Settings,
        shutdown: CancellationToken,
    ) -> Self {
        let resources = ResourcesModel::new(cluster.clone(), shutdown.clone());
        let waiter = WorkRequestWaiter::new(
            lb.clone(),
            settings.work_request_poll_interval,
            settings.work_request_timeout,
            shutdown.clone(),
        );
        let lb_model = LoadBalancerModel::new(lb, cluster.clone(), waiter);
        let gateway_model =
            GatewayModel::new(cluster.clone(), resources.clone(), lb_model.clone());
        let route_model = HttpRouteModel::new(
            cluster.clone(),
            resources.clone(),
            gateway_model.clone(),
            lb_model,
        );
        Context {
            requeue: RequeueBackoff::new(settings.max_error_requeue),
            cluster,
            resources,
            gateway_model,
            route_model,
            settings,
            shutdown,
        }
    }
}

/// A failure that is reported on the resource as a `False` condition instead of being retried.
#[derive(Error, Debug)]
#[error("{condition_type}/{reason}: {message}")]
pub struct StatusError {
    pub condition_type: String,
    pub reason: String,
    pub message: String,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StatusError {
    pub fn new(
        condition_type: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        StatusError {
            condition_type: condition_type.into(),
            reason: reason.into(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("kube error: {0}")]
    KubeError(#[source] kube::Error),
    #[error("invalid configuration: `{0}`")]
    InvalidConfigError(String),
    #[error("error querying Gateway API CRDs: `{0}`; are the CRDs installed?")]
    CRDNotFoundError(#[source] kube::Error),
    #[error("failed to update status of {resource}: {source}")]
    StatusUpdateFailed {
        resource: String,
        #[source]
        source: Box<Error>,
    },
    #[error("load balancer error during {operation}: {source}")]
    LoadBalancerError {
        operation: String,
        #[source]
        source: loadbalancer::Error,
    },
    #[error("load balancer {0} is busy with another work request")]
    LoadBalancerBusy(String),
    #[error("listener {listener} is not programmed on load balancer {lb_id} yet")]
    ListenerNotProgrammed { lb_id: String, listener: String },
    #[error("work request {id} finished as {state}: {message}")]
    WorkRequestFailed {
        id: String,
        state: String,
        message: String,
    },
    #[error("timed out waiting for work request {0}")]
    WorkRequestTimeout(String),
    #[error("reconcile cancelled")]
    Cancelled,
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error(transparent)]
    Status(#[from] StatusError),
}

impl Error {
    pub fn lb(operation: impl Into<String>, source: loadbalancer::Error) -> Self {
        Error::LoadBalancerError {
            operation: operation.into(),
            source,
        }
    }

    pub fn status_error(&self) -> Option<&StatusError> {
        match self {
            Error::Status(e) => Some(e),
            _ => None,
        }
    }

    pub fn lb_error(&self) -> Option<&loadbalancer::Error> {
        match self {
            Error::LoadBalancerError { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        NamespacedName {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of<K: kube::Resource>(obj: &K) -> Self {
        let meta = obj.meta();
        NamespacedName {
            namespace: meta.namespace.clone().unwrap_or_default(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
