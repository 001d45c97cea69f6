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

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use gateway_api::apis::standard::httproutes::HTTPRoute;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::{Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cluster::ClusterClient;
use crate::httproute_model::{route_parent_statuses, set_route_parent_statuses, RouteParentStatus};
use crate::traits::{HasConditions, StatusResource};
use crate::{Error, Result};

/// A condition to record on a resource, with optional metadata to attach in the same step.
#[derive(Clone, Debug, Default)]
pub struct SetConditionParams {
    pub condition_type: String,
    pub status: bool,
    pub reason: String,
    pub message: String,
    pub annotations: BTreeMap<String, String>,
    pub finalizer: Option<String>,
}

impl SetConditionParams {
    pub fn new(
        condition_type: impl Into<String>,
        status: bool,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        SetConditionParams {
            condition_type: condition_type.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_annotations(mut self, annotations: BTreeMap<String, String>) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn with_finalizer(mut self, finalizer: impl Into<String>) -> Self {
        self.finalizer = Some(finalizer.into());
        self
    }
}

fn status_str(status: bool) -> &'static str {
    if status {
        "True"
    } else {
        "False"
    }
}

/// Upserts a condition of the given type.
///
/// The last transition time only moves when the status flips. The observed generation is always
/// stamped.
pub fn upsert_condition(
    conditions: &mut Vec<metav1::Condition>,
    params: &SetConditionParams,
    generation: Option<i64>,
) {
    let status = status_str(params.status);
    if let Some(existing) = conditions
        .iter_mut()
        .find(|c| c.type_ == params.condition_type)
    {
        if existing.status != status {
            existing.last_transition_time = metav1::Time(Utc::now());
        }
        existing.status = status.to_string();
        existing.reason.clone_from(&params.reason);
        existing.message.clone_from(&params.message);
        existing.observed_generation = generation;
        return;
    }
    conditions.push(metav1::Condition {
        type_: params.condition_type.clone(),
        status: status.to_string(),
        reason: params.reason.clone(),
        message: params.message.clone(),
        observed_generation: generation,
        last_transition_time: metav1::Time(Utc::now()),
    });
}

/// Merges annotations and a finalizer into object metadata. Returns whether anything changed.
pub fn merge_metadata(
    meta: &mut metav1::ObjectMeta,
    annotations: &BTreeMap<String, String>,
    finalizer: Option<&str>,
) -> bool {
    let mut changed = false;
    if !annotations.is_empty() {
        let current = meta.annotations.get_or_insert_with(BTreeMap::new);
        for (key, value) in annotations {
            if current.get(key) != Some(value) {
                current.insert(key.clone(), value.clone());
                changed = true;
            }
        }
    }
    if let Some(finalizer) = finalizer {
        let finalizers = meta.finalizers.get_or_insert_with(Vec::new);
        if !finalizers.iter().any(|f| f == finalizer) {
            finalizers.push(finalizer.to_string());
            changed = true;
        }
    }
    changed
}

/// True iff a condition of the given type was recorded for the current generation.
pub fn is_condition_current(
    conditions: &[metav1::Condition],
    condition_type: &str,
    generation: Option<i64>,
) -> bool {
    conditions
        .iter()
        .any(|c| c.type_ == condition_type && c.observed_generation == generation)
}

pub fn is_condition_true(
    conditions: &[metav1::Condition],
    condition_type: &str,
    generation: Option<i64>,
) -> bool {
    conditions.iter().any(|c| {
        c.type_ == condition_type && c.observed_generation == generation && c.status == "True"
    })
}

/// True iff every required annotation is present with the same value.
pub fn has_annotations(meta: &metav1::ObjectMeta, required: &BTreeMap<String, String>) -> bool {
    required.iter().all(|(key, value)| {
        meta.annotations
            .as_ref()
            .and_then(|annotations| annotations.get(key))
            == Some(value)
    })
}

/// Reads and writes status conditions of Gateway API resources.
#[derive(Clone)]
pub struct ResourcesModel {
    cluster: Arc<dyn ClusterClient>,
    shutdown: CancellationToken,
}

impl ResourcesModel {
    pub fn new(cluster: Arc<dyn ClusterClient>, shutdown: CancellationToken) -> Self {
        ResourcesModel { cluster, shutdown }
    }

    /// Records the condition through the status sub-resource, then attaches annotations and the
    /// finalizer with a metadata update when they are not present yet. On success `resource`
    /// holds the latest object returned by the API server.
    pub async fn set_condition<K: StatusResource>(
        &self,
        resource: &mut K,
        params: SetConditionParams,
    ) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let kind = K::kind(&());
        let name = resource.name_any();
        let generation = resource.meta().generation;
        upsert_condition(resource.conditions_mut(), &params, generation);

        debug!(
            kind = %kind,
            name = %name,
            condition = %params.condition_type,
            status = params.status,
            reason = %params.reason,
            "setting condition"
        );
        let mut updated = resource
            .write_status(self.cluster.as_ref())
            .await
            .map_err(|e| Error::StatusUpdateFailed {
                resource: format!("{kind} {name}"),
                source: Box::new(e),
            })?;

        if merge_metadata(
            updated.meta_mut(),
            &params.annotations,
            params.finalizer.as_deref(),
        ) {
            updated = updated
                .write_metadata(self.cluster.as_ref())
                .await
                .map_err(|e| Error::StatusUpdateFailed {
                    resource: format!("{kind} {name}"),
                    source: Box::new(e),
                })?;
        }
        *resource = updated;
        Ok(())
    }

    /// Records conditions on the route's status entry for one parent, creating the entry when
    /// missing. Annotations and finalizers of all `conditions` are applied in one metadata
    /// update.
    pub async fn set_route_parent_conditions(
        &self,
        route: &mut HTTPRoute,
        parent: RouteParentStatus,
        conditions: Vec<SetConditionParams>,
    ) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let name = format!("HTTPRoute {}", crate::NamespacedName::of(route));
        let generation = route.metadata.generation;
        let mut statuses = route_parent_statuses(route)?;
        let index = match statuses.iter().position(|s| {
            s.controller_name == parent.controller_name && s.parent_ref.same_target(&parent.parent_ref)
        }) {
            Some(index) => index,
            None => {
                statuses.push(parent);
                statuses.len() - 1
            }
        };
        let mut annotations = BTreeMap::new();
        let mut finalizer = None;
        for params in &conditions {
            debug!(
                resource = %name,
                condition = %params.condition_type,
                status = params.status,
                reason = %params.reason,
                "setting parent condition"
            );
            upsert_condition(&mut statuses[index].conditions, params, generation);
            annotations.extend(params.annotations.clone());
            if params.finalizer.is_some() {
                finalizer.clone_from(&params.finalizer);
            }
        }
        set_route_parent_statuses(route, &statuses)?;

        let status_failed = |e: Error| Error::StatusUpdateFailed {
            resource: name.clone(),
            source: Box::new(e),
        };
        let mut updated = self
            .cluster
            .update_http_route_status(route)
            .await
            .map_err(status_failed)?;
        if merge_metadata(&mut updated.metadata, &annotations, finalizer.as_deref()) {
            updated = self
                .cluster
                .update_http_route_metadata(&updated)
                .await
                .map_err(status_failed)?;
        }
        *route = updated;
        Ok(())
    }

    /// True iff a condition of `condition_type` exists for the current generation and all
    /// `required_annotations` are present with matching values.
    pub fn is_condition_set<K: HasConditions + Resource>(
        resource: &K,
        condition_type: &str,
        required_annotations: &BTreeMap<String, String>,
    ) -> bool {
        is_condition_current(
            resource.conditions(),
            condition_type,
            resource.meta().generation,
        ) && has_annotations(resource.meta(), required_annotations)
    }
}
