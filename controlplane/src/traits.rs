use async_trait::async_trait;
use gateway_api::apis::standard::{gatewayclasses::GatewayClass, gateways::Gateway};
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::Resource;

use crate::cluster::ClusterClient;
use crate::Result;

pub trait HasConditions {
    fn conditions(&self) -> &[metav1::Condition];
    fn conditions_mut(&mut self) -> &mut Vec<metav1::Condition>;
}

impl HasConditions for Gateway {
    fn conditions(&self) -> &[metav1::Condition] {
        self.status
            .as_ref()
            .and_then(|status| status.conditions.as_deref())
            .unwrap_or_default()
    }

    fn conditions_mut(&mut self) -> &mut Vec<metav1::Condition> {
        self.status
            .get_or_insert_with(Default::default)
            .conditions
            .get_or_insert_with(Vec::new)
    }
}

impl HasConditions for GatewayClass {
    fn conditions(&self) -> &[metav1::Condition] {
        self.status
            .as_ref()
            .and_then(|status| status.conditions.as_deref())
            .unwrap_or_default()
    }

    fn conditions_mut(&mut self) -> &mut Vec<metav1::Condition> {
        self.status
            .get_or_insert_with(Default::default)
            .conditions
            .get_or_insert_with(Vec::new)
    }
}

/// A resource whose conditions and metadata can be written back to the cluster.
#[async_trait]
pub trait StatusResource:
    HasConditions + Resource<DynamicType = ()> + Clone + Send + Sync + Sized
{
    async fn write_status(&self, cluster: &dyn ClusterClient) -> Result<Self>;
    async fn write_metadata(&self, cluster: &dyn ClusterClient) -> Result<Self>;
}

#[async_trait]
impl StatusResource for Gateway {
    async fn write_status(&self, cluster: &dyn ClusterClient) -> Result<Self> {
        cluster.update_gateway_status(self).await
    }

    async fn write_metadata(&self, cluster: &dyn ClusterClient) -> Result<Self> {
        cluster.update_gateway_metadata(self).await
    }
}

#[async_trait]
impl StatusResource for GatewayClass {
    async fn write_status(&self, cluster: &dyn ClusterClient) -> Result<Self> {
        cluster.update_gateway_class_status(self).await
    }

    async fn write_metadata(&self, cluster: &dyn ClusterClient) -> Result<Self> {
        cluster.update_gateway_class_metadata(self).await
    }
}
