//! Endpoint registry adapters
//!
//! The registry holds the published address lists and the last topology
//! signature (as an annotation on the read-write Endpoints object). Writes are
//! JSON merge patches; there is no compare-and-swap on `resourceVersion`, so
//! concurrent runs against the same service are last-write-wins.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Endpoints;
use kube::Api;
use kube::api::{Patch, PatchParams};
use pgendpoint_common::{EndpointManagerError, Result};
use tracing::{debug, info};

/// Registry contract consumed by the reconciliation engine
#[async_trait::async_trait]
pub trait EndpointRegistry: Send + Sync {
    /// Read one annotation of the named Endpoints object.
    ///
    /// A missing object or missing annotation is `Ok(None)`.
    async fn get_annotation(&self, service: &str, key: &str) -> Result<Option<String>>;

    /// Replace the address state of the named Endpoints object
    async fn patch_endpoints(&self, service: &str, payload: &Endpoints) -> Result<()>;
}

/// Kubernetes `Endpoints` backed registry
pub struct KubeEndpointRegistry {
    api: Api<Endpoints>,
    namespace: String,
}

impl KubeEndpointRegistry {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[async_trait::async_trait]
impl EndpointRegistry for KubeEndpointRegistry {
    async fn get_annotation(&self, service: &str, key: &str) -> Result<Option<String>> {
        let endpoints = self.api.get_opt(service).await.map_err(|e| {
            EndpointManagerError::Registry(format!(
                "failed to read endpoints {}/{}: {}",
                self.namespace, service, e
            ))
        })?;

        Ok(endpoints
            .and_then(|ep| ep.metadata.annotations)
            .and_then(|annotations| annotations.get(key).cloned()))
    }

    async fn patch_endpoints(&self, service: &str, payload: &Endpoints) -> Result<()> {
        self.api
            .patch(service, &PatchParams::default(), &Patch::Merge(payload))
            .await
            .map_err(|e| {
                EndpointManagerError::Registry(format!(
                    "failed to patch endpoints {}/{}: {}",
                    self.namespace, service, e
                ))
            })?;
        debug!(namespace = %self.namespace, service = %service, "Endpoints patched");
        Ok(())
    }
}

/// Registry that never writes.
///
/// Reads go to the wrapped registry when there is one; patches are logged and
/// reported as successful.
#[derive(Default)]
pub struct DryRunRegistry {
    inner: Option<Arc<dyn EndpointRegistry>>,
}

impl DryRunRegistry {
    pub fn new(inner: Option<Arc<dyn EndpointRegistry>>) -> Self {
        Self { inner }
    }
}

#[async_trait::async_trait]
impl EndpointRegistry for DryRunRegistry {
    async fn get_annotation(&self, service: &str, key: &str) -> Result<Option<String>> {
        match &self.inner {
            Some(inner) => inner.get_annotation(service, key).await,
            None => Ok(None),
        }
    }

    async fn patch_endpoints(&self, service: &str, payload: &Endpoints) -> Result<()> {
        let body = serde_json::to_string(payload)
            .map_err(|e| EndpointManagerError::Registry(e.to_string()))?;
        info!(
            service = %service,
            payload = %body,
            dry_run = true,
            "Simulating endpoint update"
        );
        Ok(())
    }
}
