//! Shared fakes for the reconciliation integration tests
//!
//! - `ScriptedProber`: returns a fixed outcome per address and records calls
//! - `MemoryRegistry`: in-memory Endpoints store that records every patch

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use k8s_openapi::api::core::v1::Endpoints;
use pgendpoint_common::{EndpointManagerError, Node, ProbeOutcome, Result, UnknownReason};
use pgendpoint_core::healthcheck::NodeProber;
use pgendpoint_core::publisher::EndpointPublisher;
use pgendpoint_core::reconciler::{Reconciler, ReconcilerSettings};
use pgendpoint_core::registry::EndpointRegistry;
use pgendpoint_core::verifier::{TopologyVerifier, VerifierSettings};
use tracing::Span;

pub const RW_SERVICE: &str = "postgres-external-rw";
pub const RO_SERVICE: &str = "postgres-external-ro";

pub const NODE_A: &str = "10.0.0.1";
pub const NODE_B: &str = "10.0.0.2";
pub const NODE_C: &str = "10.0.0.3";

#[derive(Default)]
pub struct ScriptedProber {
    outcomes: Mutex<HashMap<String, ProbeOutcome>>,
    probed: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl ScriptedProber {
    pub fn new(outcomes: &[(&str, ProbeOutcome)]) -> Arc<Self> {
        let prober = Self::default();
        for (address, outcome) in outcomes {
            prober.set(address, outcome.clone());
        }
        Arc::new(prober)
    }

    pub fn set(&self, address: &str, outcome: ProbeOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(address.to_string(), outcome);
    }

    pub fn probed(&self) -> HashSet<String> {
        self.probed.lock().unwrap().iter().cloned().collect()
    }
}

#[async_trait::async_trait]
impl NodeProber for ScriptedProber {
    async fn probe(&self, node: &Node) -> ProbeOutcome {
        self.probed.lock().unwrap().push(node.address.clone());
        self.outcomes
            .lock()
            .unwrap()
            .get(&node.address)
            .cloned()
            .unwrap_or_else(down)
    }
}

pub fn down() -> ProbeOutcome {
    ProbeOutcome::Unknown(UnknownReason::Unreachable(
        "Connection failed: connection refused".to_string(),
    ))
}

#[derive(Default)]
pub struct MemoryRegistry {
    objects: Mutex<HashMap<String, Endpoints>>,
    patches: Mutex<Vec<(String, Endpoints)>>,
    failing: Mutex<HashSet<String>>,
}

#[allow(dead_code)]
impl MemoryRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed the stored annotations of a service without counting a patch
    pub fn seed(&self, service: &str, annotations: &[(&str, &str)]) {
        let annotations: BTreeMap<String, String> = annotations
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut endpoints = Endpoints::default();
        endpoints.metadata.annotations = Some(annotations);
        self.objects
            .lock()
            .unwrap()
            .insert(service.to_string(), endpoints);
    }

    pub fn fail_writes_to(&self, service: &str) {
        self.failing.lock().unwrap().insert(service.to_string());
    }

    pub fn patch_count(&self) -> usize {
        self.patches.lock().unwrap().len()
    }

    pub fn patched_services(&self) -> Vec<String> {
        self.patches
            .lock()
            .unwrap()
            .iter()
            .map(|(service, _)| service.clone())
            .collect()
    }

    pub fn stored(&self, service: &str) -> Option<Endpoints> {
        self.objects.lock().unwrap().get(service).cloned()
    }

    /// Addresses currently published for `service`, in payload order
    pub fn addresses(&self, service: &str) -> Vec<String> {
        self.stored(service)
            .and_then(|ep| ep.subsets)
            .unwrap_or_default()
            .into_iter()
            .flat_map(|subset| subset.addresses.unwrap_or_default())
            .map(|address| address.ip)
            .collect()
    }

    pub fn annotation(&self, service: &str, key: &str) -> Option<String> {
        self.stored(service)
            .and_then(|ep| ep.metadata.annotations)
            .and_then(|annotations| annotations.get(key).cloned())
    }
}

#[async_trait::async_trait]
impl EndpointRegistry for MemoryRegistry {
    async fn get_annotation(&self, service: &str, key: &str) -> Result<Option<String>> {
        Ok(self.annotation(service, key))
    }

    async fn patch_endpoints(&self, service: &str, payload: &Endpoints) -> Result<()> {
        self.patches
            .lock()
            .unwrap()
            .push((service.to_string(), payload.clone()));
        if self.failing.lock().unwrap().contains(service) {
            return Err(EndpointManagerError::Registry(format!(
                "endpoints \"{}\" is forbidden",
                service
            )));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(service.to_string(), payload.clone());
        Ok(())
    }
}

#[allow(dead_code)]
pub fn verifier(prober: Arc<dyn NodeProber>) -> TopologyVerifier {
    TopologyVerifier::new(
        prober,
        VerifierSettings {
            pool_size: 3,
            probe_ceiling: Duration::from_secs(5),
        },
        &Span::none(),
    )
}

pub fn reconciler(
    pg_nodes: &str,
    prober: Arc<dyn NodeProber>,
    registry: Arc<dyn EndpointRegistry>,
) -> Reconciler {
    Reconciler::new(
        ReconcilerSettings {
            rw_service: RW_SERVICE.to_string(),
            ro_service: RO_SERVICE.to_string(),
            pg_nodes: pg_nodes.to_string(),
        },
        verifier(prober),
        EndpointPublisher::with_default_port(registry.clone(), &Span::none()),
        registry,
        &Span::none(),
    )
}
