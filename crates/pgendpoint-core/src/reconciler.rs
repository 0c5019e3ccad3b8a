//! Reconciliation engine
//!
//! One run is a single pass: discover candidates, verify, gate on a confirmed
//! primary, compare signatures, publish. There is no retry loop here; running
//! the cycle again is the scheduler's job. Runs are idempotent because an
//! unchanged signature short-circuits before any write.

use std::sync::Arc;

use chrono::Utc;
use pgendpoint_common::{
    EndpointManagerError, LAST_TOPOLOGY_ANNOTATION, Node, Result, RunOutcome, Signature,
    parse_nodes, signature,
};
use tracing::{Instrument, Span, error, info, info_span, warn};
use uuid::Uuid;

use crate::publisher::EndpointPublisher;
use crate::registry::EndpointRegistry;
use crate::verifier::TopologyVerifier;

/// Where the candidate nodes of a run came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeSource {
    /// The configured comma-separated list
    Static,
    /// Decoded from the signature stored on the read-write service
    StoredTopology,
}

impl NodeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeSource::Static => "static",
            NodeSource::StoredTopology => "stored_topology",
        }
    }
}

/// Engine configuration
#[derive(Clone, Debug)]
pub struct ReconcilerSettings {
    pub rw_service: String,
    pub ro_service: String,
    /// Comma-separated static node list; may be empty
    pub pg_nodes: String,
}

pub struct Reconciler {
    settings: ReconcilerSettings,
    verifier: TopologyVerifier,
    publisher: EndpointPublisher,
    registry: Arc<dyn EndpointRegistry>,
    span: Span,
}

impl Reconciler {
    pub fn new(
        settings: ReconcilerSettings,
        verifier: TopologyVerifier,
        publisher: EndpointPublisher,
        registry: Arc<dyn EndpointRegistry>,
        parent: &Span,
    ) -> Self {
        let span = info_span!(
            parent: parent,
            "reconciler",
            rw_service = %settings.rw_service,
            ro_service = %settings.ro_service
        );
        Self {
            settings,
            verifier,
            publisher,
            registry,
            span,
        }
    }

    /// Perform one discover, verify, decide, publish cycle
    pub async fn run(&self) -> Result<RunOutcome> {
        let span = info_span!(parent: &self.span, "reconcile", run_id = %Uuid::new_v4());
        self.run_inner().instrument(span).await
    }

    /// Resolve candidate nodes: static configuration first, then the stored
    /// signature. Fails with `NoNodesConfigured` when both are empty.
    pub async fn discover_nodes(&self) -> Result<(Vec<Node>, NodeSource)> {
        let nodes = parse_nodes(&self.settings.pg_nodes);
        info!(
            raw_nodes = %self.settings.pg_nodes,
            parsed_count = nodes.len(),
            "Discovered nodes from static configuration"
        );
        if !nodes.is_empty() {
            return Ok((nodes, NodeSource::Static));
        }

        let stored = self.stored_signature().await;
        let nodes = stored
            .as_deref()
            .map(|text| signature::decode(text).into_nodes())
            .unwrap_or_default();

        if nodes.is_empty() {
            error!(
                stored_topology = ?stored,
                reason = "first_run_or_no_annotations",
                "No PostgreSQL nodes configured"
            );
            return Err(EndpointManagerError::NoNodesConfigured);
        }

        info!(
            stored_topology = ?stored,
            node_count = nodes.len(),
            "Recovered candidate nodes from stored topology"
        );
        Ok((nodes, NodeSource::StoredTopology))
    }

    /// Read the last published signature. Any read failure counts as absent.
    async fn stored_signature(&self) -> Option<String> {
        match self
            .registry
            .get_annotation(&self.settings.rw_service, LAST_TOPOLOGY_ANNOTATION)
            .await
        {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    service = %self.settings.rw_service,
                    error = %e,
                    error_type = e.kind(),
                    "Failed to retrieve stored signature"
                );
                None
            }
        }
    }

    async fn run_inner(&self) -> Result<RunOutcome> {
        let start_time = Utc::now();
        info!(start_time = %start_time.to_rfc3339(), "Reconciliation started");

        let (nodes, source) = self.discover_nodes().await?;
        let candidates: Vec<&str> = nodes.iter().map(|n| n.address.as_str()).collect();
        info!(
            node_count = nodes.len(),
            nodes = ?candidates,
            source = source.as_str(),
            "Candidate nodes resolved"
        );

        let verification = self.verifier.verify(&nodes).await;
        let topology = verification.topology;

        let Some(primary) = topology.primary.clone() else {
            error!(
                checked_nodes = verification.total,
                failed_nodes = verification.failed.len(),
                standby_count = topology.standbys.len(),
                ambiguous = verification.primaries_seen.len() > 1,
                "No primary found during verification"
            );
            return Err(EndpointManagerError::NoPrimaryFound {
                checked: verification.total,
                standbys: topology.standbys.len(),
            });
        };

        let signature = Signature::of(&topology);
        info!(signature = %signature, "Created topology signature");

        let stored = self.stored_signature().await;
        info!(stored_signature = ?stored, "Retrieved stored signature");

        if stored.as_deref() == Some(signature.as_str()) {
            info!(
                computed_signature = %signature,
                action = "none_required",
                verified_primary = %primary.address,
                verified_standbys = ?topology.standby_addresses(),
                "Topology unchanged; skipping updates"
            );
            return Ok(RunOutcome::Unchanged { signature });
        }

        let rw_targets = vec![primary.address.clone()];
        let ro_targets = topology.standby_addresses();
        info!(
            rw_service = %self.settings.rw_service,
            rw_targets = ?rw_targets,
            ro_service = %self.settings.ro_service,
            ro_targets = ?ro_targets,
            previous_signature = ?stored,
            signature = %signature,
            "Topology change detected, updating endpoints"
        );

        // Both publishes are attempted even if the first fails
        let rw_ok = self
            .publisher
            .publish(&self.settings.rw_service, &rw_targets, &signature)
            .await;
        let ro_ok = self
            .publisher
            .publish(&self.settings.ro_service, &ro_targets, &signature)
            .await;

        let end_time = Utc::now();
        let duration = (end_time - start_time).num_milliseconds() as f64 / 1000.0;
        let updates_successful = u8::from(rw_ok) + u8::from(ro_ok);
        info!(
            start_time = %start_time.to_rfc3339(),
            end_time = %end_time.to_rfc3339(),
            duration_seconds = duration,
            updates_successful,
            updates_expected = 2,
            primary_ip = %primary.address,
            primary_name = %primary.display_name,
            standby_ips = ?ro_targets,
            current_topology = %signature,
            previous_topology = ?stored,
            success = rw_ok && ro_ok,
            "Reconciliation completed"
        );

        if !(rw_ok && ro_ok) {
            error!(
                rw_update_ok = rw_ok,
                ro_update_ok = ro_ok,
                computed_signature = %signature,
                "Failed to apply endpoint updates"
            );
            return Err(EndpointManagerError::PublishFailed { rw_ok, ro_ok });
        }

        info!(
            rw_service = %self.settings.rw_service,
            ro_service = %self.settings.ro_service,
            signature = %signature,
            "All endpoints updated successfully"
        );
        Ok(RunOutcome::Published {
            signature,
            previous: stored,
        })
    }
}
