//! Topology verification
//!
//! Probes every candidate node concurrently through a bounded pool and folds
//! the outcomes into a single [`Topology`]. Aggregation is a set union plus a
//! count of primaries, so the result never depends on completion order.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use pgendpoint_common::{Node, ProbeOutcome, Topology, UnknownReason};
use tokio::time::timeout;
use tracing::{Instrument, Span, error, info, info_span, warn};

use crate::healthcheck::{NodeProber, ProbeSettings};

/// Default number of concurrent probes
pub const DEFAULT_POOL_SIZE: usize = 3;

/// Default slack added on top of the two probe-stage timeouts.
///
/// The ceiling covers one query attempt, not the whole retry budget. With the
/// defaults (1 s + 5 s + 5 s) a server that hangs on every query is cut off
/// before its retries are exhausted and reported as `Timeout` rather than
/// `QueryFailed`.
pub const DEFAULT_PROBE_SLACK: Duration = Duration::from_secs(5);

/// Verifier configuration
#[derive(Clone, Debug)]
pub struct VerifierSettings {
    pub pool_size: usize,
    /// Upper bound for one probe; slower probes count as `Unknown(Timeout)`
    pub probe_ceiling: Duration,
}

impl VerifierSettings {
    /// Ceiling = TCP timeout + query timeout + slack
    pub fn from_probe_settings(probe: &ProbeSettings, pool_size: usize, slack: Duration) -> Self {
        Self {
            pool_size: pool_size.max(1),
            probe_ceiling: probe.tcp_connect_timeout + probe.query_timeout + slack,
        }
    }
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self::from_probe_settings(&ProbeSettings::default(), DEFAULT_POOL_SIZE, DEFAULT_PROBE_SLACK)
    }
}

/// Result of one verification pass
#[derive(Clone, Debug, Default)]
pub struct Verification {
    pub topology: Topology,
    /// Number of candidate nodes probed
    pub total: usize,
    /// Nodes whose probe returned `Unknown`, ordered by address
    pub failed: Vec<(Node, UnknownReason)>,
    /// Every node that reported itself as primary, ordered by address
    pub primaries_seen: Vec<Node>,
}

impl Verification {
    /// Fold probe results into a verification.
    ///
    /// More than one primary clears `topology.primary`.
    pub fn aggregate<I>(total: usize, results: I) -> Self
    where
        I: IntoIterator<Item = (Node, ProbeOutcome)>,
    {
        let mut primaries = BTreeSet::new();
        let mut standbys = BTreeSet::new();
        let mut failed = Vec::new();

        for (node, outcome) in results {
            match outcome {
                ProbeOutcome::Primary => {
                    primaries.insert(node);
                }
                ProbeOutcome::Standby => {
                    standbys.insert(node);
                }
                ProbeOutcome::Unknown(reason) => failed.push((node, reason)),
            }
        }
        failed.sort_by(|a, b| a.0.cmp(&b.0));

        let primary = if primaries.len() == 1 {
            primaries.iter().next().cloned()
        } else {
            None
        };

        Self {
            topology: Topology { primary, standbys },
            total,
            failed,
            primaries_seen: primaries.into_iter().collect(),
        }
    }

    /// More than one node claimed to be primary
    pub fn is_ambiguous(&self) -> bool {
        self.primaries_seen.len() > 1
    }

    pub fn successful(&self) -> usize {
        self.total.saturating_sub(self.failed.len())
    }

    pub fn failed_addresses(&self) -> Vec<&str> {
        self.failed.iter().map(|(n, _)| n.address.as_str()).collect()
    }
}

/// Fans probes out over a bounded pool and aggregates the results
pub struct TopologyVerifier {
    prober: Arc<dyn NodeProber>,
    settings: VerifierSettings,
    span: Span,
}

impl TopologyVerifier {
    pub fn new(prober: Arc<dyn NodeProber>, settings: VerifierSettings, parent: &Span) -> Self {
        let span = info_span!(parent: parent, "verifier", pool_size = settings.pool_size);
        Self {
            prober,
            settings,
            span,
        }
    }

    pub async fn verify(&self, nodes: &[Node]) -> Verification {
        self.verify_inner(nodes).instrument(self.span.clone()).await
    }

    async fn verify_inner(&self, nodes: &[Node]) -> Verification {
        info!(total_nodes = nodes.len(), "Starting topology verification");

        let prober = &self.prober;
        let ceiling = self.settings.probe_ceiling;

        // Dropping a timed-out probe future cancels its in-flight I/O
        let results: Vec<(Node, ProbeOutcome)> = futures::stream::iter(nodes.iter().cloned())
            .map(|node| async move {
                let outcome = match timeout(ceiling, prober.probe(&node)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(
                            node_ip = %node.address,
                            node_name = %node.display_name,
                            ceiling_ms = ceiling.as_millis() as u64,
                            "Probe exceeded ceiling"
                        );
                        ProbeOutcome::Unknown(UnknownReason::Timeout)
                    }
                };
                (node, outcome)
            })
            .buffer_unordered(self.settings.pool_size.max(1))
            .collect()
            .await;

        let verification = Verification::aggregate(nodes.len(), results);

        for (node, reason) in &verification.failed {
            error!(
                node_ip = %node.address,
                node_name = %node.display_name,
                error = %reason,
                "Node connection failed"
            );
        }

        if verification.is_ambiguous() {
            let primaries: Vec<&str> = verification
                .primaries_seen
                .iter()
                .map(|n| n.address.as_str())
                .collect();
            error!(
                primaries = ?primaries,
                "Multiple primaries detected, refusing to choose a writer"
            );
        }

        if !verification.failed.is_empty() {
            warn!(
                total_nodes = verification.total,
                successful_nodes = verification.successful(),
                failed_nodes = verification.failed.len(),
                failed_ips = ?verification.failed_addresses(),
                primary_found = verification.topology.primary.is_some(),
                standbys_found = verification.topology.standbys.len(),
                "Topology verification completed with failures"
            );
        }

        info!(
            primary = ?verification.topology.primary_address(),
            standbys = ?verification.topology.standby_addresses(),
            total_healthy_nodes = verification.topology.healthy_count(),
            topology_valid = verification.topology.primary.is_some(),
            "Topology verification completed"
        );

        verification
    }
}
