//! Application startup: logging and adapter wiring

pub mod logging;

use std::sync::Arc;

use anyhow::Context;
use pgendpoint_common::{Result, RunOutcome};
use pgendpoint_core::healthcheck::{PostgresProber, PostgresRecoveryChecker};
use pgendpoint_core::publisher::EndpointPublisher;
use pgendpoint_core::reconciler::Reconciler;
use pgendpoint_core::registry::{DryRunRegistry, EndpointRegistry, KubeEndpointRegistry};
use pgendpoint_core::verifier::TopologyVerifier;
use tracing::{Span, info, warn};

use crate::model::config::Configuration;

pub use logging::{LoggingConfig, LoggingGuard, init_logging};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_INTERRUPTED: u8 = 130;

/// Process exit status for a finished run: 0 when the endpoints are current,
/// 1 for any engine error
pub fn exit_status(result: &Result<RunOutcome>) -> u8 {
    match result {
        Ok(RunOutcome::Published { .. } | RunOutcome::Unchanged { .. }) => EXIT_SUCCESS,
        Err(_) => EXIT_FAILURE,
    }
}

/// Build the registry adapter.
///
/// In dry-run mode a missing cluster connection is tolerated: reads then see
/// no stored state.
pub async fn build_registry(
    configuration: &Configuration,
    namespace: &str,
) -> anyhow::Result<Arc<dyn EndpointRegistry>> {
    if configuration.dry_run() {
        let inner: Option<Arc<dyn EndpointRegistry>> = match kube::Client::try_default().await {
            Ok(client) => Some(
                Arc::new(KubeEndpointRegistry::new(client, namespace)) as Arc<dyn EndpointRegistry>
            ),
            Err(e) => {
                warn!(error = %e, "Kubernetes client unavailable; dry run starts without stored state");
                None
            }
        };
        return Ok(Arc::new(DryRunRegistry::new(inner)));
    }

    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    Ok(Arc::new(KubeEndpointRegistry::new(client, namespace)))
}

/// Wire the concrete prober, verifier, publisher and registry into an engine
pub async fn build_reconciler(
    configuration: &Configuration,
    parent: &Span,
) -> anyhow::Result<Reconciler> {
    let namespace = configuration.namespace();
    let registry = build_registry(configuration, &namespace).await?;

    let probe_settings = configuration.probe_settings();
    let verifier_settings = configuration.verifier_settings(&probe_settings);
    let reconciler_settings = configuration.reconciler_settings();

    info!(
        namespace = %namespace,
        rw_service = %reconciler_settings.rw_service,
        ro_service = %reconciler_settings.ro_service,
        pg_nodes = %reconciler_settings.pg_nodes,
        pg_port = probe_settings.port,
        max_workers = verifier_settings.pool_size,
        credentials = ?probe_settings.credentials,
        dry_run = configuration.dry_run(),
        "Endpoint manager configured"
    );

    let checker = Arc::new(PostgresRecoveryChecker::new(probe_settings.query_timeout));
    let port = probe_settings.port;
    let prober = Arc::new(PostgresProber::new(probe_settings, checker, parent));
    let verifier = TopologyVerifier::new(prober, verifier_settings, parent);
    let publisher = EndpointPublisher::new(registry.clone(), port, parent);

    Ok(Reconciler::new(
        reconciler_settings,
        verifier,
        publisher,
        registry,
        parent,
    ))
}
