//! Endpoint publisher
//!
//! Turns a target address list into a registry write. Each logical service
//! (read-write, read-only) is published independently.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::core::v1::{EndpointAddress, EndpointPort, EndpointSubset, Endpoints};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use pgendpoint_common::{DEFAULT_PG_PORT, LAST_TOPOLOGY_ANNOTATION, LAST_UPDATE_ANNOTATION, Signature};
use tracing::{Instrument, Span, error, info, info_span};

use crate::registry::EndpointRegistry;

/// Port name advertised on every published subset
pub const PORT_NAME: &str = "postgresql";

/// Transport advertised on every published subset
pub const PORT_PROTOCOL: &str = "TCP";

/// Build the declarative target state for one service.
///
/// An empty target list produces `subsets: []`, which clears the service.
pub fn build_payload(
    targets: &[String],
    signature: &Signature,
    port: u16,
    published_at: DateTime<Utc>,
) -> Endpoints {
    let annotations = BTreeMap::from([
        (
            LAST_TOPOLOGY_ANNOTATION.to_string(),
            signature.as_str().to_string(),
        ),
        (
            LAST_UPDATE_ANNOTATION.to_string(),
            published_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        ),
    ]);

    let subsets = if targets.is_empty() {
        Vec::new()
    } else {
        vec![EndpointSubset {
            addresses: Some(
                targets
                    .iter()
                    .map(|ip| EndpointAddress {
                        ip: ip.clone(),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ports: Some(vec![EndpointPort {
                port: i32::from(port),
                protocol: Some(PORT_PROTOCOL.to_string()),
                name: Some(PORT_NAME.to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }]
    };

    Endpoints {
        metadata: ObjectMeta {
            annotations: Some(annotations),
            ..Default::default()
        },
        subsets: Some(subsets),
    }
}

/// Publishes target sets through an [`EndpointRegistry`]
pub struct EndpointPublisher {
    registry: Arc<dyn EndpointRegistry>,
    port: u16,
    span: Span,
}

impl EndpointPublisher {
    pub fn new(registry: Arc<dyn EndpointRegistry>, port: u16, parent: &Span) -> Self {
        Self {
            registry,
            port,
            span: info_span!(parent: parent, "publisher"),
        }
    }

    pub fn with_default_port(registry: Arc<dyn EndpointRegistry>, parent: &Span) -> Self {
        Self::new(registry, DEFAULT_PG_PORT, parent)
    }

    /// Replace the target set of `service`. Errors are logged, not returned;
    /// retry policy belongs to the registry adapter.
    pub async fn publish(&self, service: &str, targets: &[String], signature: &Signature) -> bool {
        let span = info_span!(parent: &self.span, "publish", service = %service);
        async {
            let payload = build_payload(targets, signature, self.port, Utc::now());
            match self.registry.patch_endpoints(service, &payload).await {
                Ok(()) => {
                    info!(
                        target_ips = ?targets,
                        endpoint_count = targets.len(),
                        topology_signature = %signature,
                        "Endpoint updated successfully"
                    );
                    true
                }
                Err(e) => {
                    error!(
                        target_ips = ?targets,
                        error = %e,
                        error_type = e.kind(),
                        "Failed to update endpoint"
                    );
                    false
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pgendpoint_common::{EndpointManagerError, Result};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRegistry {
        fail: bool,
        patches: Mutex<Vec<(String, Endpoints)>>,
    }

    #[async_trait::async_trait]
    impl EndpointRegistry for RecordingRegistry {
        async fn get_annotation(&self, _service: &str, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }

        async fn patch_endpoints(&self, service: &str, payload: &Endpoints) -> Result<()> {
            if self.fail {
                return Err(EndpointManagerError::Registry("forbidden".to_string()));
            }
            self.patches
                .lock()
                .unwrap()
                .push((service.to_string(), payload.clone()));
            Ok(())
        }
    }

    fn signature() -> Signature {
        Signature::encode(Some("10.0.0.1"), ["10.0.0.2", "10.0.0.3"])
    }

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn test_payload_shape() {
        let payload = build_payload(
            &["10.0.0.2".to_string(), "10.0.0.3".to_string()],
            &signature(),
            5432,
            fixed_time(),
        );
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(
            json["metadata"]["annotations"]["postgres.discovery/last-topology"],
            "primary:10.0.0.1;standbys:10.0.0.2,10.0.0.3"
        );
        assert_eq!(
            json["metadata"]["annotations"]["postgres.discovery/last-update"],
            "2026-01-02T03:04:05.000000Z"
        );
        let subset = &json["subsets"][0];
        assert_eq!(subset["addresses"][0]["ip"], "10.0.0.2");
        assert_eq!(subset["addresses"][1]["ip"], "10.0.0.3");
        assert_eq!(subset["ports"][0]["port"], 5432);
        assert_eq!(subset["ports"][0]["protocol"], "TCP");
        assert_eq!(subset["ports"][0]["name"], "postgresql");
    }

    #[test]
    fn test_empty_targets_clear_subsets() {
        let payload = build_payload(&[], &signature(), 5432, fixed_time());
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["subsets"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_publish_success() {
        let registry = Arc::new(RecordingRegistry::default());
        let publisher = EndpointPublisher::with_default_port(registry.clone(), &Span::none());

        let ok = publisher
            .publish("pg-rw", &["10.0.0.1".to_string()], &signature())
            .await;

        assert!(ok);
        let patches = registry.patches.lock().unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].0, "pg-rw");
    }

    #[tokio::test]
    async fn test_publish_failure_returns_false() {
        let registry = Arc::new(RecordingRegistry {
            fail: true,
            ..Default::default()
        });
        let publisher = EndpointPublisher::new(registry, 5432, &Span::none());

        let ok = publisher
            .publish("pg-ro", &["10.0.0.2".to_string()], &signature())
            .await;
        assert!(!ok);
    }
}
