//! pgendpoint core - topology verification and endpoint reconciliation
//!
//! - [`healthcheck`]: per-node role probing (TCP reachability plus recovery query)
//! - [`verifier`]: bounded concurrent probing and the single-primary rule
//! - [`registry`]: the Endpoints store behind a trait, with Kubernetes and dry-run adapters
//! - [`publisher`]: payload construction and per-service writes
//! - [`reconciler`]: the discover, verify, decide, publish cycle

pub mod healthcheck;
pub mod publisher;
pub mod reconciler;
pub mod registry;
pub mod verifier;

pub use healthcheck::{
    Credentials, NodeProber, PostgresProber, PostgresRecoveryChecker, ProbeSettings,
    RecoveryChecker, RetryPolicy,
};
pub use publisher::{EndpointPublisher, build_payload};
pub use reconciler::{NodeSource, Reconciler, ReconcilerSettings};
pub use registry::{DryRunRegistry, EndpointRegistry, KubeEndpointRegistry};
pub use verifier::{TopologyVerifier, Verification, VerifierSettings};
