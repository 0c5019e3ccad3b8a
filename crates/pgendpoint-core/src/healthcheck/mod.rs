//! Node role probing
//!
//! A probe is a two-stage check:
//! 1. a cheap TCP connect under a short timeout, never retried
//! 2. `SELECT pg_is_in_recovery()` under its own timeout, retried with
//!    exponential backoff and jitter on transient errors
//!
//! Every failure is downgraded to [`ProbeOutcome::Unknown`]; nothing here
//! returns an error to the caller.

pub mod checker;
pub mod prober;
pub mod retry;

use pgendpoint_common::{Node, ProbeOutcome};

pub use checker::{Credentials, PostgresRecoveryChecker, RecoveryChecker};
pub use prober::{PostgresProber, ProbeSettings};
pub use retry::RetryPolicy;

/// Classifies the role of a single node
#[async_trait::async_trait]
pub trait NodeProber: Send + Sync {
    /// Probe one node. Must not panic and must not propagate errors.
    async fn probe(&self, node: &Node) -> ProbeOutcome;
}
