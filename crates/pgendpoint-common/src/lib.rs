//! pgendpoint common - shared types for the PostgreSQL endpoint manager
//!
//! This crate provides:
//! - The topology model (`Node`, `ProbeOutcome`, `Topology`)
//! - The canonical topology signature codec
//! - The error taxonomy and run outcome types

pub mod error;
pub mod model;
pub mod signature;

pub use error::{EndpointManagerError, Result};
pub use model::{Node, ProbeOutcome, Topology, UnknownReason, display_name, parse_nodes};
pub use signature::{DecodedTopology, Signature};

/// Annotation holding the last published topology signature
pub const LAST_TOPOLOGY_ANNOTATION: &str = "postgres.discovery/last-topology";

/// Annotation holding the time of the last publish
pub const LAST_UPDATE_ANNOTATION: &str = "postgres.discovery/last-update";

/// Default PostgreSQL port
pub const DEFAULT_PG_PORT: u16 = 5432;

/// Outcome of a successful reconciliation run
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Both target sets were written
    Published {
        signature: Signature,
        previous: Option<String>,
    },
    /// The stored signature already matched; nothing was written
    Unchanged { signature: Signature },
}

impl RunOutcome {
    pub fn signature(&self) -> &Signature {
        match self {
            RunOutcome::Published { signature, .. } | RunOutcome::Unchanged { signature } => {
                signature
            }
        }
    }
}
