//! Cluster topology model
//!
//! A [`Node`] is identified by its address alone; its display name is derived
//! from the address and is only used to label log events.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

/// Prefix used when deriving a node display name from its address
pub const NODE_NAME_PREFIX: &str = "pg";

/// A database node believed to belong to the replicated cluster
#[derive(Clone, Debug)]
pub struct Node {
    pub address: String,
    pub display_name: String,
}

impl Node {
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        let display_name = display_name(&address);
        Self {
            address,
            display_name,
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Node {}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Node {
    fn cmp(&self, other: &Self) -> Ordering {
        self.address.cmp(&other.address)
    }
}

impl std::hash::Hash for Node {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.display_name, self.address)
    }
}

/// Derive a stable display name from a node address.
///
/// `10.0.0.1` becomes `pg-10-0-0-1`; every non-alphanumeric character is
/// replaced with `-`, so IPv6 and host names map the same way.
pub fn display_name(address: &str) -> String {
    let body: String = address
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("{}-{}", NODE_NAME_PREFIX, body)
}

/// Parse a comma-separated address list into nodes.
///
/// Entries are trimmed, empty entries are dropped and repeated addresses keep
/// only their first occurrence.
pub fn parse_nodes(raw: &str) -> Vec<Node> {
    let mut seen = BTreeSet::new();
    raw.split(',')
        .map(str::trim)
        .filter(|address| !address.is_empty())
        .filter(|address| seen.insert(address.to_string()))
        .map(Node::new)
        .collect()
}

/// Why a probe could not classify a node
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnknownReason {
    /// Transport connect failed or timed out
    Unreachable(String),
    /// The probe exceeded the verifier's ceiling
    Timeout,
    /// The recovery query failed after all retries
    QueryFailed(String),
    /// The recovery query returned no usable value
    Indeterminate,
}

impl Display for UnknownReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            UnknownReason::Unreachable(msg) => write!(f, "unreachable: {}", msg),
            UnknownReason::Timeout => write!(f, "probe timed out"),
            UnknownReason::QueryFailed(msg) => write!(f, "query failed: {}", msg),
            UnknownReason::Indeterminate => write!(f, "recovery state indeterminate"),
        }
    }
}

/// Result of probing a single node. `Unknown` never implies a role.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    Primary,
    Standby,
    Unknown(UnknownReason),
}

impl ProbeOutcome {
    /// Map the answer of `pg_is_in_recovery()` to an outcome
    pub fn from_recovery(in_recovery: Option<bool>) -> Self {
        match in_recovery {
            Some(true) => ProbeOutcome::Standby,
            Some(false) => ProbeOutcome::Primary,
            None => ProbeOutcome::Unknown(UnknownReason::Indeterminate),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeOutcome::Primary => "PRIMARY",
            ProbeOutcome::Standby => "STANDBY",
            ProbeOutcome::Unknown(_) => "UNKNOWN",
        }
    }
}

/// Observed mapping of nodes to roles at one point in time.
///
/// `standbys` is ordered by address. `primary` is `None` when no node, or more
/// than one node, reported itself as primary.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Topology {
    pub primary: Option<Node>,
    pub standbys: BTreeSet<Node>,
}

impl Topology {
    pub fn primary_address(&self) -> Option<&str> {
        self.primary.as_ref().map(|n| n.address.as_str())
    }

    pub fn standby_addresses(&self) -> Vec<String> {
        self.standbys.iter().map(|n| n.address.clone()).collect()
    }

    pub fn healthy_count(&self) -> usize {
        usize::from(self.primary.is_some()) + self.standbys.len()
    }
}
