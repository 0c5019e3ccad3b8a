//! Canonical topology signature
//!
//! Format: `primary:<addr-or-empty>;standbys:<sorted,comma-joined>`.
//!
//! The signature doubles as the change-detection key and as the persisted
//! fallback topology, so decoding is lenient: unknown or malformed segments
//! are skipped instead of failing.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use crate::model::{Node, Topology};

const PRIMARY_SEGMENT: &str = "primary";
const STANDBYS_SEGMENT: &str = "standbys";
const SEGMENT_SEPARATOR: char = ';';
const ADDRESS_SEPARATOR: char = ',';

/// Canonical encoding of a topology
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    /// Encode a primary address and a set of standby addresses.
    ///
    /// Standbys are sorted and de-duplicated, so input order never changes the
    /// result.
    pub fn encode<'a, I>(primary: Option<&str>, standbys: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let standbys: BTreeSet<&str> = standbys.into_iter().collect();
        let standby_list = standbys.into_iter().collect::<Vec<_>>().join(",");
        Signature(format!(
            "{}:{}{}{}:{}",
            PRIMARY_SEGMENT,
            primary.unwrap_or(""),
            SEGMENT_SEPARATOR,
            STANDBYS_SEGMENT,
            standby_list
        ))
    }

    /// Signature of a verified topology. Display names do not contribute.
    pub fn of(topology: &Topology) -> Self {
        Self::encode(
            topology.primary_address(),
            topology.standbys.iter().map(|n| n.address.as_str()),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Decode this signature back into addresses
    pub fn decode(&self) -> DecodedTopology {
        decode(&self.0)
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Signature {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Addresses recovered from a stored signature
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodedTopology {
    pub primary: Option<String>,
    pub standbys: Vec<String>,
}

impl DecodedTopology {
    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.standbys.is_empty()
    }

    /// Synthesize candidate nodes, primary first, without repeats
    pub fn into_nodes(self) -> Vec<Node> {
        let mut seen = BTreeSet::new();
        self.primary
            .into_iter()
            .chain(self.standbys)
            .filter(|address| seen.insert(address.clone()))
            .map(Node::new)
            .collect()
    }
}

/// Parse stored signature text.
///
/// When a segment repeats, the last occurrence wins.
pub fn decode(text: &str) -> DecodedTopology {
    let mut decoded = DecodedTopology::default();

    for segment in text
        .split(SEGMENT_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        let Some((name, value)) = segment.split_once(':') else {
            continue;
        };
        match name.trim() {
            PRIMARY_SEGMENT => {
                let value = value.trim();
                decoded.primary = (!value.is_empty()).then(|| value.to_string());
            }
            STANDBYS_SEGMENT => {
                let standbys: BTreeSet<String> = value
                    .split(ADDRESS_SEPARATOR)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                decoded.standbys = standbys.into_iter().collect();
            }
            _ => {}
        }
    }

    decoded
}
