//! Domain snapshots and the `xl list` parser.

use crate::error::{Result, XenError};
use crate::state::{DomainState, InvalidStateCode};
use serde::Serialize;
use std::fmt;

/// Snapshot of a domain as reported by one `xl list` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Domain {
    /// Hypervisor-assigned identifier, valid between create and destroy
    pub id: u32,
    /// Domain name
    pub name: String,
    /// Memory in MiB
    pub memory: u64,
    /// Number of virtual CPUs
    pub vcpus: u32,
    /// State flags
    #[serde(serialize_with = "serialize_state")]
    pub state: DomainState,
    /// Cumulative CPU time in seconds
    pub time: f64,
}

fn serialize_state<S: serde::Serializer>(
    state: &DomainState,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(state)
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (id {}, {} MiB, {} vcpus, state {})",
            self.name, self.id, self.memory, self.vcpus, self.state
        )
    }
}

impl Domain {
    /// Parse one data row of `xl list`.
    ///
    /// A row has exactly six whitespace separated fields:
    /// name, id, memory, vcpus, state code and time.
    pub fn from_list_line(line: &str) -> std::result::Result<Self, String> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let &[name, id, memory, vcpus, state, time] = fields.as_slice() else {
            return Err(format!("expected 6 fields, found {}", fields.len()));
        };

        Ok(Self {
            name: name.to_string(),
            id: id.parse().map_err(|e| format!("invalid id '{id}': {e}"))?,
            memory: memory
                .parse()
                .map_err(|e| format!("invalid memory '{memory}': {e}"))?,
            vcpus: vcpus
                .parse()
                .map_err(|e| format!("invalid vcpus '{vcpus}': {e}"))?,
            state: state
                .parse()
                .map_err(|e: InvalidStateCode| e.to_string())?,
            time: time.parse().map_err(|e| format!("invalid time '{time}': {e}"))?,
        })
    }
}

/// Parse the full output of `xl list`.
///
/// The first line is a header and is always discarded. Blank lines are
/// skipped. Any malformed row fails the whole listing.
pub fn parse_listing(text: &str) -> Result<Vec<Domain>> {
    text.lines()
        .enumerate()
        .skip(1)
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            Domain::from_list_line(line).map_err(|reason| XenError::Parse {
                line: idx + 1,
                text: line.to_string(),
                reason,
            })
        })
        .collect()
}
