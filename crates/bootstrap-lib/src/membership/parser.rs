//! Decoder for the position-encoded `DriverStatus` node listing
//!
//! Swarm reports its nodes as a flat list of key/value rows: a
//! `("Nodes", count)` sentinel, then four rows per node. The first row of a
//! block is `(name, address)`; the other three are display strings for the
//! container count, reserved CPUs and reserved memory, and are skipped.

use crate::error::{BootstrapError, Result};
use crate::models::{ClusterNode, DiscoveryReport};

/// Key of the row announcing the node count
pub const NODES_SENTINEL: &str = "Nodes";

/// Rows per node block
pub const ROWS_PER_NODE: usize = 4;

/// Parse the node listing out of a discovery report
///
/// A report that does not start with the exact sentinel describes no nodes
/// and yields an empty list.
pub fn parse_report(report: &DiscoveryReport) -> Result<Vec<ClusterNode>> {
    let (key, value) = match report.row(0) {
        Some(row) => row,
        None => return Ok(Vec::new()),
    };
    if key != NODES_SENTINEL {
        return Ok(Vec::new());
    }

    let count: usize = value.trim().parse().map_err(|_| {
        BootstrapError::MalformedReport(format!("node count {:?} is not a number", value))
    })?;
    if count == 0 {
        return Ok(Vec::new());
    }

    let required = count
        .checked_mul(ROWS_PER_NODE)
        .and_then(|rows| rows.checked_add(1))
        .ok_or_else(|| BootstrapError::MalformedReport(format!("node count {} overflows", count)))?;
    if report.len() < required {
        return Err(BootstrapError::MalformedReport(format!(
            "report declares {} nodes but holds {} rows, expected at least {}",
            count,
            report.len(),
            required
        )));
    }

    Ok(report.rows()[1..required]
        .chunks_exact(ROWS_PER_NODE)
        .map(|block| {
            let (name, address) = &block[0];
            ClusterNode::new(name.clone(), address.clone())
        })
        .collect())
}
