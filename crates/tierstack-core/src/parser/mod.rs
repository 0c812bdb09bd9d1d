//! KDL parser
//!
//! Reads a stack file into a [`StackConfig`]. Every top-level node is
//! optional; anything omitted keeps its default.

mod nodes;

use crate::error::{Result, StackError};
use crate::model::StackConfig;
use kdl::KdlDocument;
use std::fs;
use std::path::Path;

/// Parse a stack file
pub fn parse_stack_file<P: AsRef<Path>>(path: P) -> Result<StackConfig> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| StackError::IoError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_stack_string(&content)
}

/// Parse stack file content
pub fn parse_stack_string(content: &str) -> Result<StackConfig> {
    let doc: KdlDocument = content.parse()?;
    let mut config = StackConfig::default();
    let mut seen = Vec::new();

    for node in doc.nodes() {
        let name = node.name().value();
        if seen.contains(&name) {
            return Err(StackError::InvalidConfig(format!(
                "node '{}' declared more than once",
                name
            )));
        }
        seen.push(name);

        match name {
            "stack" => nodes::parse_stack(node, &mut config)?,
            "network" => config.network = nodes::parse_network(node)?,
            "compute" => config.compute = nodes::parse_compute(node)?,
            "database" => config.database = nodes::parse_database(node)?,
            "ci-trust" => config.ci_trust = nodes::parse_ci_trust(node)?,
            other => {
                return Err(StackError::InvalidConfig(format!(
                    "unknown node '{}'",
                    other
                )));
            }
        }
    }

    Ok(config)
}
