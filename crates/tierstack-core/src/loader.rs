//! Stack loading: parse the file and check it synthesizes

use crate::error::Result;
use crate::model::StackConfig;
use crate::orchestrator::{SynthesizedStack, synthesize};
use crate::parser::parse_stack_file;
use std::path::Path;
use tracing::{info, instrument};

/// Load the stack parameters from `path`
#[instrument(skip(path), fields(path = %path.display()))]
pub fn load_stack(path: &Path) -> Result<StackConfig> {
    let config = parse_stack_file(path)?;
    info!(
        stack = %config.name,
        region = %config.region,
        tiers = config.network.tiers.len(),
        "Stack file loaded"
    );
    Ok(config)
}

/// Load and synthesize in one step
#[instrument(skip(path), fields(path = %path.display()))]
pub fn load_and_synthesize(path: &Path) -> Result<(StackConfig, SynthesizedStack)> {
    let config = load_stack(path)?;
    let stack = synthesize(&config)?;
    Ok((config, stack))
}
