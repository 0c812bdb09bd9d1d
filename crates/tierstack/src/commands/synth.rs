use crate::utils::LoadedStack;
use colored::Colorize;
use std::path::Path;

pub fn handle(loaded: &LoadedStack, output: Option<&Path>) -> anyhow::Result<()> {
    let stack = tierstack_core::synthesize(&loaded.config)?;
    let json = serde_json::to_string_pretty(&stack.graph)?;

    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            println!(
                "{} {} resources written to {}",
                "✓".green(),
                stack.graph.len(),
                path.display().to_string().cyan()
            );
        }
        // stdout stays pure JSON so it can be piped
        None => println!("{}", json),
    }

    Ok(())
}
