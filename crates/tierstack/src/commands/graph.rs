use crate::utils::{self, LoadedStack};
use colored::Colorize;

pub fn handle(loaded: &LoadedStack) -> anyhow::Result<()> {
    utils::print_stack_source(loaded);
    let stack = tierstack_core::synthesize(&loaded.config)?;

    println!();
    println!("{}", "Task stages:".bold());
    for (i, stage) in stack.stages.iter().enumerate() {
        let tasks: Vec<String> = stage.iter().map(|t| t.to_string()).collect();
        println!("  {}. {}", i + 1, tasks.join(", ").cyan());
    }

    println!();
    println!("{}", "Resource levels:".bold());
    for (i, level) in stack.graph.levels()?.iter().enumerate() {
        println!("  level {} ({} resources)", i, level.len());
        for resource in level {
            println!(
                "    - {} {}",
                resource.logical_id.cyan(),
                resource.resource_type.to_string().dimmed()
            );
        }
    }

    Ok(())
}
