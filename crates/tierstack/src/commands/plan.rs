use crate::utils::{self, LoadedStack};
use colored::Colorize;
use tierstack_cloud::{ActionType, Deployer, Plan};

pub async fn handle(loaded: &LoadedStack) -> anyhow::Result<()> {
    utils::print_stack_source(loaded);

    let stack = tierstack_core::synthesize(&loaded.config)?;
    let state = loaded.state_manager().load(&loaded.config.name).await?;
    let (provider, secrets) = loaded.backends(&state);
    let deployer = Deployer::new(&provider, &secrets);

    let plan = deployer.plan(&stack.graph, &state)?;
    print_plan(&plan);

    Ok(())
}

/// Print every action, then the summary line
pub fn print_plan(plan: &Plan) {
    println!();
    for action in &plan.actions {
        let marker = match action.action_type {
            ActionType::Create => "+".green(),
            ActionType::Update => "~".yellow(),
            ActionType::Delete => "-".red(),
            ActionType::Retain => "*".cyan(),
            ActionType::NoOp => "=".dimmed(),
        };
        let line = format!("{} {}", action.id, action.resource_type.to_string().dimmed());
        match action.action_type {
            ActionType::NoOp => println!("  {} {}", marker, line.dimmed()),
            _ => println!("  {} {}", marker, line),
        }
    }
    println!();
    println!("{} {}", "Plan:".bold(), plan.summary());
}
