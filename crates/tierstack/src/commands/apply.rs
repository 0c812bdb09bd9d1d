use crate::commands::plan::print_plan;
use crate::utils::{self, LoadedStack};
use colored::Colorize;
use tierstack_cloud::{ActionType, Deployer};

pub async fn handle(loaded: &LoadedStack, yes: bool) -> anyhow::Result<()> {
    println!("{}", "Applying stack...".blue().bold());
    utils::print_stack_source(loaded);

    let stack = tierstack_core::synthesize(&loaded.config)?;

    let manager = loaded.state_manager();
    let lock = manager.acquire_lock().await?;
    let mut state = manager.load(&loaded.config.name).await?;
    let (provider, secrets) = loaded.backends(&state);
    let deployer = Deployer::new(&provider, &secrets);

    let plan = deployer.plan(&stack.graph, &state)?;
    print_plan(&plan);

    if !plan.has_changes {
        println!();
        println!("{}", "✓ Nothing to do, the stack is up to date".green());
        lock.release().await?;
        return Ok(());
    }

    // confirmation (without --yes)
    if !yes {
        println!();
        println!("To apply these changes, pass the --yes option");
        lock.release().await?;
        return Ok(());
    }

    println!();
    let outcome = deployer.apply(&stack.graph, &mut state).await;
    // successes are saved even when a later level failed
    manager.save(&state).await?;
    lock.release().await?;
    let result = outcome?;

    println!(
        "{} {} resources created, {} updated, {} deleted in {}ms",
        "✓".green().bold(),
        result.count(ActionType::Create),
        result.count(ActionType::Update),
        result.count(ActionType::Delete),
        result.duration_ms
    );
    println!(
        "State: {}",
        manager.state_path().display().to_string().cyan()
    );

    Ok(())
}
