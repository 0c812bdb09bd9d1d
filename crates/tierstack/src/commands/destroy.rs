use crate::commands::plan::print_plan;
use crate::utils::{self, LoadedStack};
use colored::Colorize;
use tierstack_cloud::{ActionType, Deployer};

pub async fn handle(loaded: &LoadedStack, yes: bool) -> anyhow::Result<()> {
    println!("{}", "Destroying stack...".yellow().bold());
    utils::print_stack_source(loaded);

    let manager = loaded.state_manager();
    let lock = manager.acquire_lock().await?;
    let mut state = manager.load(&loaded.config.name).await?;

    if state.is_empty() {
        println!("{}", "Nothing to destroy".dimmed());
        lock.release().await?;
        return Ok(());
    }

    let (provider, secrets) = loaded.backends(&state);
    let deployer = Deployer::new(&provider, &secrets);

    let plan = deployer.destroy_plan(&state)?;
    print_plan(&plan);

    if !plan.has_changes {
        println!();
        println!("{}", "Only retained resources remain".dimmed());
        lock.release().await?;
        return Ok(());
    }

    // confirmation (without --yes)
    if !yes {
        println!();
        println!(
            "{}",
            "Warning: resources with removal policy 'destroy' are deleted without a snapshot."
                .yellow()
        );
        println!("To destroy, pass the --yes option");
        lock.release().await?;
        return Ok(());
    }

    println!();
    let outcome = deployer.destroy(&mut state).await;
    manager.save(&state).await?;
    lock.release().await?;
    let result = outcome?;

    println!(
        "{} {} resources deleted in {}ms",
        "✓".green().bold(),
        result.succeeded.len(),
        result.duration_ms
    );
    let retained = plan.actions_by_type(ActionType::Retain);
    if !retained.is_empty() {
        println!("Retained:");
        for action in retained {
            println!("  ~ {}", action.id.yellow());
        }
    }

    Ok(())
}
