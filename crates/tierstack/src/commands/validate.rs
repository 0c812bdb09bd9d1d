use crate::utils::{self, LoadedStack};
use colored::Colorize;
use tierstack_core::security::Peer;

pub fn handle(loaded: &LoadedStack) -> anyhow::Result<()> {
    println!("{}", "Validating stack...".blue());
    utils::print_stack_source(loaded);

    let stack = tierstack_core::synthesize(&loaded.config)?;
    let trust = stack.security_groups.trust_graph()?;

    println!("{}", "✓ Stack is valid!".green().bold());
    println!();
    println!("Summary:");

    let network = &stack.network;
    println!(
        "  Network: {} ({}, {} AZs)",
        network.logical_id.cyan(),
        network.cidr,
        network.az_count()
    );
    for tier in &loaded.config.network.tiers {
        println!("    tier {} ({}, /{})", tier.name.cyan(), tier.kind, tier.mask);
        for subnet in network.tier(&tier.name) {
            println!(
                "      - {} {} ({})",
                subnet.logical_id,
                subnet.cidr.to_string().dimmed(),
                subnet.availability_zone
            );
        }
    }

    println!("  Security groups: {}", stack.security_groups.iter().count());
    for group in stack.security_groups.iter() {
        let sources: Vec<String> = group
            .ingress
            .iter()
            .map(|rule| match &rule.source {
                Peer::Cidr(cidr) => format!("{}:{}", cidr, rule.port),
                Peer::Group(id) => format!("{}:{}", id, rule.port),
            })
            .collect();
        let sources = if sources.is_empty() {
            "no ingress".to_string()
        } else {
            sources.join(", ")
        };
        println!("    - {} <- {}", group.logical_id.cyan(), sources);
    }
    println!("  Trust edges:");
    for (from, to) in trust.edges() {
        println!("    {} -> {}", from, to);
    }

    println!(
        "  Compute: {} x {} ({})",
        stack.compute.len(),
        loaded.config.compute.instance_type,
        stack.compute.placement
    );
    for instance in &stack.compute.instances {
        println!("    - {} in {}", instance.logical_id.cyan(), instance.subnet_id);
    }
    println!(
        "  Bastion: {} in {}",
        stack.bastion.logical_id.cyan(),
        stack.bastion.subnet_id
    );

    let db = &loaded.config.database;
    println!(
        "  Databases: {} x {} ({} {}, removal: {})",
        stack.database.len(),
        db.instance_class,
        db.engine,
        db.engine_version,
        db.removal_policy
    );
    for instance in &stack.database.instances {
        println!("    - {} in {}", instance.logical_id.cyan(), instance.subnet_id);
    }

    println!(
        "  Load balancer: {} -> {} targets",
        stack.load_balancer.logical_id.cyan(),
        stack.load_balancer.targets.len()
    );
    println!("  Roles:");
    for role in stack.identities.roles() {
        println!("    - {}", role.logical_id.cyan());
    }
    println!("  Resources: {}", stack.graph.len());

    Ok(())
}
