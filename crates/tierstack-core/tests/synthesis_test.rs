use std::collections::BTreeSet;
use tierstack_core::identity::{GET_SECRET_VALUE, RDS_CONNECT};
use tierstack_core::security::{BASTION_GROUP, COMPUTE_GROUP};
use tierstack_core::{
    PlacementPolicy, ResourceType, StackConfig, StackError, Synthesizer, Task, TaskGraph, TierKind,
    Token, parse_stack_string, synthesize, token,
};

fn config_with(compute_fleet: usize, db_fleet: usize) -> StackConfig {
    let mut config = StackConfig::default();
    config.compute.fleet_size = compute_fleet;
    config.database.fleet_size = db_fleet;
    config
}

#[test]
fn test_reference_stack() {
    let stack = synthesize(&StackConfig::default()).unwrap();

    let egress: BTreeSet<&str> = stack.compute.instances.iter().map(|i| i.subnet_id.as_str()).collect();
    assert_eq!(stack.compute.len(), 2);
    assert_eq!(egress.len(), 2);
    for subnet in &egress {
        assert_eq!(stack.network.subnet(subnet).unwrap().kind, TierKind::PrivateEgress);
    }

    let isolated: BTreeSet<&str> = stack.database.instances.iter().map(|d| d.subnet_id.as_str()).collect();
    assert_eq!(stack.database.len(), 2);
    assert_eq!(isolated.len(), 2);
    for subnet in &isolated {
        assert_eq!(stack.network.subnet(subnet).unwrap().kind, TierKind::PrivateIsolated);
    }

    assert_eq!(stack.graph.by_type(ResourceType::LoadBalancer).len(), 1);
    assert_eq!(stack.load_balancer.targets, vec!["ec2-instance-0", "ec2-instance-1"]);
    let target_group = stack.graph.get("application-fleet").unwrap();
    assert_eq!(target_group.properties["Targets"].as_array().unwrap().len(), 2);
}

#[test]
fn test_database_ingress_sources() {
    let stack = synthesize(&StackConfig::default()).unwrap();
    let sources: BTreeSet<&str> = stack.security_groups.database.trusted_groups().collect();
    assert_eq!(sources, BTreeSet::from([COMPUTE_GROUP, BASTION_GROUP]));
}

#[test]
fn test_connect_statement_names_every_database() {
    let err = synthesize(&config_with(2, 3)).unwrap_err();
    // three databases need three isolated subnets
    assert_eq!(err.kind(), "PlacementError");

    let mut config = config_with(2, 3);
    config.network.az_count = 3;
    let stack = synthesize(&config).unwrap();

    let expected: BTreeSet<String> = stack
        .graph
        .by_type(ResourceType::DbInstance)
        .iter()
        .map(|r| r.logical_id.clone())
        .collect();
    let granted: BTreeSet<String> = stack
        .identities
        .compute
        .resources_for(RDS_CONNECT)
        .into_iter()
        .filter_map(|v| match Token::parse(v) {
            Some(Token::GetAtt(id, "Arn")) => Some(id.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(granted, expected);
    assert_eq!(granted.len(), 3);

    assert_eq!(
        stack.identities.compute.resources_for(GET_SECRET_VALUE),
        vec![&token::arn("rds-instance-0-secret")]
    );
}

#[test]
fn test_policy_document_has_no_wildcards() {
    let stack = synthesize(&StackConfig::default()).unwrap();
    for policy in stack.graph.by_type(ResourceType::Policy) {
        let text = policy.properties["PolicyDocument"].to_string();
        assert!(!text.contains('*'), "{} grants a wildcard", policy.logical_id);
    }
}

#[test]
fn test_cycle_placement_of_three() {
    let stack = synthesize(&config_with(3, 2)).unwrap();
    let egress = stack.network.subnets_of(TierKind::PrivateEgress);
    let placed: Vec<usize> = stack
        .compute
        .instances
        .iter()
        .map(|i| egress.iter().position(|s| s.logical_id == i.subnet_id).unwrap())
        .collect();
    assert_eq!(placed, vec![0, 1, 0]);
}

#[test]
fn test_strict_placement_of_three_fails() {
    let mut config = config_with(3, 2);
    config.compute.placement = PlacementPolicy::Strict;
    let err = synthesize(&config).unwrap_err();
    assert!(matches!(err, StackError::Capacity { requested: 3, slots: 2, .. }));
}

#[test]
fn test_no_databases_is_unresolved() {
    let err = synthesize(&config_with(2, 0)).unwrap_err();
    assert!(matches!(err, StackError::UnresolvedReference { .. }));
}

#[test]
fn test_task_graph_without_databases_is_unresolved() {
    let config = StackConfig::default();
    let err = Synthesizer::new(&config)
        .with_tasks(TaskGraph::without(Task::DatabaseCluster))
        .synthesize()
        .unwrap_err();
    assert_eq!(err.kind(), "UnresolvedReferenceError");
}

#[test]
fn test_empty_compute_fleet_is_unresolved() {
    let err = synthesize(&config_with(0, 2)).unwrap_err();
    assert!(matches!(
        err,
        StackError::UnresolvedReference { ref resource, .. } if resource == "application-fleet"
    ));
}

#[test]
fn test_graph_is_acyclic_and_complete() {
    let stack = synthesize(&StackConfig::default()).unwrap();
    stack.graph.validate().unwrap();

    let levels = stack.graph.levels().unwrap();
    let roots: Vec<&str> = levels[0].iter().map(|r| r.logical_id.as_str()).collect();
    assert!(roots.contains(&"my-vpc"));
    assert!(roots.contains(&"ci-oidc-provider"));
    assert!(!roots.iter().any(|id| id.contains("subnet")));
    let total: usize = levels.iter().map(|l| l.len()).sum();
    assert_eq!(total, stack.graph.len());

    // database instances come after their security group and subnet group
    let order: Vec<&str> = stack
        .graph
        .apply_order()
        .unwrap()
        .iter()
        .map(|r| r.logical_id.as_str())
        .collect();
    let pos = |id: &str| order.iter().position(|o| *o == id).unwrap();
    assert!(pos("sg-rds") < pos("rds-instance-0"));
    assert!(pos("rds-subnet-group") < pos("rds-instance-0"));
    assert!(pos("rds-instance-1") < pos("ec2-role-default-policy"));
    assert!(pos("http-listener") > pos("application-fleet"));
}

#[test]
fn test_synthesis_is_deterministic() {
    let a = synthesize(&StackConfig::default()).unwrap();
    let b = synthesize(&StackConfig::default()).unwrap();
    assert_eq!(a.graph, b.graph);
}

#[test]
fn test_synthesize_from_kdl() {
    let config = parse_stack_string(
        r#"
        network "edge" {
            cidr "192.168.0.0/20"
            az-count 2
            tier "dmz" kind="public" mask=26
            tier "apps" kind="private-egress" mask=25
            tier "rds" kind="private-isolated" mask=28
        }
        "#,
    )
    .unwrap();

    let stack = synthesize(&config).unwrap();
    assert_eq!(stack.network.logical_id, "edge");
    assert_eq!(stack.graph.by_type(ResourceType::Subnet).len(), 6);
    assert_eq!(stack.graph.by_type(ResourceType::NatGateway).len(), 2);
    assert_eq!(stack.bastion.subnet_id, "edge-dmz-subnet-1");
}
