use std::collections::BTreeSet;
use tierstack_cloud::{
    ActionType, CloudError, CloudProvider, Deployer, MemoryProvider, MemorySecretStore,
    ResourceStatus, StackState, StateManager,
};
use tierstack_core::identity::RDS_CONNECT;
use tierstack_core::{RemovalPolicy, ResourceType, StackConfig, synthesize};

fn backends(config: &StackConfig) -> (MemoryProvider, MemorySecretStore) {
    (
        MemoryProvider::new(&config.region, &config.account),
        MemorySecretStore::new(&config.region, &config.account),
    )
}

#[tokio::test]
async fn test_apply_reference_stack() {
    let config = StackConfig::default();
    let stack = synthesize(&config).unwrap();
    let (provider, secrets) = backends(&config);
    let deployer = Deployer::new(&provider, &secrets);

    let mut state = StackState::new(&config.name);
    let result = deployer.apply(&stack.graph, &mut state).await.unwrap();

    assert!(result.is_success());
    assert_eq!(state.len(), stack.graph.len());
    assert_eq!(secrets.len().await, 2);
    // secrets live in the store, everything else in the provider
    assert_eq!(provider.len().await, stack.graph.len() - 2);
}

#[tokio::test]
async fn test_reapply_is_idempotent() {
    let config = StackConfig::default();
    let stack = synthesize(&config).unwrap();
    let (provider, secrets) = backends(&config);
    let deployer = Deployer::new(&provider, &secrets);

    let mut state = StackState::new(&config.name);
    deployer.apply(&stack.graph, &mut state).await.unwrap();
    let first = state.physical_ids();

    let plan = deployer.plan(&stack.graph, &state).unwrap();
    assert!(!plan.has_changes);
    assert_eq!(plan.summary().no_change, stack.graph.len());

    let second = deployer.apply(&stack.graph, &mut state).await.unwrap();
    assert!(second.succeeded.is_empty());
    assert_eq!(state.physical_ids(), first);

    // a lost state file does not duplicate anything either
    let mut fresh = StackState::new(&config.name);
    deployer.apply(&stack.graph, &mut fresh).await.unwrap();
    assert_eq!(fresh.physical_ids(), first);
    assert_eq!(provider.len().await, stack.graph.len() - 2);
}

#[tokio::test]
async fn test_connect_statement_names_concrete_databases() {
    let config = StackConfig::default();
    let stack = synthesize(&config).unwrap();
    let (provider, secrets) = backends(&config);
    let deployer = Deployer::new(&provider, &secrets);

    let mut state = StackState::new(&config.name);
    deployer.apply(&stack.graph, &mut state).await.unwrap();

    let policy = provider.request("ec2-role-default-policy").await.unwrap();
    let statements = policy.properties["PolicyDocument"]["Statement"]
        .as_array()
        .unwrap()
        .clone();
    let connect = statements
        .iter()
        .find(|s| s["Action"].as_array().unwrap().iter().any(|a| a == RDS_CONNECT))
        .unwrap();

    let granted: BTreeSet<&str> = connect["Resource"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r.as_str().unwrap())
        .collect();
    let databases: BTreeSet<&str> = stack
        .database
        .instances
        .iter()
        .map(|db| state.get(&db.logical_id).unwrap().arn.as_str())
        .collect();

    assert_eq!(granted, databases);
    assert!(granted.iter().all(|arn| !arn.contains('*')));

    let db = provider.request("rds-instance-0").await.unwrap();
    assert_eq!(
        db.properties["MasterUserSecret"]["SecretArn"],
        state.get("rds-instance-0-secret").unwrap().arn
    );
}

#[tokio::test]
async fn test_instances_get_looked_up_image() {
    let config = StackConfig::default();
    let stack = synthesize(&config).unwrap();
    let (provider, secrets) = backends(&config);
    let provider = provider.with_lookup(
        tierstack_core::compute::MACHINE_IMAGE_LOOKUP,
        "ami-0123456789abcdef0",
    );
    let deployer = Deployer::new(&provider, &secrets);

    let mut state = StackState::new(&config.name);
    deployer.apply(&stack.graph, &mut state).await.unwrap();

    for instance in stack.graph.by_type(ResourceType::Instance) {
        let request = provider.request(&instance.logical_id).await.unwrap();
        assert_eq!(request.properties["ImageId"], "ami-0123456789abcdef0");
    }
}

#[tokio::test]
async fn test_teardown_reverses_apply() {
    let config = StackConfig::default();
    let stack = synthesize(&config).unwrap();
    let (provider, secrets) = backends(&config);
    let deployer = Deployer::new(&provider, &secrets);

    let mut state = StackState::new(&config.name);
    deployer.apply(&stack.graph, &mut state).await.unwrap();

    let plan = deployer.destroy_plan(&state).unwrap();
    assert_eq!(plan.actions_by_type(ActionType::Delete).len(), stack.graph.len());

    deployer.destroy(&mut state).await.unwrap();
    assert!(state.is_empty());
    assert!(provider.is_empty().await);
    assert!(secrets.is_empty().await);

    let deleted = provider.deleted().await;
    let position = |id: &str| deleted.iter().position(|d| d == id).unwrap();
    assert!(position("app-load-balancer") > position("http-listener"));
    assert!(position("ec2-instance-0") < position("sg-ec2"));
    assert!(position("rds-instance-0") < position("rds-subnet-group"));
    assert!(position("my-vpc-public-subnet-1") < position("my-vpc"));
}

#[tokio::test]
async fn test_retained_databases_survive_teardown() {
    let mut config = StackConfig::default();
    config.database.removal_policy = RemovalPolicy::Retain;
    let stack = synthesize(&config).unwrap();
    let (provider, secrets) = backends(&config);
    let deployer = Deployer::new(&provider, &secrets);

    let mut state = StackState::new(&config.name);
    deployer.apply(&stack.graph, &mut state).await.unwrap();
    deployer.destroy(&mut state).await.unwrap();

    for db in &stack.database.instances {
        let entry = state.get(&db.logical_id).unwrap();
        assert_eq!(entry.status, ResourceStatus::Retained);
        assert!(provider.describe(&db.logical_id).await.unwrap().is_some());
    }
    // the network the databases sit in stays with them
    assert!(state.contains("my-vpc"));
    assert!(!state.contains("ec2-instance-0"));
    assert!(!state.contains("app-load-balancer"));
}

#[tokio::test]
async fn test_snapshot_policy_takes_final_snapshot() {
    let mut config = StackConfig::default();
    config.database.removal_policy = RemovalPolicy::Snapshot;
    let stack = synthesize(&config).unwrap();
    let (provider, secrets) = backends(&config);
    let deployer = Deployer::new(&provider, &secrets);

    let mut state = StackState::new(&config.name);
    deployer.apply(&stack.graph, &mut state).await.unwrap();
    deployer.destroy(&mut state).await.unwrap();

    assert_eq!(provider.snapshots().await, vec!["rds-instance-0", "rds-instance-1"]);
    assert!(state.is_empty());
}

#[tokio::test]
async fn test_resume_after_failure() {
    let config = StackConfig::default();
    let stack = synthesize(&config).unwrap();
    let (provider, secrets) = backends(&config);
    provider.fail_on("app-load-balancer").await;
    let deployer = Deployer::new(&provider, &secrets);

    let mut state = StackState::new(&config.name);
    let err = deployer.apply(&stack.graph, &mut state).await.unwrap_err();
    assert!(matches!(err, CloudError::ApplyAborted { .. }));
    assert!(state.contains("my-vpc"));
    assert!(!state.contains("http-listener"));

    let recovered = MemoryProvider::from_state(&config.region, &config.account, &state);
    let deployer = Deployer::new(&recovered, &secrets);
    let result = deployer.apply(&stack.graph, &mut state).await.unwrap();
    assert!(result.succeeded.iter().any(|r| r.action_id == "http-listener"));
    assert_eq!(state.len(), stack.graph.len());
}

#[tokio::test]
async fn test_state_round_trip_on_disk() {
    let config = StackConfig::default();
    let stack = synthesize(&config).unwrap();
    let (provider, secrets) = backends(&config);
    let deployer = Deployer::new(&provider, &secrets);

    let dir = tempfile::tempdir().unwrap();
    let manager = StateManager::new(dir.path());
    let lock = manager.acquire_lock().await.unwrap();

    let mut state = manager.load(&config.name).await.unwrap();
    deployer.apply(&stack.graph, &mut state).await.unwrap();
    manager.save(&state).await.unwrap();
    lock.release().await.unwrap();

    let loaded = manager.load(&config.name).await.unwrap();
    assert_eq!(loaded.physical_ids(), state.physical_ids());
    assert!(!deployer.plan(&stack.graph, &loaded).unwrap().has_changes);
}

fn grown() -> StackConfig {
    let mut config = StackConfig::default();
    config.network.az_count = 3;
    config.compute.fleet_size = 3;
    config.database.fleet_size = 3;
    config
}

fn connect_resources(policy: &serde_json::Value) -> BTreeSet<String> {
    policy["PolicyDocument"]["Statement"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["Action"].as_array().unwrap().iter().any(|a| a == RDS_CONNECT))
        .unwrap()["Resource"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r.as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_reapply_after_fleet_growth_updates_dependents() {
    let config = StackConfig::default();
    let (provider, secrets) = backends(&config);
    let deployer = Deployer::new(&provider, &secrets);

    let mut state = StackState::new(&config.name);
    deployer
        .apply(&synthesize(&config).unwrap().graph, &mut state)
        .await
        .unwrap();
    let vpc = state.get("my-vpc").unwrap().physical_id.clone();

    let stack = synthesize(&grown()).unwrap();
    let plan = deployer.plan(&stack.graph, &state).unwrap();
    let action = |id: &str| {
        plan.actions
            .iter()
            .find(|a| a.id == id)
            .map(|a| a.action_type)
            .unwrap()
    };
    assert_eq!(action("application-fleet"), ActionType::Update);
    assert_eq!(action("ec2-role-default-policy"), ActionType::Update);
    assert_eq!(action("rds-instance-2"), ActionType::Create);
    assert_eq!(action("my-vpc"), ActionType::NoOp);

    let result = deployer.apply(&stack.graph, &mut state).await.unwrap();
    assert!(result.count(ActionType::Update) >= 2);
    assert_eq!(state.get("my-vpc").unwrap().physical_id, vpc);

    // the connect statement names every database, including the new one
    let policy = provider.request("ec2-role-default-policy").await.unwrap();
    let databases: BTreeSet<String> = stack
        .database
        .instances
        .iter()
        .map(|db| state.get(&db.logical_id).unwrap().arn.clone())
        .collect();
    assert_eq!(databases.len(), 3);
    assert_eq!(connect_resources(&policy.properties), databases);

    // the target group holds exactly the compute fleet
    let group = provider.request("application-fleet").await.unwrap();
    let targets: BTreeSet<&str> = group.properties["Targets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["Id"].as_str().unwrap())
        .collect();
    let fleet: BTreeSet<&str> = stack
        .compute
        .instances
        .iter()
        .map(|i| state.get(&i.logical_id).unwrap().physical_id.as_str())
        .collect();
    assert_eq!(targets.len(), 3);
    assert_eq!(targets, fleet);

    // subnets moved by the new layout stay disjoint
    let mut cidrs = Vec::new();
    for subnet in &stack.network.subnets {
        let request = provider.request(&subnet.logical_id).await.unwrap();
        let cidr: tierstack_core::Ipv4Cidr =
            request.properties["CidrBlock"].as_str().unwrap().parse().unwrap();
        assert_eq!(cidr, subnet.cidr);
        cidrs.push(cidr);
    }
    for (i, a) in cidrs.iter().enumerate() {
        for b in &cidrs[i + 1..] {
            assert!(!a.overlaps(b), "{} overlaps {}", a, b);
        }
    }

    let plan = deployer.plan(&stack.graph, &state).unwrap();
    assert!(!plan.has_changes);
}

#[tokio::test]
async fn test_reapply_after_fleet_shrink_prunes_orphans() {
    let config = grown();
    let (provider, secrets) = backends(&config);
    let deployer = Deployer::new(&provider, &secrets);

    let mut state = StackState::new(&config.name);
    deployer
        .apply(&synthesize(&config).unwrap().graph, &mut state)
        .await
        .unwrap();
    assert_eq!(secrets.len().await, 3);

    let stack = synthesize(&StackConfig::default()).unwrap();
    let plan = deployer.plan(&stack.graph, &state).unwrap();
    let deletes: BTreeSet<&str> = plan
        .actions_by_type(ActionType::Delete)
        .into_iter()
        .map(|a| a.id.as_str())
        .collect();
    assert!(deletes.contains("ec2-instance-2"));
    assert!(deletes.contains("rds-instance-2"));
    assert!(deletes.contains("rds-instance-2-secret"));
    assert!(deletes.contains("my-vpc-public-subnet-3"));

    deployer.apply(&stack.graph, &mut state).await.unwrap();
    assert_eq!(state.len(), stack.graph.len());
    assert_eq!(secrets.len().await, 2);
    assert_eq!(provider.len().await, stack.graph.len() - 2);

    // the attachment goes before the database it points at
    let deleted = provider.deleted().await;
    let position = |id: &str| deleted.iter().position(|d| d == id).unwrap();
    assert!(position("rds-instance-2-secret-attachment") < position("rds-instance-2"));

    let policy = provider.request("ec2-role-default-policy").await.unwrap();
    assert_eq!(connect_resources(&policy.properties).len(), 2);
}

#[tokio::test]
async fn test_changed_secret_is_drift() {
    let config = StackConfig::default();
    let (provider, secrets) = backends(&config);
    let deployer = Deployer::new(&provider, &secrets);

    let mut state = StackState::new(&config.name);
    deployer
        .apply(&synthesize(&config).unwrap().graph, &mut state)
        .await
        .unwrap();

    let mut changed = config.clone();
    changed.database.admin_user = "root".to_string();
    let err = deployer
        .apply(&synthesize(&changed).unwrap().graph, &mut state)
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::ApplyAborted { ref logical_id, .. } if logical_id.ends_with("-secret")));
}
