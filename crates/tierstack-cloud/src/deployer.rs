//! Apply engine
//!
//! Walks a resource graph level by level. Everything in one level is
//! created or updated concurrently; a level starts only after the previous
//! one has fully succeeded. Every success is recorded in the stack state
//! right away, so a failed run can be resumed by applying again.
//!
//! A resource whose synthesized properties no longer match the digest in
//! state is updated in place. Recorded resources the graph no longer
//! contains are pruned after the last level, dependents first.

use crate::action::{Action, ActionType, ApplyResult, Plan};
use crate::error::{CloudError, Result};
use crate::provider::{
    CloudProvider, CreateRequest, ProvisionedResource, SecretRef, SecretRequest, SecretStore,
};
use crate::resolve::{lookup_keys, resolve_value};
use crate::state::{ResourceStatus, StackState};
use futures_util::future::join_all;
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;
use tierstack_core::{RemovalPolicy, Resource, ResourceGraph, ResourceType};
use tracing::{debug, info, warn};

pub struct Deployer<'a> {
    provider: &'a dyn CloudProvider,
    secrets: &'a dyn SecretStore,
}

impl<'a> Deployer<'a> {
    pub fn new(provider: &'a dyn CloudProvider, secrets: &'a dyn SecretStore) -> Self {
        Self { provider, secrets }
    }

    /// Actions an apply of `graph` would take against `state`
    pub fn plan(&self, graph: &ResourceGraph, state: &StackState) -> Result<Plan> {
        let mut actions = Vec::with_capacity(graph.len());
        for (depth, level) in graph.levels()?.into_iter().enumerate() {
            for resource in level {
                let action = match state.get(&resource.logical_id) {
                    None => Action::new(
                        &resource.logical_id,
                        ActionType::Create,
                        resource.resource_type,
                        format!("create {} {}", resource.resource_type, resource.logical_id),
                    ),
                    Some(existing) if state.is_current(resource) => Action::new(
                        &resource.logical_id,
                        ActionType::NoOp,
                        resource.resource_type,
                        format!("{} exists as {}", resource.logical_id, existing.physical_id),
                    ),
                    Some(existing) => Action::new(
                        &resource.logical_id,
                        ActionType::Update,
                        resource.resource_type,
                        format!(
                            "update {} {} ({})",
                            resource.resource_type, resource.logical_id, existing.physical_id
                        ),
                    ),
                };
                let depends_on: Vec<String> = resource.dependencies().into_iter().collect();
                actions.push(
                    action
                        .with_detail("level", serde_json::json!(depth))
                        .with_detail("depends_on", serde_json::json!(depends_on)),
                );
            }
        }

        let orphans = state.orphans(graph);
        if !orphans.is_empty() {
            actions.extend(teardown_actions(state, Some(&orphans))?);
        }
        Ok(Plan::new(actions))
    }

    /// Actions a destroy of `state` would take
    pub fn destroy_plan(&self, state: &StackState) -> Result<Plan> {
        Ok(Plan::new(teardown_actions(state, None)?))
    }

    /// Bring `state` in line with `graph`
    ///
    /// Missing resources are created, changed ones updated in place, and
    /// recorded resources `graph` no longer contains are deleted last.
    #[tracing::instrument(skip_all, fields(provider = self.provider.name(), resources = graph.len()))]
    pub async fn apply(&self, graph: &ResourceGraph, state: &mut StackState) -> Result<ApplyResult> {
        let started = Instant::now();
        let mut result = ApplyResult::new();
        let mut provisioned = state.provisioned();
        let mut lookups: HashMap<String, String> = HashMap::new();

        for (depth, level) in graph.levels()?.into_iter().enumerate() {
            let pending: Vec<&Resource> = level
                .into_iter()
                .filter(|r| !state.is_current(r))
                .collect();
            if pending.is_empty() {
                debug!(level = depth, "Level already provisioned");
                continue;
            }

            for resource in &pending {
                for key in lookup_keys(&resource.properties) {
                    if !lookups.contains_key(&key) {
                        let value = self.provider.lookup(&key).await?;
                        debug!(key = %key, value = %value, "Resolved lookup");
                        lookups.insert(key, value);
                    }
                }
            }

            let mut requests = Vec::with_capacity(pending.len());
            for resource in &pending {
                let request = CreateRequest {
                    logical_id: resource.logical_id.clone(),
                    resource_type: resource.resource_type,
                    properties: resolve_value(
                        &resource.logical_id,
                        &resource.properties,
                        &provisioned,
                        &lookups,
                    )?,
                };
                let current = state
                    .get(&resource.logical_id)
                    .map(|r| r.to_provisioned(&resource.logical_id));
                requests.push((request, current));
            }

            info!(level = depth, count = requests.len(), "Applying resources");
            let outcomes = join_all(
                requests
                    .iter()
                    .map(|(request, current)| self.put(request, current.as_ref())),
            )
            .await;

            let mut first_failure = None;
            for ((resource, (_, current)), outcome) in pending.iter().zip(&requests).zip(outcomes) {
                let action_type = match current {
                    Some(_) => ActionType::Update,
                    None => ActionType::Create,
                };
                match outcome {
                    Ok(done) => {
                        debug!(
                            logical_id = %resource.logical_id,
                            physical_id = %done.physical_id,
                            action = %action_type,
                            "Applied"
                        );
                        state.record(resource, &done);
                        result.add_success(
                            resource.logical_id.clone(),
                            action_type,
                            format!("{}d {}", action_type, done.physical_id),
                        );
                        provisioned.insert(resource.logical_id.clone(), done);
                    }
                    Err(e) => {
                        warn!(logical_id = %resource.logical_id, error = %e, action = %action_type, "Apply failed");
                        result.add_failure(resource.logical_id.clone(), action_type, e.to_string());
                        first_failure.get_or_insert((resource.logical_id.clone(), e.to_string()));
                    }
                }
            }

            if let Some((logical_id, reason)) = first_failure {
                return Err(CloudError::ApplyAborted { logical_id, reason });
            }
        }

        let orphans = state.orphans(graph);
        if !orphans.is_empty() {
            info!(count = orphans.len(), "Pruning resources no longer in the stack");
            self.teardown(state, Some(&orphans), &mut result).await?;
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            created = result.count(ActionType::Create),
            updated = result.count(ActionType::Update),
            deleted = result.count(ActionType::Delete),
            duration_ms = result.duration_ms,
            "Apply complete"
        );
        Ok(result)
    }

    async fn put(
        &self,
        request: &CreateRequest,
        current: Option<&ProvisionedResource>,
    ) -> Result<ProvisionedResource> {
        match current {
            None => self.create(request).await,
            Some(_) if request.resource_type == ResourceType::Secret => Err(CloudError::Drift {
                logical_id: request.logical_id.clone(),
                reason: "generated secrets cannot be changed in place".to_string(),
            }),
            Some(current) => self.provider.update(current, request).await,
        }
    }

    async fn create(&self, request: &CreateRequest) -> Result<ProvisionedResource> {
        if request.resource_type != ResourceType::Secret {
            return self.provider.create(request).await;
        }
        let secret = self
            .secrets
            .create_secret(&request.logical_id, &SecretRequest::from_properties(&request.properties))
            .await?;
        Ok(ProvisionedResource {
            logical_id: request.logical_id.clone(),
            resource_type: ResourceType::Secret,
            physical_id: secret.id,
            arn: secret.arn,
            attributes: Default::default(),
        })
    }

    /// Tear down everything recorded in `state`, dependents first
    ///
    /// Retained resources, and whatever they depend on, stay in place and in
    /// state with status `retained`.
    #[tracing::instrument(skip_all, fields(provider = self.provider.name(), resources = state.len()))]
    pub async fn destroy(&self, state: &mut StackState) -> Result<ApplyResult> {
        let started = Instant::now();
        let mut result = ApplyResult::new();
        self.teardown(state, None, &mut result).await?;

        result.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            deleted = result.count(ActionType::Delete),
            retained = state.len(),
            "Destroy complete"
        );
        Ok(result)
    }

    /// Delete recorded resources in reverse dependency order
    ///
    /// With `only`, resources outside the set are left alone.
    async fn teardown(
        &self,
        state: &mut StackState,
        only: Option<&BTreeSet<String>>,
        result: &mut ApplyResult,
    ) -> Result<()> {
        let graph = state.dependency_graph()?;
        let retained = retained_ids(state);

        for (depth, level) in graph.teardown_levels()?.into_iter().enumerate() {
            let mut doomed = Vec::new();
            for resource in level {
                if only.is_some_and(|ids| !ids.contains(&resource.logical_id)) {
                    continue;
                }
                if retained.contains(&resource.logical_id) {
                    if let Some(entry) = state.resources.get_mut(&resource.logical_id) {
                        entry.status = ResourceStatus::Retained;
                    }
                    continue;
                }
                if let Some(entry) = state.get(&resource.logical_id) {
                    doomed.push((
                        entry.to_provisioned(&resource.logical_id),
                        resource.removal_policy,
                    ));
                }
            }
            if doomed.is_empty() {
                continue;
            }

            info!(level = depth, count = doomed.len(), "Deleting resources");
            let outcomes = join_all(doomed.iter().map(|(r, policy)| self.delete(r, *policy))).await;

            let mut first_failure = None;
            for ((resource, _), outcome) in doomed.iter().zip(outcomes) {
                match outcome {
                    Ok(()) => {
                        state.remove(&resource.logical_id);
                        result.add_success(
                            resource.logical_id.clone(),
                            ActionType::Delete,
                            format!("deleted {}", resource.physical_id),
                        );
                    }
                    Err(e) => {
                        warn!(logical_id = %resource.logical_id, error = %e, "Delete failed");
                        result.add_failure(
                            resource.logical_id.clone(),
                            ActionType::Delete,
                            e.to_string(),
                        );
                        first_failure.get_or_insert((resource.logical_id.clone(), e.to_string()));
                    }
                }
            }

            if let Some((logical_id, reason)) = first_failure {
                return Err(CloudError::ApplyAborted { logical_id, reason });
            }
        }
        Ok(())
    }

    async fn delete(&self, resource: &ProvisionedResource, policy: RemovalPolicy) -> Result<()> {
        if resource.resource_type == ResourceType::Secret {
            let secret = SecretRef {
                id: resource.physical_id.clone(),
                arn: resource.arn.clone(),
            };
            return self.secrets.delete_secret(&secret).await;
        }
        self.provider.delete(resource, policy).await
    }
}

/// Retain or delete actions for recorded resources, dependents first
fn teardown_actions(state: &StackState, only: Option<&BTreeSet<String>>) -> Result<Vec<Action>> {
    let graph = state.dependency_graph()?;
    let retained = retained_ids(state);
    let mut actions = Vec::new();
    for level in graph.teardown_levels()? {
        for resource in level {
            if only.is_some_and(|ids| !ids.contains(&resource.logical_id)) {
                continue;
            }
            let action = if retained.contains(&resource.logical_id) {
                Action::new(
                    &resource.logical_id,
                    ActionType::Retain,
                    resource.resource_type,
                    format!("retain {}", resource.logical_id),
                )
            } else {
                let verb = match resource.removal_policy {
                    RemovalPolicy::Snapshot => "snapshot and delete",
                    _ => "delete",
                };
                Action::new(
                    &resource.logical_id,
                    ActionType::Delete,
                    resource.resource_type,
                    format!("{} {} {}", verb, resource.resource_type, resource.logical_id),
                )
            };
            actions.push(action);
        }
    }
    Ok(actions)
}

/// Retained resources plus everything they transitively depend on
fn retained_ids(state: &StackState) -> BTreeSet<String> {
    let mut retained = BTreeSet::new();
    let mut stack: Vec<&str> = state
        .resources
        .iter()
        .filter(|(_, r)| r.removal_policy == RemovalPolicy::Retain)
        .map(|(id, _)| id.as_str())
        .collect();

    while let Some(id) = stack.pop() {
        if !retained.insert(id.to_string()) {
            continue;
        }
        if let Some(entry) = state.get(id) {
            stack.extend(
                entry
                    .depends_on
                    .iter()
                    .map(String::as_str)
                    .filter(|dep| state.contains(dep)),
            );
        }
    }
    retained
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryProvider, MemorySecretStore};
    use serde_json::json;
    use tierstack_core::token;

    fn small_graph() -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        graph
            .extend([
                Resource::new("my-vpc", ResourceType::Vpc, json!({ "CidrBlock": "10.0.0.0/16" })),
                Resource::new(
                    "subnet-a",
                    ResourceType::Subnet,
                    json!({ "VpcId": token::reference("my-vpc") }),
                ),
                Resource::new(
                    "subnet-b",
                    ResourceType::Subnet,
                    json!({ "VpcId": token::reference("my-vpc") }),
                ),
                Resource::new(
                    "web",
                    ResourceType::Instance,
                    json!({ "SubnetId": token::reference("subnet-a") }),
                ),
            ])
            .unwrap();
        graph
    }

    fn backends() -> (MemoryProvider, MemorySecretStore) {
        (
            MemoryProvider::new("us-east-1", "000000000000"),
            MemorySecretStore::new("us-east-1", "000000000000"),
        )
    }

    #[test]
    fn test_plan_against_partial_state() {
        let (provider, secrets) = backends();
        let deployer = Deployer::new(&provider, &secrets);
        let graph = small_graph();

        let mut state = StackState::new("tierstack");
        let vpc = graph.get("my-vpc").unwrap();
        state.record(
            vpc,
            &ProvisionedResource {
                logical_id: "my-vpc".to_string(),
                resource_type: ResourceType::Vpc,
                physical_id: "vpc-1".to_string(),
                arn: "arn".to_string(),
                attributes: Default::default(),
            },
        );

        let plan = deployer.plan(&graph, &state).unwrap();
        let summary = plan.summary();
        assert_eq!(summary.create, 3);
        assert_eq!(summary.no_change, 1);
        assert_eq!(plan.actions[0].id, "my-vpc");
    }

    #[tokio::test]
    async fn test_apply_resolves_references() {
        let (provider, secrets) = backends();
        let deployer = Deployer::new(&provider, &secrets);
        let mut state = StackState::new("tierstack");

        let result = deployer.apply(&small_graph(), &mut state).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.succeeded.len(), 4);

        let web = provider.request("web").await.unwrap();
        assert_eq!(web.properties["SubnetId"], state.get("subnet-a").unwrap().physical_id);
    }

    #[tokio::test]
    async fn test_changed_properties_update_in_place() {
        let (provider, secrets) = backends();
        let deployer = Deployer::new(&provider, &secrets);
        let mut state = StackState::new("tierstack");
        deployer.apply(&small_graph(), &mut state).await.unwrap();
        let subnet = state.get("subnet-a").unwrap().physical_id.clone();

        let mut graph = ResourceGraph::new();
        graph
            .extend(small_graph().iter().map(|r| {
                let mut r = r.clone();
                if r.logical_id == "subnet-a" {
                    r.properties["CidrBlock"] = json!("10.0.8.0/24");
                }
                r
            }))
            .unwrap();

        let plan = deployer.plan(&graph, &state).unwrap();
        let updates: Vec<&str> = plan
            .actions_by_type(ActionType::Update)
            .into_iter()
            .map(|a| a.id.as_str())
            .collect();
        assert_eq!(updates, vec!["subnet-a"]);

        let result = deployer.apply(&graph, &mut state).await.unwrap();
        assert_eq!(result.count(ActionType::Update), 1);
        assert_eq!(result.count(ActionType::Create), 0);
        assert_eq!(provider.updated().await, vec!["subnet-a"]);
        assert_eq!(state.get("subnet-a").unwrap().physical_id, subnet);
        assert_eq!(
            provider.request("subnet-a").await.unwrap().properties["CidrBlock"],
            "10.0.8.0/24"
        );
        assert!(!deployer.plan(&graph, &state).unwrap().has_changes);
    }

    #[tokio::test]
    async fn test_failure_stops_at_level() {
        let (provider, secrets) = backends();
        provider.fail_on("subnet-b").await;
        let deployer = Deployer::new(&provider, &secrets);
        let mut state = StackState::new("tierstack");

        let err = deployer.apply(&small_graph(), &mut state).await.unwrap_err();
        assert!(matches!(err, CloudError::ApplyAborted { ref logical_id, .. } if logical_id == "subnet-b"));

        // the sibling in the failed level still landed; the next level never ran
        assert!(state.contains("subnet-a"));
        assert!(!state.contains("web"));
    }

    #[tokio::test]
    async fn test_destroy_keeps_retained_dependencies() {
        let (provider, secrets) = backends();
        let deployer = Deployer::new(&provider, &secrets);

        let mut graph = small_graph();
        graph
            .add(
                Resource::new(
                    "archive",
                    ResourceType::Instance,
                    json!({ "SubnetId": token::reference("subnet-b") }),
                )
                .with_removal_policy(RemovalPolicy::Retain),
            )
            .unwrap();

        let mut state = StackState::new("tierstack");
        deployer.apply(&graph, &mut state).await.unwrap();

        let plan = deployer.destroy_plan(&state).unwrap();
        assert_eq!(plan.summary().retain, 3);

        deployer.destroy(&mut state).await.unwrap();
        let kept: Vec<&str> = state.resources.keys().map(String::as_str).collect();
        assert_eq!(kept, vec!["archive", "my-vpc", "subnet-b"]);
        assert!(state.resources.values().all(|r| r.status == ResourceStatus::Retained));
        assert_eq!(provider.deleted().await, vec!["web", "subnet-a"]);
    }
}
