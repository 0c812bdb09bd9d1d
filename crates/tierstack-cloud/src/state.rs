//! State management for provisioned resources
//!
//! Manages the `.tierstack/state.json` file which maps every logical id to
//! the physical resource the provider created for it.

use crate::error::{CloudError, Result};
use crate::provider::ProvisionedResource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tierstack_core::{RemovalPolicy, Resource, ResourceGraph, ResourceType};
use tokio::fs;

const STATE_VERSION: u32 = 1;
const STATE_DIR: &str = ".tierstack";
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";

/// State of one stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackState {
    /// State file version
    pub version: u32,

    pub stack: String,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Resources indexed by logical id
    pub resources: BTreeMap<String, ResourceState>,
}

impl Default for StackState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            stack: String::new(),
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
        }
    }
}

impl StackState {
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            ..Self::default()
        }
    }

    pub fn contains(&self, logical_id: &str) -> bool {
        self.resources.contains_key(logical_id)
    }

    pub fn get(&self, logical_id: &str) -> Option<&ResourceState> {
        self.resources.get(logical_id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Record a created or updated resource
    pub fn record(&mut self, resource: &Resource, provisioned: &ProvisionedResource) {
        let mut entry = ResourceState::new(resource, provisioned);
        if let Some(existing) = self.resources.get(&resource.logical_id) {
            entry.created_at = existing.created_at;
        }
        self.resources.insert(resource.logical_id.clone(), entry);
        self.updated_at = Utc::now();
    }

    pub fn remove(&mut self, logical_id: &str) -> Option<ResourceState> {
        let result = self.resources.remove(logical_id);
        if result.is_some() {
            self.updated_at = Utc::now();
        }
        result
    }

    /// Logical id -> physical id
    pub fn physical_ids(&self) -> BTreeMap<String, String> {
        self.resources
            .iter()
            .map(|(id, r)| (id.clone(), r.physical_id.clone()))
            .collect()
    }

    /// Recorded resources in the shape the provider returned them
    pub fn provisioned(&self) -> BTreeMap<String, ProvisionedResource> {
        self.resources
            .iter()
            .map(|(id, r)| (id.clone(), r.to_provisioned(id)))
            .collect()
    }

    /// Whether `resource` is recorded with the properties it was synthesized with
    pub fn is_current(&self, resource: &Resource) -> bool {
        self.get(&resource.logical_id)
            .is_some_and(|r| r.digest == properties_digest(&resource.properties))
    }

    /// Recorded logical ids that `graph` no longer synthesizes
    pub fn orphans(&self, graph: &ResourceGraph) -> BTreeSet<String> {
        self.resources
            .iter()
            .filter(|(id, r)| r.status == ResourceStatus::Available && graph.get(id).is_none())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Dependency graph of the recorded resources, for teardown
    ///
    /// Dependencies that are no longer recorded are dropped.
    pub fn dependency_graph(&self) -> Result<ResourceGraph> {
        let mut graph = ResourceGraph::new();
        for (id, state) in &self.resources {
            let mut resource = Resource::new(id, state.resource_type, serde_json::Value::Null)
                .with_removal_policy(state.removal_policy);
            for dep in state.depends_on.iter().filter(|d| self.contains(d)) {
                resource = resource.with_dependency(dep);
            }
            graph.add(resource)?;
        }
        Ok(graph)
    }
}

/// State of a single resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    pub physical_id: String,

    pub arn: String,

    pub resource_type: ResourceType,

    /// SHA-256 of the synthesized (unresolved) properties
    #[serde(default)]
    pub digest: String,

    /// Resource attributes (allocation ids, DNS names, ...)
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,

    /// Logical ids this resource was created after
    #[serde(default)]
    pub depends_on: BTreeSet<String>,

    #[serde(default)]
    pub removal_policy: RemovalPolicy,

    pub status: ResourceStatus,

    pub created_at: DateTime<Utc>,
}

impl ResourceState {
    pub fn new(resource: &Resource, provisioned: &ProvisionedResource) -> Self {
        Self {
            physical_id: provisioned.physical_id.clone(),
            arn: provisioned.arn.clone(),
            resource_type: resource.resource_type,
            digest: properties_digest(&resource.properties),
            attributes: provisioned.attributes.clone(),
            depends_on: resource.dependencies(),
            removal_policy: resource.removal_policy,
            status: ResourceStatus::Available,
            created_at: Utc::now(),
        }
    }

    pub fn to_provisioned(&self, logical_id: &str) -> ProvisionedResource {
        ProvisionedResource {
            logical_id: logical_id.to_string(),
            resource_type: self.resource_type,
            physical_id: self.physical_id.clone(),
            arn: self.arn.clone(),
            attributes: self.attributes.clone(),
        }
    }
}

/// Hex SHA-256 of a property bag
///
/// Tokens are hashed as written, so a dependency getting a new physical id
/// does not change the digest of its dependents.
pub fn properties_digest(properties: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(properties.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Created and usable
    Available,
    /// Left in place by a destroy
    Retained,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStatus::Available => write!(f, "available"),
            ResourceStatus::Retained => write!(f, "retained"),
        }
    }
}

/// Reads and writes the state file under a project root
pub struct StateManager {
    project_root: PathBuf,
}

impl StateManager {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
        }
    }

    fn state_dir(&self) -> PathBuf {
        self.project_root.join(STATE_DIR)
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_dir().join(STATE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir().join(STATE_BACKUP)
    }

    fn lock_path(&self) -> PathBuf {
        self.state_dir().join(LOCK_FILE)
    }

    async fn ensure_state_dir(&self) -> Result<()> {
        let dir = self.state_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }
        Ok(())
    }

    /// Load the current state; a missing file is an empty state
    pub async fn load(&self, stack: &str) -> Result<StackState> {
        let path = self.state_path();
        if !path.exists() {
            tracing::debug!("State file not found, returning empty state");
            return Ok(StackState::new(stack));
        }

        let content = fs::read_to_string(&path).await?;
        let state: StackState = serde_json::from_str(&content)?;

        if state.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "State file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }
        if !state.stack.is_empty() && state.stack != stack {
            return Err(CloudError::StateError(format!(
                "State file belongs to stack '{}', not '{}'",
                state.stack, stack
            )));
        }

        tracing::debug!("Loaded state with {} resources", state.resources.len());
        Ok(state)
    }

    /// Save the state, keeping the previous file as a backup
    pub async fn save(&self, state: &StackState) -> Result<()> {
        self.ensure_state_dir().await?;

        let path = self.state_path();
        let backup = self.backup_path();

        if path.exists() {
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::rename(&path, &backup).await?;
            tracing::debug!("Created state backup");
        }

        let content = serde_json::to_string_pretty(state)?;
        fs::write(&path, content).await?;

        tracing::debug!("Saved state with {} resources", state.resources.len());
        Ok(())
    }

    /// Acquire a lock for exclusive access
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        self.ensure_state_dir().await?;

        let lock_path = self.lock_path();

        if lock_path.exists() {
            let content = fs::read_to_string(&lock_path).await?;
            let lock_info: LockInfo = serde_json::from_str(&content)?;

            // locks older than an hour are stale
            let age = Utc::now().signed_duration_since(lock_info.acquired_at);
            if age.num_hours() < 1 {
                return Err(CloudError::LockError(format!(
                    "State is locked by {} since {}",
                    lock_info.holder, lock_info.acquired_at
                )));
            }

            tracing::warn!("Removing stale lock from {}", lock_info.holder);
        }

        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            acquired_at: Utc::now(),
        };

        let content = serde_json::to_string_pretty(&lock_info)?;
        fs::write(&lock_path, content).await?;

        tracing::debug!("Acquired state lock");
        Ok(StateLock {
            lock_path,
            released: false,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for the state lock
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released state lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
