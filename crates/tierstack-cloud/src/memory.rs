//! In-memory provider
//!
//! Mints deterministic physical ids and ARNs without talking to a cloud.
//! Backs the CLI's `plan`, `apply` and `destroy`.

use crate::error::{CloudError, Result};
use crate::provider::{
    CloudProvider, CreateRequest, ProvisionedResource, SecretRef, SecretRequest, SecretStore,
};
use crate::state::StackState;
use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tierstack_core::compute::MACHINE_IMAGE_LOOKUP;
use tierstack_core::{RemovalPolicy, ResourceType};
use tokio::sync::Mutex;

const DEFAULT_MACHINE_IMAGE: &str = "ami-0a1b2c3d4e5f60718";

#[derive(Default)]
struct Inner {
    counter: u64,
    resources: BTreeMap<String, ProvisionedResource>,
    requests: BTreeMap<String, CreateRequest>,
    updated: Vec<String>,
    deleted: Vec<String>,
    snapshots: Vec<String>,
    fail_on: BTreeSet<String>,
}

pub struct MemoryProvider {
    region: String,
    account: String,
    lookups: HashMap<String, String>,
    inner: Mutex<Inner>,
}

impl MemoryProvider {
    pub fn new(region: impl Into<String>, account: impl Into<String>) -> Self {
        let lookups = HashMap::from([(
            MACHINE_IMAGE_LOOKUP.to_string(),
            DEFAULT_MACHINE_IMAGE.to_string(),
        )]);
        Self {
            region: region.into(),
            account: account.into(),
            lookups,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Provider that already holds everything recorded in `state`
    pub fn from_state(region: impl Into<String>, account: impl Into<String>, state: &StackState) -> Self {
        let provider = Self::new(region, account);
        let resources: BTreeMap<String, ProvisionedResource> = state
            .provisioned()
            .into_iter()
            .filter(|(_, r)| r.resource_type != ResourceType::Secret)
            .collect();
        // continue numbering after the highest id already handed out
        let counter = resources
            .values()
            .filter_map(|r| r.physical_id.get(r.physical_id.len().saturating_sub(12)..))
            .filter_map(|suffix| u64::from_str_radix(suffix, 16).ok())
            .max()
            .unwrap_or(0);
        let inner = Inner {
            counter,
            resources,
            ..Inner::default()
        };
        Self {
            inner: Mutex::new(inner),
            ..provider
        }
    }

    pub fn with_lookup(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.lookups.insert(key.into(), value.into());
        self
    }

    /// Make every create of `logical_id` fail
    pub async fn fail_on(&self, logical_id: impl Into<String>) {
        self.inner.lock().await.fail_on.insert(logical_id.into());
    }

    /// Resolved properties the resource was last created or updated with
    pub async fn request(&self, logical_id: &str) -> Option<CreateRequest> {
        self.inner.lock().await.requests.get(logical_id).cloned()
    }

    /// Logical ids in update order
    pub async fn updated(&self) -> Vec<String> {
        self.inner.lock().await.updated.clone()
    }

    /// Logical ids in deletion order
    pub async fn deleted(&self) -> Vec<String> {
        self.inner.lock().await.deleted.clone()
    }

    /// Logical ids that got a final snapshot before deletion
    pub async fn snapshots(&self) -> Vec<String> {
        self.inner.lock().await.snapshots.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.resources.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn arn(&self, resource_type: ResourceType, physical_id: &str) -> String {
        format!(
            "arn:aws:{}:{}:{}:{}/{}",
            resource_type.arn_service(),
            self.region,
            self.account,
            resource_type.arn_resource(),
            physical_id
        )
    }

    fn attributes(
        &self,
        resource_type: ResourceType,
        physical_id: &str,
    ) -> BTreeMap<String, serde_json::Value> {
        let mut attributes = BTreeMap::new();
        match resource_type {
            ResourceType::Eip => {
                attributes.insert("AllocationId".to_string(), json!(physical_id));
            }
            ResourceType::LoadBalancer => {
                attributes.insert(
                    "DNSName".to_string(),
                    json!(format!("{}.{}.elb.amazonaws.com", physical_id, self.region)),
                );
            }
            ResourceType::DbInstance => {
                attributes.insert(
                    "Endpoint.Address".to_string(),
                    json!(format!("{}.{}.rds.amazonaws.com", physical_id, self.region)),
                );
                attributes.insert("Endpoint.Port".to_string(), json!("3306"));
            }
            ResourceType::Instance => {
                attributes.insert(
                    "PrivateDnsName".to_string(),
                    json!(format!("ip-{}.{}.compute.internal", physical_id, self.region)),
                );
            }
            _ => {}
        }
        attributes
    }
}

#[async_trait]
impl CloudProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create(&self, request: &CreateRequest) -> Result<ProvisionedResource> {
        let mut inner = self.inner.lock().await;

        if inner.fail_on.contains(&request.logical_id) {
            return Err(CloudError::ApiError(format!(
                "injected failure creating {}",
                request.logical_id
            )));
        }

        if let Some(existing) = inner.resources.get(&request.logical_id) {
            tracing::debug!(logical_id = %request.logical_id, "Resource already exists");
            return Ok(existing.clone());
        }

        inner.counter += 1;
        let physical_id = format!(
            "{}{:012x}",
            request.resource_type.id_prefix(),
            inner.counter
        );
        let provisioned = ProvisionedResource {
            logical_id: request.logical_id.clone(),
            resource_type: request.resource_type,
            arn: self.arn(request.resource_type, &physical_id),
            attributes: self.attributes(request.resource_type, &physical_id),
            physical_id,
        };

        inner
            .resources
            .insert(request.logical_id.clone(), provisioned.clone());
        inner
            .requests
            .insert(request.logical_id.clone(), request.clone());
        Ok(provisioned)
    }

    async fn update(
        &self,
        current: &ProvisionedResource,
        request: &CreateRequest,
    ) -> Result<ProvisionedResource> {
        let mut inner = self.inner.lock().await;

        if inner.fail_on.contains(&request.logical_id) {
            return Err(CloudError::ApiError(format!(
                "injected failure updating {}",
                request.logical_id
            )));
        }

        let existing = inner
            .resources
            .get(&current.logical_id)
            .cloned()
            .ok_or_else(|| CloudError::ResourceNotFound(current.logical_id.clone()))?;
        inner
            .requests
            .insert(request.logical_id.clone(), request.clone());
        inner.updated.push(request.logical_id.clone());
        Ok(existing)
    }

    async fn describe(&self, logical_id: &str) -> Result<Option<ProvisionedResource>> {
        Ok(self.inner.lock().await.resources.get(logical_id).cloned())
    }

    async fn delete(&self, resource: &ProvisionedResource, removal: RemovalPolicy) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.resources.remove(&resource.logical_id).is_none() {
            return Err(CloudError::ResourceNotFound(resource.logical_id.clone()));
        }
        if removal == RemovalPolicy::Snapshot {
            inner.snapshots.push(resource.logical_id.clone());
        }
        inner.deleted.push(resource.logical_id.clone());
        Ok(())
    }

    async fn lookup(&self, key: &str) -> Result<String> {
        self.lookups
            .get(key)
            .cloned()
            .ok_or_else(|| CloudError::Lookup(format!("no value for {}", key)))
    }
}

/// Secret store that keeps generated values to itself
pub struct MemorySecretStore {
    region: String,
    account: String,
    secrets: Mutex<BTreeMap<String, StoredSecret>>,
}

struct StoredSecret {
    reference: SecretRef,
    #[allow(dead_code)]
    value: String,
}

impl MemorySecretStore {
    pub fn new(region: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account: account.into(),
            secrets: Mutex::new(BTreeMap::new()),
        }
    }

    /// Store that knows every secret recorded in `state`
    ///
    /// The original values are gone; only the references are restored.
    pub fn from_state(region: impl Into<String>, account: impl Into<String>, state: &StackState) -> Self {
        let secrets = state
            .resources
            .iter()
            .filter(|(_, r)| r.resource_type == ResourceType::Secret)
            .map(|(id, r)| {
                let reference = SecretRef {
                    id: r.physical_id.clone(),
                    arn: r.arn.clone(),
                };
                (
                    id.clone(),
                    StoredSecret {
                        reference,
                        value: String::new(),
                    },
                )
            })
            .collect();
        Self {
            region: region.into(),
            account: account.into(),
            secrets: Mutex::new(secrets),
        }
    }

    pub async fn len(&self) -> usize {
        self.secrets.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, secret: &SecretRef) -> bool {
        self.secrets
            .lock()
            .await
            .values()
            .any(|s| &s.reference == secret)
    }

    fn generate(request: &SecretRequest, seed: usize) -> String {
        let length = request.generate["PasswordLength"].as_u64().unwrap_or(30) as usize;
        let excluded = request.generate["ExcludeCharacters"]
            .as_str()
            .unwrap_or_default();
        let alphabet: Vec<char> = ('!'..='~').filter(|c| !excluded.contains(*c)).collect();
        if alphabet.is_empty() {
            return String::new();
        }
        (0..length)
            .map(|i| alphabet[(i * 31 + seed * 17) % alphabet.len()])
            .collect()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn create_secret(&self, logical_id: &str, request: &SecretRequest) -> Result<SecretRef> {
        let mut secrets = self.secrets.lock().await;
        if let Some(existing) = secrets.get(logical_id) {
            return Ok(existing.reference.clone());
        }

        let id = format!("{}-{:06x}", logical_id, secrets.len() + 1);
        let reference = SecretRef {
            arn: format!(
                "arn:aws:secretsmanager:{}:{}:secret:{}",
                self.region, self.account, id
            ),
            id,
        };
        let value = Self::generate(request, secrets.len());
        secrets.insert(
            logical_id.to_string(),
            StoredSecret {
                reference: reference.clone(),
                value,
            },
        );
        Ok(reference)
    }

    async fn delete_secret(&self, secret: &SecretRef) -> Result<()> {
        let mut secrets = self.secrets.lock().await;
        let key = secrets
            .iter()
            .find(|(_, s)| &s.reference == secret)
            .map(|(k, _)| k.clone())
            .ok_or_else(|| CloudError::Secret(format!("unknown secret {}", secret.id)))?;
        secrets.remove(&key);
        Ok(())
    }
}
