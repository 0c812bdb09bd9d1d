//! Provider and secret-store traits

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tierstack_core::{RemovalPolicy, ResourceType};

/// Cloud provider resource API
///
/// Creates must be idempotent by logical id: creating a logical id that
/// already exists returns the existing resource instead of a duplicate.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Returns the provider name (e.g., "memory")
    fn name(&self) -> &str;

    /// Create a resource from fully resolved properties
    async fn create(&self, request: &CreateRequest) -> Result<ProvisionedResource>;

    /// Apply changed properties to an existing resource, keeping its identity
    async fn update(
        &self,
        current: &ProvisionedResource,
        request: &CreateRequest,
    ) -> Result<ProvisionedResource>;

    /// Current state of a resource, if the provider knows it
    async fn describe(&self, logical_id: &str) -> Result<Option<ProvisionedResource>>;

    /// Remove a resource; `Snapshot` asks for a final snapshot first
    async fn delete(&self, resource: &ProvisionedResource, removal: RemovalPolicy) -> Result<()>;

    /// Resolve an external value such as the latest machine image
    async fn lookup(&self, key: &str) -> Result<String>;
}

/// Storage backend for generated credentials
///
/// The generated value stays inside the store; callers only ever see the
/// reference.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn create_secret(&self, logical_id: &str, request: &SecretRequest) -> Result<SecretRef>;

    async fn delete_secret(&self, secret: &SecretRef) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub logical_id: String,
    pub resource_type: ResourceType,

    /// Properties with every token resolved
    pub properties: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedResource {
    pub logical_id: String,
    pub resource_type: ResourceType,
    pub physical_id: String,
    pub arn: String,

    /// Attributes addressable through `Fn::GetAtt`
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl ProvisionedResource {
    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes.get(name)
    }
}

/// What to generate for a secret
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretRequest {
    pub description: String,

    /// Generation parameters (template, length, excluded characters)
    pub generate: serde_json::Value,
}

impl SecretRequest {
    /// Build from the property bag of a secret resource
    pub fn from_properties(properties: &serde_json::Value) -> Self {
        Self {
            description: properties["Description"].as_str().unwrap_or_default().to_string(),
            generate: properties["GenerateSecretString"].clone(),
        }
    }
}

/// Opaque handle to a stored credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    pub id: String,
    pub arn: String,
}

/// Retry behaviour a real provider applies to its API calls
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: std::time::Duration,

    /// Maximum delay between retries
    pub max_delay: std::time::Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> std::time::Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        self.initial_delay.mul_f64(factor).min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: std::time::Duration::from_secs(1),
            max_delay: std::time::Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}
