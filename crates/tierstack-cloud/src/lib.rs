//! tierstack cloud
//!
//! Turns a synthesized resource graph into provisioned resources.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  tierstack CLI                   │
//! │          (plan / apply / destroy)                │
//! └─────────────────┬───────────────────────────────┘
//!                   │ ResourceGraph
//! ┌─────────────────▼───────────────────────────────┐
//! │               tierstack-cloud                    │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  Deployer: levels, token resolution      │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │CloudProvider │  │  State Mgmt  │            │
//! │  │ SecretStore  │  │ .tierstack/  │            │
//! │  └──────────────┘  └──────────────┘            │
//! └───────┬─────────────────────────────────────────┘
//!         │
//! ┌───────▼───────┐
//! │    memory     │
//! │   provider    │
//! └───────────────┘
//! ```

pub mod action;
pub mod deployer;
pub mod error;
pub mod memory;
pub mod provider;
pub mod resolve;
pub mod state;

// Re-exports
pub use action::{Action, ActionResult, ActionType, ApplyResult, Plan, PlanSummary};
pub use deployer::Deployer;
pub use error::{CloudError, Result};
pub use memory::{MemoryProvider, MemorySecretStore};
pub use provider::{
    CloudProvider, CreateRequest, ProvisionedResource, RetryConfig, SecretRef, SecretRequest,
    SecretStore,
};
pub use state::{ResourceState, ResourceStatus, StackState, StateLock, StateManager};
